//! Tuple rows.
//!
//! A row is a fixed-arity run of domain words. Arities are small (the
//! overwhelming majority of Datalog relations stay under five columns),
//! so rows live inline up to four words and spill to the heap above that.

use smallvec::SmallVec;
use stratal_ram::Domain;

/// One relation row. Cheap to clone at typical arities.
pub type Row = SmallVec<[Domain; 4]>;

/// Build a row from a slice.
#[inline]
pub fn row_from(values: &[Domain]) -> Row {
    SmallVec::from_slice(values)
}
