//! Stratal interpreter: a tree-walking evaluator for RAM programs.
//!
//! The engine takes a compiled RAM translation unit, mirrors it once into
//! an executable shadow-node tree with resolved relation handles, view
//! slots and pre-compiled search bounds, then drives that tree against
//! indexed in-memory relations until the outer fixed-point loop converges.
//!
//! Key pieces:
//! 1. **Interning**: strings and record tuples become dense ids through
//!    concurrent tables ([`SymbolTable`], [`RecordTable`]).
//! 2. **Relations and indexes**: duplicate-free tuple sets, each
//!    materialized under the column orders advised by its `IndexCluster`;
//!    scans are cursor-based and stable under concurrent insertion.
//! 3. **Dispatch**: one total `execute(node, context)` function; success
//!    and failure travel as the zero/non-zero domain word, never as
//!    unwinding.
//! 4. **Parallelism**: `Parallel*` nodes fan out over partitioned cursors
//!    with one cloned [`Context`] per worker and join before returning.

pub mod context;
pub mod engine;
pub mod error;
mod eval;
pub mod functor;
pub mod generator;
pub mod index;
pub mod io;
pub mod node;
pub mod parallel;
pub mod profile;
pub mod record;
pub mod regex_cache;
pub mod relation;
pub mod symbol;
pub mod tuple;
pub mod view;
pub mod watch;

pub use context::Context;
pub use engine::{Engine, EngineConfig, ProfileOptions};
pub use error::EvalError;
pub use functor::{Functor, FunctorRegistry, NativeValue};
pub use io::{IoRegistry, Reader, Writer};
pub use profile::{ProfileEvent, ProfileLog};
pub use record::RecordTable;
pub use regex_cache::RegexCache;
pub use relation::{Relation, RelationCell};
pub use symbol::SymbolTable;
pub use tuple::Row;
pub use view::View;
