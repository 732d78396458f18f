//! User-defined functor registry and call bridge.
//!
//! Functors arrive resolved: the embedder registers a function pointer
//! plus its type descriptor under the RAM-visible name, and node
//! generation links call sites straight to the registered entry.
//!
//! Two flavors exist. *Stateless* functors see typed native values:
//! symbol arguments are decoded to owned strings before the call and a
//! returned symbol is re-interned afterwards. *Stateful* functors see the
//! symbol and record tables plus raw domain words, and do their own
//! encoding; user-defined aggregators are stateful functors of arity 2
//! folded over the accumulator.

use std::collections::HashMap;

use stratal_ram::{Domain, TypeTag};

use crate::error::EvalError;
use crate::record::RecordTable;
use crate::symbol::SymbolTable;

/// A marshaled argument or return value of a stateless functor.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Symbol(String),
}

pub type StatelessFn = fn(&[NativeValue]) -> NativeValue;
pub type StatefulFn = fn(&SymbolTable, &RecordTable, &[Domain]) -> Domain;

pub enum Functor {
    Stateless {
        arg_types: Vec<TypeTag>,
        return_type: TypeTag,
        func: StatelessFn,
    },
    Stateful {
        arity: usize,
        func: StatefulFn,
    },
}

impl Functor {
    pub fn arity(&self) -> usize {
        match self {
            Functor::Stateless { arg_types, .. } => arg_types.len(),
            Functor::Stateful { arity, .. } => *arity,
        }
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self, Functor::Stateful { .. })
    }
}

#[derive(Default)]
pub struct FunctorRegistry {
    functors: HashMap<String, Functor>,
}

impl FunctorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stateless functor. Record and ADT tags cannot cross the
    /// bridge and are rejected here rather than at call time.
    pub fn register_stateless(
        &mut self,
        name: impl Into<String>,
        arg_types: Vec<TypeTag>,
        return_type: TypeTag,
        func: StatelessFn,
    ) -> Result<(), EvalError> {
        let name = name.into();
        for tag in arg_types.iter().chain(std::iter::once(&return_type)) {
            if matches!(tag, TypeTag::Record | TypeTag::Adt) {
                return Err(EvalError::UnsupportedFunctorType(name));
            }
        }
        self.functors.insert(name, Functor::Stateless { arg_types, return_type, func });
        Ok(())
    }

    pub fn register_stateful(&mut self, name: impl Into<String>, arity: usize, func: StatefulFn) {
        self.functors.insert(name.into(), Functor::Stateful { arity, func });
    }

    pub fn resolve(&self, name: &str) -> Option<&Functor> {
        self.functors.get(name)
    }
}
