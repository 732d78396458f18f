//! Evaluator errors.
//!
//! Only structural defects surface as `Err`: a RAM tree referencing
//! unknown relations or functors, a search no advised index can answer,
//! an operation issued against the wrong representation. They are all
//! detected while generating the node tree, before execution starts.
//! At runtime, operation failure travels as the zero domain word and
//! recoverable oddities (bad regex, out-of-range substring) warn on
//! standard error and continue with a defined default.

use stratal_ram::SearchSignature;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("RAM program references unknown relation `{0}`")]
    UnknownRelation(String),

    #[error("no advised index on `{relation}` answers search signature {signature:?}")]
    NoIndexForSearch { relation: String, signature: SearchSignature },

    #[error("cannot find user-defined operator `{0}`")]
    UnresolvedFunctor(String),

    #[error("user-defined operator `{name}` called with {actual} arguments, declared {expected}")]
    FunctorArity { name: String, expected: usize, actual: usize },

    #[error("record and ADT arguments are not supported by the functor bridge (`{0}`)")]
    UnsupportedFunctorType(String),

    #[error("user-defined aggregator `{0}` must be stateful")]
    StatelessAggregator(String),

    #[error("erase requires a btree-with-delete relation, `{0}` is not one")]
    EraseUnsupported(String),

    #[error("merge-extend requires equivalence relations (`{source_rel}`, `{target}`)")]
    MergeExtendUnsupported { source_rel: String, target: String },

    #[error("call to unknown subroutine `{0}`")]
    UnknownSubroutine(String),

    #[error("unbounded pattern coordinate evaluated outside a search pattern")]
    UndefinedOutsidePattern,

    #[error("{0} is only valid inside a query")]
    OutsideQuery(String),

    #[error("join-size estimation on `{0}` requires constant bindings")]
    EstimateConstant(String),

    #[error("pattern arity mismatch on `{relation}`: expected {expected}, got {actual}")]
    PatternArity { relation: String, expected: usize, actual: usize },
}

/// Unrecoverable failure outside the structural class: print the
/// diagnostic and terminate the run. Used for reader/writer failures,
/// where continuing would evaluate against missing data.
pub(crate) fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
