//! Error taxonomy.
//!
//! Construction errors are fatal to the function being built: no partial
//! [`Function`](crate::Function) is ever returned. Shape errors are detected
//! at the start of every evaluate call, before any instruction executes.
//! Numerical irregularities (NaN/Inf mid-sweep) are a diagnostic, not an
//! error — see [`Options::check_irregular`](crate::Options).

use thiserror::Error;

/// Errors raised while declaring and linearizing a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructError {
    /// An input vector contains an element that is not a plain symbol.
    #[error("input {index}, element {element}: inputs must be pure symbols")]
    NonSymbolicInput { index: usize, element: usize },

    /// The same symbol node is declared twice among the inputs.
    #[error("symbol `{name}` is declared more than once among the inputs")]
    DuplicateInput { name: String },

    /// Symbols reachable from the outputs that are not declared as inputs.
    ///
    /// The offending symbols are listed so callers can report or rebind them
    /// rather than guess at a generic failure.
    #[error("outputs depend on undeclared symbols: {}", names.join(", "))]
    FreeVariables { names: Vec<String> },

    /// A function must declare at least one output vector.
    #[error("function has no output vectors")]
    NoOutputs,
}

/// Errors raised when an evaluate call is shaped wrongly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Wrong number of input vectors.
    #[error("expected {expected} input vectors, got {got}")]
    InputCount { expected: usize, got: usize },

    /// An input vector has the wrong length.
    #[error("input {index}: expected {expected} values, got {got}")]
    InputShape {
        index: usize,
        expected: usize,
        got: usize,
    },

    /// A forward seed bundle does not match the declared input shapes.
    #[error("forward seed {dir}, input {index}: expected {expected} values, got {got}")]
    ForwardSeedShape {
        dir: usize,
        index: usize,
        expected: usize,
        got: usize,
    },

    /// An adjoint seed bundle does not match the declared output shapes.
    #[error("adjoint seed {dir}, output {index}: expected {expected} values, got {got}")]
    AdjointSeedShape {
        dir: usize,
        index: usize,
        expected: usize,
        got: usize,
    },

    /// Input or output index out of range for a sparsity or Jacobian query.
    #[error("no input/output pair ({iind}, {oind}): function has {n_in} inputs, {n_out} outputs")]
    NoSuchBlock {
        iind: usize,
        oind: usize,
        n_in: usize,
        n_out: usize,
    },
}
