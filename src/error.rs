use crate::core::types::TypeInfo;
use thiserror::Error;

/// Errors produced while type-checking a wire.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComposeError {
    #[error(
        "Could not find a matching input type, shard: {shard} (position {position}), expected one of {expected:?}, found instead {found}"
    )]
    InputTypeMismatch {
        shard: String,
        position: usize,
        expected: Vec<TypeInfo>,
        found: TypeInfo,
    },

    #[error("Shard {shard} (position {position}) has multiple output types and no compose hook")]
    AmbiguousOutput { shard: String, position: usize },

    #[error("Required variable not found: {name}, shard: {shard} (position {position})")]
    MissingVariable {
        name: String,
        shard: String,
        position: usize,
    },

    #[error(
        "Required variable {name} has type {found} but shard {shard} (position {position}) expects {expected}"
    )]
    VariableTypeMismatch {
        name: String,
        shard: String,
        position: usize,
        expected: TypeInfo,
        found: TypeInfo,
    },

    #[error(
        "Variable {name} is already exposed as {existing}, shard {shard} (position {position}) tried to expose it as {requested}"
    )]
    IncompatibleExposure {
        name: String,
        shard: String,
        position: usize,
        existing: TypeInfo,
        requested: TypeInfo,
    },

    #[error("Variable {name} is protected, shard {shard} (position {position}) cannot expose it")]
    ProtectedVariable {
        name: String,
        shard: String,
        position: usize,
    },

    #[error("Parameter {param} of shard {shard} (position {position}): {reason}")]
    Parameter {
        shard: String,
        position: usize,
        param: String,
        reason: String,
    },

    #[error("Parameter {param} of shard {shard} (position {position}) holds a wire that failed to compose: {source}")]
    NestedWire {
        shard: String,
        position: usize,
        param: String,
        #[source]
        source: Box<ComposeError>,
    },

    #[error("Wire {0} is already being composed")]
    Recursive(String),

    #[error("A sub-wire of {0} stayed locked by another thread")]
    Locked(String),

    #[error("Error composing shard: {shard} (position {position}), wire: {wire}, error: {message}")]
    Shard {
        shard: String,
        position: usize,
        wire: String,
        message: String,
    },

    #[error("Channel {name}: {reason}")]
    Channel { name: String, reason: String },

    #[error("{0}")]
    Message(String),
}

impl ComposeError {
    /// Plain error raised from a compose hook. The composer annotates it with
    /// the unit's position before surfacing it.
    pub fn message(msg: impl Into<String>) -> Self {
        ComposeError::Message(msg.into())
    }
}

/// Errors returned by a unit during warmup or activation. They fail the wire.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActivationError {
    #[error("{0}")]
    Failed(String),

    #[error("Variable not found: {0}")]
    MissingVariable(String),

    #[error("Variable {0} is protected")]
    ProtectedVariable(String),

    #[error("Type error: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Integer overflow")]
    Overflow,

    #[error("Nested wire {wire} failed: {message}")]
    NestedWire { wire: String, message: String },

    #[error("Wire {0} was activated before being composed")]
    NotComposed(String),
}

/// Errors from parameter assignment.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("Parameter index {0} is out of range")]
    OutOfRange(usize),

    #[error("Parameter {name} does not accept {found}")]
    InvalidValue { name: String, found: String },
}

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Wire {0} is already scheduled")]
    AlreadyScheduled(String),

    #[error("Wire {wire} failed to compose: {source}")]
    Compose {
        wire: String,
        #[source]
        source: ComposeError,
    },

    #[error("Wire {wire} failed to warm up: {source}")]
    Warmup {
        wire: String,
        #[source]
        source: ActivationError,
    },

    #[error("Failed to start the worker pool: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Mesh {0} has been terminated")]
    Terminated(String),
}

/// Error raised by the front-end boundary, carrying the source location.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (line {line}, column {column})")]
pub struct EvalError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl EvalError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}
