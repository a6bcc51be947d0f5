//! Error taxonomy for the script bridge.
//!
//! Only [`RegistrationError`] is fatal, and it can only happen before any
//! script runs. Everything else surfaces at the script call site and the
//! host logs it and moves on.

use crate::marshal::TypeTag;
use purr_core::ecs::{Entity, WorldError};
use thiserror::Error;

/// Raised while building the call table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("internal call '{name}' is already registered")]
    Duplicate { name: String },

    #[error("internal call '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no internal call named '{name}'")]
    UnknownFunction { name: String },

    #[error("no loaded script module defines class '{class}'")]
    UnknownClass { class: String },

    #[error("module '{module}' uses wire layout v{actual}, the engine uses v{expected}")]
    LayoutVersion {
        module: String,
        expected: u32,
        actual: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("'{function}' expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{function}' argument {index}: expected {expected}, got {actual}")]
    TypeMismatch {
        function: String,
        index: usize,
        expected: TypeTag,
        actual: TypeTag,
    },

    #[error("'{function}' returned {actual}, declared {expected}")]
    ReturnMismatch {
        function: String,
        expected: TypeTag,
        actual: TypeTag,
    },

    #[error("string is not representable as UTF-8: {reason}")]
    Encoding { reason: String },

    #[error("{value} is not representable as a finite float32")]
    FloatRange { value: String },

    #[error("string contains an interior NUL at byte {position}")]
    InteriorNul { position: usize },

    #[error("array pointer is null but length is {len}")]
    NullArray { len: usize },

    #[error("{layout} needs {expected} bytes, got {actual}")]
    StructSize {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("malformed script payload: {reason}")]
    Payload { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHandleError {
    #[error("script instance is not bound to an entity")]
    Unbound,

    #[error("entity {entity} was destroyed")]
    Destroyed { entity: Entity },

    #[error("entity handle {entity} is stale")]
    Stale { entity: Entity },
}

impl From<WorldError> for InvalidHandleError {
    fn from(err: WorldError) -> Self {
        match err {
            WorldError::NotAlive { entity } => InvalidHandleError::Stale { entity },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("cannot {operation} while {state}")]
    OutOfOrder {
        operation: &'static str,
        state: &'static str,
    },
}

/// Anything a single internal call or lifecycle hook can fail with.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    InvalidHandle(#[from] InvalidHandleError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("internal call '{function}' failed: {message}")]
    Native { function: String, message: String },

    #[error("script error in module '{module}': {message}")]
    Script { module: String, message: String },

    #[error("engine state is already borrowed by an internal call in progress")]
    Reentrant,
}

impl ScriptError {
    pub fn native(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Native {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn script(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Only registration failures abort the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Registration(_))
    }
}

pub type Result<T, E = ScriptError> = std::result::Result<T, E>;
