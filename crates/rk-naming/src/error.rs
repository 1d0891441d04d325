//! Error types of the naming subsystem

use std::fmt;

use rk_cad::CadError;
use thiserror::Error;
use uuid::Uuid;

use crate::shape_id::FeatureId;

/// Expected failure of a mutation
///
/// Raised inside a transaction when an operation fails in a way the user can
/// recover from. `atomic` rolls back and suppresses it.
#[derive(Debug, Clone, Error)]
pub enum RollbackError {
    #[error("Operation produced an empty result: {0}")]
    EmptyResult(String),

    #[error("Feature {feature_id} failed: {reason}")]
    FeatureFailed { feature_id: FeatureId, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Errors of the naming subsystem
#[derive(Debug, Clone, Error)]
pub enum NamingError {
    #[error("CAD kernel error: {0}")]
    Cad(#[from] CadError),

    #[error("Rolled back: {0}")]
    Rollback(#[from] RollbackError),

    #[error("Body not found: {0}")]
    BodyNotFound(Uuid),

    #[error("Feature not found: {0}")]
    FeatureNotFound(FeatureId),

    #[error("Invalid feature: {0}")]
    InvalidFeature(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

/// Result type for naming operations
pub type NamingResult<T> = Result<T, NamingError>;

/// Classified result of a kernel operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// The kernel rejected the inputs as producing no valid solid
    EmptyResult(String),
    /// Any other kernel failure
    KernelError(String),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

impl From<CadError> for OperationOutcome {
    fn from(err: CadError) -> Self {
        match err {
            CadError::EmptyResult(msg) => OperationOutcome::EmptyResult(msg),
            other => OperationOutcome::KernelError(other.to_string()),
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Success => write!(f, "success"),
            OperationOutcome::EmptyResult(msg) => write!(f, "empty result: {}", msg),
            OperationOutcome::KernelError(msg) => write!(f, "kernel error: {}", msg),
        }
    }
}
