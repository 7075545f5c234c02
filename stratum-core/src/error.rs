//! Error types for Stratum operations

use thiserror::Error;

/// Configuration errors - fatal at setup, never silently defaulted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unrecognized interval spec: {spec}")]
    UnrecognizedInterval { spec: String },

    #[error("Job already scheduled: {name}")]
    DuplicateJob { name: String },
}

/// Validation errors - malformed caller input rejected at the boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Scheduled-job execution errors - recorded on the job, never fatal to
/// the scheduler loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job {name} failed: {reason}")]
    ActionFailed { name: String, reason: String },
}

/// Watchdog errors - probe or recovery failures against the backing store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("Liveness probe failed for {target}: {reason}")]
    ProbeFailed { target: String, reason: String },

    #[error("Recovery action failed for {target}: {reason}")]
    RecoveryFailed { target: String, reason: String },

    #[error("No recovery action configured for {target}")]
    NoRecoveryAction { target: String },
}

/// Store collaborator errors, surfaced through the narrow execute contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Store unreachable: {reason}")]
    Unreachable { reason: String },
}

/// Master error type for all Stratum errors.
#[derive(Debug, Clone, Error)]
pub enum StratumError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;

// =============================================================================
// TESTS
// =============================================================================
