#![forbid(unsafe_code)]

//! Common error types for Kairos crates.
//!
//! Every user-facing operation returns one of the kinds below; the numeric
//! codes are part of the external contract and must stay stable.

use thiserror::Error;

/// Errors raised by the class-group VDF engine.
#[derive(Debug, Error)]
pub enum VdfError {
    /// Configuration rejected before any work started.
    #[error("invalid configuration")]
    InvalidConfig,

    /// Malformed caller input (challenge, iteration count, bit length, ...).
    #[error("invalid parameters")]
    InvalidParameters,

    /// Allocation failure while preparing buffers.
    #[error("memory allocation failed")]
    Memory,

    /// The computation could not run to completion (includes wait timeouts).
    #[error("computation failed")]
    ComputationFailed,

    /// Worker thread could not be spawned or joined.
    #[error("thread error")]
    ThreadError,

    /// Discriminant is not negative, not ≡ 1 (mod 4), or otherwise unusable.
    #[error("invalid discriminant")]
    InvalidDiscriminant,

    /// Form coefficients do not match the discriminant.
    #[error("invalid form")]
    InvalidForm,

    /// Proof serialisation or exponentiation failed.
    #[error("proof generation failed")]
    ProofGenerationFailed,

    /// Explicit verification failure (only used where a caller asked for a
    /// hard error instead of a boolean verdict).
    #[error("verification failed")]
    VerificationFailed,

    /// Operation requires state the session does not have yet.
    #[error("not initialized")]
    NotInitialized,

    /// A computation is already in progress on this session.
    #[error("already running")]
    AlreadyRunning,
}

impl VdfError {
    /// Stable numeric code for FFI surfaces and process exit statuses.
    /// Success is `0` by absence of an error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            VdfError::InvalidConfig => -1,
            VdfError::InvalidParameters => -2,
            VdfError::Memory => -3,
            VdfError::ComputationFailed => -4,
            VdfError::ThreadError => -5,
            VdfError::InvalidDiscriminant => -6,
            VdfError::InvalidForm => -7,
            VdfError::ProofGenerationFailed => -8,
            VdfError::VerificationFailed => -9,
            VdfError::NotInitialized => -10,
            VdfError::AlreadyRunning => -11,
        }
    }
}

/// Errors raised by the RSW timelock solver.
///
/// Batch solving never fails wholesale on bad input: a malformed instance is
/// reported in its own result slot and the rest of the batch proceeds.
#[derive(Debug, Error)]
pub enum TimelockError {
    /// No usable device for the requested id.
    #[error("device {0} unavailable")]
    DeviceUnavailable(i32),

    /// A puzzle component was not valid lower-case even-length hex.
    #[error("invalid hex input: {0}")]
    InvalidHexInput(String),

    /// The device rejected or aborted a launch.
    #[error("device failure: {0}")]
    DeviceFailure(String),
}

/// Convenient alias for VDF results throughout Kairos crates.
pub type VdfResult<T> = Result<T, VdfError>;

/// Convenient alias for timelock results.
pub type TimelockResult<T> = Result<T, TimelockError>;
