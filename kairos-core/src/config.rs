#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! All tuning knobs that used to be process-wide in older VDF codebases are
//! plain per-session fields here; nothing in the workspace mutates global
//! state.

use serde::{Deserialize, Serialize};

use crate::error::{VdfError, VdfResult};

/// Default checkpoint segment size in iterations.
pub const DEFAULT_SEGMENT_SIZE: u64 = 65_536;

/// Default wall-clock interval between progress callbacks, in milliseconds.
pub const DEFAULT_CALLBACK_INTERVAL_MS: u32 = 1_000;

/// Iteration budget handed to the fast squaring path per batch.
pub const DEFAULT_SQUARE_BATCH: u64 = 32;

/// Default cap on GCD iterations inside one fast-path batch. Generously above
/// anything a healthy 2048-bit input needs; the fast path bails out to the
/// slow path when it is exceeded.
pub const DEFAULT_GCD_ITERATION_CAP: u64 = 1_000_000;

/// Per-session configuration for the VDF engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VdfConfig {
    /// Worker threads available to the session. The squaring loop itself is
    /// strictly sequential and occupies one of them.
    pub num_threads: u32,

    /// Threads that may be used for proof generation.
    pub proof_threads: u32,

    /// Use the batched fast squaring path; the slow path is always available
    /// as the correctness reference.
    pub enable_fast_path: bool,

    /// Checkpoint segment size in iterations; `0` disables checkpoints.
    pub segment_size: u64,

    /// Attach a proof to each checkpoint beyond the initial one.
    pub streaming_proofs: bool,

    /// Minimum wall-clock distance between two progress callbacks.
    pub callback_interval_ms: u32,

    /// GCD iteration cap for one fast-path batch; exceeding it forces a
    /// fall back to the slow path. `0` disables the fast path entirely.
    pub gcd_iteration_cap: u64,
}

impl Default for VdfConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);
        Self {
            num_threads: threads,
            proof_threads: (threads / 2).max(1),
            enable_fast_path: true,
            segment_size: DEFAULT_SEGMENT_SIZE,
            streaming_proofs: true,
            callback_interval_ms: DEFAULT_CALLBACK_INTERVAL_MS,
            gcd_iteration_cap: DEFAULT_GCD_ITERATION_CAP,
        }
    }
}

impl VdfConfig {
    /// Check internal consistency before a session accepts the configuration.
    pub fn validate(&self) -> VdfResult<()> {
        if self.num_threads == 0 {
            return Err(VdfError::InvalidConfig);
        }
        if self.proof_threads > self.num_threads {
            return Err(VdfError::InvalidConfig);
        }
        Ok(())
    }
}
