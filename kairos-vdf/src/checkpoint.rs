#![forbid(unsafe_code)]

//! Streaming checkpoints.
//!
//! Every segment boundary yields a `(iteration, form)` pair; with streaming
//! proofs enabled each checkpoint beyond the first also carries a
//! Wesolowski proof covering the segment since the previous checkpoint.
//! Records serialise as v3 (segment, with proof body) and v4 (initial,
//! form only).

use serde::{Deserialize, Serialize};

use kairos_core::error::{VdfError, VdfResult};

use crate::discriminant::Discriminant;
use crate::form::QuadraticForm;
use crate::wesolowski;

/// Version byte of a segment checkpoint record.
pub const SEGMENT_RECORD_VERSION: u8 = 0x03;

/// Version byte of the initial checkpoint record.
pub const INITIAL_RECORD_VERSION: u8 = 0x04;

/// One stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Absolute iteration this checkpoint was cut at.
    pub iteration: u64,
    /// VDF state at that iteration.
    pub form: QuadraticForm,
    /// Serialised segment record (v3), when streaming proofs are enabled.
    /// The initial checkpoint stores no proof.
    pub proof: Option<Vec<u8>>,
}

impl Checkpoint {
    /// The initial checkpoint at iteration 0.
    #[must_use]
    pub fn initial(form: QuadraticForm) -> Self {
        Checkpoint {
            iteration: 0,
            form,
            proof: None,
        }
    }
}

/// Build the v3 record for the segment `(prev_form → form]` ending at
/// `iteration`: the proof covers `segment_length` squarings.
pub fn encode_segment_record(
    disc: &Discriminant,
    prev_form: &QuadraticForm,
    form: &QuadraticForm,
    iteration: u64,
    segment_length: u64,
    recursion_level: u8,
) -> VdfResult<Vec<u8>> {
    let proof = wesolowski::prove(disc, prev_form, form, segment_length, recursion_level)?;
    let mut out = Vec::with_capacity(9 + proof.len());
    out.push(SEGMENT_RECORD_VERSION);
    out.extend_from_slice(&iteration.to_be_bytes());
    // the proof body is the v2 layout minus its version byte
    out.extend_from_slice(&proof[1..]);
    Ok(out)
}

/// Build the v4 record for the initial checkpoint.
#[must_use]
pub fn encode_initial_record(iteration: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(INITIAL_RECORD_VERSION);
    out.extend_from_slice(&iteration.to_be_bytes());
    out
}

/// Split a v3 record into its absolute iteration and the embedded proof in
/// v2 shape. Structural only.
#[must_use]
pub fn parse_segment_record(record: &[u8]) -> Option<(u64, Vec<u8>)> {
    if record.len() < 9 || record[0] != SEGMENT_RECORD_VERSION {
        return None;
    }
    let mut iter_buf = [0u8; 8];
    iter_buf.copy_from_slice(&record[1..9]);
    let mut proof = Vec::with_capacity(record.len() - 8);
    proof.push(wesolowski::PROOF_VERSION);
    proof.extend_from_slice(&record[9..]);
    Some((u64::from_be_bytes(iter_buf), proof))
}

/// Verify the proof of one segment: `form = prev_form^(2^segment_length)`.
#[must_use]
pub fn verify_segment(
    disc: &Discriminant,
    prev_form: &QuadraticForm,
    form: &QuadraticForm,
    segment_length: u64,
    recursion_level: u8,
    record: &[u8],
) -> bool {
    let Some((_, proof)) = parse_segment_record(record) else {
        return false;
    };
    wesolowski::verify(disc, prev_form, form, segment_length, recursion_level, &proof)
}

/// Insertion-ordered checkpoint storage with strictly increasing
/// iterations.
#[derive(Debug, Default)]
pub struct CheckpointStream {
    entries: Vec<Checkpoint>,
}

impl CheckpointStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a checkpoint. Rejects out-of-order iterations.
    pub fn push(&mut self, checkpoint: Checkpoint) -> VdfResult<()> {
        if let Some(last) = self.entries.last() {
            if checkpoint.iteration <= last.iteration {
                return Err(VdfError::InvalidParameters);
            }
        }
        self.entries.push(checkpoint);
        Ok(())
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    /// All checkpoints with `lo ≤ iteration ≤ hi`, in iteration order,
    /// truncated to `capacity` entries.
    #[must_use]
    pub fn between(&self, lo: u64, hi: u64, capacity: usize) -> Vec<Checkpoint> {
        self.entries
            .iter()
            .filter(|cp| cp.iteration >= lo && cp.iteration <= hi)
            .take(capacity)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entries.iter()
    }
}
