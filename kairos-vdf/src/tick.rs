#![forbid(unsafe_code)]

//! Tick certificates over the checkpoint cadence.
//!
//! The node's external epoch is the *tick*: a fixed span of VDF iterations.
//! A [`TickLedger`] consumes the forms the session publishes, maintains the
//! hash chain `h_i = H(i ‖ a ‖ b ‖ c ‖ h_prev [‖ data])` from
//! `H("genesis")`, batches data submitted for timestamping into a Merkle
//! tree per tick, and cuts a [`TickCertificate`] at every tick boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use kairos_core::error::{VdfError, VdfResult};

use crate::form::QuadraticForm;

/// Data bound into the VDF transcript at a specific iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimestampedData {
    pub iteration: u64,
    pub data: Vec<u8>,
    pub data_hash: [u8; 32],
}

impl TimestampedData {
    #[must_use]
    pub fn new(iteration: u64, data: Vec<u8>) -> Self {
        let data_hash = Sha256::digest(&data).into();
        TimestampedData {
            iteration,
            data,
            data_hash,
        }
    }
}

/// Certificate cut at a tick boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickCertificate {
    pub tick_number: u64,
    pub start_iteration: u64,
    pub end_iteration: u64,
    /// VDF state at the end of the tick.
    pub form: QuadraticForm,
    /// Hash chain value at the end of the tick.
    pub hash_chain: [u8; 32],
    /// Merkle root over the data timestamped inside this tick; all zero
    /// when the tick carried none.
    pub data_merkle_root: [u8; 32],
    /// Segment proof covering the tick, when the session produced one.
    pub proof: Option<Vec<u8>>,
}

/// SHA-256 Merkle root; odd nodes are paired with themselves, the empty
/// set hashes to all-zero.
#[must_use]
pub fn merkle_root(entries: &[TimestampedData]) -> [u8; 32] {
    if entries.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<[u8; 32]> = entries
        .iter()
        .map(|entry| {
            let mut hasher = Sha256::new();
            hasher.update(entry.iteration.to_le_bytes());
            hasher.update(entry.data_hash);
            hasher.finalize().into()
        })
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(if pair.len() > 1 { &pair[1] } else { &pair[0] });
                hasher.finalize().into()
            })
            .collect();
    }
    level[0]
}

/// Hash-chained tick ledger.
#[derive(Clone, Debug)]
pub struct TickLedger {
    tick_size: u64,
    hash_chain: [u8; 32],
    last_iteration: u64,
    /// Submitted but not yet stamped with an iteration.
    pending: Vec<TimestampedData>,
    /// Stamped entries belonging to the tick in progress.
    current_data: Vec<TimestampedData>,
    certificates: BTreeMap<u64, TickCertificate>,
}

impl TickLedger {
    /// Ledger with `h_0 = H("genesis")`. `tick_size` must be non-zero.
    pub fn new(tick_size: u64) -> VdfResult<Self> {
        if tick_size == 0 {
            return Err(VdfError::InvalidParameters);
        }
        let genesis = Sha256::digest(b"genesis").into();
        Ok(TickLedger {
            tick_size,
            hash_chain: genesis,
            last_iteration: 0,
            pending: Vec::new(),
            current_data: Vec::new(),
            certificates: BTreeMap::new(),
        })
    }

    /// Buffer data for inclusion at the next observed iteration.
    pub fn submit(&mut self, data: Vec<u8>) {
        // iteration is assigned when the next form observation lands
        self.pending.push(TimestampedData::new(0, data));
    }

    /// Feed one observed `(iteration, form)` pair, in increasing iteration
    /// order. Buffered data is stamped with this iteration. Cuts a
    /// certificate whenever a tick boundary is crossed.
    pub fn observe(
        &mut self,
        iteration: u64,
        form: &QuadraticForm,
        proof: Option<&[u8]>,
    ) -> VdfResult<Option<TickCertificate>> {
        if iteration <= self.last_iteration && iteration != 0 {
            return Err(VdfError::InvalidParameters);
        }

        let mut stamped = std::mem::take(&mut self.pending);
        for entry in &mut stamped {
            entry.iteration = iteration;
        }

        // h ← H(i ‖ a ‖ b ‖ c ‖ h_prev ‖ data...)
        let mut hasher = Sha256::new();
        hasher.update(iteration.to_le_bytes());
        hasher.update(form.a.to_str_radix(16).as_bytes());
        hasher.update(form.b.to_str_radix(16).as_bytes());
        hasher.update(form.c.to_str_radix(16).as_bytes());
        hasher.update(self.hash_chain);
        for entry in &stamped {
            hasher.update(entry.data_hash);
        }
        self.hash_chain = hasher.finalize().into();

        self.current_data.extend(stamped);

        let previous = self.last_iteration;
        self.last_iteration = iteration;

        if iteration > 0 && iteration % self.tick_size == 0 {
            let tick_number = (iteration - 1) / self.tick_size;
            let certificate = TickCertificate {
                tick_number,
                start_iteration: tick_number * self.tick_size,
                end_iteration: iteration,
                form: form.clone(),
                hash_chain: self.hash_chain,
                data_merkle_root: merkle_root(&self.current_data),
                proof: proof.map(<[u8]>::to_vec),
            };
            self.current_data.clear();
            debug!(tick_number, previous, iteration, "tick certificate cut");
            self.certificates.insert(tick_number, certificate.clone());
            return Ok(Some(certificate));
        }
        Ok(None)
    }

    /// Current hash chain head.
    #[must_use]
    pub fn hash_chain(&self) -> [u8; 32] {
        self.hash_chain
    }

    /// Tick the ledger is currently inside.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.last_iteration / self.tick_size
    }

    /// Certificate for one tick, if it was cut.
    #[must_use]
    pub fn certificate(&self, tick_number: u64) -> Option<&TickCertificate> {
        self.certificates.get(&tick_number)
    }

    /// All certificates in tick order.
    #[must_use]
    pub fn certificates(&self) -> Vec<TickCertificate> {
        self.certificates.values().cloned().collect()
    }
}
