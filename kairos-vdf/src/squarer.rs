#![forbid(unsafe_code)]

//! Repeated squaring with a fast/slow split.
//!
//! The fast path attempts a whole batch of squarings under a GCD iteration
//! budget and may bail out; the slow path then performs exactly one
//! squaring, so the loop always advances. The split is a correctness
//! contract, not a tuning knob: fast-path output must agree with
//! NUDUPL + reduce, and a bail-out is never an error.

use num_bigint::BigUint;
use tracing::{debug, trace};

use kairos_core::config::DEFAULT_SQUARE_BATCH;
use kairos_core::error::{VdfError, VdfResult};
use kairos_core::VdfConfig;

use crate::discriminant::Discriminant;
use crate::form::QuadraticForm;

/// Result of one fast-path batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquareOutcome {
    /// `n ∈ [1, budget]` squarings were applied.
    Advanced(u64),
    /// The fast path bailed out before making progress; the caller must
    /// perform one slow squaring and re-enter.
    Fallback,
    /// Unrecoverable arithmetic failure.
    Failed,
}

/// Batched squarer bound to one discriminant.
pub struct BatchSquarer {
    disc: Discriminant,
    bound: BigUint,
    batch: u64,
    gcd_iteration_cap: u64,
    fast_path: bool,
    slow_count: u64,
}

impl BatchSquarer {
    #[must_use]
    pub fn new(disc: Discriminant, config: &VdfConfig) -> Self {
        let bound = disc.reduction_bound();
        Self {
            disc,
            bound,
            batch: DEFAULT_SQUARE_BATCH,
            gcd_iteration_cap: config.gcd_iteration_cap,
            fast_path: config.enable_fast_path,
            slow_count: 0,
        }
    }

    /// Iteration budget per fast-path call.
    #[must_use]
    pub fn batch_size(&self) -> u64 {
        self.batch
    }

    /// How many iterations were served by the slow path so far. Under
    /// healthy input this stays a small fraction of the total.
    #[must_use]
    pub fn slow_count(&self) -> u64 {
        self.slow_count
    }

    /// Attempt up to `budget` squarings of `form` on the fast path.
    ///
    /// `Advanced(n)` applied `n` squarings; `Fallback` made no progress and
    /// asks for one slow squaring; `Failed` is unrecoverable.
    pub fn fast_square(&self, form: &mut QuadraticForm, budget: u64) -> SquareOutcome {
        if budget == 0 {
            return SquareOutcome::Advanced(0);
        }
        if !self.fast_path || self.gcd_iteration_cap == 0 {
            return SquareOutcome::Fallback;
        }

        let mut remaining = self.gcd_iteration_cap;
        let mut applied = 0u64;
        let mut current = form.clone();
        while applied < budget {
            match current.nudupl_metered(&self.disc, &self.bound, &mut remaining) {
                Some(Ok(next)) => {
                    current = next;
                    applied += 1;
                }
                Some(Err(_)) => return SquareOutcome::Failed,
                None => {
                    // budget exhausted mid-batch; keep what we have
                    trace!(applied, "fast path ran out of gcd budget");
                    break;
                }
            }
        }

        if applied == 0 {
            return SquareOutcome::Fallback;
        }
        *form = current;
        SquareOutcome::Advanced(applied)
    }

    /// One reference-path squaring: NUDUPL + reduce. Always advances.
    pub fn slow_square(&mut self, form: &mut QuadraticForm) -> VdfResult<()> {
        *form = form.nudupl(&self.disc, &self.bound)?;
        self.slow_count += 1;
        Ok(())
    }

    /// Square `form` exactly `count` times, polling `cancelled` at batch
    /// boundaries. Returns how many squarings were applied (less than
    /// `count` only when cancelled).
    pub fn repeated_square<C>(
        &mut self,
        form: &mut QuadraticForm,
        count: u64,
        mut cancelled: C,
    ) -> VdfResult<u64>
    where
        C: FnMut() -> bool,
    {
        let mut done = 0u64;
        while done < count {
            if cancelled() {
                debug!(done, count, "squaring cancelled");
                break;
            }
            let budget = self.batch.min(count - done);
            match self.fast_square(form, budget) {
                SquareOutcome::Advanced(n) => done += n,
                SquareOutcome::Fallback => {
                    self.slow_square(form)?;
                    done += 1;
                }
                SquareOutcome::Failed => return Err(VdfError::ComputationFailed),
            }
        }
        Ok(done)
    }
}
