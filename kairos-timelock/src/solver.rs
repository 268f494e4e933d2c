#![forbid(unsafe_code)]

//! The solver: one device, many puzzles.
//!
//! A [`Solver`] exclusively owns its device backend for its whole lifetime.
//! It moves between threads but is deliberately not `Sync`: device state
//! is not thread-safe, so concurrent `solve` calls on one solver are a
//! caller bug the type system rules out. Batch results are per-instance: a
//! malformed puzzle fails in its own slot and the rest of the batch
//! proceeds.

use std::cell::Cell;
use std::marker::PhantomData;

use tracing::{debug, info};

use kairos_core::error::{TimelockError, TimelockResult};

use crate::device::{CpuBackend, DeviceBackend};
use crate::puzzle::{RswPuzzle, RswResult, KEY_BYTES};

/// One puzzle of a batch request, hex-encoded as on the wire.
#[derive(Debug, Clone, Copy)]
pub struct PuzzleRequest<'a> {
    pub n: &'a str,
    pub a: &'a str,
    pub c: &'a str,
    pub t: u32,
}

/// Result of a single solve.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// The 256-bit key, little-endian.
    pub key: [u8; KEY_BYTES],
}

/// RSW puzzle solver bound to one device.
pub struct Solver {
    backend: Box<dyn DeviceBackend>,
    device_id: i32,
    // keep the solver Send but not Sync; the device context is single-owner
    _not_sync: PhantomData<Cell<()>>,
}

impl Solver {
    /// Acquire the device with the given id. Device 0 is the built-in CPU
    /// backend; other ids require a hardware backend and fail here.
    pub fn new(device_id: i32) -> TimelockResult<Self> {
        if device_id != 0 {
            return Err(TimelockError::DeviceUnavailable(device_id));
        }
        let backend = Box::new(CpuBackend::new());
        info!(device_id, name = %backend.name(), "solver created");
        Ok(Solver {
            backend,
            device_id,
            _not_sync: PhantomData,
        })
    }

    /// Wrap an explicit backend (tests, hardware integrations).
    #[must_use]
    pub fn with_backend(device_id: i32, backend: Box<dyn DeviceBackend>) -> Self {
        Solver {
            backend,
            device_id,
            _not_sync: PhantomData,
        }
    }

    /// Solve a single puzzle. Hex and modulus problems surface as errors
    /// here, unlike in batches where they land in the result slot.
    pub fn solve(&mut self, n: &str, a: &str, c: &str, t: u32) -> TimelockResult<SolveResult> {
        let puzzle = RswPuzzle::parse(n, a, c, t)?;
        let instance = puzzle.pack().map_err(TimelockError::InvalidHexInput)?;
        let mut outcomes = self.backend.launch(std::slice::from_ref(&instance));
        match outcomes.pop() {
            Some(Ok(key)) => Ok(SolveResult { key }),
            Some(Err(msg)) => Err(TimelockError::DeviceFailure(msg)),
            None => Err(TimelockError::DeviceFailure(
                "device returned no result".to_string(),
            )),
        }
    }

    /// Solve a batch. The result vector matches the request order; instance
    /// `i` failing (bad hex, even modulus, device slot unwritten) yields
    /// `results[i].ok == false` without affecting the others. Batches larger
    /// than [`Solver::optimal_batch_size`] are chunked internally.
    pub fn solve_batch(&mut self, requests: &[PuzzleRequest<'_>]) -> Vec<RswResult> {
        if requests.is_empty() {
            return Vec::new();
        }
        debug!(count = requests.len(), "solve batch");

        let mut results: Vec<RswResult> = Vec::with_capacity(requests.len());
        let mut instances = Vec::with_capacity(requests.len());
        let mut instance_slots = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            match RswPuzzle::parse(request.n, request.a, request.c, request.t)
                .map_err(|e| e.to_string())
                .and_then(|p| p.pack())
            {
                Ok(instance) => {
                    instances.push(instance);
                    instance_slots.push(index);
                    results.push(RswResult::failure("device slot not written"));
                }
                Err(msg) => results.push(RswResult::failure(msg)),
            }
        }

        let chunk_size = self.backend.optimal_batch_size().max(1);
        let mut outcomes = Vec::with_capacity(instances.len());
        for chunk in instances.chunks(chunk_size) {
            outcomes.extend(self.backend.launch(chunk));
        }

        for (slot, outcome) in instance_slots.into_iter().zip(outcomes) {
            results[slot] = match outcome {
                Ok(key) => RswResult::success(key),
                Err(msg) => RswResult::failure(msg),
            };
        }
        results
    }

    /// Name of the device this solver owns.
    #[must_use]
    pub fn device_name(&self) -> String {
        self.backend.name()
    }

    /// Recommended batch size for this device.
    #[must_use]
    pub fn optimal_batch_size(&self) -> usize {
        self.backend.optimal_batch_size()
    }

    /// Id the solver was created with.
    #[must_use]
    pub fn device_id(&self) -> i32 {
        self.device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn key_value(key: &[u8; KEY_BYTES]) -> BigUint {
        BigUint::from_bytes_le(key)
    }

    #[test]
    fn single_solve_known_vector() {
        let mut solver = Solver::new(0).unwrap();
        // n = 97, a = 3, C = 100, T = 5 → key = 65
        let result = solver.solve("61", "03", "64", 5).unwrap();
        assert_eq!(result.key[0], 65);
        assert!(result.key[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn single_solve_reports_bad_hex() {
        let mut solver = Solver::new(0).unwrap();
        assert!(matches!(
            solver.solve("zz", "03", "64", 5),
            Err(TimelockError::InvalidHexInput(_))
        ));
    }

    #[test]
    fn unknown_device_rejected() {
        assert!(matches!(
            Solver::new(3),
            Err(TimelockError::DeviceUnavailable(3))
        ));
    }

    #[test]
    fn empty_batch_yields_empty_results() {
        let mut solver = Solver::new(0).unwrap();
        assert!(solver.solve_batch(&[]).is_empty());
    }

    #[test]
    fn batch_isolates_per_instance_failures() {
        let mut solver = Solver::new(0).unwrap();
        let requests = [
            PuzzleRequest {
                n: "61",
                a: "03",
                c: "64",
                t: 5,
            },
            PuzzleRequest {
                n: "not-hex",
                a: "03",
                c: "64",
                t: 5,
            },
            PuzzleRequest {
                n: "61",
                a: "02",
                c: "64",
                t: 3,
            },
        ];
        let results = solver.solve_batch(&requests);
        assert_eq!(results.len(), 3);

        assert!(results[0].ok);
        assert_eq!(results[0].key[0], 65);

        assert!(!results[1].ok);
        assert!(results[1].error.as_ref().unwrap().contains("n:"));

        // 2^(2^3) mod 97: 2^8 = 256 ≡ 62, key = (100 − 62) mod 97 = 38
        assert!(results[2].ok);
        assert_eq!(key_value(&results[2].key), BigUint::from(38u32));
    }

    #[test]
    fn batch_results_keep_request_order() {
        let mut solver = Solver::new(0).unwrap();
        let c_values = ["24", "25", "26", "27"]; // 36..39, key = C − 35
        let requests: Vec<PuzzleRequest<'_>> = c_values
            .iter()
            .map(|c| PuzzleRequest {
                n: "61",
                a: "03",
                c,
                t: 5,
            })
            .collect();
        let results = solver.solve_batch(&requests);
        for (i, result) in results.iter().enumerate() {
            assert!(result.ok);
            assert_eq!(u32::from(result.key[0]), i as u32 + 1);
        }
    }

    #[test]
    fn solver_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Solver>();
    }

    #[test]
    fn solver_moves_between_threads() {
        let mut solver = Solver::new(0).unwrap();
        let handle = std::thread::spawn(move || solver.solve("61", "03", "64", 5));
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result.key[0], 65);
    }

    #[test]
    fn device_surface() {
        let solver = Solver::new(0).unwrap();
        assert_eq!(solver.device_id(), 0);
        assert!(solver.device_name().contains("cpu"));
        assert!(solver.optimal_batch_size() >= 1_024);
    }
}
