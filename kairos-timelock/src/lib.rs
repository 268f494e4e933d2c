#![forbid(unsafe_code)]

//! RSW timelock puzzle batch solver.
//!
//! Evaluates `r = a^(2^T) mod n` for many independent puzzles and derives
//! the 256-bit keys `k = (C − r) mod n` that unlock previously submitted
//! ciphertexts. The sequential core is Montgomery squaring on 2048-bit
//! little-endian limb vectors; batches fan out across a device backend
//! ([`device::DeviceBackend`]), with the CPU backend required as the
//! portable reference.

pub mod device;
pub mod puzzle;
pub mod solver;

pub use device::{CpuBackend, DeviceBackend};
pub use puzzle::{RswInstance, RswPuzzle, RswResult};
pub use solver::{PuzzleRequest, SolveResult, Solver};
