#![forbid(unsafe_code)]

//! Device backends.
//!
//! A backend ingests packed instances and runs the per-instance kernel:
//!
//! ```text
//! r = to_montgomery(a, n)
//! repeat T times: r = mont_sqr(r, n)
//! r = from_montgomery(r, n)
//! k = (C + (if C >= r then 0 else n)) - r
//! export_low_256(k)
//! ```
//!
//! Instances are independent, so a device may run many thousands in
//! parallel. A CUDA/CGBN backend groups [`crate::puzzle::TPI`] lanes per
//! instance and reports batch sizes of 20 000 (compute capability ≥ 7) or
//! 10 000. The CPU backend below is the portable reference; it fans out
//! with rayon and derives its batch figure from the thread pool.

use rayon::prelude::*;
use tracing::debug;

use crate::puzzle::{RswInstance, KEY_BYTES, LIMBS};

const MASK: u64 = 0xffff_ffff;

/// A compute device the solver can own.
pub trait DeviceBackend: Send {
    /// Human-readable device name.
    fn name(&self) -> String;

    /// Recommended number of instances per launch.
    fn optimal_batch_size(&self) -> usize;

    /// Run the kernel over every instance. One outcome per instance, in
    /// order; a failed launch must mark every unwritten slot as failed.
    fn launch(&mut self, instances: &[RswInstance]) -> Vec<Result<[u8; KEY_BYTES], String>>;
}

/// Portable CPU backend.
pub struct CpuBackend {
    threads: usize,
}

impl CpuBackend {
    #[must_use]
    pub fn new() -> Self {
        CpuBackend {
            threads: rayon::current_num_threads().max(1),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for CpuBackend {
    fn name(&self) -> String {
        format!("cpu ({} threads)", self.threads)
    }

    fn optimal_batch_size(&self) -> usize {
        (self.threads * 512).max(1_024)
    }

    fn launch(&mut self, instances: &[RswInstance]) -> Vec<Result<[u8; KEY_BYTES], String>> {
        debug!(count = instances.len(), "cpu backend launch");
        instances.par_iter().map(run_kernel).collect()
    }
}

/// The sequential kernel body for one instance.
fn run_kernel(inst: &RswInstance) -> Result<[u8; KEY_BYTES], String> {
    let n = &inst.n;
    let np0 = inst.np0;

    // r = a·R mod n
    let mut r = mont_mul(&inst.a, &inst.r2, n, np0);
    for _ in 0..inst.t {
        r = mont_mul(&r, &r, n, np0);
    }
    // leave Montgomery form: multiply by 1
    let mut one = [0u32; LIMBS];
    one[0] = 1;
    r = mont_mul(&r, &one, n, np0);

    // k = (C + (C ≥ r ? 0 : n)) − r, always in [0, n)
    let k = if cmp_ge(&inst.c, &r) {
        let (k, borrow) = sub(&inst.c, &r);
        debug_assert_eq!(borrow, 0);
        k
    } else {
        let (sum, carry) = add(&inst.c, n);
        let (k, borrow) = sub(&sum, &r);
        // a borrow consumes exactly the carry limb
        debug_assert_eq!(carry, borrow);
        k
    };

    Ok(export_low_256(&k))
}

/// Montgomery product `x·y·R⁻¹ mod n` (CIOS, 32-bit limbs, R = 2^2048).
fn mont_mul(x: &[u32; LIMBS], y: &[u32; LIMBS], n: &[u32; LIMBS], np0: u32) -> [u32; LIMBS] {
    let mut t = [0u64; LIMBS + 1];
    let mut t_top: u64 = 0; // the 2^(32·(LIMBS+1)) digit, 0 or 1

    for i in 0..LIMBS {
        let xi = x[i] as u64;
        let mut carry = 0u64;
        for j in 0..LIMBS {
            let s = t[j] + xi * (y[j] as u64) + carry;
            t[j] = s & MASK;
            carry = s >> 32;
        }
        let s = t[LIMBS] + carry;
        t[LIMBS] = s & MASK;
        t_top += s >> 32;

        let m = (t[0] as u32).wrapping_mul(np0) as u64;
        let s = t[0] + m * (n[0] as u64);
        // the low digit cancels by the choice of m
        let mut carry = s >> 32;
        for j in 1..LIMBS {
            let s = t[j] + m * (n[j] as u64) + carry;
            t[j - 1] = s & MASK;
            carry = s >> 32;
        }
        let s = t[LIMBS] + carry;
        t[LIMBS - 1] = s & MASK;
        t[LIMBS] = t_top + (s >> 32);
        t_top = 0;
    }

    let mut out = [0u32; LIMBS];
    for (o, digit) in out.iter_mut().zip(t.iter()) {
        *o = *digit as u32;
    }

    // t < 2n: one conditional subtraction brings it into [0, n)
    if t[LIMBS] != 0 || !cmp_lt(&out, n) {
        let (reduced, borrow) = sub(&out, n);
        debug_assert!(t[LIMBS] == u64::from(borrow));
        return reduced;
    }
    out
}

fn cmp_ge(a: &[u32; LIMBS], b: &[u32; LIMBS]) -> bool {
    for i in (0..LIMBS).rev() {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    true
}

fn cmp_lt(a: &[u32; LIMBS], b: &[u32; LIMBS]) -> bool {
    !cmp_ge(a, b)
}

fn add(a: &[u32; LIMBS], b: &[u32; LIMBS]) -> ([u32; LIMBS], u32) {
    let mut out = [0u32; LIMBS];
    let mut carry = 0u64;
    for i in 0..LIMBS {
        let s = a[i] as u64 + b[i] as u64 + carry;
        out[i] = s as u32;
        carry = s >> 32;
    }
    (out, carry as u32)
}

fn sub(a: &[u32; LIMBS], b: &[u32; LIMBS]) -> ([u32; LIMBS], u32) {
    let mut out = [0u32; LIMBS];
    let mut borrow = 0i64;
    for i in 0..LIMBS {
        let d = a[i] as i64 - b[i] as i64 - borrow;
        if d < 0 {
            out[i] = (d + (1i64 << 32)) as u32;
            borrow = 1;
        } else {
            out[i] = d as u32;
            borrow = 0;
        }
    }
    (out, borrow as u32)
}

/// Low 256 bits, little-endian bytes.
fn export_low_256(k: &[u32; LIMBS]) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    for (i, limb) in k.iter().take(KEY_BYTES / 4).enumerate() {
        key[i * 4..(i + 1) * 4].copy_from_slice(&limb.to_le_bytes());
    }
    key
}
