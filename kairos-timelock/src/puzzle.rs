#![forbid(unsafe_code)]

//! Puzzle parsing and host-side instance packing.
//!
//! Wire inputs are lower-case even-length hex strings. Instances are
//! fixed-size records of little-endian `u32` limbs, with the Montgomery
//! constants (`np0 = −n⁻¹ mod 2³²` and `R² mod n`) precomputed on the host
//! so a device kernel never leaves limb arithmetic.

use num_bigint::BigUint;
use num_traits::One;

use kairos_core::error::{TimelockError, TimelockResult};

/// 32-bit limbs per 2048-bit operand.
pub const LIMBS: usize = 64;

/// Cooperative lanes a device groups per instance.
pub const TPI: usize = 32;

/// Exported key length in bytes.
pub const KEY_BYTES: usize = 32;

/// A parsed RSW puzzle `(n, a, C, T)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RswPuzzle {
    pub n: BigUint,
    pub a: BigUint,
    pub c: BigUint,
    pub t: u32,
}

impl RswPuzzle {
    /// Parse hex components. Errors name the offending component and leave
    /// the other instances of a batch untouched.
    pub fn parse(n_hex: &str, a_hex: &str, c_hex: &str, t: u32) -> TimelockResult<Self> {
        Ok(RswPuzzle {
            n: parse_hex_component("n", n_hex)?,
            a: parse_hex_component("a", a_hex)?,
            c: parse_hex_component("c", c_hex)?,
            t,
        })
    }

    /// Pack into a device instance. Rejects moduli the Montgomery kernel
    /// cannot handle.
    pub fn pack(&self) -> Result<RswInstance, String> {
        if self.n.bits() > (LIMBS * 32) as u64 {
            return Err(format!("modulus exceeds {} bits", LIMBS * 32));
        }
        if self.n < BigUint::from(3u32) {
            return Err("modulus must be at least 3".to_string());
        }
        // Montgomery arithmetic needs an odd modulus
        if !(&self.n % 2u32).is_one() {
            return Err("modulus must be odd".to_string());
        }

        let n = to_limbs(&self.n);
        // operands enter the kernel already reduced so the borrow-safe
        // subtraction at the end is exact
        let a = to_limbs(&(&self.a % &self.n));
        let c = to_limbs(&(&self.c % &self.n));
        let r2 = to_limbs(&((BigUint::one() << (2 * LIMBS * 32)) % &self.n));
        let np0 = inv32(n[0]).wrapping_neg();

        Ok(RswInstance {
            n,
            a,
            c,
            r2,
            np0,
            t: self.t,
        })
    }
}

/// Fixed-size host record for one puzzle instance.
#[derive(Debug, Clone)]
pub struct RswInstance {
    /// Modulus, little-endian limbs.
    pub n: [u32; LIMBS],
    /// Base, reduced mod `n`.
    pub a: [u32; LIMBS],
    /// Challenge constant, reduced mod `n`.
    pub c: [u32; LIMBS],
    /// `R² mod n` for the Montgomery entry conversion.
    pub r2: [u32; LIMBS],
    /// `−n⁻¹ mod 2³²`.
    pub np0: u32,
    /// Squaring count.
    pub t: u32,
}

/// Per-instance solve outcome.
#[derive(Debug, Clone)]
pub struct RswResult {
    /// Low 256 bits of `(C − r) mod n`, little-endian.
    pub key: [u8; KEY_BYTES],
    pub ok: bool,
    pub error: Option<String>,
}

impl RswResult {
    #[must_use]
    pub fn success(key: [u8; KEY_BYTES]) -> Self {
        RswResult {
            key,
            ok: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        RswResult {
            key: [0u8; KEY_BYTES],
            ok: false,
            error: Some(error.into()),
        }
    }
}

fn parse_hex_component(name: &str, hex_str: &str) -> TimelockResult<BigUint> {
    if hex_str.is_empty() {
        return Err(TimelockError::InvalidHexInput(format!("{name}: empty")));
    }
    if hex_str.len() % 2 != 0 {
        return Err(TimelockError::InvalidHexInput(format!(
            "{name}: odd length"
        )));
    }
    if !hex_str
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(TimelockError::InvalidHexInput(format!(
            "{name}: not lower-case hex"
        )));
    }
    let bytes = hex::decode(hex_str)
        .map_err(|e| TimelockError::InvalidHexInput(format!("{name}: {e}")))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Little-endian limb split, zero-padded to [`LIMBS`].
fn to_limbs(value: &BigUint) -> [u32; LIMBS] {
    let digits = value.to_u32_digits();
    let mut limbs = [0u32; LIMBS];
    limbs[..digits.len()].copy_from_slice(&digits);
    limbs
}

/// Inverse of an odd `x` modulo 2³² by Newton doubling.
fn inv32(x: u32) -> u32 {
    debug_assert!(x % 2 == 1);
    let mut y = x; // correct to 3 bits
    for _ in 0..4 {
        y = y.wrapping_mul(2u32.wrapping_sub(x.wrapping_mul(y)));
    }
    y
}
