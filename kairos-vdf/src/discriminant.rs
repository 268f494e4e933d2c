#![forbid(unsafe_code)]

//! Discriminant derivation.
//!
//! A session discriminant is a negative integer `D` with `D ≡ 1 (mod 4)` and
//! `|D|` (probably) prime. [`Discriminant::from_challenge`] derives one
//! deterministically from a 32-byte challenge so that independent nodes agree
//! on the group without coordination.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use kairos_core::error::{VdfError, VdfResult};

use crate::arith;

/// Smallest accepted bit length; below this the forced top/bottom bits of
/// the derivation would collide.
pub const MIN_DISCRIMINANT_BITS: u32 = 16;

/// Largest accepted bit length.
pub const MAX_DISCRIMINANT_BITS: u32 = 4_096;

/// Negative discriminant of an imaginary quadratic class group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discriminant {
    #[serde(with = "bigint_hex")]
    value: BigInt,
    bit_length: u32,
}

impl Discriminant {
    /// Derive a discriminant of exactly `bits` bits from a 32-byte challenge.
    ///
    /// The challenge is expanded with SHA-256 over an increasing counter, the
    /// top two bits are forced to guarantee the length, the low two bits are
    /// forced so `|D| ≡ 3 (mod 4)`, and the candidate then advances by 4
    /// until Miller-Rabin passes. Pure in `(challenge, bits)`.
    pub fn from_challenge(challenge: &[u8; 32], bits: u32) -> VdfResult<Self> {
        if !(MIN_DISCRIMINANT_BITS..=MAX_DISCRIMINANT_BITS).contains(&bits) {
            return Err(VdfError::InvalidParameters);
        }

        let nbytes = bits.div_ceil(8) as usize;
        let mut expanded = Vec::with_capacity(nbytes + 32);
        let mut counter: u32 = 0;
        while expanded.len() < nbytes {
            let mut hasher = Sha256::new();
            hasher.update(challenge);
            hasher.update(counter.to_be_bytes());
            expanded.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        expanded.truncate(nbytes);

        let mut candidate = arith::low_bits(&BigUint::from_bytes_be(&expanded), u64::from(bits));
        // top two bits pin the length, low two bits give |D| ≡ 3 (mod 4)
        candidate |= BigUint::from(3u32) << (bits - 2);
        candidate |= BigUint::from(3u32);

        while !arith::is_probable_prime(&candidate, arith::PRIME_ROUNDS) {
            candidate += 4u32;
        }

        if candidate.bits() != u64::from(bits) {
            // prime search walked past the requested length; practically
            // unreachable with 2^(bits-2) of headroom
            return Err(VdfError::InvalidDiscriminant);
        }

        Ok(Self {
            value: -BigInt::from_biguint(Sign::Plus, candidate),
            bit_length: bits,
        })
    }

    /// Wrap a known discriminant value. Requires `D < 0` and `D ≡ 1 (mod 4)`;
    /// primality of `|D|` is the caller's responsibility.
    pub fn from_value(value: BigInt) -> VdfResult<Self> {
        if !value.is_negative() {
            return Err(VdfError::InvalidDiscriminant);
        }
        if value.mod_floor(&BigInt::from(4)) != BigInt::from(1) {
            return Err(VdfError::InvalidDiscriminant);
        }
        let bit_length = value.magnitude().bits() as u32;
        Ok(Self { value, bit_length })
    }

    /// Parse a (signed) hex string, e.g. `"-3fe000f"`.
    pub fn from_hex(hex_str: &str) -> VdfResult<Self> {
        let value = BigInt::parse_bytes(hex_str.as_bytes(), 16)
            .ok_or(VdfError::InvalidDiscriminant)?;
        Self::from_value(value)
    }

    /// Parse a (signed) decimal string.
    pub fn from_dec(dec_str: &str) -> VdfResult<Self> {
        let value = BigInt::parse_bytes(dec_str.as_bytes(), 10)
            .ok_or(VdfError::InvalidDiscriminant)?;
        Self::from_value(value)
    }

    /// Import `|D|` from big-endian bytes (the wire shape; sign is implicit).
    ///
    /// Inputs failing `D ≡ 1 (mod 4)` are coerced by `D ← D − (D mod 4) + 1`,
    /// stepping down by 4 if the adjustment left the value non-negative.
    pub fn from_bytes(magnitude: &[u8]) -> VdfResult<Self> {
        if magnitude.is_empty() {
            return Err(VdfError::InvalidParameters);
        }
        let mut value = -BigInt::from_biguint(Sign::Plus, BigUint::from_bytes_be(magnitude));
        let rem = value.mod_floor(&BigInt::from(4));
        if !rem.is_one() {
            value = value - rem + 1;
            if !value.is_negative() {
                value -= 4;
            }
        }
        debug_assert!(value.is_negative());
        let bit_length = value.magnitude().bits() as u32;
        Ok(Self { value, bit_length })
    }

    /// The (negative) discriminant value.
    #[must_use]
    pub fn value(&self) -> &BigInt {
        &self.value
    }

    /// `|D|`.
    #[must_use]
    pub fn magnitude(&self) -> &BigUint {
        self.value.magnitude()
    }

    /// Declared bit length of `|D|`.
    #[must_use]
    pub fn bit_length(&self) -> u32 {
        self.bit_length
    }

    /// The reduction bound `L = ⌊|D|^{1/4}⌋`.
    #[must_use]
    pub fn reduction_bound(&self) -> BigUint {
        arith::fourth_root(self.magnitude())
    }

    /// Big-endian bytes of `|D|` (wire shape).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.magnitude().to_bytes_be()
    }
}

impl std::fmt::Display for Discriminant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub(crate) mod bigint_hex {
    use num_bigint::BigInt;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_str_radix(16))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(serde::de::Error::custom("empty string is not an integer"));
        }
        BigInt::parse_bytes(s.as_bytes(), 16)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex integer: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_challenge() -> [u8; 32] {
        let mut ch = [0u8; 32];
        for (i, byte) in ch.iter_mut().enumerate() {
            *byte = (i + 1) as u8;
        }
        ch
    }

    #[test]
    fn derivation_is_deterministic() {
        let ch = test_challenge();
        let a = Discriminant::from_challenge(&ch, 256).unwrap();
        let b = Discriminant::from_challenge(&ch, 256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derivation_depends_on_challenge_and_bits() {
        let ch = test_challenge();
        let mut other = ch;
        other[0] ^= 1;
        let a = Discriminant::from_challenge(&ch, 256).unwrap();
        let b = Discriminant::from_challenge(&other, 256).unwrap();
        assert_ne!(a, b);
        let c = Discriminant::from_challenge(&ch, 280).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn derived_value_has_requested_shape() {
        let ch = test_challenge();
        for bits in [64u32, 128, 256, 512] {
            let disc = Discriminant::from_challenge(&ch, bits).unwrap();
            assert!(disc.value().is_negative());
            assert_eq!(disc.magnitude().bits(), u64::from(bits));
            // D ≡ 1 (mod 4)
            assert!(disc.value().mod_floor(&BigInt::from(4)).is_one());
            assert!(arith::is_probable_prime(disc.magnitude(), arith::PRIME_ROUNDS));
        }
    }

    #[test]
    fn rejects_out_of_range_bits() {
        let ch = test_challenge();
        assert!(Discriminant::from_challenge(&ch, 8).is_err());
        assert!(Discriminant::from_challenge(&ch, 8192).is_err());
    }

    #[test]
    fn from_value_validates() {
        assert!(Discriminant::from_value(BigInt::from(-7)).is_ok());
        assert!(Discriminant::from_value(BigInt::from(-23)).is_ok());
        assert!(Discriminant::from_value(BigInt::from(7)).is_err());
        assert!(Discriminant::from_value(BigInt::from(-8)).is_err());
    }

    #[test]
    fn byte_import_coerces_congruence() {
        // |D| = 8 → D = −8 ≢ 1 (mod 4), coerced to −8 − 0 + 1 = −7
        let disc = Discriminant::from_bytes(&[8]).unwrap();
        assert_eq!(disc.value(), &BigInt::from(-7));

        // |D| = 6 → D = −6, mod 4 is 2, coerced to −6 − 2 + 1 = −7
        let disc = Discriminant::from_bytes(&[6]).unwrap();
        assert_eq!(disc.value(), &BigInt::from(-7));

        // |D| = 1 → D = −1, coerced to −3 (still negative)
        let disc = Discriminant::from_bytes(&[1]).unwrap();
        assert_eq!(disc.value(), &BigInt::from(-3));

        // |D| = 7 → D = −7 already fine
        let disc = Discriminant::from_bytes(&[7]).unwrap();
        assert_eq!(disc.value(), &BigInt::from(-7));

        assert!(Discriminant::from_bytes(&[]).is_err());
    }

    #[test]
    fn wire_bytes_round_trip() {
        let disc = Discriminant::from_value(BigInt::from(-23)).unwrap();
        assert_eq!(disc.to_bytes(), vec![23]);
        let back = Discriminant::from_bytes(&disc.to_bytes()).unwrap();
        assert_eq!(back.value(), disc.value());
    }

    #[test]
    fn reduction_bound_is_fourth_root() {
        let disc = Discriminant::from_value(BigInt::from(-87)).unwrap();
        assert_eq!(disc.reduction_bound(), BigUint::from(3u32));
    }

    #[test]
    fn serde_round_trip() {
        let disc = Discriminant::from_value(BigInt::from(-23)).unwrap();
        let json = serde_json::to_string(&disc).unwrap();
        let back: Discriminant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, disc);
    }
}
