#![forbid(unsafe_code)]

//! Wesolowski proofs of repeated squaring.
//!
//! Prover: derive the Fiat-Shamir prime `ℓ` from
//! `SHA-256(|D| ‖ x ‖ y ‖ T)`, compute `π = x^⌊2^T/ℓ⌋` and serialise.
//! Verifier: recompute `ℓ`, check `π^ℓ · x^{2^T mod ℓ} = y`. The message
//! binds `y`, so verification never re-runs the VDF.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Signed};
use sha2::{Digest, Sha256};
use tracing::debug;

use kairos_core::error::{VdfError, VdfResult};

use crate::arith;
use crate::discriminant::Discriminant;
use crate::form::QuadraticForm;

/// Version byte of a full proof.
pub const PROOF_VERSION: u8 = 0x02;

/// Bit index forced high in the Fiat-Shamir candidate, giving a 264-bit
/// prime.
const CHALLENGE_PRIME_BIT: u64 = 263;

/// A parsed proof, before any cryptographic checking.
#[derive(Debug, Clone)]
pub struct ParsedProof {
    pub version: u8,
    pub recursion_level: u8,
    pub iterations: u64,
    pub challenge_prime: BigUint,
    pub pi: QuadraticForm,
}

/// Serialise one coefficient: 2-byte big-endian length, then big-endian
/// magnitude bytes.
fn push_coefficient(out: &mut Vec<u8>, value: &BigInt) {
    let bytes = arith::export_unsigned(value);
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(&bytes);
}

/// The representative that goes on the wire. The encoding carries no sign,
/// so a reduced form with `b < 0` is replaced by the equivalent form under
/// `x ↦ x + y`, which has `b' = b + 2a ∈ (a, 2a)`.
fn wire_representative(form: &QuadraticForm) -> VdfResult<QuadraticForm> {
    if !form.b.is_negative() {
        return Ok(form.clone());
    }
    if form.b <= -&form.a {
        // not a normal form; nothing on the wire can represent it
        return Err(VdfError::ProofGenerationFailed);
    }
    let b = &form.b + (&form.a << 1);
    let c = &form.a + &form.b + &form.c;
    Ok(QuadraticForm::new(form.a.clone(), b, c))
}

/// Append a form in wire shape (three length-prefixed coefficients).
pub(crate) fn serialize_form_into(out: &mut Vec<u8>, form: &QuadraticForm) -> VdfResult<()> {
    let wire = wire_representative(form)?;
    push_coefficient(out, &wire.a);
    push_coefficient(out, &wire.b);
    push_coefficient(out, &wire.c);
    Ok(())
}

/// The canonical challenge message `|D| ‖ ser(x) ‖ ser(y) ‖ T`.
fn challenge_message(
    disc: &Discriminant,
    x: &QuadraticForm,
    y: &QuadraticForm,
    iterations: u64,
) -> VdfResult<Vec<u8>> {
    let mut msg = disc.to_bytes();
    serialize_form_into(&mut msg, x)?;
    serialize_form_into(&mut msg, y)?;
    msg.extend_from_slice(&iterations.to_be_bytes());
    Ok(msg)
}

/// Fiat-Shamir prime `ℓ`: hash the challenge message, force bit 263, advance
/// to the next probable prime.
pub fn fiat_shamir_prime(
    disc: &Discriminant,
    x: &QuadraticForm,
    y: &QuadraticForm,
    iterations: u64,
) -> VdfResult<BigUint> {
    let msg = challenge_message(disc, x, y, iterations)?;
    let seed = Sha256::digest(&msg);
    let mut candidate = BigUint::from_bytes_be(&seed);
    candidate |= BigUint::one() << CHALLENGE_PRIME_BIT;
    Ok(arith::next_prime(&candidate))
}

/// Produce a serialised proof that `y = x^(2^T)`.
pub fn prove(
    disc: &Discriminant,
    x: &QuadraticForm,
    y: &QuadraticForm,
    iterations: u64,
    recursion_level: u8,
) -> VdfResult<Vec<u8>> {
    if !x.is_valid(disc) || !y.is_valid(disc) {
        return Err(VdfError::InvalidForm);
    }

    let l = fiat_shamir_prime(disc, x, y, iterations)?;
    let (q, _) = arith::pow2_divmod(iterations, &l);

    let bound = disc.reduction_bound();
    let pi = x
        .pow(&q, disc, &bound)
        .map_err(|_| VdfError::ProofGenerationFailed)?;

    let l_bytes = l.to_bytes_be();
    debug_assert!(l_bytes.len() <= u8::MAX as usize);

    let mut out = Vec::with_capacity(12 + l_bytes.len() + 3 * (2 + 257));
    out.push(PROOF_VERSION);
    out.push(recursion_level);
    out.extend_from_slice(&iterations.to_be_bytes());
    out.push(l_bytes.len() as u8);
    out.extend_from_slice(&l_bytes);
    serialize_form_into(&mut out, &pi).map_err(|_| VdfError::ProofGenerationFailed)?;
    Ok(out)
}

/// Bounds-checked cursor over proof bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn take_u8(&mut self) -> Option<u8> {
        self.take(1).map(|s| s[0])
    }

    fn take_u64(&mut self) -> Option<u64> {
        self.take(8).map(|s| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(s);
            u64::from_be_bytes(buf)
        })
    }

    fn take_coefficient(&mut self) -> Option<BigInt> {
        let len = self.take(2).map(|s| u16::from_be_bytes([s[0], s[1]]))?;
        let bytes = self.take(len as usize)?;
        Some(BigInt::from(BigUint::from_bytes_be(bytes)))
    }

    fn exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Parse proof bytes. Structural checks only; no algebra.
#[must_use]
pub fn parse_proof(bytes: &[u8]) -> Option<ParsedProof> {
    let mut cur = Cursor::new(bytes);
    let version = cur.take_u8()?;
    let recursion_level = cur.take_u8()?;
    let iterations = cur.take_u64()?;
    let l_len = cur.take_u8()?;
    let challenge_prime = BigUint::from_bytes_be(cur.take(l_len as usize)?);
    let a = cur.take_coefficient()?;
    let b = cur.take_coefficient()?;
    let c = cur.take_coefficient()?;
    if !cur.exhausted() {
        return None;
    }
    Some(ParsedProof {
        version,
        recursion_level,
        iterations,
        challenge_prime,
        pi: QuadraticForm::new(a, b, c),
    })
}

/// Verify a serialised proof that `y = x^(2^T)`.
///
/// Returns `false` on any mismatch, including malformed input; never
/// panics.
#[must_use]
pub fn verify(
    disc: &Discriminant,
    x: &QuadraticForm,
    y: &QuadraticForm,
    iterations: u64,
    recursion_level: u8,
    proof: &[u8],
) -> bool {
    let Some(parsed) = parse_proof(proof) else {
        return false;
    };
    if parsed.version != PROOF_VERSION
        || parsed.recursion_level != recursion_level
        || parsed.iterations != iterations
    {
        return false;
    }

    let Ok(expected_l) = fiat_shamir_prime(disc, x, y, iterations) else {
        return false;
    };
    if parsed.challenge_prime != expected_l {
        debug!("challenge prime mismatch");
        return false;
    }

    if !parsed.pi.is_valid(disc) || !x.is_valid(disc) || !y.is_valid(disc) {
        return false;
    }

    let r = arith::pow2_mod(iterations, &parsed.challenge_prime);
    let bound = disc.reduction_bound();
    let Ok(pi_l) = parsed.pi.pow(&parsed.challenge_prime, disc, &bound) else {
        return false;
    };
    let Ok(x_r) = x.pow(&r, disc, &bound) else {
        return false;
    };
    let Ok(lhs) = pi_l.compose(&x_r, disc) else {
        return false;
    };
    lhs == y.reduce()
}

/// Verify against a challenge instead of an explicit discriminant; `x` is
/// the generator of the derived group.
#[must_use]
pub fn verify_with_challenge(
    challenge: &[u8; 32],
    disc_bits: u32,
    y: &QuadraticForm,
    iterations: u64,
    recursion_level: u8,
    proof: &[u8],
) -> bool {
    let Ok(disc) = Discriminant::from_challenge(challenge, disc_bits) else {
        return false;
    };
    let x = QuadraticForm::generator(&disc);
    verify(&disc, &x, y, iterations, recursion_level, proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn disc() -> Discriminant {
        Discriminant::from_challenge(&[11u8; 32], 128).unwrap()
    }

    fn nontrivial_form(disc: &Discriminant) -> QuadraticForm {
        let d = disc.value();
        for a in 2i64..200 {
            let four_a = BigInt::from(4 * a);
            for b in 0..(2 * a) {
                let b = BigInt::from(b);
                let num = &b * &b - d;
                if (&num % &four_a).is_zero() {
                    let f = QuadraticForm::new(BigInt::from(a), b, &num / &four_a).reduce();
                    if !f.is_principal() {
                        return f;
                    }
                }
            }
        }
        unreachable!()
    }

    fn run_vdf(disc: &Discriminant, x: &QuadraticForm, t: u64) -> QuadraticForm {
        let bound = disc.reduction_bound();
        let mut y = x.reduce();
        for _ in 0..t {
            y = y.nudupl(disc, &bound).unwrap();
        }
        y
    }

    #[test]
    fn proof_round_trip() {
        let d = disc();
        let x = nontrivial_form(&d);
        let t = 64;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        assert!(verify(&d, &x, &y, t, 0, &proof));
    }

    #[test]
    fn proof_round_trip_from_generator() {
        let d = disc();
        let x = QuadraticForm::generator(&d);
        let t = 100;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        assert!(verify(&d, &x, &y, t, 0, &proof));
    }

    #[test]
    fn zero_iterations_is_the_trivial_proof() {
        let d = disc();
        let x = nontrivial_form(&d);
        let proof = prove(&d, &x, &x, 0, 0).unwrap();
        assert!(verify(&d, &x, &x, 0, 0, &proof));
    }

    #[test]
    fn single_iteration() {
        let d = disc();
        let x = nontrivial_form(&d);
        let y = run_vdf(&d, &x, 1);
        let proof = prove(&d, &x, &y, 1, 0).unwrap();
        assert!(verify(&d, &x, &y, 1, 0, &proof));
    }

    #[test]
    fn wrong_output_rejected() {
        let d = disc();
        let x = nontrivial_form(&d);
        let t = 32;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        let wrong_y = run_vdf(&d, &x, t + 1);
        assert!(!verify(&d, &x, &wrong_y, t, 0, &proof));
    }

    #[test]
    fn any_flipped_bit_rejected() {
        let d = disc();
        let x = nontrivial_form(&d);
        let t = 16;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        // cover the whole header plus sampled positions in ℓ and π
        let positions: Vec<usize> = (0..11).chain((11..proof.len()).step_by(5)).collect();
        for i in positions {
            let mut tampered = proof.clone();
            tampered[i] ^= 1;
            assert!(
                !verify(&d, &x, &y, t, 0, &tampered),
                "tampered byte {i} accepted"
            );
        }
    }

    #[test]
    fn wrong_iteration_count_rejected() {
        let d = disc();
        let x = nontrivial_form(&d);
        let t = 24;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        assert!(!verify(&d, &x, &y, t + 1, 0, &proof));
        assert!(!verify(&d, &x, &y, t - 1, 0, &proof));
    }

    #[test]
    fn wrong_recursion_level_rejected() {
        let d = disc();
        let x = nontrivial_form(&d);
        let t = 8;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 3).unwrap();
        assert!(verify(&d, &x, &y, t, 3, &proof));
        assert!(!verify(&d, &x, &y, t, 0, &proof));
    }

    #[test]
    fn truncated_and_garbage_input_rejected() {
        let d = disc();
        let x = nontrivial_form(&d);
        let y = run_vdf(&d, &x, 8);
        let proof = prove(&d, &x, &y, 8, 0).unwrap();
        for len in 0..proof.len() {
            assert!(!verify(&d, &x, &y, 8, 0, &proof[..len]));
        }
        assert!(!verify(&d, &x, &y, 8, 0, &[0xff; 64]));
        assert!(!verify(&d, &x, &y, 8, 0, &[]));
    }

    #[test]
    fn challenge_prime_has_expected_shape() {
        let d = disc();
        let x = QuadraticForm::generator(&d);
        let y = run_vdf(&d, &x, 10);
        let l = fiat_shamir_prime(&d, &x, &y, 10).unwrap();
        assert_eq!(l.bits(), 264);
        assert!(arith::is_probable_prime(&l, arith::PRIME_ROUNDS));
        // deterministic
        assert_eq!(l, fiat_shamir_prime(&d, &x, &y, 10).unwrap());
        // binds the iteration count
        assert_ne!(l, fiat_shamir_prime(&d, &x, &y, 11).unwrap());
    }

    #[test]
    fn negative_b_gets_a_signless_wire_representative() {
        let d = Discriminant::from_value(BigInt::from(-23)).unwrap();
        let f = QuadraticForm::new(BigInt::from(2), BigInt::from(-1), BigInt::from(3));
        let wire = wire_representative(&f).unwrap();
        assert!(!wire.b.is_negative());
        assert_eq!(wire.discriminant(), BigInt::from(-23));
        // same class: reducing the representative recovers the original
        assert_eq!(wire.reduce(), f);
    }

    #[test]
    fn verify_with_challenge_derives_the_same_group() {
        let ch = [21u8; 32];
        let d = Discriminant::from_challenge(&ch, 128).unwrap();
        let x = QuadraticForm::generator(&d);
        let t = 20;
        let y = run_vdf(&d, &x, t);
        let proof = prove(&d, &x, &y, t, 0).unwrap();
        assert!(verify_with_challenge(&ch, 128, &y, t, 0, &proof));
        assert!(!verify_with_challenge(&ch, 136, &y, t, 0, &proof));
    }
}
