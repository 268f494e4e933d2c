#![forbid(unsafe_code)]

//! Integer helpers on top of `num-bigint`.
//!
//! Everything the class-group engine needs beyond the library itself:
//! byte import/export, extended GCD (plain and iteration-metered),
//! Miller-Rabin, next-prime stepping, integer roots and the large-exponent
//! division `⌊2^T / ℓ⌋` that never materialises `2^T`.

use num_bigint::{BigInt, BigUint};
use num_integer::{Integer, Roots};
use num_traits::{One, Signed, Zero};
use sha2::{Digest, Sha256};

/// Witness rounds for probable-prime checks.
pub const PRIME_ROUNDS: usize = 25;

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Big-endian bytes of the magnitude, sign discarded.
#[must_use]
pub fn export_unsigned(n: &BigInt) -> Vec<u8> {
    n.magnitude().to_bytes_be()
}

/// The low `k` bits of `n`.
#[must_use]
pub fn low_bits(n: &BigUint, k: u64) -> BigUint {
    n % (BigUint::one() << k)
}

/// Extended Euclid: `(g, u, v)` with `g = gcd(a, b) = a·u + b·v`, `g ≥ 0`.
#[must_use]
pub fn xgcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let mut budget = u64::MAX;
    // cannot exhaust an effectively unlimited budget
    xgcd_metered(a, b, &mut budget).unwrap_or_else(|| (BigInt::zero(), BigInt::zero(), BigInt::zero()))
}

/// Extended Euclid with an iteration budget. Decrements `*budget` once per
/// division step and returns `None` when the budget runs out, leaving the
/// caller to fall back to an unmetered path.
pub fn xgcd_metered(
    a: &BigInt,
    b: &BigInt,
    budget: &mut u64,
) -> Option<(BigInt, BigInt, BigInt)> {
    let mut old_r = a.clone();
    let mut r = b.clone();
    let mut old_s = BigInt::one();
    let mut s = BigInt::zero();
    let mut old_t = BigInt::zero();
    let mut t = BigInt::one();

    while !r.is_zero() {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        let next_s = &old_s - &q * &s;
        let next_t = &old_t - &q * &t;
        old_r = std::mem::replace(&mut r, next_r);
        old_s = std::mem::replace(&mut s, next_s);
        old_t = std::mem::replace(&mut t, next_t);
    }

    if old_r.is_negative() {
        Some((-old_r, -old_s, -old_t))
    } else {
        Some((old_r, old_s, old_t))
    }
}

/// Inverse of `a` modulo `m` (`m > 0`), or `None` when `gcd(a, m) ≠ 1`.
#[must_use]
pub fn mod_inverse(a: &BigInt, m: &BigInt) -> Option<BigInt> {
    let (g, u, _) = xgcd(&a.mod_floor(m), m);
    if g.is_one() {
        Some(u.mod_floor(m))
    } else {
        None
    }
}

/// Miller-Rabin probable-prime test.
///
/// The first witnesses are the small primes; further rounds derive witnesses
/// from the candidate itself so the test stays a pure function.
#[must_use]
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_1 = n - 1u32;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;
    let n_minus_3 = n - 3u32;

    'witness: for round in 0..rounds.max(1) {
        let a = if round < SMALL_PRIMES.len() {
            BigUint::from(SMALL_PRIMES[round])
        } else {
            derived_witness(n, round as u64) % &n_minus_3 + &two
        };
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn derived_witness(n: &BigUint, round: u64) -> BigUint {
    let mut hasher = Sha256::new();
    hasher.update(n.to_bytes_be());
    hasher.update(round.to_be_bytes());
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Smallest probable prime `≥ start`, stepping even → odd then by 2.
#[must_use]
pub fn next_prime(start: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    if *start <= two {
        return two;
    }
    let mut n = start.clone();
    if n.is_even() {
        n += 1u32;
    }
    while !is_probable_prime(&n, PRIME_ROUNDS) {
        n += 2u32;
    }
    n
}

/// `⌊n^{1/2}⌋`.
#[must_use]
pub fn isqrt(n: &BigUint) -> BigUint {
    n.sqrt()
}

/// `⌊n^{1/4}⌋`, the reduction bound `L` for a discriminant magnitude.
#[must_use]
pub fn fourth_root(n: &BigUint) -> BigUint {
    n.nth_root(4)
}

/// `2^t mod l` by modular repeated squaring. `l` must be non-zero.
#[must_use]
pub fn pow2_mod(t: u64, l: &BigUint) -> BigUint {
    BigUint::from(2u32).modpow(&BigUint::from(t), l)
}

/// `(⌊2^t / l⌋, 2^t mod l)` without materialising `2^t`.
///
/// The quotient bits fall out of schoolbook long division over the implicit
/// dividend (a one followed by `t` zero bits): shift the remainder, subtract
/// `l` when it fits, collect the bit. Only the remainder is held as a
/// number (never the dividend), so the working set stays at `l`'s size
/// plus the quotient being assembled.
#[must_use]
pub fn pow2_divmod(t: u64, l: &BigUint) -> (BigUint, BigUint) {
    if l.is_one() {
        return (BigUint::one() << t, BigUint::zero());
    }

    let mut q_bytes: Vec<u8> = Vec::with_capacity((t / 8) as usize + 2);
    let mut acc: u8 = 0;
    let mut nbits: u8 = 0;
    let mut rem = BigUint::zero();

    for i in 0..=t {
        rem <<= 1;
        if i == 0 {
            rem |= BigUint::one();
        }
        let bit = if rem >= *l {
            rem -= l;
            1
        } else {
            0
        };
        acc = (acc << 1) | bit;
        nbits += 1;
        if nbits == 8 {
            q_bytes.push(acc);
            acc = 0;
            nbits = 0;
        }
    }

    let mut q = BigUint::from_bytes_be(&q_bytes);
    if nbits > 0 {
        q = (q << nbits) | BigUint::from(acc);
    }

    debug_assert_eq!(rem, pow2_mod(t, l));
    (q, rem)
}
