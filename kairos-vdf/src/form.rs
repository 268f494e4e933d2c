#![forbid(unsafe_code)]

//! Binary quadratic forms `a·x² + b·x·y + c·y²`.
//!
//! A form of negative discriminant `D = b² − 4ac` represents a class-group
//! element. Group structure comes from Gauss composition ([`QuadraticForm::compose`])
//! with a specialised doubling path ([`QuadraticForm::nudupl`]); canonical
//! representatives come from [`QuadraticForm::reduce`].

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};
use tracing::warn;

use kairos_core::error::{VdfError, VdfResult};

use crate::arith;
use crate::discriminant::bigint_hex;
use crate::discriminant::Discriminant;

/// A binary quadratic form `(a, b, c)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadraticForm {
    #[serde(with = "bigint_hex")]
    pub a: BigInt,
    #[serde(with = "bigint_hex")]
    pub b: BigInt,
    #[serde(with = "bigint_hex")]
    pub c: BigInt,
}

impl QuadraticForm {
    /// Wrap raw coefficients without validation.
    #[must_use]
    pub fn new(a: BigInt, b: BigInt, c: BigInt) -> Self {
        QuadraticForm { a, b, c }
    }

    /// Validated construction: rejects coefficients whose discriminant does
    /// not match `disc`.
    pub fn from_components(
        a: BigInt,
        b: BigInt,
        c: BigInt,
        disc: &Discriminant,
    ) -> VdfResult<Self> {
        let form = QuadraticForm { a, b, c };
        if !form.is_valid(disc) {
            return Err(VdfError::InvalidForm);
        }
        Ok(form)
    }

    /// The principal form `(1, 1, (1 − D)/4)`: identity of the class group
    /// and the canonical starting point of the VDF. Always reduced.
    #[must_use]
    pub fn generator(disc: &Discriminant) -> Self {
        Self::principal(disc.value())
    }

    pub(crate) fn principal(d: &BigInt) -> Self {
        let c = (BigInt::one() - d).div_floor(&BigInt::from(4));
        QuadraticForm {
            a: BigInt::one(),
            b: BigInt::one(),
            c,
        }
    }

    /// `b² − 4ac`.
    #[must_use]
    pub fn discriminant(&self) -> BigInt {
        &self.b * &self.b - BigInt::from(4) * &self.a * &self.c
    }

    /// Whether this form belongs to the group of `disc`.
    #[must_use]
    pub fn is_valid(&self, disc: &Discriminant) -> bool {
        self.discriminant() == *disc.value()
    }

    /// Whether this form is the principal (identity) form.
    #[must_use]
    pub fn is_principal(&self) -> bool {
        self.a.is_one() && self.b.is_one()
    }

    /// Reduced predicate: `|b| ≤ a ≤ c`, and `b ≥ 0` whenever `|b| = a` or
    /// `a = c`.
    #[must_use]
    pub fn is_reduced(&self) -> bool {
        if !self.a.is_positive() {
            return false;
        }
        let abs_b = self.b.abs();
        if abs_b > self.a || self.a > self.c {
            return false;
        }
        if (abs_b == self.a || self.a == self.c) && self.b.is_negative() {
            return false;
        }
        true
    }

    /// Bring `b` into the normal interval `−a < b ≤ a`.
    pub(crate) fn normalize(&mut self) {
        if self.a.is_zero() {
            return;
        }
        if -&self.a < self.b && self.b <= self.a {
            return;
        }
        let two_a = &self.a << 1;
        let r = (&self.a - &self.b).div_floor(&two_a);
        // c' = a·r² + b·r + c, then b' = b + 2·a·r
        self.c = &self.a * &r * &r + &self.b * &r + &self.c;
        self.b = &self.b + &two_a * &r;
    }

    /// Reduced canonical representative of this class.
    #[must_use]
    pub fn reduce(&self) -> Self {
        let mut f = self.clone();
        f.reduce_in_place();
        f
    }

    pub(crate) fn reduce_in_place(&mut self) {
        if self.a.is_zero() {
            // degenerate input; nothing sensible to do
            warn!("reduce called on a form with a = 0");
            return;
        }
        if self.a.is_negative() {
            self.a = -&self.a;
            self.c = -&self.c;
        }
        self.normalize();
        while self.a > self.c || (self.a == self.c && self.b.is_negative()) {
            // Gauss step: (a, b, c) ← (c, −b, a), then renormalise
            std::mem::swap(&mut self.a, &mut self.c);
            self.b = -&self.b;
            self.normalize();
        }
    }

    /// Square this form (NUDUPL-style specialised doubling). Output is
    /// reduced. `bound` is the reduction bound `L = ⌊|D|^{1/4}⌋`; forms whose
    /// `b` already sits below it skip the pre-normalisation pass.
    pub fn nudupl(&self, disc: &Discriminant, bound: &BigUint) -> VdfResult<Self> {
        let mut metered = u64::MAX;
        match self.nudupl_metered(disc, bound, &mut metered) {
            Some(result) => result,
            // unreachable with an unlimited budget
            None => Err(VdfError::ComputationFailed),
        }
    }

    /// Doubling with a GCD iteration budget; `None` means the budget ran out
    /// before the result was produced and the caller should take the
    /// unmetered path.
    pub(crate) fn nudupl_metered(
        &self,
        disc: &Discriminant,
        bound: &BigUint,
        budget: &mut u64,
    ) -> Option<VdfResult<Self>> {
        if !self.is_valid(disc) {
            return Some(Err(VdfError::InvalidForm));
        }
        if self.is_principal() {
            return Some(Ok(Self::principal(disc.value())));
        }

        let (w, _, _) = arith::xgcd_metered(&self.a, &self.b, budget)?;
        if w.is_zero() {
            return Some(Err(VdfError::InvalidForm));
        }
        let s = &self.a / &w;
        let u = &self.b / &w;

        // k ≡ c·u⁻¹ (mod s); gcd(u, s) = 1 because w = gcd(a, b)
        let k = match arith::mod_inverse(&u, &s) {
            Some(inv) => (&self.c * inv).mod_floor(&s),
            None => return Some(Err(VdfError::InvalidForm)),
        };

        // m = (u·k − c)/s is exact by the choice of k
        let m_num = &u * &k - &self.c;
        let (m, m_rem) = m_num.div_rem(&s);
        if !m_rem.is_zero() {
            return Some(Err(VdfError::InvalidForm));
        }

        let a3 = &s * &s;
        let b3 = &self.b - ((&s * &k) << 1);
        let c3 = &k * &k - &w * &m;

        let mut squared = QuadraticForm::new(a3, b3, c3);
        if squared.discriminant() != *disc.value() {
            return Some(Err(VdfError::InvalidForm));
        }
        if squared.b.magnitude() > bound {
            squared.normalize();
        }
        squared.reduce_in_place();
        Some(Ok(squared))
    }

    /// Gauss composition of two forms of the same discriminant. Output is
    /// reduced.
    pub fn compose(&self, other: &Self, disc: &Discriminant) -> VdfResult<Self> {
        if !self.is_valid(disc) || !other.is_valid(disc) {
            return Err(VdfError::InvalidForm);
        }
        if self.is_principal() {
            return Ok(other.reduce());
        }
        if other.is_principal() {
            return Ok(self.reduce());
        }

        let f1 = self.reduce();
        let f2 = other.reduce();
        let (a1, b1, c1) = (&f1.a, &f1.b, &f1.c);
        let (a2, b2, c2) = (&f2.a, &f2.b, &f2.c);

        // b1 ≡ b2 ≡ D (mod 2), so g and h are integers
        let g = (b2 + b1) >> 1;
        let h = (b2 - b1) >> 1;
        let w = a1.gcd(a2).gcd(&g);

        let j = w.clone();
        let s = a1 / &w;
        let t = a2 / &w;
        let u = &g / &w;

        // k solves (t·u)·k ≡ h·u + s·c1 (mod s·t)
        let st = &s * &t;
        let (k_part, modulus) = solve_linear(&(&t * &u), &(&h * &u + &s * c1), &st)?;
        let (n, _) = solve_linear(&(&t * &modulus), &(&h - &t * &k_part), &s)?;
        let k = &k_part + &modulus * &n;

        let l_num: BigInt = &t * &k - &h;
        let (l, l_rem) = l_num.div_rem(&s);
        if !l_rem.is_zero() {
            return Err(VdfError::InvalidForm);
        }
        let m_num: BigInt = &t * &u * &k - &h * &u - c1 * &s;
        let (m, m_rem) = m_num.div_rem(&st);
        if !m_rem.is_zero() {
            return Err(VdfError::InvalidForm);
        }

        let a3 = st;
        let b3 = &j * &u - (&k * &t + &l * &s);
        let c3 = &k * &l - &j * &m;

        let mut composed = QuadraticForm::new(a3, b3, c3);
        if composed.discriminant() != *disc.value() {
            return Err(VdfError::InvalidForm);
        }
        composed.reduce_in_place();
        Ok(composed)
    }

    /// `self^exp` by left-to-right binary exponentiation, reducing after
    /// every group operation.
    pub fn pow(&self, exp: &BigUint, disc: &Discriminant, bound: &BigUint) -> VdfResult<Self> {
        let mut result = Self::principal(disc.value());
        if exp.is_zero() {
            return Ok(result);
        }
        let base = self.reduce();
        for byte in exp.to_bytes_be() {
            for shift in (0..8).rev() {
                result = result.nudupl(disc, bound)?;
                if (byte >> shift) & 1 == 1 {
                    result = result.compose(&base, disc)?;
                }
            }
        }
        Ok(result)
    }
}

/// Solve `a·x ≡ b (mod m)` for `m > 0`. Returns the smallest non-negative
/// solution together with the solution-space modulus `m / gcd(a, m)`.
fn solve_linear(a: &BigInt, b: &BigInt, m: &BigInt) -> VdfResult<(BigInt, BigInt)> {
    let (g, d, _) = arith::xgcd(a, m);
    if g.is_zero() {
        return Err(VdfError::InvalidForm);
    }
    let (q, rem) = b.div_rem(&g);
    if !rem.is_zero() {
        return Err(VdfError::InvalidForm);
    }
    Ok(((q * d).mod_floor(m), m / g))
}

impl std::fmt::Display for QuadraticForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.a, self.b, self.c)
    }
}
