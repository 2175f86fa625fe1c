// ABOUTME: Arbitrary-precision decimal numbers backing all NumFu arithmetic

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::{Integer, Roots};
use num_traits::{Signed, ToPrimitive, Zero};

/// Guard digits carried by intermediate computations before the final
/// rounding back to the requested precision.
const GUARD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    Finite,
    Nan,
    Inf,
    NegInf,
}

/// Named constants keep a rendering tag so `pi` prints as `pi` until it is
/// consumed by arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstName {
    Pi,
    E,
}

/// A decimal number: `coeff * 10^exp`, with the sign carried by `coeff`.
/// Finite values are kept normalized (no trailing zeros in `coeff`), so a
/// value is an integer exactly when `exp >= 0`.
#[derive(Debug, Clone)]
pub struct Number {
    coeff: BigInt,
    exp: i64,
    special: Special,
    name: Option<ConstName>,
}

impl Number {
    pub fn zero() -> Self {
        Number {
            coeff: BigInt::zero(),
            exp: 0,
            special: Special::Finite,
            name: None,
        }
    }

    pub fn one() -> Self {
        Number::from_i64(1)
    }

    pub fn nan() -> Self {
        Number {
            coeff: BigInt::zero(),
            exp: 0,
            special: Special::Nan,
            name: None,
        }
    }

    pub fn inf(negative: bool) -> Self {
        Number {
            coeff: BigInt::zero(),
            exp: 0,
            special: if negative {
                Special::NegInf
            } else {
                Special::Inf
            },
            name: None,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        Number::from_parts(BigInt::from(v), 0)
    }

    pub fn from_parts(coeff: BigInt, exp: i64) -> Self {
        let mut n = Number {
            coeff,
            exp,
            special: Special::Finite,
            name: None,
        };
        n.normalize();
        n
    }

    fn named(mut self, name: ConstName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn is_finite(&self) -> bool {
        self.special == Special::Finite
    }

    pub fn is_nan(&self) -> bool {
        self.special == Special::Nan
    }

    pub fn is_zero(&self) -> bool {
        self.is_finite() && self.coeff.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        match self.special {
            Special::Finite => self.coeff.is_negative(),
            Special::NegInf => true,
            _ => false,
        }
    }

    /// Normalized numbers are integers iff the exponent is non-negative.
    pub fn is_integer(&self) -> bool {
        self.is_finite() && self.exp >= 0
    }

    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }
        if self.exp > 18 {
            return None;
        }
        let scaled = &self.coeff * pow10(self.exp as u32);
        scaled.to_i64()
    }

    /// Strip trailing zeros from the coefficient so representations are
    /// canonical. Zero collapses to exponent 0.
    fn normalize(&mut self) {
        if !self.is_finite() {
            return;
        }
        if self.coeff.is_zero() {
            self.exp = 0;
            return;
        }
        let ten = BigInt::from(10);
        loop {
            let (q, r) = self.coeff.div_rem(&ten);
            if r.is_zero() {
                self.coeff = q;
                self.exp += 1;
            } else {
                break;
            }
        }
    }

    fn digits(&self) -> u32 {
        digit_count(&self.coeff)
    }

    /// Decimal order of magnitude: the value lies in [10^order, 10^(order+1)).
    fn order(&self) -> i64 {
        self.exp + self.digits() as i64 - 1
    }

    /// Round to `prec` significant digits, half to even. Every arithmetic
    /// result passes through here, which also drops any constant tag.
    pub fn round_to(&self, prec: u32) -> Number {
        if !self.is_finite() || self.coeff.is_zero() {
            let mut n = self.clone();
            n.name = None;
            return n;
        }
        let digits = self.digits();
        if digits <= prec {
            let mut n = self.clone();
            n.name = None;
            return n;
        }
        let drop = digits - prec;
        let divisor = pow10(drop);
        let negative = self.coeff.is_negative();
        let mag = self.coeff.abs();
        let (mut q, r) = mag.div_rem(&divisor);
        let twice = &r * BigInt::from(2);
        match twice.cmp(&divisor) {
            Ordering::Greater => q += 1,
            Ordering::Equal => {
                if q.is_odd() {
                    q += 1;
                }
            }
            Ordering::Less => {}
        }
        let coeff = if negative { -q } else { q };
        Number::from_parts(coeff, self.exp + drop as i64)
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    pub fn neg(&self) -> Number {
        match self.special {
            Special::Nan => Number::nan(),
            Special::Inf => Number::inf(true),
            Special::NegInf => Number::inf(false),
            Special::Finite => Number {
                coeff: -self.coeff.clone(),
                exp: self.exp,
                special: Special::Finite,
                name: None,
            },
        }
    }

    pub fn abs(&self) -> Number {
        if self.is_negative() {
            self.neg()
        } else {
            let mut n = self.clone();
            n.name = None;
            n
        }
    }

    pub fn add(&self, other: &Number, prec: u32) -> Number {
        match (self.special, other.special) {
            (Special::Nan, _) | (_, Special::Nan) => return Number::nan(),
            (Special::Inf, Special::NegInf) | (Special::NegInf, Special::Inf) => {
                return Number::nan()
            }
            (Special::Inf, _) | (_, Special::Inf) => return Number::inf(false),
            (Special::NegInf, _) | (_, Special::NegInf) => return Number::inf(true),
            _ => {}
        }
        if self.is_zero() {
            return other.round_to(prec);
        }
        if other.is_zero() {
            return self.round_to(prec);
        }
        // When the magnitudes are too far apart to interact at this
        // precision, the larger operand is the sum.
        let window = prec as i64 + GUARD as i64 + 2;
        if self.order() - other.order() > window {
            return self.round_to(prec);
        }
        if other.order() - self.order() > window {
            return other.round_to(prec);
        }
        let m = self.exp.min(other.exp);
        let a = &self.coeff * pow10((self.exp - m) as u32);
        let b = &other.coeff * pow10((other.exp - m) as u32);
        Number::from_parts(a + b, m).round_to(prec)
    }

    pub fn sub(&self, other: &Number, prec: u32) -> Number {
        self.add(&other.neg(), prec)
    }

    pub fn mul(&self, other: &Number, prec: u32) -> Number {
        match (self.special, other.special) {
            (Special::Nan, _) | (_, Special::Nan) => return Number::nan(),
            (Special::Finite, Special::Finite) => {}
            _ => {
                if self.is_zero() || other.is_zero() {
                    return Number::nan();
                }
                return Number::inf(self.is_negative() != other.is_negative());
            }
        }
        Number::from_parts(&self.coeff * &other.coeff, self.exp + other.exp).round_to(prec)
    }

    /// Division by zero follows the interpreter's convention: `0/0` is nan,
    /// anything else saturates to a signed infinity.
    pub fn div(&self, other: &Number, prec: u32) -> Number {
        match (self.special, other.special) {
            (Special::Nan, _) | (_, Special::Nan) => return Number::nan(),
            (Special::Finite, Special::Finite) => {}
            (Special::Finite, _) => return Number::zero(),
            (_, Special::Finite) => {
                if other.is_zero() {
                    return Number::nan();
                }
                return Number::inf(self.is_negative() != other.is_negative());
            }
            _ => return Number::nan(),
        }
        if other.is_zero() {
            if self.is_zero() {
                return Number::nan();
            }
            return Number::inf(self.is_negative());
        }
        if self.is_zero() {
            return Number::zero();
        }
        let scale = prec + GUARD + other.digits();
        let scaled = &self.coeff * pow10(scale);
        let (mut q, r) = scaled.div_rem(&other.coeff);
        // Round the guard digit away from zero on a half-or-more remainder.
        let twice = r.abs() * BigInt::from(2);
        if twice >= other.coeff.abs() {
            if q.is_negative() {
                q -= 1;
            } else {
                q += 1;
            }
        }
        Number::from_parts(q, self.exp - other.exp - scale as i64).round_to(prec)
    }

    /// Remainder with the sign of the dividend (fmod semantics).
    pub fn rem(&self, other: &Number, prec: u32) -> Number {
        if !self.is_finite() || !other.is_finite() || other.is_zero() {
            return Number::nan();
        }
        if self.is_zero() {
            return Number::zero();
        }
        let m = self.exp.min(other.exp);
        let a = &self.coeff * pow10((self.exp - m) as u32);
        let b = &other.coeff * pow10((other.exp - m) as u32);
        let r = a % b;
        Number::from_parts(r, m).round_to(prec)
    }

    pub fn floor(&self) -> Number {
        self.to_integer(false)
    }

    pub fn ceil(&self) -> Number {
        self.to_integer(true)
    }

    fn to_integer(&self, toward_positive: bool) -> Number {
        if !self.is_finite() {
            return self.clone();
        }
        if self.exp >= 0 {
            let mut n = self.clone();
            n.name = None;
            return n;
        }
        let divisor = pow10((-self.exp) as u32);
        let (q, r) = self.coeff.div_rem(&divisor);
        let mut q = q;
        if !r.is_zero() {
            if toward_positive && !self.coeff.is_negative() {
                q += 1;
            } else if !toward_positive && self.coeff.is_negative() {
                q -= 1;
            }
        }
        Number::from_parts(q, 0)
    }

    /// Round half away from zero, keeping `places` digits after the point.
    pub fn round_places(&self, places: i64) -> Number {
        if !self.is_finite() {
            return self.clone();
        }
        if self.exp >= -places {
            let mut n = self.clone();
            n.name = None;
            return n;
        }
        let drop = (-places - self.exp) as u32;
        let divisor = pow10(drop);
        let negative = self.coeff.is_negative();
        let mag = self.coeff.abs();
        let (mut q, r) = mag.div_rem(&divisor);
        if r.abs() * BigInt::from(2) >= divisor {
            q += 1;
        }
        let coeff = if negative { -q } else { q };
        Number::from_parts(coeff, -places)
    }

    pub fn signum(&self) -> Number {
        match self.special {
            Special::Nan => Number::nan(),
            Special::Inf => Number::from_i64(1),
            Special::NegInf => Number::from_i64(-1),
            Special::Finite => {
                if self.coeff.is_zero() {
                    Number::zero()
                } else if self.coeff.is_negative() {
                    Number::from_i64(-1)
                } else {
                    Number::from_i64(1)
                }
            }
        }
    }

    pub fn cmp_num(&self, other: &Number) -> Option<Ordering> {
        match (self.special, other.special) {
            (Special::Nan, _) | (_, Special::Nan) => None,
            (Special::Inf, Special::Inf) | (Special::NegInf, Special::NegInf) => {
                Some(Ordering::Equal)
            }
            (Special::Inf, _) => Some(Ordering::Greater),
            (_, Special::Inf) => Some(Ordering::Less),
            (Special::NegInf, _) => Some(Ordering::Less),
            (_, Special::NegInf) => Some(Ordering::Greater),
            (Special::Finite, Special::Finite) => Some(self.cmp_finite(other)),
        }
    }

    fn cmp_finite(&self, other: &Number) -> Ordering {
        let sa = self.coeff.sign();
        let sb = other.coeff.sign();
        if sa != sb {
            return sa.cmp(&sb);
        }
        if self.coeff.is_zero() {
            return Ordering::Equal;
        }
        let oa = self.order();
        let ob = other.order();
        if oa != ob {
            let by_order = oa.cmp(&ob);
            return if self.coeff.is_negative() {
                by_order.reverse()
            } else {
                by_order
            };
        }
        let m = self.exp.min(other.exp);
        let a = &self.coeff * pow10((self.exp - m) as u32);
        let b = &other.coeff * pow10((other.exp - m) as u32);
        a.cmp(&b)
    }

    pub fn eq_num(&self, other: &Number) -> bool {
        self.cmp_num(other) == Some(Ordering::Equal)
    }

    // ------------------------------------------------------------------
    // Roots, exponentials, logarithms
    // ------------------------------------------------------------------

    pub fn sqrt(&self, prec: u32) -> Number {
        match self.special {
            Special::Nan | Special::NegInf => return Number::nan(),
            Special::Inf => return Number::inf(false),
            Special::Finite => {}
        }
        if self.is_negative() {
            return Number::nan();
        }
        if self.is_zero() {
            return Number::zero();
        }
        let wp = prec + GUARD;
        // Scale so the integer square root carries at least wp digits and
        // the scaled exponent is even.
        let mut shift = (2 * wp + 2).saturating_sub(self.digits()) as i64;
        if (self.exp - shift) % 2 != 0 {
            shift += 1;
        }
        let scaled = self.coeff.magnitude() * pow10(shift as u32).magnitude();
        let root = scaled.sqrt();
        Number::from_parts(BigInt::from(root), (self.exp - shift) / 2).round_to(prec)
    }

    pub fn exp(&self, prec: u32) -> Number {
        match self.special {
            Special::Nan => return Number::nan(),
            Special::Inf => return Number::inf(false),
            Special::NegInf => return Number::zero(),
            Special::Finite => {}
        }
        if self.is_zero() {
            return Number::one();
        }
        // Beyond this magnitude the result over/underflows any sane
        // representation.
        if self.order() > 17 {
            return if self.is_negative() {
                Number::zero()
            } else {
                Number::inf(false)
            };
        }
        let int_part = self.floor();
        let frac = self.sub(&int_part, prec + 2 * GUARD);
        let n = int_part.to_i64().unwrap_or(0);
        let wp = prec + GUARD + (n.unsigned_abs().checked_ilog10().unwrap_or(0) + 1);
        let e = euler(wp + GUARD);
        let int_pow = if n == 0 {
            Number::one()
        } else {
            let p = pow_int(&e, n.unsigned_abs(), wp + GUARD);
            if n < 0 {
                Number::one().div(&p, wp + GUARD)
            } else {
                p
            }
        };
        let frac_exp = exp_series(&frac, wp);
        int_pow.mul(&frac_exp, wp).round_to(prec)
    }

    pub fn ln(&self, prec: u32) -> Number {
        match self.special {
            Special::Nan | Special::NegInf => return Number::nan(),
            Special::Inf => return Number::inf(false),
            Special::Finite => {}
        }
        if self.is_negative() {
            return Number::nan();
        }
        if self.is_zero() {
            return Number::inf(true);
        }
        let wp = prec + GUARD;
        // x = m * 10^k with m in [1, 10): ln x = ln m + k ln 10
        let k = self.order();
        let m = Number::from_parts(self.coeff.clone(), self.exp - k);
        let ln_m = ln_near_one(&m, wp);
        let ln_10 = ln_ten(wp);
        ln_m.add(&ln_10.mul(&Number::from_i64(k), wp + 2), wp)
            .round_to(prec)
    }

    pub fn log10(&self, prec: u32) -> Number {
        let wp = prec + GUARD;
        self.ln(wp).div(&ln_ten(wp), wp).round_to(prec)
    }

    pub fn log_base(&self, base: &Number, prec: u32) -> Number {
        let wp = prec + GUARD;
        self.ln(wp).div(&base.ln(wp), wp).round_to(prec)
    }

    pub fn pow(&self, other: &Number, prec: u32) -> Number {
        if self.is_nan() || other.is_nan() {
            return Number::nan();
        }
        if other.is_finite() && other.is_zero() {
            return Number::one();
        }
        if let Some(n) = other.to_i64() {
            if n.unsigned_abs() <= 1_000_000 {
                if self.is_finite() && self.is_zero() {
                    return if n < 0 {
                        Number::inf(false)
                    } else {
                        Number::zero()
                    };
                }
                if !self.is_finite() {
                    let negative = self.special == Special::NegInf && n % 2 != 0;
                    return if n < 0 {
                        Number::zero()
                    } else {
                        Number::inf(negative)
                    };
                }
                let wp = prec + GUARD;
                let p = pow_int(self, n.unsigned_abs(), wp);
                let r = if n < 0 {
                    Number::one().div(&p, wp)
                } else {
                    p
                };
                return r.round_to(prec);
            }
        }
        // Fractional or huge exponent: a^b = exp(b ln a); a < 0 has no
        // real result.
        if self.is_negative() {
            return Number::nan();
        }
        let wp = prec + GUARD;
        other.mul(&self.ln(wp), wp).exp(wp).round_to(prec)
    }

    // ------------------------------------------------------------------
    // Trigonometry and hyperbolics
    // ------------------------------------------------------------------

    pub fn sin(&self, prec: u32) -> Number {
        if !self.is_finite() || self.order() > 10_000 {
            return Number::nan();
        }
        let wp = prec + GUARD + self.order().max(0) as u32;
        let x = reduce_mod_2pi(self, wp);
        sin_series(&x, wp).round_to(prec)
    }

    pub fn cos(&self, prec: u32) -> Number {
        if !self.is_finite() || self.order() > 10_000 {
            return Number::nan();
        }
        let wp = prec + GUARD + self.order().max(0) as u32;
        let half_pi = pi(wp).div(&Number::from_i64(2), wp);
        let x = reduce_mod_2pi(&self.add(&half_pi, wp), wp);
        sin_series(&x, wp).round_to(prec)
    }

    pub fn tan(&self, prec: u32) -> Number {
        if !self.is_finite() {
            return Number::nan();
        }
        let wp = prec + GUARD;
        self.sin(wp).div(&self.cos(wp), wp).round_to(prec)
    }

    pub fn atan(&self, prec: u32) -> Number {
        match self.special {
            Special::Nan => return Number::nan(),
            Special::Inf => return pi(prec + 2).div(&Number::from_i64(2), prec),
            Special::NegInf => {
                return pi(prec + 2).div(&Number::from_i64(2), prec).neg();
            }
            Special::Finite => {}
        }
        let wp = prec + GUARD;
        atan_reduced(self, wp).round_to(prec)
    }

    pub fn asin(&self, prec: u32) -> Number {
        if !self.is_finite() {
            return Number::nan();
        }
        let one = Number::one();
        match self.abs().cmp_num(&one) {
            Some(Ordering::Greater) | None => return Number::nan(),
            Some(Ordering::Equal) => {
                let half_pi = pi(prec + 2).div(&Number::from_i64(2), prec);
                return if self.is_negative() {
                    half_pi.neg()
                } else {
                    half_pi
                };
            }
            Some(Ordering::Less) => {}
        }
        // asin x = atan(x / sqrt(1 - x^2))
        let wp = prec + GUARD;
        let x2 = self.mul(self, wp);
        let denom = one.sub(&x2, wp).sqrt(wp);
        self.div(&denom, wp).atan(wp).round_to(prec)
    }

    pub fn acos(&self, prec: u32) -> Number {
        if !self.is_finite() {
            return Number::nan();
        }
        if self.abs().cmp_num(&Number::one()) == Some(Ordering::Greater) {
            return Number::nan();
        }
        let wp = prec + GUARD;
        let half_pi = pi(wp).div(&Number::from_i64(2), wp);
        half_pi.sub(&self.asin(wp), wp).round_to(prec)
    }

    pub fn atan2(&self, x: &Number, prec: u32) -> Number {
        let y = self;
        if y.is_nan() || x.is_nan() {
            return Number::nan();
        }
        let wp = prec + GUARD;
        if x.is_zero() {
            if y.is_zero() {
                return Number::zero();
            }
            let half_pi = pi(wp).div(&Number::from_i64(2), wp).round_to(prec);
            return if y.is_negative() { half_pi.neg() } else { half_pi };
        }
        let base = y.div(x, wp).atan(wp);
        let r = if x.is_negative() {
            if y.is_negative() {
                base.sub(&pi(wp), wp)
            } else {
                base.add(&pi(wp), wp)
            }
        } else {
            base
        };
        r.round_to(prec)
    }

    pub fn sinh(&self, prec: u32) -> Number {
        let wp = prec + GUARD;
        let e = self.exp(wp);
        let inv = Number::one().div(&e, wp);
        e.sub(&inv, wp).div(&Number::from_i64(2), wp).round_to(prec)
    }

    pub fn cosh(&self, prec: u32) -> Number {
        let wp = prec + GUARD;
        let e = self.exp(wp);
        let inv = Number::one().div(&e, wp);
        e.add(&inv, wp).div(&Number::from_i64(2), wp).round_to(prec)
    }

    pub fn tanh(&self, prec: u32) -> Number {
        match self.special {
            Special::Nan => return Number::nan(),
            Special::Inf => return Number::one(),
            Special::NegInf => return Number::from_i64(-1),
            Special::Finite => {}
        }
        let wp = prec + GUARD;
        self.sinh(wp).div(&self.cosh(wp), wp).round_to(prec)
    }

    pub fn asinh(&self, prec: u32) -> Number {
        if !self.is_finite() {
            return self.clone();
        }
        let wp = prec + GUARD;
        let x2 = self.mul(self, wp);
        let root = x2.add(&Number::one(), wp).sqrt(wp);
        self.add(&root, wp).ln(wp).round_to(prec)
    }

    pub fn acosh(&self, prec: u32) -> Number {
        if self.is_nan() || self.special == Special::NegInf {
            return Number::nan();
        }
        if self.special == Special::Inf {
            return Number::inf(false);
        }
        if self.cmp_num(&Number::one()) == Some(Ordering::Less) {
            return Number::nan();
        }
        let wp = prec + GUARD;
        let x2 = self.mul(self, wp);
        let root = x2.sub(&Number::one(), wp).sqrt(wp);
        self.add(&root, wp).ln(wp).round_to(prec)
    }

    pub fn atanh(&self, prec: u32) -> Number {
        if !self.is_finite() {
            return Number::nan();
        }
        let one = Number::one();
        match self.abs().cmp_num(&one) {
            Some(Ordering::Greater) | None => return Number::nan(),
            Some(Ordering::Equal) => return Number::inf(self.is_negative()),
            Some(Ordering::Less) => {}
        }
        let wp = prec + GUARD;
        let num = one.add(self, wp);
        let den = one.sub(self, wp);
        num.div(&den, wp)
            .ln(wp)
            .div(&Number::from_i64(2), wp)
            .round_to(prec)
    }

    // ------------------------------------------------------------------
    // Parsing & rendering
    // ------------------------------------------------------------------

    /// Parse a numeric literal. Sign chains resolve by parity, so `--3`
    /// is `3` and `-0` normalizes to plain zero.
    pub fn parse(text: &str) -> Option<Number> {
        let mut rest = text.trim();
        let mut negative = false;
        while let Some(stripped) = rest.strip_prefix(['-', '+']) {
            if rest.starts_with('-') {
                negative = !negative;
            }
            rest = stripped;
        }
        match rest {
            "nan" => return Some(Number::nan()),
            "inf" => return Some(Number::inf(negative)),
            _ => {}
        }
        let cleaned: String = rest.chars().filter(|c| *c != '_').collect();
        let (mantissa, exp_part) = match cleaned.split_once(['e', 'E']) {
            Some((m, e)) => (m, Some(e)),
            None => (cleaned.as_str(), None),
        };
        let sci_exp: i64 = match exp_part {
            Some(e) => e.parse().ok()?,
            None => 0,
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        let digits = format!("{int_part}{frac_part}");
        let mut coeff: BigInt = digits.parse().ok()?;
        if negative {
            coeff = -coeff;
        }
        Some(Number::from_parts(coeff, sci_exp - frac_part.len() as i64))
    }

    /// Render at `prec` significant digits. Tagged constants render as
    /// their names; a trailing `.0` is suppressed.
    pub fn to_string_prec(&self, prec: u32) -> String {
        match self.name {
            Some(ConstName::Pi) => return "pi".to_string(),
            Some(ConstName::E) => return "e".to_string(),
            None => {}
        }
        match self.special {
            Special::Nan => return "nan".to_string(),
            Special::Inf => return "inf".to_string(),
            Special::NegInf => return "-inf".to_string(),
            Special::Finite => {}
        }
        if self.coeff.is_zero() {
            return "0".to_string();
        }
        let r = self.round_to(prec.max(1));
        let digits = r.coeff.magnitude().to_string();
        let negative = r.coeff.is_negative();
        let order = r.exp + digits.len() as i64 - 1;
        let body = if order < -5 || order > prec.max(1) as i64 + 4 {
            // Scientific notation outside the positional window.
            let mantissa = if digits.len() == 1 {
                digits
            } else {
                format!("{}.{}", &digits[..1], &digits[1..])
            };
            format!("{mantissa}e{}{}", if order < 0 { "-" } else { "+" }, order.abs())
        } else if r.exp >= 0 {
            let mut s = digits;
            s.extend(std::iter::repeat('0').take(r.exp as usize));
            s
        } else {
            let point = digits.len() as i64 + r.exp;
            if point > 0 {
                let (i, f) = digits.split_at(point as usize);
                format!("{i}.{f}")
            } else {
                let zeros: String = std::iter::repeat('0').take((-point) as usize).collect();
                format!("0.{zeros}{digits}")
            }
        };
        if negative {
            format!("-{body}")
        } else {
            body
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.eq_num(other)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.cmp_num(other)
    }
}

// ----------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------

/// Pi via the Machin formula: pi = 16 atan(1/5) - 4 atan(1/239).
pub fn pi(prec: u32) -> Number {
    let wp = prec + GUARD;
    let unit = pow10(wp);
    let a = atan_inv_scaled(5, &unit);
    let b = atan_inv_scaled(239, &unit);
    let scaled = a * BigInt::from(16) - b * BigInt::from(4);
    Number::from_parts(scaled, -(wp as i64)).round_to(prec)
}

pub fn pi_const(prec: u32) -> Number {
    pi(prec).named(ConstName::Pi)
}

/// e as the sum of inverse factorials.
pub fn euler(prec: u32) -> Number {
    let wp = prec + GUARD;
    let unit = pow10(wp);
    let mut sum = BigInt::zero();
    let mut term = unit.clone();
    let mut k: u64 = 1;
    while !term.is_zero() {
        sum += &term;
        term /= BigInt::from(k);
        k += 1;
    }
    Number::from_parts(sum, -(wp as i64)).round_to(prec)
}

pub fn euler_const(prec: u32) -> Number {
    euler(prec).named(ConstName::E)
}

// ----------------------------------------------------------------------
// Internal helpers
// ----------------------------------------------------------------------

fn pow10(n: u32) -> BigInt {
    BigInt::from(10u32).pow(n)
}

fn digit_count(v: &BigInt) -> u32 {
    if v.is_zero() {
        1
    } else {
        v.magnitude().to_string().len() as u32
    }
}

/// atan(1/x) * unit as a scaled integer (Gregory series).
fn atan_inv_scaled(x: u64, unit: &BigInt) -> BigInt {
    let xx = BigInt::from(x * x);
    let mut term = unit / BigInt::from(x);
    let mut sum = BigInt::zero();
    let mut k: u64 = 0;
    let mut negative = false;
    while !term.is_zero() {
        let contribution = &term / BigInt::from(2 * k + 1);
        if negative {
            sum -= contribution;
        } else {
            sum += contribution;
        }
        term /= &xx;
        negative = !negative;
        k += 1;
    }
    sum
}

fn eps(wp: u32) -> Number {
    Number::from_parts(BigInt::from(1), -(wp as i64))
}

fn pow_int(base: &Number, mut n: u64, wp: u32) -> Number {
    let mut result = Number::one();
    let mut acc = base.clone();
    while n > 0 {
        if n & 1 == 1 {
            result = result.mul(&acc, wp);
        }
        n >>= 1;
        if n > 0 {
            acc = acc.mul(&acc, wp);
        }
    }
    result
}

/// Taylor series for exp on |x| < 1.
fn exp_series(x: &Number, wp: u32) -> Number {
    let threshold = eps(wp);
    let mut sum = Number::one();
    let mut term = Number::one();
    let mut k: i64 = 1;
    loop {
        term = term.mul(x, wp).div(&Number::from_i64(k), wp);
        if term.abs().cmp_num(&threshold) == Some(Ordering::Less) {
            break;
        }
        sum = sum.add(&term, wp);
        k += 1;
    }
    sum
}

/// ln via the atanh series after pulling square roots until the argument
/// is close to 1.
fn ln_near_one(x: &Number, wp: u32) -> Number {
    let iwp = wp + GUARD;
    let mut m = x.clone();
    let mut doublings = 0u32;
    let near = Number::parse("0.1").expect("literal");
    while m.sub(&Number::one(), iwp).abs().cmp_num(&near) == Some(Ordering::Greater) {
        m = m.sqrt(iwp);
        doublings += 1;
        if doublings > 64 {
            break;
        }
    }
    let one = Number::one();
    let t = m.sub(&one, iwp).div(&m.add(&one, iwp), iwp);
    let t2 = t.mul(&t, iwp);
    let threshold = eps(iwp);
    let mut sum = Number::zero();
    let mut p = t.clone();
    let mut k: i64 = 0;
    loop {
        let term = p.div(&Number::from_i64(2 * k + 1), iwp);
        if term.abs().cmp_num(&threshold) == Some(Ordering::Less) {
            break;
        }
        sum = sum.add(&term, iwp);
        p = p.mul(&t2, iwp);
        k += 1;
    }
    let ln_m = sum.mul(&Number::from_i64(2), iwp);
    ln_m.mul(&pow_int(&Number::from_i64(2), doublings as u64, iwp), iwp)
}

fn ln_ten(wp: u32) -> Number {
    ln_near_one(&Number::from_i64(10), wp)
}

/// Reduce into [-pi, pi] for the sine series.
fn reduce_mod_2pi(x: &Number, wp: u32) -> Number {
    let two_pi = pi(wp + GUARD).mul(&Number::from_i64(2), wp + GUARD);
    let turns = x.div(&two_pi, wp + GUARD).round_places(0);
    x.sub(&turns.mul(&two_pi, wp + GUARD), wp)
}

/// Taylor series for sin on a reduced argument.
fn sin_series(x: &Number, wp: u32) -> Number {
    let threshold = eps(wp);
    let x2 = x.mul(x, wp);
    let mut sum = x.clone();
    let mut term = x.clone();
    let mut k: i64 = 1;
    loop {
        term = term
            .mul(&x2, wp)
            .div(&Number::from_i64(2 * k * (2 * k + 1)), wp)
            .neg();
        if term.abs().cmp_num(&threshold) == Some(Ordering::Less) {
            break;
        }
        sum = sum.add(&term, wp);
        k += 1;
    }
    sum
}

/// atan with half-angle reduction into the fast convergence zone.
fn atan_reduced(x: &Number, wp: u32) -> Number {
    let iwp = wp + GUARD;
    let quarter = Number::parse("0.25").expect("literal");
    let mut v = x.clone();
    let mut doublings = 0u32;
    while v.abs().cmp_num(&quarter) == Some(Ordering::Greater) {
        // atan(x) = 2 atan(x / (1 + sqrt(1 + x^2)))
        let x2 = v.mul(&v, iwp);
        let root = x2.add(&Number::one(), iwp).sqrt(iwp);
        v = v.div(&root.add(&Number::one(), iwp), iwp);
        doublings += 1;
        if doublings > 128 {
            break;
        }
    }
    let threshold = eps(iwp);
    let v2 = v.mul(&v, iwp);
    let mut sum = Number::zero();
    let mut p = v.clone();
    let mut k: i64 = 0;
    loop {
        let term = p.div(&Number::from_i64(2 * k + 1), iwp);
        if term.abs().cmp_num(&threshold) == Some(Ordering::Less) {
            break;
        }
        if k % 2 == 0 {
            sum = sum.add(&term, iwp);
        } else {
            sum = sum.sub(&term, iwp);
        }
        p = p.mul(&v2, iwp);
        k += 1;
    }
    sum.mul(&pow_int(&Number::from_i64(2), doublings as u64, iwp), iwp)
}
