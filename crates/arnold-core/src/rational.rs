//! Exact nonnegative rationals and the coprime "ball" lattice.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArnoldError, Result};

/// Greatest common divisor. `gcd(0, 0) == 0`.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least common multiple, failing on overflow. `lcm(0, x) == 0`.
pub fn lcm(a: u64, b: u64) -> Result<u64> {
    if a == 0 || b == 0 {
        return Ok(0);
    }
    (a / gcd(a, b))
        .checked_mul(b)
        .ok_or_else(|| ArnoldError::InvalidValue(format!("lcm({a}, {b}) overflows u64")))
}

/// Nonnegative rational in lowest terms.
///
/// The denominator is positive for every finite value. The single exception
/// is [`Rational::INF`] (`1/0`), a limit value that arithmetic may produce
/// but never divides by meaningfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RationalParts")]
pub struct Rational {
    numer: u64,
    denom: u64,
}

#[derive(Deserialize)]
struct RationalParts {
    numer: u64,
    denom: u64,
}

impl TryFrom<RationalParts> for Rational {
    type Error = ArnoldError;

    fn try_from(parts: RationalParts) -> Result<Self> {
        Rational::new(parts.numer, parts.denom)
    }
}

impl Rational {
    pub const ZERO: Rational = Rational { numer: 0, denom: 1 };
    pub const ONE: Rational = Rational { numer: 1, denom: 1 };
    pub const INF: Rational = Rational { numer: 1, denom: 0 };

    /// Construct `numer/denom` reduced to lowest terms. `0/0` is rejected.
    pub fn new(numer: u64, denom: u64) -> Result<Self> {
        if numer == 0 && denom == 0 {
            return Err(ArnoldError::InvalidValue("0/0 is not a rational".into()));
        }
        let g = gcd(numer, denom);
        Ok(Self {
            numer: numer / g,
            denom: denom / g,
        })
    }

    /// Whole number `n/1`.
    pub fn integer(n: u64) -> Self {
        Self { numer: n, denom: 1 }
    }

    fn from_wide(numer: u128, denom: u128) -> Result<Self> {
        if numer == 0 && denom == 0 {
            return Err(ArnoldError::InvalidValue("0/0 is not a rational".into()));
        }
        let g = gcd_u128(numer, denom);
        let (n, d) = (numer / g, denom / g);
        match (u64::try_from(n), u64::try_from(d)) {
            (Ok(numer), Ok(denom)) => Ok(Self { numer, denom }),
            _ => Err(ArnoldError::InvalidValue(format!(
                "{n}/{d} does not fit in 64 bits"
            ))),
        }
    }

    pub fn numer(self) -> u64 {
        self.numer
    }

    pub fn denom(self) -> u64 {
        self.denom
    }

    pub fn is_zero(self) -> bool {
        self.numer == 0
    }

    pub fn is_infinite(self) -> bool {
        self.denom == 0
    }

    pub fn add(self, rhs: Self) -> Result<Self> {
        let (a, b, c, d) = self.wide(rhs);
        Self::from_wide(a * d + b * c, b * d)
    }

    /// Difference, failing with `Domain` when the result would be negative.
    pub fn sub(self, rhs: Self) -> Result<Self> {
        let (a, b, c, d) = self.wide(rhs);
        let (lhs, rhs_scaled) = (a * d, b * c);
        if lhs < rhs_scaled {
            return Err(ArnoldError::Domain(format!(
                "{self} - {rhs} is negative"
            )));
        }
        Self::from_wide(lhs - rhs_scaled, b * d)
    }

    pub fn mul(self, rhs: Self) -> Result<Self> {
        let (a, b, c, d) = self.wide(rhs);
        Self::from_wide(a * c, b * d)
    }

    pub fn div(self, rhs: Self) -> Result<Self> {
        let (a, b, c, d) = self.wide(rhs);
        Self::from_wide(a * d, b * c)
    }

    /// `q/p`. Swaps zero and infinity.
    pub fn recip(self) -> Self {
        Self {
            numer: self.denom,
            denom: self.numer,
        }
    }

    /// Lossy conversion for display and energy computations.
    pub fn to_f64(self) -> f64 {
        self.numer as f64 / self.denom as f64
    }

    /// Euclidean length of `(numer, denom)`.
    pub fn norm(self) -> f64 {
        hypot(self.numer as f64, self.denom as f64)
    }

    /// Pitch distance `|self / other|`, symmetric in its arguments.
    pub fn distance(self, other: Self) -> f64 {
        let (a, b, c, d) = self.wide(other);
        let (n, m) = (a * d, b * c);
        let g = gcd_u128(n, m).max(1);
        hypot((n / g) as f64, (m / g) as f64)
    }

    fn wide(self, rhs: Self) -> (u128, u128, u128, u128) {
        (
            self.numer as u128,
            self.denom as u128,
            rhs.numer as u128,
            rhs.denom as u128,
        )
    }

    /// All rationals `p/q` with `p, q >= 1`, `gcd(p, q) == 1` and
    /// `p² + q² <= radius²`, in ascending order.
    pub fn ball(radius: f64) -> Vec<Rational> {
        let mut result = Vec::new();
        if radius.is_nan() || radius < 1.0 {
            return result;
        }
        let r2 = radius * radius;
        let max = radius.floor() as u64;
        for numer in 1..=max {
            let mut denom = 1u64;
            while (numer * numer + denom * denom) as f64 <= r2 {
                if gcd(numer, denom) == 1 {
                    result.push(Rational { numer, denom });
                }
                denom += 1;
            }
        }
        result.sort();
        tracing::debug!("rational ball radius={radius} size={}", result.len());
        result
    }
}

fn hypot(x: f64, y: f64) -> f64 {
    (x * x + y * y).sqrt()
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, c, d) = self.wide(*other);
        (a * d).cmp(&(c * b))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numer, self.denom)
    }
}

impl FromStr for Rational {
    type Err = ArnoldError;

    /// Parses `p/q` or a bare integer `p`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|e| ArnoldError::InvalidValue(format!("bad rational '{s}': {e}")))
        };
        match s.split_once('/') {
            Some((n, d)) => Rational::new(parse(n)?, parse(d)?),
            None => Ok(Rational::integer(parse(s)?)),
        }
    }
}
