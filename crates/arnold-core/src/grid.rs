//! Affine rational trajectories `phase(t) = freq·t + base (mod 1)` and the
//! finite lattice of grids within a norm radius.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{ArnoldError, Result};
use crate::rational::{Rational, lcm};

/// A periodic trajectory with exact rational frequency and phase.
///
/// `base` is always reduced into `[0, 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "GridParts", into = "GridParts")]
pub struct AffineGrid {
    freq: Rational,
    base: Rational,
}

/// Flat wire form `{freqNumer, freqDenom, baseNumer, baseDenom}`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridParts {
    pub freq_numer: u64,
    pub freq_denom: u64,
    pub base_numer: u64,
    pub base_denom: u64,
}

impl TryFrom<GridParts> for AffineGrid {
    type Error = ArnoldError;

    fn try_from(p: GridParts) -> Result<Self> {
        AffineGrid::new(
            Rational::new(p.freq_numer, p.freq_denom)?,
            Rational::new(p.base_numer, p.base_denom)?,
        )
    }
}

impl From<AffineGrid> for GridParts {
    fn from(g: AffineGrid) -> Self {
        GridParts {
            freq_numer: g.freq.numer(),
            freq_denom: g.freq.denom(),
            base_numer: g.base.numer(),
            base_denom: g.base.denom(),
        }
    }
}

impl AffineGrid {
    /// The downbeat: frequency 1, phase 0.
    pub const UNIT: AffineGrid = AffineGrid {
        freq: Rational::ONE,
        base: Rational::ZERO,
    };

    /// Build a grid, reducing `base` modulo 1.
    pub fn new(freq: Rational, base: Rational) -> Result<Self> {
        if freq.is_zero() || freq.is_infinite() {
            return Err(ArnoldError::InvalidValue(format!(
                "grid frequency must be finite and positive, got {freq}"
            )));
        }
        if base.is_infinite() {
            return Err(ArnoldError::InvalidValue("grid base must be finite".into()));
        }
        let base = Rational::new(base.numer() % base.denom(), base.denom())?;
        Ok(Self { freq, base })
    }

    pub fn freq(self) -> Rational {
        self.freq
    }

    pub fn base(self) -> Rational {
        self.base
    }

    /// Number of unit beats before the trajectory repeats.
    pub fn period(self) -> u64 {
        self.freq.denom()
    }

    /// Unwrapped phase at time `t` (in unit beats).
    pub fn phase_at_time(self, t: f64) -> f64 {
        self.freq.to_f64() * t + self.base.to_f64()
    }

    /// Frequency norm, penalized when the base is not a multiple of
    /// `1 / freq.denom`.
    pub fn norm(self) -> f64 {
        let result = self.freq.norm();
        let base_denom = self.base.denom();
        // offset is base mod (1 / freq.denom), scaled by base.denom
        let offset = ((self.freq.denom() as u128 * self.base.numer() as u128)
            % base_denom as u128) as u64;
        if offset == 0 {
            result
        } else {
            result * base_denom as f64 / offset.min(base_denom - offset) as f64
        }
    }

    /// This grid expressed in the frame where `other` is the unit grid.
    ///
    /// Bases are cancelled by shifting time (adding one to this grid's phase
    /// if it sits below `other`'s), then time is rescaled by `other.freq`.
    pub fn relative_to(self, other: AffineGrid) -> Result<AffineGrid> {
        let shift = if self.base >= other.base {
            self.base.sub(other.base)?
        } else {
            self.base.add(Rational::ONE)?.sub(other.base)?
        };
        AffineGrid::new(self.freq.div(other.freq)?, shift.div(other.freq)?)
    }

    /// Symmetric closeness of two grids. Not a metric: the triangle
    /// inequality can fail.
    pub fn distance(self, other: AffineGrid) -> Result<f64> {
        let normal = if self.base >= other.base {
            self.relative_to(other)?
        } else {
            other.relative_to(self)?
        };
        Ok(normal.norm())
    }

    /// Overlap of the attack envelopes of two grids over their joint period.
    ///
    /// In the frame where `other` is the unit grid, `self` has frequency
    /// `n/m`: the joint period holds `m` onsets of `other` and `n` onsets of
    /// `self`. At each onset of one grid the other's envelope is sampled as
    /// `e^{-s·φ} + e^{-s·(1-φ)}` (decay since its last onset plus rise into
    /// its next, normalized to 1 at φ = 0). Samples are weighted by the
    /// sampled grid's envelope width `1/s` and normalized by
    /// `m/sharpness + n/other_sharpness`, so identical grids interfere with
    /// weight 1.
    pub fn interference(
        self,
        other: AffineGrid,
        sharpness: f64,
        other_sharpness: f64,
    ) -> Result<f64> {
        let positive = |s: f64| s.is_finite() && s > 0.0;
        if !positive(sharpness) || !positive(other_sharpness) {
            return Err(ArnoldError::Domain(format!(
                "sharpness must be positive, got {sharpness} and {other_sharpness}"
            )));
        }
        let rel = self.relative_to(other)?;
        let m = rel.freq.denom() as u128;
        let n = rel.freq.numer() as u128;
        let bn = rel.base.numer() as u128;
        let bd = rel.base.denom() as u128;

        // self's phase at each onset of other (t = j)
        let period = m * bd;
        let mut sampled_self = 0.0;
        for j in 0..m {
            let phase = (n * j * bd + bn * m) % period;
            sampled_self += envelope(sharpness, phase as f64 / period as f64);
        }

        // other's phase at each onset of self, t = (k - base) m / n
        let period = n * bd;
        let mut sampled_other = 0.0;
        for k in 1..=n {
            let phase = ((k * bd - bn) * m) % period;
            sampled_other += envelope(other_sharpness, phase as f64 / period as f64);
        }

        let weight = m as f64 / sharpness + n as f64 / other_sharpness;
        Ok((sampled_self / sharpness + sampled_other / other_sharpness) / weight)
    }
}

/// Symmetric attack envelope, 1 at an onset and smallest mid-beat.
pub fn envelope(sharpness: f64, phase: f64) -> f64 {
    let sustain = (-sharpness).exp();
    ((-sharpness * phase).exp() + (-sharpness * (1.0 - phase)).exp()) / (1.0 + sustain)
}

impl fmt::Display for AffineGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} t + {}", self.freq, self.base)
    }
}

/// Least common multiple of every grid's period; 0 for no grids.
pub fn common_period(grids: &[AffineGrid]) -> Result<u64> {
    let mut iter = grids.iter();
    let Some(first) = iter.next() else {
        return Ok(0);
    };
    iter.try_fold(first.period(), |acc, g| lcm(acc, g.period()))
}

/// Deduplicated grids sorted by ascending norm, unit grid first.
#[derive(Clone, Debug)]
pub struct GridLattice {
    grids: Vec<AffineGrid>,
    common_period: u64,
}

impl GridLattice {
    /// Every grid with norm at most `radius`.
    ///
    /// Starts from the unshifted grids over `Rational::ball(radius)`, then for
    /// each pair of rates `(r1, r2)` tries every phase `k / denom(r1 / r2)`
    /// on `r1`. Quadratic in the rational ball; meant for small radii.
    pub fn ball(radius: f64) -> Result<Self> {
        let started = Instant::now();
        let rates = Rational::ball(radius);
        let mut grids: Vec<AffineGrid> = rates
            .iter()
            .map(|&freq| AffineGrid {
                freq,
                base: Rational::ZERO,
            })
            .collect();

        for &rate1 in &rates {
            let mut seen: HashSet<Rational> = HashSet::new();
            for &rate2 in &rates {
                let base_denom = rate1.div(rate2)?.denom();
                for base_numer in 1..base_denom {
                    let base = Rational::new(base_numer, base_denom)?;
                    if seen.contains(&base) {
                        continue;
                    }
                    let grid = AffineGrid::new(rate1, base)?;
                    if grid.norm() > radius {
                        continue;
                    }
                    seen.insert(base);
                    grids.push(grid);
                }
            }
        }

        grids.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
        let lattice = Self::from_sorted(grids)?;
        tracing::debug!(
            "grid ball radius={radius} size={} period={} in {:?}",
            lattice.len(),
            lattice.common_period,
            started.elapsed()
        );
        Ok(lattice)
    }

    fn from_sorted(grids: Vec<AffineGrid>) -> Result<Self> {
        let common_period = common_period(&grids)?;
        Ok(Self {
            grids,
            common_period,
        })
    }

    pub fn grids(&self) -> &[AffineGrid] {
        &self.grids
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<AffineGrid> {
        self.grids
            .get(index)
            .copied()
            .ok_or(ArnoldError::IndexOutOfRange {
                index,
                len: self.grids.len(),
            })
    }

    pub fn common_period(&self) -> u64 {
        self.common_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn r(n: u64, d: u64) -> Rational {
        Rational::new(n, d).unwrap()
    }

    fn grid(freq_n: u64, freq_d: u64, base_n: u64, base_d: u64) -> AffineGrid {
        AffineGrid::new(r(freq_n, freq_d), r(base_n, base_d)).unwrap()
    }

    fn sample_grids() -> Vec<AffineGrid> {
        vec![
            grid(1, 1, 0, 1),
            grid(2, 3, 5, 7),
            grid(11, 13, 17, 19),
            grid(23, 29, 31, 37),
            grid(41, 43, 47, 53),
            grid(59, 61, 67, 71),
        ]
    }

    #[test]
    fn test_base_reduced_mod_one() {
        let g = grid(3, 2, 7, 3);
        assert_eq!(g.base(), r(1, 3));
        let g = grid(3, 2, 4, 2);
        assert_eq!(g.base(), Rational::ZERO);
    }

    #[test]
    fn test_invalid_frequency_rejected() {
        assert!(AffineGrid::new(Rational::ZERO, Rational::ZERO).is_err());
        assert!(AffineGrid::new(Rational::INF, Rational::ZERO).is_err());
        assert!(AffineGrid::new(Rational::ONE, Rational::INF).is_err());
    }

    #[test]
    fn test_norm_unshifted() {
        assert_relative_eq!(grid(5, 2, 0, 1).norm(), 29f64.sqrt());
    }

    #[test]
    fn test_norm_shifted_penalty() {
        assert_relative_eq!(grid(5, 2, 1, 3).norm(), 29f64.sqrt() * 3.0);
    }

    #[test]
    fn test_norm_aligned_shift_has_no_penalty() {
        // 1/2 is a multiple of 1/denom(1/2)
        assert_relative_eq!(grid(1, 2, 1, 2).norm(), 5f64.sqrt());
    }

    #[test]
    fn test_relative_to_self_is_unit() {
        for g in sample_grids() {
            assert_eq!(g.relative_to(g).unwrap(), AffineGrid::UNIT);
        }
    }

    #[test]
    fn test_relative_to_unit_is_identity() {
        for g in sample_grids() {
            assert_eq!(g.relative_to(AffineGrid::UNIT).unwrap(), g);
        }
    }

    #[test]
    fn test_distance_symmetry_exact() {
        let grids = sample_grids();
        for &u in &grids {
            for &v in &grids {
                assert_eq!(
                    u.distance(v).unwrap(),
                    v.distance(u).unwrap(),
                    "distance is asymmetric for {u} and {v}"
                );
            }
        }
    }

    #[test]
    fn test_distance_equal_bases_is_pitch_distance() {
        let a = grid(3, 2, 1, 4);
        let b = grid(3, 4, 1, 4);
        assert_relative_eq!(a.distance(b).unwrap(), r(3, 2).distance(r(3, 4)));
    }

    #[test]
    fn test_interference_self_is_one() {
        for g in sample_grids().into_iter().take(3) {
            assert_relative_eq!(g.interference(g, 4.0, 4.0).unwrap(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_interference_half_beat() {
        let s = 4.0;
        let value = AffineGrid::UNIT
            .interference(grid(2, 1, 0, 1), s, s)
            .unwrap();
        let mid = envelope(s, 0.5);
        assert_relative_eq!(value, (2.0 + mid) / 3.0, epsilon = 1e-12);
        assert!(value < 1.0);
    }

    #[test]
    fn test_interference_offbeat_weaker_than_onbeat() {
        let on = AffineGrid::UNIT.interference(grid(1, 1, 0, 1), 8.0, 8.0).unwrap();
        let off = AffineGrid::UNIT.interference(grid(1, 1, 1, 2), 8.0, 8.0).unwrap();
        assert!(off < on);
    }

    #[test]
    fn test_interference_symmetric_in_arguments() {
        let grids = sample_grids();
        for &u in grids.iter().take(4) {
            for &v in grids.iter().take(4) {
                let uv = u.interference(v, 3.0, 5.0).unwrap();
                let vu = v.interference(u, 5.0, 3.0).unwrap();
                assert_relative_eq!(uv, vu, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_interference_rejects_bad_sharpness() {
        assert!(matches!(
            AffineGrid::UNIT.interference(AffineGrid::UNIT, 0.0, 1.0),
            Err(ArnoldError::Domain(_))
        ));
    }

    #[test]
    fn test_envelope_endpoints() {
        assert_relative_eq!(envelope(4.0, 0.0), 1.0);
        assert_relative_eq!(envelope(4.0, 1.0), 1.0);
        assert!(envelope(4.0, 0.5) < envelope(4.0, 0.25));
    }

    #[test]
    fn test_ball_of_radius_four() {
        let radius = 4.0;
        let ball = GridLattice::ball(radius).unwrap();
        assert!(Rational::ball(radius).len() < ball.len());
        assert_eq!(ball.grids()[0], AffineGrid::UNIT);

        let grids = ball.grids();
        for (i, g) in grids.iter().enumerate() {
            assert!(g.norm() <= radius, "norm exceeds radius: |{g}| = {}", g.norm());
            for h in &grids[..i] {
                assert_ne!(g, h, "repeated entry: {g}");
            }
        }
        for pair in grids.windows(2) {
            assert!(pair[0].norm() <= pair[1].norm());
        }
    }

    #[test]
    fn test_common_period_divisible() {
        let ball = GridLattice::ball(8.0).unwrap();
        let period = ball.common_period();
        assert!(period > 0);
        for g in ball.grids() {
            assert_eq!(period % g.period(), 0, "common period fails for {g}");
        }
    }

    #[test]
    fn test_common_period_empty() {
        assert_eq!(common_period(&[]).unwrap(), 0);
    }

    #[test]
    fn test_get_checks_range() {
        let lattice = GridLattice::ball(3.0).unwrap();
        assert_eq!(lattice.get(0).unwrap(), AffineGrid::UNIT);
        let len = lattice.len();
        assert!(matches!(
            lattice.get(len),
            Err(ArnoldError::IndexOutOfRange { index, len: l }) if index == len && l == len
        ));
    }

    #[test]
    fn test_wire_format() {
        let g = grid(3, 2, 1, 3);
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(
            json,
            r#"{"freqNumer":3,"freqDenom":2,"baseNumer":1,"baseDenom":3}"#
        );
        let back: AffineGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn test_phase_at_time() {
        let g = grid(3, 2, 1, 4);
        assert_relative_eq!(g.phase_at_time(2.0), 3.25);
    }

    proptest! {
        #[test]
        fn prop_unit_grid_first(radius in 1.5f64..7.0) {
            let ball = GridLattice::ball(radius).unwrap();
            prop_assert_eq!(ball.grids()[0], AffineGrid::UNIT);
        }

        #[test]
        fn prop_distance_symmetric(
            a in 1u64..40, b in 1u64..40, c in 0u64..40, d in 1u64..40,
            e in 1u64..40, f in 1u64..40, g in 0u64..40, h in 1u64..40,
        ) {
            let x = AffineGrid::new(r(a, b), r(c, d)).unwrap();
            let y = AffineGrid::new(r(e, f), r(g, h)).unwrap();
            prop_assert_eq!(x.distance(y).unwrap(), y.distance(x).unwrap());
        }
    }
}
