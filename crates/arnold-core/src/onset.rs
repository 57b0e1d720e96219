//! Translating a timed user tap into per-grid onset likelihoods.

use crate::error::{ArnoldError, Result};
use crate::grid::{AffineGrid, envelope};

/// Clock milliseconds to tactus (unit beats), wrapped to the common period.
/// A zero period disables wrapping.
pub fn tactus_from_ms(time_ms: f64, tempo_hz: f64, common_period: u64) -> Result<f64> {
    if !time_ms.is_finite() || time_ms < 0.0 {
        return Err(ArnoldError::Domain(format!(
            "expected nonnegative clock time, got {time_ms}"
        )));
    }
    let tactus = tempo_hz * time_ms / 1000.0;
    if common_period == 0 {
        Ok(tactus)
    } else {
        Ok(tactus % common_period as f64)
    }
}

/// How plausibly each grid has an onset at `tactus`: the symmetric attack
/// envelope evaluated at the grid's fractional phase.
pub fn onset_likelihood(grids: &[AffineGrid], tactus: f64, sharpness: f64) -> Vec<f64> {
    grids
        .iter()
        .map(|g| envelope(sharpness, g.phase_at_time(tactus).rem_euclid(1.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::Rational;
    use approx::assert_relative_eq;

    #[test]
    fn test_tactus_wraps() {
        assert_relative_eq!(tactus_from_ms(2500.0, 1.0, 2).unwrap(), 0.5);
        assert_relative_eq!(tactus_from_ms(2500.0, 2.0, 0).unwrap(), 5.0);
        assert!(tactus_from_ms(-1.0, 1.0, 2).is_err());
        assert!(tactus_from_ms(f64::NAN, 1.0, 2).is_err());
    }

    #[test]
    fn test_onset_likelihood_prefers_aligned_grids() {
        let half = AffineGrid::new(Rational::ONE, Rational::new(1, 2).unwrap()).unwrap();
        let likes = onset_likelihood(&[AffineGrid::UNIT, half], 0.0, 4.0);
        assert_relative_eq!(likes[0], 1.0);
        assert!(likes[1] < likes[0]);

        let likes = onset_likelihood(&[AffineGrid::UNIT, half], 0.5, 4.0);
        assert!(likes[0] < likes[1]);
    }
}
