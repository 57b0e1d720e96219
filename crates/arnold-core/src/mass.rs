//! Nonnegative mass vectors over lattice indices (the probability simplex,
//! or raw un-normalized likelihood when the total is left free).

use std::ops::Index;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ArnoldError, Result, check_len};

/// Fixed-length vector of nonnegative weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct MassVector {
    likes: Vec<f64>,
}

impl TryFrom<Vec<f64>> for MassVector {
    type Error = ArnoldError;

    fn try_from(likes: Vec<f64>) -> Result<Self> {
        MassVector::new(likes)
    }
}

impl From<MassVector> for Vec<f64> {
    fn from(m: MassVector) -> Self {
        m.likes
    }
}

fn check_rate(rate: f64) -> Result<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ArnoldError::Domain(format!("rate must lie in [0, 1], got {rate}")))
    }
}

impl MassVector {
    /// Wrap raw weights; every entry must be finite and nonnegative.
    pub fn new(likes: Vec<f64>) -> Result<Self> {
        if let Some((i, x)) = likes
            .iter()
            .enumerate()
            .find(|(_, x)| !(x.is_finite() && **x >= 0.0))
        {
            return Err(ArnoldError::InvalidValue(format!(
                "mass[{i}] = {x} is not a finite nonnegative number"
            )));
        }
        Ok(Self { likes })
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            likes: vec![0.0; len],
        }
    }

    /// All mass on `index`.
    pub fn degenerate(index: usize, len: usize) -> Result<Self> {
        if index >= len {
            return Err(ArnoldError::IndexOutOfRange { index, len });
        }
        let mut result = Self::zeros(len);
        result.likes[index] = 1.0;
        Ok(result)
    }

    /// Normalized `exp(-energy / temperature)`.
    ///
    /// Energies are shifted by their minimum first; the shift cancels in the
    /// normalization and keeps the exponentials from underflowing.
    pub fn boltzmann(energy: &[f64], temperature: f64) -> Result<Self> {
        if temperature.is_nan() || temperature <= 0.0 {
            return Err(ArnoldError::Domain(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        let min = energy.iter().copied().fold(f64::INFINITY, f64::min);
        if energy.iter().any(|e| e.is_nan()) || (!energy.is_empty() && !min.is_finite()) {
            return Err(ArnoldError::Domain(
                "boltzmann energies must be finite".into(),
            ));
        }
        let likes = energy
            .iter()
            .map(|e| (-(e - min) / temperature).exp())
            .collect();
        let mut result = Self { likes };
        result.normalize()?;
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.likes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.likes.is_empty()
    }

    pub fn likes(&self) -> &[f64] {
        &self.likes
    }

    pub(crate) fn likes_mut(&mut self) -> &mut [f64] {
        &mut self.likes
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.likes
    }

    pub fn total(&self) -> f64 {
        self.likes.iter().sum()
    }

    /// Rescale to total 1. Fails on a zero-mass vector.
    pub fn normalize(&mut self) -> Result<()> {
        let total = self.total();
        if total.is_nan() || total <= 0.0 {
            return Err(ArnoldError::Domain(format!(
                "cannot normalize mass with total {total}"
            )));
        }
        let scale = 1.0 / total;
        for x in &mut self.likes {
            *x *= scale;
        }
        Ok(())
    }

    pub fn normalized(&self) -> Result<Self> {
        let mut result = self.clone();
        result.normalize()?;
        Ok(result)
    }

    pub fn scale(&mut self, factor: f64) -> Result<()> {
        if !(factor.is_finite() && factor >= 0.0) {
            return Err(ArnoldError::Domain(format!(
                "scale factor must be finite and nonnegative, got {factor}"
            )));
        }
        for x in &mut self.likes {
            *x *= factor;
        }
        Ok(())
    }

    pub fn dot(&self, weights: &[f64]) -> Result<f64> {
        check_len(self.len(), weights.len())?;
        Ok(self.likes.iter().zip(weights).map(|(m, w)| m * w).sum())
    }

    /// `self = (1 - rate) * self + rate * other`.
    ///
    /// `rate == 0` leaves `self` untouched and `rate == 1` copies `other`
    /// exactly.
    pub fn shift_towards(&mut self, other: &MassVector, rate: f64) -> Result<()> {
        check_rate(rate)?;
        check_len(self.len(), other.len())?;
        if rate == 0.0 {
            return Ok(());
        }
        if rate == 1.0 {
            self.likes.copy_from_slice(&other.likes);
            return Ok(());
        }
        let keep = 1.0 - rate;
        for (x, y) in self.likes.iter_mut().zip(&other.likes) {
            *x = keep * *x + rate * y;
        }
        Ok(())
    }

    /// Blend toward the degenerate distribution at `index`.
    pub fn shift_towards_point(&mut self, index: usize, rate: f64) -> Result<()> {
        check_rate(rate)?;
        if index >= self.len() {
            return Err(ArnoldError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        if rate == 0.0 {
            return Ok(());
        }
        let keep = 1.0 - rate;
        for x in &mut self.likes {
            *x *= keep;
        }
        self.likes[index] += rate;
        Ok(())
    }

    /// Drop entries at or below `threshold`, compacting storage.
    /// Returns the original indices of the survivors, in order.
    pub fn truncate(&mut self, threshold: f64) -> Vec<usize> {
        let mut kept = Vec::new();
        let mut likes = Vec::new();
        for (i, &x) in self.likes.iter().enumerate() {
            if x > threshold {
                kept.push(i);
                likes.push(x);
            }
        }
        self.likes = likes;
        kept
    }

    /// Shannon entropy (nats) of the normalized vector.
    pub fn entropy(&self) -> Result<f64> {
        let p = self.normalized()?;
        Ok(-p
            .likes
            .iter()
            .filter(|&&x| x > 0.0)
            .map(|x| x * x.ln())
            .sum::<f64>())
    }

    /// Effective number of occupied indices, `exp(entropy)`.
    pub fn perplexity(&self) -> Result<f64> {
        Ok(self.entropy()?.exp())
    }

    /// KL divergence `D(self || other)` of the normalized vectors.
    /// Infinite when `self` has mass where `other` has none.
    pub fn relative_entropy(&self, other: &MassVector) -> Result<f64> {
        check_len(self.len(), other.len())?;
        let p = self.normalized()?;
        let q = other.normalized()?;
        let mut result = 0.0;
        for (&x, &y) in p.likes.iter().zip(&q.likes) {
            if x > 0.0 {
                if y == 0.0 {
                    return Ok(f64::INFINITY);
                }
                result += x * (x / y).ln();
            }
        }
        Ok(result)
    }

    /// Index of the largest entry (first on ties), `None` when empty.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &x) in self.likes.iter().enumerate() {
            if best.is_none_or(|(_, b)| x > b) {
                best = Some((i, x));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Draw an index with probability proportional to its mass.
    pub fn sample(&self, rng: &mut impl Rng) -> Result<usize> {
        let total = self.total();
        if total.is_nan() || total <= 0.0 {
            return Err(ArnoldError::Domain("cannot sample from zero mass".into()));
        }
        let mut target = rng.random::<f64>() * total;
        let mut last_positive = 0;
        for (i, &x) in self.likes.iter().enumerate() {
            if x > 0.0 {
                last_positive = i;
                if target < x {
                    return Ok(i);
                }
                target -= x;
            }
        }
        // rounding left a sliver past the end
        Ok(last_positive)
    }
}

impl Index<usize> for MassVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.likes[index]
    }
}
