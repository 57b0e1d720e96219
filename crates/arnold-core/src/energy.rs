//! Energy strategies: how a mass distribution over the lattice turns into a
//! per-index energy, from which the engine derives its Boltzmann prior.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{ArnoldError, Result, check_len};
use crate::grid::AffineGrid;
use crate::mass::MassVector;
use crate::rational::Rational;

/// Pluggable energy function over a fixed-size lattice.
pub trait EnergyModel: Send {
    /// Number of lattice indices the model expects.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Energy at every index given the current mass. Invariant to the
    /// mass's overall scale.
    fn compute_energy(&self, mass: &MassVector) -> Result<Vec<f64>>;
}

/// Square row-major table of pairwise weights, immutable once built.
#[derive(Clone, Debug)]
pub struct EnergyMatrix {
    size: usize,
    values: Vec<f64>,
}

impl EnergyMatrix {
    pub fn from_fn(size: usize, mut f: impl FnMut(usize, usize) -> Result<f64>) -> Result<Self> {
        let started = Instant::now();
        let mut values = Vec::with_capacity(size * size);
        for i in 0..size {
            for j in 0..size {
                values.push(f(i, j)?);
            }
        }
        tracing::debug!("built {size}x{size} energy matrix in {:?}", started.elapsed());
        Ok(Self { size, values })
    }

    /// Pitch distances `|p_i / p_j|`.
    pub fn pitch_distances(points: &[Rational]) -> Result<Self> {
        Self::from_fn(points.len(), |i, j| Ok(points[i].distance(points[j])))
    }

    /// Grid distances.
    pub fn grid_distances(grids: &[AffineGrid]) -> Result<Self> {
        Self::from_fn(grids.len(), |i, j| grids[i].distance(grids[j]))
    }

    /// Attack-envelope interference between grids of equal sharpness.
    pub fn grid_interference(grids: &[AffineGrid], sharpness: f64) -> Result<Self> {
        Self::from_fn(grids.len(), |i, j| {
            grids[i].interference(grids[j], sharpness, sharpness)
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }

    /// `result[i] = Σ_j self[i][j] * weights[j]`.
    pub fn apply(&self, weights: &[f64]) -> Result<Vec<f64>> {
        check_len(self.size, weights.len())?;
        Ok((0..self.size)
            .map(|i| self.row(i).iter().zip(weights).map(|(d, w)| d * w).sum())
            .collect())
    }

    fn scale(mut self, factor: f64) -> Self {
        for v in &mut self.values {
            *v *= factor;
        }
        self
    }
}

fn positive_total(mass: &MassVector) -> Result<f64> {
    let total = mass.total();
    if total.is_nan() || total <= 0.0 {
        return Err(ArnoldError::Domain(format!(
            "energy needs positive mass, got total {total}"
        )));
    }
    Ok(total)
}

fn check_acuity(name: &str, acuity: f64) -> Result<()> {
    if acuity.is_nan() || acuity <= 0.0 {
        return Err(ArnoldError::Domain(format!(
            "{name} must be positive, got {acuity}"
        )));
    }
    Ok(())
}

/// Single-lattice energy: `E[i] = Σ_j m[j]·D[i][j] / (|m|·acuity)`.
#[derive(Clone, Debug)]
pub struct MatrixEnergy {
    matrix: EnergyMatrix,
    acuity: f64,
}

impl MatrixEnergy {
    pub fn new(matrix: EnergyMatrix, acuity: f64) -> Result<Self> {
        check_acuity("acuity", acuity)?;
        Ok(Self { matrix, acuity })
    }

    pub fn matrix(&self) -> &EnergyMatrix {
        &self.matrix
    }
}

impl EnergyModel for MatrixEnergy {
    fn len(&self) -> usize {
        self.matrix.size()
    }

    fn compute_energy(&self, mass: &MassVector) -> Result<Vec<f64>> {
        check_len(self.len(), mass.len())?;
        let scale = 1.0 / (positive_total(mass)? * self.acuity);
        let mut energy = self.matrix.apply(mass.likes())?;
        for e in &mut energy {
            *e *= scale;
        }
        Ok(energy)
    }
}

/// How pitch and tempo energies interact in a [`SplitEnergy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coupling {
    /// Any two voices should agree in rhythm and, separately, in pitch.
    #[default]
    Independent,
    /// Pitch agreement only matters between voices sounding together,
    /// as measured by grid interference.
    Simultaneous,
}

/// Energy over the pitch × tempo cross product, index `G·f + g`.
#[derive(Clone, Debug)]
pub struct SplitEnergy {
    pitch: EnergyMatrix,
    tempo: EnergyMatrix,
    interference: Option<EnergyMatrix>,
    coupling: Coupling,
}

impl SplitEnergy {
    /// Precompute pitch and tempo tables, each divided by its acuity.
    /// The interference table is only built for `Coupling::Simultaneous`.
    pub fn new(
        freqs: &[Rational],
        grids: &[AffineGrid],
        pitch_acuity: f64,
        tempo_acuity: f64,
        sharpness: f64,
        coupling: Coupling,
    ) -> Result<Self> {
        check_acuity("pitch acuity", pitch_acuity)?;
        check_acuity("tempo acuity", tempo_acuity)?;
        let pitch = EnergyMatrix::pitch_distances(freqs)?.scale(1.0 / pitch_acuity);
        let tempo = EnergyMatrix::grid_distances(grids)?.scale(1.0 / tempo_acuity);
        let interference = match coupling {
            Coupling::Independent => None,
            Coupling::Simultaneous => Some(EnergyMatrix::grid_interference(grids, sharpness)?),
        };
        Ok(Self {
            pitch,
            tempo,
            interference,
            coupling,
        })
    }

    pub fn pitch_len(&self) -> usize {
        self.pitch.size()
    }

    pub fn tempo_len(&self) -> usize {
        self.tempo.size()
    }

    pub fn coupling(&self) -> Coupling {
        self.coupling
    }

    pub fn index(&self, pitch: usize, tempo: usize) -> usize {
        self.tempo_len() * pitch + tempo
    }

    /// `Σ_g mass(f, g)` for each pitch `f`.
    pub fn pitch_marginal(&self, mass: &MassVector) -> Result<MassVector> {
        check_len(self.len(), mass.len())?;
        let g_len = self.tempo_len();
        MassVector::new(
            mass.likes()
                .chunks(g_len)
                .map(|row| row.iter().sum())
                .collect(),
        )
    }

    /// `Σ_f mass(f, g)` for each tempo grid `g`.
    pub fn tempo_marginal(&self, mass: &MassVector) -> Result<MassVector> {
        check_len(self.len(), mass.len())?;
        let mut result = vec![0.0; self.tempo_len()];
        for row in mass.likes().chunks(self.tempo_len()) {
            for (acc, m) in result.iter_mut().zip(row) {
                *acc += m;
            }
        }
        MassVector::new(result)
    }

    fn pitch_energy_simultaneous(&self, interference: &EnergyMatrix, mass: &[f64]) -> Vec<f64> {
        let f_len = self.pitch_len();
        let g_len = self.tempo_len();

        // inter_mass(f, g) = Σ_g' inter(g, g') mass(f, g')
        let mut inter_mass = vec![0.0; f_len * g_len];
        for f in 0..f_len {
            let row = &mass[f * g_len..(f + 1) * g_len];
            for g in 0..g_len {
                inter_mass[f * g_len + g] = interference
                    .row(g)
                    .iter()
                    .zip(row)
                    .map(|(i, m)| i * m)
                    .sum();
            }
        }

        // E_pitch(f, g) = Σ_f' d(f, f') inter_mass(f', g)
        let mut energy = vec![0.0; f_len * g_len];
        for f1 in 0..f_len {
            let out = &mut energy[f1 * g_len..(f1 + 1) * g_len];
            for (f2, &d) in self.pitch.row(f1).iter().enumerate() {
                let src = &inter_mass[f2 * g_len..(f2 + 1) * g_len];
                for (e, m) in out.iter_mut().zip(src) {
                    *e += d * m;
                }
            }
        }

        // shift each column to zero mean under its own Boltzmann distribution
        for g in 0..g_len {
            let min = (0..f_len)
                .map(|f| energy[f * g_len + g])
                .fold(f64::INFINITY, f64::min);
            let mut sum_z = 0.0;
            let mut sum_ze = 0.0;
            for f in 0..f_len {
                let e = energy[f * g_len + g];
                let z = (min - e).exp();
                sum_z += z;
                sum_ze += z * e;
            }
            let shift = -sum_ze / sum_z;
            for f in 0..f_len {
                energy[f * g_len + g] += shift;
            }
        }
        energy
    }
}

impl EnergyModel for SplitEnergy {
    fn len(&self) -> usize {
        self.pitch_len() * self.tempo_len()
    }

    fn compute_energy(&self, mass: &MassVector) -> Result<Vec<f64>> {
        check_len(self.len(), mass.len())?;
        let normalized = mass.normalized().map_err(|_| {
            ArnoldError::Domain(format!("energy needs positive mass, got total {}", mass.total()))
        })?;
        let g_len = self.tempo_len();

        let tempo_marginal = self.tempo_marginal(&normalized)?;
        let tempo_energy = self.tempo.apply(tempo_marginal.likes())?;

        let mut energy = Vec::with_capacity(self.len());
        match (self.coupling, &self.interference) {
            (Coupling::Simultaneous, Some(interference)) => {
                let pitch_energy =
                    self.pitch_energy_simultaneous(interference, normalized.likes());
                for (fg, e) in pitch_energy.into_iter().enumerate() {
                    energy.push(tempo_energy[fg % g_len] + e);
                }
            }
            _ => {
                let pitch_marginal = self.pitch_marginal(&normalized)?;
                let pitch_energy = self.pitch.apply(pitch_marginal.likes())?;
                for e_pitch in pitch_energy {
                    energy.extend(tempo_energy.iter().map(|e_tempo| e_tempo + e_pitch));
                }
            }
        }
        Ok(energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLattice;
    use approx::assert_relative_eq;

    fn rhythm_model(radius: f64) -> (GridLattice, MatrixEnergy) {
        let lattice = GridLattice::ball(radius).unwrap();
        let matrix = EnergyMatrix::grid_distances(lattice.grids()).unwrap();
        (lattice, MatrixEnergy::new(matrix, 2.5).unwrap())
    }

    #[test]
    fn test_matrix_rows_and_symmetry() {
        let points = Rational::ball(5.0);
        let m = EnergyMatrix::pitch_distances(&points).unwrap();
        assert_eq!(m.size(), points.len());
        for i in 0..m.size() {
            assert_eq!(m.row(i).len(), m.size());
            for j in 0..m.size() {
                assert_eq!(m.row(i)[j], m.row(j)[i]);
            }
        }
    }

    #[test]
    fn test_degenerate_mass_minimizes_own_energy() {
        let (lattice, model) = rhythm_model(6.0);
        for k in [0, 3, lattice.len() - 1] {
            let mass = MassVector::degenerate(k, lattice.len()).unwrap();
            let energy = model.compute_energy(&mass).unwrap();
            let min = energy.iter().copied().fold(f64::INFINITY, f64::min);
            assert_eq!(energy[k], min, "index {k} is not the energy minimum");
        }
    }

    #[test]
    fn test_matrix_energy_scale_invariant() {
        let (lattice, model) = rhythm_model(5.0);
        let mut mass = MassVector::new((0..lattice.len()).map(|i| i as f64 + 1.0).collect()).unwrap();
        let e1 = model.compute_energy(&mass).unwrap();
        mass.scale(7.0).unwrap();
        let e2 = model.compute_energy(&mass).unwrap();
        for (a, b) in e1.iter().zip(&e2) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_matrix_energy_errors() {
        let (lattice, model) = rhythm_model(4.0);
        assert!(matches!(
            model.compute_energy(&MassVector::zeros(lattice.len())),
            Err(ArnoldError::Domain(_))
        ));
        assert!(matches!(
            model.compute_energy(&MassVector::zeros(lattice.len() + 1)),
            Err(ArnoldError::LengthMismatch { .. })
        ));
        let matrix = EnergyMatrix::grid_distances(lattice.grids()).unwrap();
        assert!(MatrixEnergy::new(matrix, 0.0).is_err());
    }

    fn split(coupling: Coupling) -> SplitEnergy {
        let freqs = Rational::ball(4.0);
        let grids = GridLattice::ball(4.0).unwrap();
        SplitEnergy::new(&freqs, grids.grids(), 3.0, 2.5, 8.0, coupling).unwrap()
    }

    #[test]
    fn test_split_marginals() {
        let model = split(Coupling::Independent);
        let (f_len, g_len) = (model.pitch_len(), model.tempo_len());
        let mass = MassVector::degenerate(model.index(2, 1), f_len * g_len).unwrap();
        let pitch = model.pitch_marginal(&mass).unwrap();
        let tempo = model.tempo_marginal(&mass).unwrap();
        assert_eq!(pitch.len(), f_len);
        assert_eq!(tempo.len(), g_len);
        assert_eq!(pitch[2], 1.0);
        assert_eq!(tempo[1], 1.0);
        assert_eq!(pitch.total(), 1.0);
    }

    #[test]
    fn test_split_independent_is_separable() {
        let model = split(Coupling::Independent);
        let g_len = model.tempo_len();
        let center = (model.pitch_len() - 1) / 2;
        let mass = MassVector::degenerate(model.index(center, 0), model.len()).unwrap();
        let energy = model.compute_energy(&mass).unwrap();
        assert_eq!(energy.len(), model.len());

        // E(f, g) - E(f, g') does not depend on f
        let diff = |f: usize| energy[f * g_len + 1] - energy[f * g_len];
        for f in 0..model.pitch_len() {
            assert_relative_eq!(diff(f), diff(0), epsilon = 1e-12);
        }
        let min = energy.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(energy[model.index(center, 0)], min);
    }

    #[test]
    fn test_split_simultaneous_columns_centered() {
        let model = split(Coupling::Simultaneous);
        let center = (model.pitch_len() - 1) / 2;
        let mass = MassVector::degenerate(model.index(center, 0), model.len()).unwrap();
        let energy = model.compute_energy(&mass).unwrap();
        assert!(energy.iter().all(|e| e.is_finite()));

        // best pitch on the downbeat column is the occupied one
        let g_len = model.tempo_len();
        let column: Vec<f64> = (0..model.pitch_len()).map(|f| energy[f * g_len]).collect();
        let best = column
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(f, _)| f);
        assert_eq!(best, Some(center));
    }
}
