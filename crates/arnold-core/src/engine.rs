//! The diffusion engine: mass relaxing toward a self-consistent Boltzmann
//! prior while absorbing impulses.
//!
//! Each tick of `dt` seconds:
//! 1. energy from the current mass,
//! 2. instantaneous prior `boltzmann(energy, temperature)`,
//! 3. live prior shifts toward it at rate `1 - exp(-dt / prior_sec)`,
//! 4. mass shifts toward `background_gain × prior` at rate
//!    `1 - exp(-dt / sustain_sec)`,
//! 5. each impulse drains a fraction `1 - exp(-dt / attack_sec)` into mass.
//!
//! Every rate is an exact exponential in `dt`, so one tick of `2·dt` and two
//! ticks of `dt` agree up to the drift of the energy in between, and a tick
//! of zero length changes nothing.

use serde::{Deserialize, Serialize};

use crate::config::{DecayParams, EngineConfig, ModelConfig, require_positive};
use crate::energy::{EnergyMatrix, EnergyModel, MatrixEnergy, SplitEnergy};
use crate::error::{ArnoldError, Result, check_len};
use crate::grid::GridLattice;
use crate::mass::MassVector;
use crate::onset::{onset_likelihood, tactus_from_ms};
use crate::rational::{Rational, lcm};
use crate::snapshot::{CURRENT_VERSION, LatticeDescription, Snapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Built, initial mass in place, never advanced.
    Initialized,
    Running,
    /// `advance` is a no-op until `start`.
    Paused,
}

/// Pitch and grid marginals of the live prior.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorMarginals {
    pub pitch: MassVector,
    pub grid: MassVector,
}

/// Constants that drive the relaxation, independent of the lattice.
#[derive(Clone, Debug, PartialEq)]
pub struct Relaxation {
    pub temperature: f64,
    pub decay: DecayParams,
    pub background_gain: f64,
}

impl Relaxation {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            temperature: config.temperature_params.temperature,
            decay: config.decay_params.clone(),
            background_gain: config.background_gain,
        }
    }

    fn validate(&self) -> Result<()> {
        require_positive("temperature", self.temperature)?;
        require_positive("attackSec", self.decay.attack_sec)?;
        require_positive("sustainSec", self.decay.sustain_sec)?;
        require_positive("priorSec", self.decay.prior_sec)?;
        require_positive("backgroundGain", self.background_gain)
    }
}

/// How wall-clock onsets map onto grid phases.
#[derive(Clone, Copy, Debug)]
struct Onset {
    tempo_hz: f64,
    sharpness: f64,
}

#[derive(Clone, Debug)]
enum Lattice {
    Pitch(Vec<Rational>),
    Rhythm {
        grids: GridLattice,
        onset: Onset,
    },
    Split {
        points: Vec<Rational>,
        grids: GridLattice,
        onset: Onset,
    },
    /// Caller-supplied energy model; indices carry no geometry.
    Custom,
}

pub struct DiffusionEngine {
    config: Option<EngineConfig>,
    lattice: Lattice,
    model: Box<dyn EnergyModel>,
    relaxation: Relaxation,
    mass: MassVector,
    prior: MassVector,
    impulses: MassVector,
    state: EngineState,
}

impl DiffusionEngine {
    /// Build the lattice and energy tables described by `config` and place
    /// all mass on the most consonant point: `1/1` for pitch, the unit grid
    /// for rhythm, their pairing for split.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let t = &config.temperature_params;
        let onset = Onset {
            tempo_hz: config.tempo_hz,
            sharpness: t.sharpness,
        };
        let (lattice, model, initial): (Lattice, Box<dyn EnergyModel>, usize) = match &config.model
        {
            ModelConfig::Pitch { radius } => {
                let points = Rational::ball(*radius);
                let model = MatrixEnergy::new(EnergyMatrix::pitch_distances(&points)?, t.acuity)?;
                let center = (points.len() - 1) / 2;
                (Lattice::Pitch(points), Box::new(model), center)
            }
            ModelConfig::Rhythm { radius } => {
                let grids = GridLattice::ball(*radius)?;
                let model = MatrixEnergy::new(EnergyMatrix::grid_distances(grids.grids())?, t.acuity)?;
                (Lattice::Rhythm { grids, onset }, Box::new(model), 0)
            }
            ModelConfig::Split {
                pitch_radius,
                tempo_radius,
                coupling,
            } => {
                let points = Rational::ball(*pitch_radius);
                let grids = GridLattice::ball(*tempo_radius)?;
                let model = SplitEnergy::new(
                    &points,
                    grids.grids(),
                    t.pitch_acuity,
                    t.tempo_acuity,
                    t.sharpness,
                    *coupling,
                )?;
                let initial = model.index((points.len() - 1) / 2, 0);
                (
                    Lattice::Split {
                        points,
                        grids,
                        onset,
                    },
                    Box::new(model),
                    initial,
                )
            }
        };
        let relaxation = Relaxation::from_config(&config);
        let mut engine = Self::assemble(lattice, model, initial, relaxation)?;
        tracing::info!(
            "engine ready: {} lattice points, common period {}",
            engine.len(),
            engine.common_period()?
        );
        engine.config = Some(config);
        Ok(engine)
    }

    /// Run an arbitrary energy model with all mass initially at `initial`.
    pub fn with_model(
        model: Box<dyn EnergyModel>,
        initial: usize,
        relaxation: Relaxation,
    ) -> Result<Self> {
        Self::assemble(Lattice::Custom, model, initial, relaxation)
    }

    fn assemble(
        lattice: Lattice,
        model: Box<dyn EnergyModel>,
        initial: usize,
        relaxation: Relaxation,
    ) -> Result<Self> {
        relaxation.validate()?;
        let len = model.len();
        let mass = MassVector::degenerate(initial, len)?;
        let prior = MassVector::boltzmann(&model.compute_energy(&mass)?, relaxation.temperature)?;
        Ok(Self {
            config: None,
            lattice,
            model,
            relaxation,
            mass,
            prior,
            impulses: MassVector::zeros(len),
            state: EngineState::Initialized,
        })
    }

    /// Rebuild from a snapshot; the live prior restarts at the Boltzmann
    /// prior of the restored mass.
    pub fn restore(snapshot: Snapshot) -> Result<Self> {
        let mut engine = Self::new(snapshot.config)?;
        check_len(engine.len(), snapshot.mass_vector.len())?;
        check_len(engine.len(), snapshot.impulse_vector.len())?;
        let energy = engine.model.compute_energy(&snapshot.mass_vector)?;
        engine.prior = MassVector::boltzmann(&energy, engine.relaxation.temperature)?;
        engine.mass = snapshot.mass_vector;
        engine.impulses = snapshot.impulse_vector;
        Ok(engine)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let config = self.config.clone().ok_or_else(|| {
            ArnoldError::Domain("engine built from a custom model has no config".into())
        })?;
        Ok(Snapshot {
            version: CURRENT_VERSION.to_string(),
            config,
            mass_vector: self.mass.clone(),
            impulse_vector: self.impulses.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.mass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    pub fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    pub fn relaxation(&self) -> &Relaxation {
        &self.relaxation
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Running;
    }

    pub fn pause(&mut self) {
        self.state = EngineState::Paused;
    }

    /// Leave `Paused`; a fresh engine stays `Initialized` until its first tick.
    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.state = EngineState::Running;
        }
    }

    pub fn mass(&self) -> &MassVector {
        &self.mass
    }

    pub fn prior(&self) -> &MassVector {
        &self.prior
    }

    pub fn impulses(&self) -> &MassVector {
        &self.impulses
    }

    /// Energy of an arbitrary mass vector under this engine's model.
    pub fn energy(&self, mass: &MassVector) -> Result<Vec<f64>> {
        check_len(self.len(), mass.len())?;
        self.model.compute_energy(mass)
    }

    pub fn current_energy(&self) -> Result<Vec<f64>> {
        self.model.compute_energy(&self.mass)
    }

    /// Smallest whole number of unit beats after which every grid repeats.
    /// For a pitch lattice each ratio `p/q` repeats after `q` beats;
    /// custom models report 0.
    pub fn common_period(&self) -> Result<u64> {
        match &self.lattice {
            Lattice::Pitch(points) => points.iter().try_fold(1, |acc, p| lcm(acc, p.denom())),
            Lattice::Rhythm { grids, .. } | Lattice::Split { grids, .. } => {
                Ok(grids.common_period())
            }
            Lattice::Custom => Ok(0),
        }
    }

    pub fn description(&self) -> Result<LatticeDescription> {
        let (points, grids) = match &self.lattice {
            Lattice::Pitch(points) => (Some(points.clone()), None),
            Lattice::Rhythm { grids, .. } => (None, Some(grids.grids().to_vec())),
            Lattice::Split { points, grids, .. } => {
                (Some(points.clone()), Some(grids.grids().to_vec()))
            }
            Lattice::Custom => (None, None),
        };
        Ok(LatticeDescription {
            points,
            grids,
            common_period: self.common_period()?,
        })
    }

    /// Advance the simulation by `dt_ms` milliseconds and return the new
    /// mass. The first call moves the engine to `Running`; while `Paused`
    /// nothing changes.
    pub fn advance(&mut self, dt_ms: f64) -> Result<&MassVector> {
        if !dt_ms.is_finite() || dt_ms < 0.0 {
            return Err(ArnoldError::Domain(format!(
                "time step must be finite and nonnegative, got {dt_ms}"
            )));
        }
        match self.state {
            EngineState::Paused => return Ok(&self.mass),
            EngineState::Initialized => self.state = EngineState::Running,
            EngineState::Running => {}
        }

        let dt = dt_ms / 1000.0;
        let r = &self.relaxation;
        let energy = self.model.compute_energy(&self.mass)?;
        let mut target = MassVector::boltzmann(&energy, r.temperature)?;

        self.prior
            .shift_towards(&target, 1.0 - (-dt / r.decay.prior_sec).exp())?;
        target.scale(r.background_gain)?;
        self.mass
            .shift_towards(&target, 1.0 - (-dt / r.decay.sustain_sec).exp())?;

        let keep = (-dt / r.decay.attack_sec).exp();
        if keep < 1.0 {
            for (m, i) in self
                .mass
                .likes_mut()
                .iter_mut()
                .zip(self.impulses.likes_mut().iter_mut())
            {
                *m += *i * (1.0 - keep);
                *i *= keep;
            }
        }
        Ok(&self.mass)
    }

    /// Queue `amount` of mass at `index`, absorbed over the attack time.
    pub fn add_impulse(&mut self, index: usize, amount: f64) -> Result<()> {
        if index >= self.len() {
            return Err(ArnoldError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(ArnoldError::Domain(format!(
                "impulse must be finite and nonnegative, got {amount}"
            )));
        }
        self.impulses.likes_mut()[index] += amount;
        Ok(())
    }

    /// Spread `gain` of impulse across the lattice in proportion to
    /// `weights × prior`, so evidence lands where the model already expects it.
    pub fn add_impulse_distribution(&mut self, weights: &[f64], gain: f64) -> Result<()> {
        check_len(self.len(), weights.len())?;
        if !gain.is_finite() || gain < 0.0 {
            return Err(ArnoldError::Domain(format!(
                "gain must be finite and nonnegative, got {gain}"
            )));
        }
        let posterior = MassVector::new(
            weights
                .iter()
                .zip(self.prior.likes())
                .map(|(w, p)| w * p)
                .collect(),
        )?;
        let total = posterior.total();
        if total.is_nan() || total <= 0.0 {
            return Err(ArnoldError::Domain(
                "impulse weights vanish under the prior".into(),
            ));
        }
        let scale = gain / total;
        for (i, w) in self.impulses.likes_mut().iter_mut().zip(posterior.likes()) {
            *i += scale * w;
        }
        Ok(())
    }

    /// Pitch rows and grid columns of the lattice; a rhythm lattice is a
    /// single pitch row and a pitch lattice a single (unit) grid column.
    fn shape(&self) -> Result<(usize, usize)> {
        match &self.lattice {
            Lattice::Pitch(points) => Ok((points.len(), 1)),
            Lattice::Rhythm { grids, .. } => Ok((1, grids.len())),
            Lattice::Split { points, grids, .. } => Ok((points.len(), grids.len())),
            Lattice::Custom => Err(ArnoldError::Domain(
                "a custom model has no pitch or grid axes".into(),
            )),
        }
    }

    /// Onset likelihood of every grid at wall-clock `time_ms`.
    fn onset_at(&self, time_ms: f64) -> Result<Vec<f64>> {
        let (grids, onset) = match &self.lattice {
            Lattice::Rhythm { grids, onset } | Lattice::Split { grids, onset, .. } => {
                (grids, onset)
            }
            Lattice::Pitch(_) | Lattice::Custom => {
                return Err(ArnoldError::Domain(
                    "strikes need a lattice with rhythm grids".into(),
                ));
            }
        };
        let tactus = tactus_from_ms(time_ms, onset.tempo_hz, grids.common_period())?;
        tracing::trace!("onset at {time_ms}ms, tactus {tactus:.3}");
        Ok(onset_likelihood(grids.grids(), tactus, onset.sharpness))
    }

    /// Register a user onset at wall-clock `time_ms`. Grids with an attack
    /// near that moment receive most of the `gain`, spread over every pitch.
    pub fn strike(&mut self, time_ms: f64, gain: f64) -> Result<()> {
        let likes = self.onset_at(time_ms)?;
        let weights: Vec<f64> = likes
            .iter()
            .copied()
            .cycle()
            .take(self.len())
            .collect();
        self.add_impulse_distribution(&weights, gain)
    }

    /// Like [`strike`](Self::strike), but the whole `gain` lands on one
    /// pitch row, as when a keyed note sounds.
    pub fn strike_at_pitch(&mut self, time_ms: f64, pitch: usize, gain: f64) -> Result<()> {
        let likes = self.onset_at(time_ms)?;
        let (pitches, grids) = self.shape()?;
        if pitch >= pitches {
            return Err(ArnoldError::IndexOutOfRange {
                index: pitch,
                len: pitches,
            });
        }
        let mut weights = vec![0.0; self.len()];
        weights[grids * pitch..grids * (pitch + 1)].copy_from_slice(&likes);
        self.add_impulse_distribution(&weights, gain)
    }

    /// Put `gain` on one grid, spread across pitches by the prior.
    pub fn impulse_at_grid(&mut self, grid: usize, gain: f64) -> Result<()> {
        let lattice = match &self.lattice {
            Lattice::Rhythm { grids, .. } | Lattice::Split { grids, .. } => grids,
            Lattice::Pitch(_) | Lattice::Custom => {
                return Err(ArnoldError::Domain(
                    "grid impulses need a lattice with rhythm grids".into(),
                ));
            }
        };
        let target = lattice.get(grid)?;
        tracing::trace!("impulse of {gain} at grid {target}");
        let grids = lattice.len();
        let weights: Vec<f64> = (0..self.len())
            .map(|i| if i % grids == grid { 1.0 } else { 0.0 })
            .collect();
        self.add_impulse_distribution(&weights, gain)
    }

    /// Marginals of the live prior. With an `envelope` over grids, each
    /// pitch sums its grids weighted by the envelope instead of evenly.
    pub fn prior_marginals(&self, envelope: Option<&[f64]>) -> Result<PriorMarginals> {
        let (pitches, grids) = self.shape()?;
        if let Some(envelope) = envelope {
            check_len(grids, envelope.len())?;
        }
        let prior = self.prior.likes();
        let mut pitch = vec![0.0; pitches];
        let mut grid = vec![0.0; grids];
        for (f, row) in prior.chunks(grids).enumerate() {
            for (g, &p) in row.iter().enumerate() {
                pitch[f] += envelope.map_or(1.0, |e| e[g]) * p;
                grid[g] += p;
            }
        }
        Ok(PriorMarginals {
            pitch: MassVector::new(pitch)?,
            grid: MassVector::new(grid)?,
        })
    }

    /// A discrete event at `index`: the mass jumps toward that point at
    /// rate `1 / perplexity`. Total mass is unchanged.
    pub fn event(&mut self, index: usize) -> Result<()> {
        let total = self.mass.total();
        let mut mass = self.mass.normalized()?;
        let rate = (1.0 / mass.perplexity()?).min(1.0);
        mass.shift_towards_point(index, rate)?;
        mass.scale(total)?;
        tracing::trace!("event at {index}, rate {rate:.3}");
        self.mass = mass;
        Ok(())
    }
}
