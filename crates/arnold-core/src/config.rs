//! Engine configuration: which lattice to build, how sharply energies
//! discriminate, and the relaxation time constants.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ACUITY, DEFAULT_ATTACK_SEC, DEFAULT_PITCH_ACUITY, DEFAULT_PITCH_RADIUS,
    DEFAULT_PRIOR_SEC, DEFAULT_RHYTHM_RADIUS, DEFAULT_SHARPNESS, DEFAULT_SPLIT_SHARPNESS,
    DEFAULT_SUSTAIN_SEC, DEFAULT_TEMPO_ACUITY, DEFAULT_TEMPO_HZ, DEFAULT_TEMPO_RADIUS,
};
use crate::energy::Coupling;
use crate::error::{ArnoldError, Result};

/// Lattice shape. Radii bound the norm of every lattice point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ModelConfig {
    /// Rational pitches only.
    Pitch {
        #[serde(default = "default_pitch_radius")]
        radius: f64,
    },
    /// Affine rhythm grids only.
    Rhythm {
        #[serde(default = "default_rhythm_radius")]
        radius: f64,
    },
    /// Pitch × tempo cross product.
    Split {
        #[serde(default = "default_pitch_radius")]
        pitch_radius: f64,
        #[serde(default = "default_tempo_radius")]
        tempo_radius: f64,
        #[serde(default)]
        coupling: Coupling,
    },
}

fn default_pitch_radius() -> f64 {
    DEFAULT_PITCH_RADIUS
}

fn default_rhythm_radius() -> f64 {
    DEFAULT_RHYTHM_RADIUS
}

fn default_tempo_radius() -> f64 {
    DEFAULT_TEMPO_RADIUS
}

/// Energy scales. Acuities divide distances; `temperature` divides the
/// resulting energy inside the Boltzmann prior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemperatureParams {
    pub temperature: f64,
    /// Single-lattice models.
    pub acuity: f64,
    pub pitch_acuity: f64,
    pub tempo_acuity: f64,
    /// Attack envelope sharpness for interference and strikes.
    pub sharpness: f64,
}

impl Default for TemperatureParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            acuity: DEFAULT_ACUITY,
            pitch_acuity: DEFAULT_PITCH_ACUITY,
            tempo_acuity: DEFAULT_TEMPO_ACUITY,
            sharpness: DEFAULT_SHARPNESS,
        }
    }
}

/// Time constants in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecayParams {
    /// Impulses drain into the mass at rate `1 / attack_sec`.
    pub attack_sec: f64,
    /// Mass relaxes toward the scaled prior.
    pub sustain_sec: f64,
    /// Live prior low-passes the instantaneous Boltzmann prior.
    pub prior_sec: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            attack_sec: DEFAULT_ATTACK_SEC,
            sustain_sec: DEFAULT_SUSTAIN_SEC,
            prior_sec: DEFAULT_PRIOR_SEC,
        }
    }
}

fn default_gain() -> f64 {
    1.0
}

fn default_tempo_hz() -> f64 {
    DEFAULT_TEMPO_HZ
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub temperature_params: TemperatureParams,
    #[serde(default)]
    pub decay_params: DecayParams,
    /// Total mass the relaxation drifts toward in the absence of impulses.
    #[serde(default = "default_gain")]
    pub background_gain: f64,
    /// Unit beats per second, used to place strikes on the grids.
    #[serde(default = "default_tempo_hz")]
    pub tempo_hz: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::rhythm(DEFAULT_RHYTHM_RADIUS)
    }
}

impl EngineConfig {
    fn with_model(model: ModelConfig) -> Self {
        Self {
            model,
            temperature_params: TemperatureParams::default(),
            decay_params: DecayParams::default(),
            background_gain: default_gain(),
            tempo_hz: default_tempo_hz(),
        }
    }

    pub fn pitch(radius: f64) -> Self {
        Self::with_model(ModelConfig::Pitch { radius })
    }

    pub fn default_pitch() -> Self {
        Self::pitch(DEFAULT_PITCH_RADIUS)
    }

    pub fn rhythm(radius: f64) -> Self {
        Self::with_model(ModelConfig::Rhythm { radius })
    }

    pub fn default_split() -> Self {
        Self::split(DEFAULT_PITCH_RADIUS, DEFAULT_TEMPO_RADIUS, Coupling::Independent)
    }

    pub fn split(pitch_radius: f64, tempo_radius: f64, coupling: Coupling) -> Self {
        let mut config = Self::with_model(ModelConfig::Split {
            pitch_radius,
            tempo_radius,
            coupling,
        });
        config.temperature_params.sharpness = DEFAULT_SPLIT_SHARPNESS;
        config
    }

    /// Reject parameters the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        match &self.model {
            ModelConfig::Pitch { radius } | ModelConfig::Rhythm { radius } => {
                require_radius("radius", *radius)?
            }
            ModelConfig::Split {
                pitch_radius,
                tempo_radius,
                ..
            } => {
                require_radius("pitchRadius", *pitch_radius)?;
                require_radius("tempoRadius", *tempo_radius)?;
            }
        }
        let t = &self.temperature_params;
        require_positive("temperature", t.temperature)?;
        require_positive("acuity", t.acuity)?;
        require_positive("pitchAcuity", t.pitch_acuity)?;
        require_positive("tempoAcuity", t.tempo_acuity)?;
        require_positive("sharpness", t.sharpness)?;
        let d = &self.decay_params;
        require_positive("attackSec", d.attack_sec)?;
        require_positive("sustainSec", d.sustain_sec)?;
        require_positive("priorSec", d.prior_sec)?;
        require_positive("backgroundGain", self.background_gain)?;
        require_positive("tempoHz", self.tempo_hz)?;
        Ok(())
    }
}

pub(crate) fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ArnoldError::Domain(format!(
            "{name} must be finite and positive, got {value}"
        )))
    }
}

/// The smallest lattice (just 1/1) needs radius √2.
fn require_radius(name: &str, value: f64) -> Result<()> {
    require_positive(name, value)?;
    if value < std::f64::consts::SQRT_2 {
        return Err(ArnoldError::Domain(format!(
            "{name} = {value} leaves the lattice empty"
        )));
    }
    Ok(())
}
