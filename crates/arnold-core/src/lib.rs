//! Rational lattice diffusion engine.
//!
//! Musical hypotheses live on a finite lattice: rational pitch ratios
//! `p/q`, affine rhythm grids `(p/q)·t + a/b`, or the cross product of the
//! two. A mass vector over the lattice relaxes toward a Boltzmann prior
//! whose energy measures how harmonious each point is with the current
//! mass, while impulses from the outside world are absorbed over an attack
//! time.
//!
//! Zero I/O: the engine has no opinions about transport, clocks or persistence.

pub mod config;
pub mod constants;
pub mod energy;
pub mod engine;
pub mod error;
pub mod grid;
pub mod mass;
pub mod onset;
pub mod rational;
pub mod snapshot;

pub use config::{DecayParams, EngineConfig, ModelConfig, TemperatureParams};
pub use constants::DEFAULT_TRUNCATE_THRESHOLD;
pub use energy::{Coupling, EnergyMatrix, EnergyModel, MatrixEnergy, SplitEnergy};
pub use engine::{DiffusionEngine, EngineState, PriorMarginals, Relaxation};
pub use error::{ArnoldError, Result};
pub use grid::{AffineGrid, GridLattice, common_period, envelope};
pub use mass::MassVector;
pub use onset::{onset_likelihood, tactus_from_ms};
pub use rational::{Rational, gcd, lcm};
pub use snapshot::{CURRENT_VERSION, LatticeDescription, Snapshot, export_json, import_json};
