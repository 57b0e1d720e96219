/// Rhythm lattice radius used by the drum machine configuration.
pub const DEFAULT_RHYTHM_RADIUS: f64 = 12.0;

/// Pitch radius barely including 1/16.
pub const DEFAULT_PITCH_RADIUS: f64 = 16.031_222_660_795_4;

/// Tempo radius barely including the 1/8 grid.
pub const DEFAULT_TEMPO_RADIUS: f64 = 8.062_263_950_032_895;

/// Acuity (inverse energy scale) for single-lattice models.
pub const DEFAULT_ACUITY: f64 = 2.5;

pub const DEFAULT_PITCH_ACUITY: f64 = 3.0;

pub const DEFAULT_TEMPO_ACUITY: f64 = 2.5;

/// Attack envelope sharpness for rhythm-only models.
pub const DEFAULT_SHARPNESS: f64 = 4.0;

/// Attack envelope sharpness for split pitch/tempo models.
pub const DEFAULT_SPLIT_SHARPNESS: f64 = 8.0;

/// Impulse absorption time constant (seconds)
pub const DEFAULT_ATTACK_SEC: f64 = 0.1;

/// Mass relaxation time constant (seconds)
pub const DEFAULT_SUSTAIN_SEC: f64 = 4.0;

/// Prior low-pass time constant (seconds)
pub const DEFAULT_PRIOR_SEC: f64 = 10.0;

/// Unit beats per second when a config leaves the tempo out.
pub const DEFAULT_TEMPO_HZ: f64 = 1.0;

/// Entries at or below this mass are dropped when sparsifying for display.
pub const DEFAULT_TRUNCATE_THRESHOLD: f64 = 1e-4;
