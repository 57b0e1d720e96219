use std::fmt;

/// Failures raised by the lattice and diffusion engine.
///
/// Everything except `NotInitialized` indicates a programming error on the
/// caller's side and should not be retried.
#[derive(Debug)]
pub enum ArnoldError {
    /// Malformed rational such as `0/0`, or an exact product that overflows.
    InvalidValue(String),
    /// Operation undefined for its input: negative difference, zero-mass
    /// normalization, non-positive temperature, rate outside `[0, 1]`.
    Domain(String),
    LengthMismatch { expected: usize, actual: usize },
    IndexOutOfRange { index: usize, len: usize },
    /// The lattice and energy tables are still being built.
    NotInitialized,
    Json(serde_json::Error),
}

impl ArnoldError {
    /// Stable camelCase tag used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ArnoldError::InvalidValue(_) => "invalidValue",
            ArnoldError::Domain(_) => "domainError",
            ArnoldError::LengthMismatch { .. } => "lengthMismatch",
            ArnoldError::IndexOutOfRange { .. } => "indexOutOfRange",
            ArnoldError::NotInitialized => "notInitialized",
            ArnoldError::Json(_) => "invalidJson",
        }
    }
}

impl fmt::Display for ArnoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArnoldError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            ArnoldError::Domain(msg) => write!(f, "domain error: {msg}"),
            ArnoldError::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected}, got {actual}")
            }
            ArnoldError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for lattice of size {len}")
            }
            ArnoldError::NotInitialized => write!(f, "engine is not initialized yet"),
            ArnoldError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for ArnoldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArnoldError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ArnoldError {
    fn from(e: serde_json::Error) -> Self {
        ArnoldError::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, ArnoldError>;

/// Fail with `LengthMismatch` unless `actual == expected`.
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ArnoldError::LengthMismatch { expected, actual })
    }
}
