//! JSON wire format for lattice descriptions and engine snapshots.
//!
//! Field names are camelCase. Rationals travel as `{numer, denom}` and
//! grids as `{freqNumer, freqDenom, baseNumer, baseDenom}`.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{ArnoldError, Result};
use crate::grid::AffineGrid;
use crate::mass::MassVector;
use crate::rational::Rational;

pub const CURRENT_VERSION: &str = "0.1.0";

/// What a client needs to label the mass vector it will receive.
/// A split lattice lists both factors; index `G·f + g` pairs `points[f]`
/// with `grids[g]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatticeDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Rational>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grids: Option<Vec<AffineGrid>>,
    pub common_period: u64,
}

/// Enough to rebuild an engine exactly: the config regenerates the lattice
/// and energy tables, the vectors carry the dynamic state. The live prior
/// is recomputed from the restored mass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: String,
    pub config: EngineConfig,
    pub mass_vector: MassVector,
    pub impulse_vector: MassVector,
}

pub fn export_json(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn import_json(json: &str) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_json::from_str(json)?;
    if snapshot.version != CURRENT_VERSION {
        tracing::warn!(
            "importing snapshot version {} into {CURRENT_VERSION}",
            snapshot.version
        );
    }
    if snapshot.mass_vector.len() != snapshot.impulse_vector.len() {
        return Err(ArnoldError::LengthMismatch {
            expected: snapshot.mass_vector.len(),
            actual: snapshot.impulse_vector.len(),
        });
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            version: CURRENT_VERSION.to_string(),
            config: EngineConfig::pitch(4.0),
            mass_vector: MassVector::new(vec![0.1, 0.2, 0.7]).unwrap(),
            impulse_vector: MassVector::zeros(3),
        }
    }

    #[test]
    fn test_snapshot_wire_names() {
        let json = export_json(&sample()).unwrap();
        assert!(json.contains("\"massVector\""));
        assert!(json.contains("\"impulseVector\""));
        assert!(json.contains("\"decayParams\""));
        assert_eq!(import_json(&json).unwrap(), sample());
    }

    #[test]
    fn test_import_rejects_mismatched_vectors() {
        let mut snapshot = sample();
        snapshot.impulse_vector = MassVector::zeros(2);
        let json = export_json(&snapshot).unwrap();
        assert!(matches!(
            import_json(&json),
            Err(ArnoldError::LengthMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_import_rejects_negative_mass() {
        let json = r#"{"version":"0.1.0","config":{"model":{"kind":"pitch"}},
            "massVector":[-1.0],"impulseVector":[0.0]}"#;
        assert!(matches!(import_json(json), Err(ArnoldError::Json(_))));
    }

    #[test]
    fn test_description_omits_missing_factor() {
        let description = LatticeDescription {
            points: Some(vec![Rational::ONE]),
            grids: None,
            common_period: 1,
        };
        let json = serde_json::to_string(&description).unwrap();
        assert_eq!(json, r#"{"points":[{"numer":1,"denom":1}],"commonPeriod":1}"#);
    }
}
