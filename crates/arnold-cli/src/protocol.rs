//! Newline-delimited JSON messages exchanged with `arnold serve`.
//!
//! Requests carry a `"cmd"` tag, responses and pushed events a `"type"` tag.

use arnold_core::ArnoldError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    /// Advance the engine by `dtMs` milliseconds and report the new mass.
    Tick {
        #[serde(rename = "dtMs")]
        dt_ms: f64,
    },
    /// Queue mass at one lattice index.
    Impulse {
        index: usize,
        #[serde(default = "one")]
        amount: f64,
    },
    /// Register a user onset at a wall-clock time.
    Strike {
        #[serde(rename = "timeMs")]
        time_ms: f64,
        #[serde(default = "one")]
        gain: f64,
    },
    /// Onset on one pitch row, as from a keyed note.
    StrikeAtPitch {
        #[serde(rename = "timeMs")]
        time_ms: f64,
        pitch: usize,
        #[serde(default = "one")]
        gain: f64,
    },
    /// Queue mass on one grid, spread across pitches by the prior.
    GridImpulse {
        grid: usize,
        #[serde(default = "one")]
        gain: f64,
    },
    /// Pull the mass toward one index at rate `1 / perplexity`.
    Event { index: usize },
    /// Pitch and grid marginals of the live prior, optionally weighting
    /// grids by `envelope`.
    PriorMarginals {
        #[serde(default)]
        envelope: Option<Vec<f64>>,
    },
    /// Report the lattice's common period in unit beats.
    CommonPeriod,
    /// Evaluate the energy of an arbitrary mass vector.
    Energy { mass: Vec<f64> },
    /// Serialize the engine state.
    Snapshot,
    /// Self-clock at `rateHz`, pushing a `mass` event per tick.
    Start {
        #[serde(rename = "rateHz")]
        rate_hz: f64,
    },
    /// Stop self-clocking; manual ticks become no-ops until `resume`.
    Pause,
    /// Leave `pause` without self-clocking.
    Resume,
    /// Tick count and mean tick time so far.
    Profile,
    /// End the session.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Sent once, when the engine has finished building.
    Ready {
        session: String,
        /// Lattice description: `points`, `grids` and `commonPeriod`.
        lattice: serde_json::Value,
        #[serde(rename = "initMs")]
        init_ms: u64,
    },
    Mass { mass: Vec<f64> },
    Ack,
    CommonPeriod { period: u64 },
    Energy { energy: Vec<f64> },
    Snapshot { snapshot: serde_json::Value },
    PriorMarginals { pitch: Vec<f64>, grid: Vec<f64> },
    Profile {
        ticks: u64,
        #[serde(rename = "meanMs")]
        mean_ms: f64,
    },
    Error { kind: String, message: String },
}

impl Response {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<&ArnoldError> for Response {
    fn from(e: &ArnoldError) -> Self {
        Response::error(e.kind(), e.to_string())
    }
}

/// JSON Schemas for both directions of the protocol.
pub fn schemas() -> serde_json::Value {
    serde_json::json!({
        "request": schemars::schema_for!(Request),
        "response": schemars::schema_for!(Response),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_str(r#"{"cmd":"tick","dtMs":12.5}"#).unwrap();
        assert_eq!(req, Request::Tick { dt_ms: 12.5 });

        let req: Request = serde_json::from_str(r#"{"cmd":"impulse","index":3}"#).unwrap();
        assert_eq!(
            req,
            Request::Impulse {
                index: 3,
                amount: 1.0
            }
        );

        let req: Request = serde_json::from_str(r#"{"cmd":"commonPeriod"}"#).unwrap();
        assert_eq!(req, Request::CommonPeriod);

        let req: Request = serde_json::from_str(r#"{"cmd":"start","rateHz":30}"#).unwrap();
        assert_eq!(req, Request::Start { rate_hz: 30.0 });

        let req: Request = serde_json::from_str(r#"{"cmd":"resume"}"#).unwrap();
        assert_eq!(req, Request::Resume);
    }

    #[test]
    fn test_keyed_input_wire_format() {
        let req: Request =
            serde_json::from_str(r#"{"cmd":"strikeAtPitch","timeMs":250,"pitch":4}"#).unwrap();
        assert_eq!(
            req,
            Request::StrikeAtPitch {
                time_ms: 250.0,
                pitch: 4,
                gain: 1.0
            }
        );

        let req: Request =
            serde_json::from_str(r#"{"cmd":"gridImpulse","grid":2,"gain":0.5}"#).unwrap();
        assert_eq!(req, Request::GridImpulse { grid: 2, gain: 0.5 });

        let req: Request = serde_json::from_str(r#"{"cmd":"event","index":1}"#).unwrap();
        assert_eq!(req, Request::Event { index: 1 });

        let req: Request = serde_json::from_str(r#"{"cmd":"priorMarginals"}"#).unwrap();
        assert_eq!(req, Request::PriorMarginals { envelope: None });

        let req: Request =
            serde_json::from_str(r#"{"cmd":"priorMarginals","envelope":[1,0.5]}"#).unwrap();
        assert_eq!(
            req,
            Request::PriorMarginals {
                envelope: Some(vec![1.0, 0.5])
            }
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"explode"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"tick"}"#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&Response::CommonPeriod { period: 6 }).unwrap();
        assert_eq!(json, r#"{"type":"commonPeriod","period":6}"#);

        let json = serde_json::to_string(&Response::Profile {
            ticks: 4,
            mean_ms: 0.5,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"profile","ticks":4,"meanMs":0.5}"#);

        let json = serde_json::to_string(&Response::from(&ArnoldError::NotInitialized)).unwrap();
        assert!(json.starts_with(r#"{"type":"error","kind":"notInitialized""#));
    }

    #[test]
    fn test_schemas_cover_both_directions() {
        let schemas = schemas();
        let text = schemas.to_string();
        assert!(schemas.get("request").is_some());
        assert!(schemas.get("response").is_some());
        assert!(text.contains("dtMs"));
        assert!(text.contains("commonPeriod"));
    }
}
