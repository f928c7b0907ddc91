//! codec.rs
//! Wire codec for inbound control frames.
//!
//! Frames are UTF-8 JSON objects with optional keys; absence of a key is not
//! an error. Validation rejects the whole frame when any axis leaves [-1, 1]
//! so a bad datagram can never partially update the actuator.

use std::fmt;
use std::str::Utf8Error;

use serde::{Deserialize, Serialize};

/// One decoded control datagram. Reconstructed per datagram, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(default)]
    pub yaw: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub steer: f64,
    /// Wire key is "long" (longitudinal axis); drives the ESC channel.
    #[serde(default, rename = "long")]
    pub throttle: f64,
    #[serde(default)]
    pub stream_cmd: String,
    #[serde(default)]
    pub stream_cmd_hash: String,
}

#[derive(Debug)]
pub enum DecodeError {
    /// Payload is not valid UTF-8.
    Encoding(Utf8Error),
    /// Payload is not a valid JSON object of the expected shape.
    Syntax(serde_json::Error),
    /// An axis value left [-1, 1] after defaulting.
    OutOfRange { field: &'static str, value: f64 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Encoding(e) => write!(f, "invalid UTF-8: {e}"),
            DecodeError::Syntax(e) => write!(f, "JSON parsing error: {e}"),
            DecodeError::OutOfRange { field, value } => {
                write!(f, "{field}={value} outside [-1, 1]")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Encoding(e) => Some(e),
            DecodeError::Syntax(e) => Some(e),
            DecodeError::OutOfRange { .. } => None,
        }
    }
}

/// Decode and validate one datagram. Pure; safe on adversarial input.
/// Unknown keys (the control app also sends `time`) are ignored.
pub fn decode(payload: &[u8]) -> Result<ControlFrame, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::Encoding)?;
    let frame: ControlFrame = serde_json::from_str(text).map_err(DecodeError::Syntax)?;

    for (field, value) in [
        ("yaw", frame.yaw),
        ("pitch", frame.pitch),
        ("steer", frame.steer),
        ("long", frame.throttle),
    ] {
        if !(-1.0..=1.0).contains(&value) {
            return Err(DecodeError::OutOfRange { field, value });
        }
    }

    Ok(frame)
}

/// Serialize a frame back to its wire form. Only fails on non-finite axis
/// values, which `decode` would reject anyway.
pub fn encode(frame: &ControlFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
