//! Ground-side actuator bridge for a remote-controlled vehicle.
//!
//! Receives periodic UDP control frames (yaw/pitch/steer/throttle plus an
//! optional video-stream command), converts them to servo PWM pulses via a
//! pigpio daemon connection, and supervises the external video pipeline
//! process. A fail-safe timeout neutralizes all outputs when control input
//! stops.

pub mod actuator;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod stream;
