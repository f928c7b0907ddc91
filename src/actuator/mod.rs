//! actuator/mod.rs
//! Stateless mapping from normalized axis values to PWM pulse widths, plus
//! the write path into the output sink.

pub mod sink;

use log::debug;

use crate::codec::ControlFrame;
use sink::PwmSink;

const PWM_FREQUENCY: u32 = 50;

const PWM_YAW_PIN: u32 = 18; // GPIO18 (PWM0)
const PWM_PITCH_PIN: u32 = 12; // GPIO12 (PWM0)
const PWM_STEER_PIN: u32 = 13; // GPIO13 (PWM1)
const PWM_LONG_PIN: u32 = 19; // GPIO19 (PWM1)

const PWM_MIN: u32 = 500;
const PWM_MAX: u32 = 2500;

// ESC range for the drive motor; much narrower than the servo range.
const PWM_MIN_LONG: u32 = 1200;
const PWM_MAX_LONG: u32 = 1700;

// Camera gimbal runs in a fixed mode at fixed sensitivity; both channels are
// re-asserted on every valid frame so a rebooted gimbal picks them up again.
const GIMBAL_MODE_PIN: u32 = 23;
const GIMBAL_MODE_US: u32 = 1500;
const GIMBAL_SENS_PIN: u32 = 24;
const GIMBAL_SENS_US: u32 = 1100;

/// Pulse width that tells the hardware to stop driving the pin.
const NO_PULSE: u32 = 0;

/// One physical output channel. Fixed at startup for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct PwmChannel {
    pub pin: u32,
    pub frequency_hz: u32,
    pub min_us: u32,
    pub max_us: u32,
}

/// Linear map from [-1, 1] to [min_us, max_us], truncated to whole
/// microseconds. Exact at both endpoints.
pub fn scale_pwm(value: f64, min_us: u32, max_us: u32) -> u32 {
    (min_us as f64 + (value + 1.0) * 0.5 * (max_us - min_us) as f64) as u32
}

/// Owns the output sink and the fixed channel table; translates frames into
/// synchronous pulse-width writes.
pub struct Actuator {
    sink: Box<dyn PwmSink>,
    yaw: PwmChannel,
    pitch: PwmChannel,
    steer: PwmChannel,
    throttle: PwmChannel,
}

impl Actuator {
    /// Build the channel table and program each pin's PWM frequency.
    pub fn new(mut sink: Box<dyn PwmSink>) -> Self {
        let servo = |pin| PwmChannel {
            pin,
            frequency_hz: PWM_FREQUENCY,
            min_us: PWM_MIN,
            max_us: PWM_MAX,
        };
        let yaw = servo(PWM_YAW_PIN);
        let pitch = servo(PWM_PITCH_PIN);
        let steer = servo(PWM_STEER_PIN);
        let throttle = PwmChannel {
            pin: PWM_LONG_PIN,
            frequency_hz: PWM_FREQUENCY,
            min_us: PWM_MIN_LONG,
            max_us: PWM_MAX_LONG,
        };

        for ch in [&yaw, &pitch, &steer, &throttle] {
            sink.set_frequency(ch.pin, ch.frequency_hz);
        }

        Self { sink, yaw, pitch, steer, throttle }
    }

    /// Drive all channels from one validated frame.
    /// The caller guarantees every axis is within [-1, 1].
    pub fn apply(&mut self, frame: &ControlFrame) {
        let pwm_yaw = scale_pwm(frame.yaw, self.yaw.min_us, self.yaw.max_us);
        let pwm_pitch = scale_pwm(frame.pitch, self.pitch.min_us, self.pitch.max_us);
        // Steering servo is mounted mirrored; hardware sign convention.
        let pwm_steer = scale_pwm(-frame.steer, self.steer.min_us, self.steer.max_us);
        let pwm_long = scale_pwm(frame.throttle, self.throttle.min_us, self.throttle.max_us);

        self.sink.set_pulse_width(self.yaw.pin, pwm_yaw);
        self.sink.set_pulse_width(self.pitch.pin, pwm_pitch);
        self.sink.set_pulse_width(self.steer.pin, pwm_steer);
        self.sink.set_pulse_width(self.throttle.pin, pwm_long);

        self.sink.set_pulse_width(GIMBAL_MODE_PIN, GIMBAL_MODE_US);
        self.sink.set_pulse_width(GIMBAL_SENS_PIN, GIMBAL_SENS_US);

        debug!(
            "[Actuator] yaw={} pitch={} steer={} long={} => PWM: {pwm_yaw}, {pwm_pitch}, {pwm_steer}, {pwm_long}",
            frame.yaw, frame.pitch, frame.steer, frame.throttle
        );
    }

    /// Stop every pulse (fail-safe and shutdown).
    pub fn neutral(&mut self) {
        for pin in [
            self.yaw.pin,
            self.pitch.pin,
            self.steer.pin,
            self.throttle.pin,
            GIMBAL_MODE_PIN,
            GIMBAL_SENS_PIN,
        ] {
            self.sink.set_pulse_width(pin, NO_PULSE);
        }
    }

    /// Release the hardware connection. Called once at shutdown.
    pub fn disconnect(&mut self) {
        self.sink.disconnect();
    }
}
