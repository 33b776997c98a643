//! Position-sensor abstraction: mechanical angle, velocity and full-rotation
//! bookkeeping on top of a hardware-specific angle source.

pub mod encoder;
pub mod generic;
pub mod hall;

use crate::time::Clock;
use crate::Result;
use core::f32::consts::TAU;

pub use encoder::Encoder;
pub use generic::GenericSensor;
pub use hall::HallSensor;

/// Raw-angle delta treated as a wraparound rather than genuine movement.
const WRAP_THRESHOLD: f32 = 0.8 * TAU;

/// Hardware-specific absolute angle source (magnetic, analog, PWM encoder).
///
/// Returns the raw angle in `[0, 2π)` or an error for a transient read
/// failure; the sensor layer absorbs errors by keeping its previous state.
pub trait RawAngleSource {
    fn read_angle(&mut self) -> Result<f32>;
}

impl<F: FnMut() -> Result<f32>> RawAngleSource for F {
    fn read_angle(&mut self) -> Result<f32> {
        self()
    }
}

/// Position sensor as seen by the motor core.
///
/// `update` is called once per control iteration; the angle/velocity getters
/// only read state captured by the last `update`, so their cost is constant
/// regardless of the underlying hardware.
pub trait Sensor {
    /// Sample the hardware once and refresh internal state. A failed read
    /// leaves the previous state untouched.
    fn update(&mut self, now_us: u64);

    /// Last raw angle in `[0, 2π)`.
    fn mechanical_angle(&self) -> f32;

    /// Unbounded accumulated angle: `full_rotations * 2π + mechanical`.
    /// Single precision; degrades at large rotation counts, use
    /// [`Sensor::precise_angle`] where that matters.
    fn angle(&self) -> f32;

    /// Double-precision variant of [`Sensor::angle`].
    fn precise_angle(&self) -> f64;

    /// Signed full-rotation count.
    fn full_rotations(&self) -> i32;

    /// Angular velocity in rad/s, computed over the elapsed time since the
    /// previous velocity sample (held if called faster than the sensor's
    /// minimum elapsed time).
    fn velocity(&mut self, now_us: u64) -> f32;

    /// True for sensors that need an absolute-position homing sweep (index
    /// pulse) before `angle` is trustworthy as an absolute reference.
    fn needs_search(&self) -> bool {
        false
    }

    /// Prime internal state so the first real read does not see a jump.
    fn init(&mut self, clock: &dyn Clock);
}

/// Rotation and velocity bookkeeping shared by sensor implementations.
///
/// Angle sampling and velocity sampling keep separate previous-state pairs
/// so the two can be polled at different rates.
#[derive(Debug, Clone)]
pub struct SensorState {
    /// Minimum elapsed time between velocity samples, seconds.
    pub min_elapsed_time: f32,
    angle_prev: f32,
    angle_prev_ts: u64,
    full_rotations: i32,
    vel_angle_prev: f32,
    vel_full_rotations: i32,
    vel_angle_prev_ts: u64,
    velocity: f32,
}

impl Default for SensorState {
    fn default() -> Self {
        Self {
            min_elapsed_time: 100e-6,
            angle_prev: 0.0,
            angle_prev_ts: 0,
            full_rotations: 0,
            vel_angle_prev: 0.0,
            vel_full_rotations: 0,
            vel_angle_prev_ts: 0,
            velocity: 0.0,
        }
    }
}

impl SensorState {
    /// Record a fresh raw reading. A delta above 0.8·2π is interpreted as a
    /// wraparound and adjusts the rotation counter instead of the angle.
    pub fn apply_reading(&mut self, raw: f32, now_us: u64) {
        self.angle_prev_ts = now_us;
        let d_angle = raw - self.angle_prev;
        if d_angle.abs() > WRAP_THRESHOLD {
            self.full_rotations += if d_angle > 0.0 { -1 } else { 1 };
        }
        self.angle_prev = raw;
    }

    /// Seed all state from one reading (startup, after homing).
    pub fn seed(&mut self, raw: f32, now_us: u64) {
        self.angle_prev = raw;
        self.angle_prev_ts = now_us;
        self.vel_angle_prev = raw;
        self.vel_angle_prev_ts = now_us;
        self.velocity = 0.0;
    }

    pub fn mechanical_angle(&self) -> f32 {
        self.angle_prev
    }

    pub fn angle(&self) -> f32 {
        self.full_rotations as f32 * TAU + self.angle_prev
    }

    pub fn precise_angle(&self) -> f64 {
        self.full_rotations as f64 * TAU as f64 + self.angle_prev as f64
    }

    pub fn full_rotations(&self) -> i32 {
        self.full_rotations
    }

    /// Finite-difference velocity over the span since the last velocity
    /// sample. Sub-`min_elapsed_time` spans return the previous value to
    /// avoid amplifying quantization noise.
    pub fn velocity(&mut self) -> f32 {
        let ts = (self.angle_prev_ts as i64 - self.vel_angle_prev_ts as i64) as f32 * 1e-6;
        if ts < 0.0 {
            // Counter glitch: resynchronize and keep the old estimate.
            self.vel_angle_prev = self.angle_prev;
            self.vel_full_rotations = self.full_rotations;
            self.vel_angle_prev_ts = self.angle_prev_ts;
            return self.velocity;
        }
        if ts < self.min_elapsed_time {
            return self.velocity;
        }
        self.velocity = ((self.full_rotations - self.vel_full_rotations) as f32 * TAU
            + (self.angle_prev - self.vel_angle_prev))
            / ts;
        self.vel_angle_prev = self.angle_prev;
        self.vel_full_rotations = self.full_rotations;
        self.vel_angle_prev_ts = self.angle_prev_ts;
        self.velocity
    }
}
