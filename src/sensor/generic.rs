//! Sensor wrapper for absolute angle sources (magnetic, analog, PWM).

use super::{RawAngleSource, Sensor, SensorState};
use crate::time::Clock;

/// Absolute-source sensor: every reading is already a mechanical angle in
/// `[0, 2π)`, the wrapper only adds rotation and velocity bookkeeping.
pub struct GenericSensor<R: RawAngleSource> {
    source: R,
    state: SensorState,
}

impl<R: RawAngleSource> GenericSensor<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            state: SensorState::default(),
        }
    }

    /// Minimum time between velocity samples, seconds.
    pub fn set_min_elapsed_time(&mut self, seconds: f32) {
        self.state.min_elapsed_time = seconds;
    }
}

impl<R: RawAngleSource> Sensor for GenericSensor<R> {
    fn update(&mut self, now_us: u64) {
        // Transient read errors keep the previous state.
        if let Ok(raw) = self.source.read_angle() {
            self.state.apply_reading(raw, now_us);
        }
    }

    fn mechanical_angle(&self) -> f32 {
        self.state.mechanical_angle()
    }

    fn angle(&self) -> f32 {
        self.state.angle()
    }

    fn precise_angle(&self) -> f64 {
        self.state.precise_angle()
    }

    fn full_rotations(&self) -> i32 {
        self.state.full_rotations()
    }

    fn velocity(&mut self, _now_us: u64) -> f32 {
        // Velocity spans are taken from update() timestamps.
        self.state.velocity()
    }

    fn init(&mut self, clock: &dyn Clock) {
        // Read twice with a short settling gap so the first control-loop
        // sample does not see a startup discontinuity.
        let _ = self.source.read_angle();
        clock.delay_us(1);
        if let Ok(raw) = self.source.read_angle() {
            self.state.seed(raw, clock.now_us());
        }
        clock.delay_ms(1);
        let _ = self.source.read_angle();
        clock.delay_us(1);
        if let Ok(raw) = self.source.read_angle() {
            self.state.apply_reading(raw, clock.now_us());
        }
    }
}
