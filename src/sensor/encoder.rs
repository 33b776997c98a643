//! Incremental quadrature encoder with optional index pulse.
//!
//! Edge counting happens in interrupt context through the `handle_*`
//! callbacks; the main loop samples the counter via [`Sensor::update`].
//! Counter and edge timestamp are copied as one atomic snapshot inside a
//! critical section kept to the copy itself, never around computation.

use super::Sensor;
use crate::time::Clock;
use core::cell::Cell;
use core::f32::consts::TAU;
use critical_section::Mutex;

/// State shared with interrupt context, snapshotted as a whole.
#[derive(Debug, Clone, Copy, Default)]
struct Shared {
    pulse_counter: i32,
    pulse_timestamp: u64,
    a_active: bool,
    b_active: bool,
    i_active: bool,
    index_found: bool,
    /// Counter value at the previous velocity sample. Lives here because
    /// the index handler re-bases it together with the counter.
    prev_pulse_counter: i32,
}

/// Quadrature encoder (4x counting).
pub struct Encoder {
    /// Counts per mechanical revolution (4 × pulses per revolution).
    cpr: i32,
    has_index: bool,
    shared: Mutex<Cell<Shared>>,
    // State refreshed by update().
    angle_prev: f32,
    angle_prev_ts: u64,
    full_rotations: i32,
    // Velocity estimation (mixed frequency/period method).
    prev_th: f32,
    pulse_per_second: f32,
    prev_timestamp_us: u64,
    index_seen: bool,
}

impl Encoder {
    /// `ppr` is pulses per revolution; counting is quadrature so the counter
    /// resolution is `4 * ppr`.
    pub fn new(ppr: u32, has_index: bool) -> Self {
        Self {
            cpr: (ppr as i32) * 4,
            has_index,
            shared: Mutex::new(Cell::new(Shared::default())),
            angle_prev: 0.0,
            angle_prev_ts: 0,
            full_rotations: 0,
            prev_th: 0.0,
            pulse_per_second: 0.0,
            prev_timestamp_us: 0,
            index_seen: false,
        }
    }

    /// A-channel edge callback, safe to call from interrupt context.
    pub fn handle_a(&self, a: bool, now_us: u64) {
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            if a != s.a_active {
                s.pulse_counter += if s.a_active == s.b_active { 1 } else { -1 };
                s.pulse_timestamp = now_us;
                s.a_active = a;
                cell.set(s);
            }
        });
    }

    /// B-channel edge callback, safe to call from interrupt context.
    pub fn handle_b(&self, b: bool, now_us: u64) {
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            if b != s.b_active {
                s.pulse_counter += if s.a_active != s.b_active { 1 } else { -1 };
                s.pulse_timestamp = now_us;
                s.b_active = b;
                cell.set(s);
            }
        });
    }

    /// Index-channel callback. On a rising edge the counter is re-based to
    /// the nearest full rotation, removing accumulated miscounts.
    pub fn handle_index(&self, i: bool) {
        if !self.has_index {
            return;
        }
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            if i && !s.i_active {
                s.index_found = true;
                let before = s.pulse_counter;
                let rounded =
                    libm::round(before as f64 / self.cpr as f64) as i32 * self.cpr;
                s.pulse_counter = rounded;
                // Keep the velocity estimate continuous across the re-base.
                s.prev_pulse_counter += rounded - before;
            }
            s.i_active = i;
            cell.set(s);
        });
    }

    fn snapshot(&self) -> Shared {
        critical_section::with(|cs| self.shared.borrow(cs).get())
    }
}

impl Sensor for Encoder {
    fn update(&mut self, _now_us: u64) {
        // Atomic copy of counter + timestamp; the math happens outside the
        // critical section.
        let s = self.snapshot();
        self.angle_prev_ts = s.pulse_timestamp;
        self.full_rotations = s.pulse_counter.div_euclid(self.cpr);
        self.angle_prev = TAU * s.pulse_counter.rem_euclid(self.cpr) as f32 / self.cpr as f32;
        self.index_seen = s.index_found;
    }

    fn mechanical_angle(&self) -> f32 {
        self.angle_prev
    }

    fn angle(&self) -> f32 {
        self.full_rotations as f32 * TAU + self.angle_prev
    }

    fn precise_angle(&self) -> f64 {
        self.full_rotations as f64 * TAU as f64 + self.angle_prev as f64
    }

    fn full_rotations(&self) -> i32 {
        self.full_rotations
    }

    /// Mixed time/frequency velocity estimate: pulse count over the window
    /// corrected by the partial pulse periods at both ends. Robust at low
    /// speed where plain finite differences quantize badly.
    fn velocity(&mut self, now_us: u64) -> f32 {
        let s = self.snapshot();

        let mut ts = (now_us.wrapping_sub(self.prev_timestamp_us)) as f32 * 1e-6;
        if ts <= 0.0 || ts > 0.5 {
            ts = 1e-3;
        }
        // Time since the last counted edge.
        let th = (now_us.saturating_sub(s.pulse_timestamp)) as f32 * 1e-6;
        let dn = s.pulse_counter - s.prev_pulse_counter;

        let dt = ts + self.prev_th - th;
        if dn != 0 && dt > ts / 2.0 {
            self.pulse_per_second = dn as f32 / dt;
        }
        // No edge for 100 ms: the shaft has stopped.
        if th > 0.1 {
            self.pulse_per_second = 0.0;
        }

        let velocity = self.pulse_per_second / self.cpr as f32 * TAU;

        self.prev_timestamp_us = now_us;
        self.prev_th = th;
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut sh = cell.get();
            sh.prev_pulse_counter = s.pulse_counter;
            cell.set(sh);
        });
        velocity
    }

    fn needs_search(&self) -> bool {
        self.has_index && !self.index_seen
    }

    fn init(&mut self, clock: &dyn Clock) {
        let now = clock.now_us();
        self.prev_timestamp_us = now;
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            if s.pulse_timestamp == 0 {
                s.pulse_timestamp = now;
            }
            cell.set(s);
        });
        self.update(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive `steps` quadrature steps, positive = forward.
    fn step(enc: &Encoder, steps: i32, start_us: u64, period_us: u64) -> u64 {
        let mut now = start_us;
        let mut a;
        let mut b;
        let snapshot = critical_section::with(|cs| enc.shared.borrow(cs).get());
        a = snapshot.a_active;
        b = snapshot.b_active;
        for _ in 0..steps.abs() {
            now += period_us;
            if steps > 0 {
                // Forward gray sequence: toggle A when A==B, else toggle B.
                if a == b {
                    a = !a;
                    enc.handle_a(a, now);
                } else {
                    b = !b;
                    enc.handle_b(b, now);
                }
            } else {
                // Reverse: toggle B when A==B, else toggle A.
                if a == b {
                    b = !b;
                    enc.handle_b(b, now);
                } else {
                    a = !a;
                    enc.handle_a(a, now);
                }
            }
        }
        now
    }

    #[test]
    fn counts_full_rotation() {
        let mut enc = Encoder::new(100, false); // cpr = 400
        let now = step(&enc, 400, 0, 100);
        enc.update(now);
        assert_eq!(enc.full_rotations(), 1);
        assert!(enc.mechanical_angle().abs() < 1e-6);
    }

    #[test]
    fn reverse_counts_negative_with_positive_mechanical_angle() {
        let mut enc = Encoder::new(100, false);
        let now = step(&enc, -100, 0, 100); // quarter rotation backwards
        enc.update(now);
        assert_eq!(enc.full_rotations(), -1);
        // Angle stays in [0, 2π): -¼ turn reads as ¾ turn.
        assert!((enc.mechanical_angle() - 0.75 * TAU).abs() < 1e-4);
        assert!((enc.angle() + 0.25 * TAU).abs() < 1e-4);
    }

    #[test]
    fn velocity_from_pulse_timing() {
        let mut enc = Encoder::new(100, false);
        enc.init(&crate::time::mock::MockClock::new());
        // 400 steps over 0.04 s = one rotation in 40 ms = 157 rad/s.
        let now = step(&enc, 400, 0, 100);
        enc.update(now);
        let v = enc.velocity(now + 100);
        assert!((v - TAU / 0.04).abs() / (TAU / 0.04) < 0.05, "velocity {}", v);
    }

    #[test]
    fn velocity_zero_after_stall() {
        let mut enc = Encoder::new(100, false);
        let now = step(&enc, 40, 0, 100);
        enc.update(now);
        enc.velocity(now);
        let v = enc.velocity(now + 200_000); // 200 ms without an edge
        assert_eq!(v, 0.0);
    }

    #[test]
    fn index_rebases_counter_and_clears_search() {
        let mut enc = Encoder::new(100, true);
        assert!(enc.needs_search());
        // 397 steps: 3 counts short of a full rotation (miscount).
        let now = step(&enc, 397, 0, 100);
        enc.handle_index(true);
        enc.update(now);
        assert!(!enc.needs_search());
        assert_eq!(enc.full_rotations(), 1);
        assert!(enc.mechanical_angle().abs() < 1e-6);
    }
}
