//! Hall-effect sensor: six commutation states per electrical revolution.

use super::Sensor;
use crate::time::Clock;
use core::cell::Cell;
use core::f32::consts::TAU;
use critical_section::Mutex;

/// Maps the raw 3-bit hall state to a sector index 0-5 along the rotation
/// sequence 1 -> 3 -> 2 -> 6 -> 4 -> 5; 255 marks the invalid states 0b000
/// and 0b111.
const HALL_STATE_TABLE: [u8; 8] = [255, 0, 2, 1, 4, 5, 3, 255];

const INVALID: u8 = 255;

#[derive(Debug, Clone, Copy)]
struct Shared {
    sector: u8,
    /// Signed count of sector transitions since startup.
    count: i32,
    direction: i8,
    pulse_timestamp: u64,
    /// Time between the last two transitions, µs.
    pulse_diff: u64,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            sector: INVALID,
            count: 0,
            direction: 1,
            pulse_timestamp: 0,
            pulse_diff: 0,
        }
    }
}

/// Hall sensor with interrupt-driven edge handling. Resolution is
/// `6 * pole_pairs` states per mechanical revolution.
pub struct HallSensor {
    pole_pairs: u8,
    shared: Mutex<Cell<Shared>>,
    angle_prev: f32,
    full_rotations: i32,
    velocity_val: f32,
    last_now: u64,
}

impl HallSensor {
    pub fn new(pole_pairs: u8) -> Self {
        Self {
            pole_pairs: pole_pairs.max(1),
            shared: Mutex::new(Cell::new(Shared::default())),
            angle_prev: 0.0,
            full_rotations: 0,
            velocity_val: 0.0,
            last_now: 0,
        }
    }

    fn cpr(&self) -> i32 {
        6 * self.pole_pairs as i32
    }

    /// Edge callback with the three hall pin levels, safe to call from
    /// interrupt context.
    pub fn handle_state(&self, a: bool, b: bool, c: bool, now_us: u64) {
        let raw = (a as usize) | ((b as usize) << 1) | ((c as usize) << 2);
        let sector = HALL_STATE_TABLE[raw];
        if sector == INVALID {
            return;
        }
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            if s.sector == INVALID {
                // First valid reading: latch without counting a transition.
                s.sector = sector;
                s.pulse_timestamp = now_us;
                cell.set(s);
                return;
            }
            if sector != s.sector {
                let delta = (sector as i8 - s.sector as i8).rem_euclid(6);
                // A missed interrupt shows up as a forward skip of 2 or 3
                // sectors; only deltas above 3 mean backward motion.
                let step = if delta <= 3 {
                    delta as i32
                } else {
                    delta as i32 - 6
                };
                s.direction = if step > 0 { 1 } else { -1 };
                s.count += step;
                s.pulse_diff = now_us.saturating_sub(s.pulse_timestamp);
                s.pulse_timestamp = now_us;
                s.sector = sector;
                cell.set(s);
            }
        });
    }

    fn snapshot(&self) -> Shared {
        critical_section::with(|cs| self.shared.borrow(cs).get())
    }
}

impl Sensor for HallSensor {
    fn update(&mut self, now_us: u64) {
        let s = self.snapshot();
        let cpr = self.cpr();
        self.full_rotations = s.count.div_euclid(cpr);
        self.angle_prev = TAU * s.count.rem_euclid(cpr) as f32 / cpr as f32;
        self.last_now = now_us;
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

    fn velocity(&mut self, now_us: u64) -> f32 {
        let s = self.snapshot();
        if s.pulse_diff == 0 || now_us.saturating_sub(s.pulse_timestamp) > 100_000 {
            // No transition for 100 ms: stopped.
            self.velocity_val = 0.0;
        } else {
            self.velocity_val =
                s.direction as f32 * (TAU / self.cpr() as f32) / (s.pulse_diff as f32 * 1e-6);
        }
        self.velocity_val
    }

    fn init(&mut self, clock: &dyn Clock) {
        self.update(clock.now_us());
    }
}
