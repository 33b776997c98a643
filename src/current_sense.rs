//! Phase-current sensing: Clarke/Park pipeline and the driver alignment
//! probe that discovers channel-to-phase wiring and gain polarity at runtime.

use crate::driver::{BldcDriver, DriverType, StepperDriver};
use crate::math::{sincos, sqrt_approx};
use crate::time::Clock;
use crate::{AbCurrents, DqCurrents, FocError, PhaseCurrents, Result};

const _1_SQRT3: f32 = 0.577_350_26;
const _2_SQRT3: f32 = 1.154_700_5;

/// Probe currents below this magnitude [A] cannot align reliably.
const ALIGN_DETECT_FLOOR: f32 = 0.1;
/// A channel must exceed the next largest by this factor to count as the
/// energized phase.
const ALIGN_DOMINANCE: f32 = 1.5;

/// Outcome of a successful driver alignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlignReport {
    /// Channel-to-phase mapping was permuted.
    pub pins_swapped: bool,
    /// At least one channel gain had its sign flipped.
    pub gains_inverted: bool,
}

/// Hardware ADC front end: one sample of all current channels, in amperes at
/// unity gain. `None` marks channels that are not wired. Stepper sensing
/// uses slots 0 and 1 only.
pub trait CurrentReader {
    fn read(&mut self) -> [Option<f32>; 3];
}

impl<F: FnMut() -> [Option<f32>; 3]> CurrentReader for F {
    fn read(&mut self) -> [Option<f32>; 3] {
        self()
    }
}

/// Current sense as seen by the motor core.
pub trait CurrentSense {
    /// d-q currents at the given electrical angle.
    fn foc_currents(&mut self, angle_el: f32) -> DqCurrents;

    /// Overall current magnitude; signed by the q-axis direction when the
    /// electrical angle is known.
    fn dc_current(&mut self, angle_el: Option<f32>) -> f32;

    /// Verify and fix channel-to-phase mapping and gain signs by energizing
    /// one phase at a time through the driver.
    fn align_bldc(
        &mut self,
        driver: &mut dyn BldcDriver,
        voltage: f32,
        modulation_centered: bool,
        clock: &dyn Clock,
    ) -> Result<AlignReport>;

    /// True when the user vouches for the wiring and alignment is skipped.
    fn skip_align(&self) -> bool;

    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

impl PhaseCurrents {
    fn channel(&self, i: usize) -> Option<f32> {
        match i {
            0 => self.a,
            1 => self.b,
            _ => self.c,
        }
    }

    fn channel_mut(&mut self, i: usize) -> &mut Option<f32> {
        match i {
            0 => &mut self.a,
            1 => &mut self.b,
            _ => &mut self.c,
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        let tmp = self.channel(i);
        *self.channel_mut(i) = self.channel(j);
        *self.channel_mut(j) = tmp;
    }
}

/// Current sense over an injected [`CurrentReader`].
///
/// Keeps a channel-to-phase permutation and per-channel gains so that
/// mis-wired or inverted shunt amplifiers can be fixed in software by
/// [`GenericCurrentSense::align_bldc`] instead of resoldering.
pub struct GenericCurrentSense<R: CurrentReader> {
    reader: R,
    driver_type: DriverType,
    /// `map[phase] = reader slot`, identity until alignment proves otherwise.
    map: [usize; 3],
    gains: [f32; 3],
    /// Skip the alignment probe, wiring is known good.
    pub skip_align: bool,
}

impl<R: CurrentReader> GenericCurrentSense<R> {
    pub fn new(reader: R, driver_type: DriverType) -> Self {
        Self {
            reader,
            driver_type,
            map: [0, 1, 2],
            gains: [1.0; 3],
            skip_align: false,
        }
    }

    /// Per-channel gain correction (amplifier mismatch, inverted shunts).
    pub fn set_gains(&mut self, a: f32, b: f32, c: f32) {
        self.gains = [a, b, c];
    }

    /// One sample of per-phase currents with mapping and gains applied.
    pub fn phase_currents(&mut self) -> PhaseCurrents {
        let raw = self.reader.read();
        let get = |phase: usize| raw[self.map[phase]].map(|v| v * self.gains[phase]);
        PhaseCurrents {
            a: get(0),
            b: get(1),
            c: get(2),
        }
    }

    /// Clarke transform. Handles the two-shunt case (one phase unmeasured,
    /// reconstructed from `ia + ib + ic = 0`) and removes the common-mode
    /// offset when all three phases are measured.
    pub fn ab_currents(&self, c: PhaseCurrents) -> AbCurrents {
        if self.driver_type == DriverType::Stepper {
            // Stepper phases are already orthogonal.
            return AbCurrents {
                alpha: c.a.unwrap_or(0.0),
                beta: c.b.unwrap_or(0.0),
            };
        }
        match (c.a, c.b, c.c) {
            (Some(a), Some(b), None) => AbCurrents {
                alpha: a,
                beta: _1_SQRT3 * a + _2_SQRT3 * b,
            },
            (None, Some(b), Some(cc)) => {
                let a = -cc - b;
                AbCurrents {
                    alpha: a,
                    beta: _1_SQRT3 * a + _2_SQRT3 * b,
                }
            }
            (Some(a), None, Some(cc)) => {
                let b = -a - cc;
                AbCurrents {
                    alpha: a,
                    beta: _1_SQRT3 * a + _2_SQRT3 * b,
                }
            }
            (Some(a), Some(b), Some(cc)) => {
                let mid = (a + b + cc) / 3.0;
                let a = a - mid;
                let b = b - mid;
                AbCurrents {
                    alpha: a,
                    beta: _1_SQRT3 * a + _2_SQRT3 * b,
                }
            }
            _ => AbCurrents::default(),
        }
    }

    /// Park transform to the rotating frame at `angle_el`.
    pub fn dq_currents(&self, ab: AbCurrents, angle_el: f32) -> DqCurrents {
        let (st, ct) = sincos(angle_el);
        DqCurrents {
            d: ab.alpha * ct + ab.beta * st,
            q: ab.beta * ct - ab.alpha * st,
        }
    }

    /// Averaged phase currents: exponential blend over `n` samples with a
    /// short settling delay between reads.
    fn read_average(&mut self, n: u32, clock: &dyn Clock) -> PhaseCurrents {
        let mut acc = self.phase_currents();
        for _ in 0..n {
            let c = self.phase_currents();
            let blend = |a: Option<f32>, x: Option<f32>| match (a, x) {
                (Some(a), Some(x)) => Some(a * 0.6 + x * 0.4),
                _ => None,
            };
            acc.a = blend(acc.a, c.a);
            acc.b = blend(acc.b, c.b);
            acc.c = blend(acc.c, c.c);
            clock.delay_ms(3);
        }
        acc
    }

    fn swap_channels(&mut self, i: usize, j: usize) {
        self.map.swap(i, j);
        self.gains.swap(i, j);
    }

    /// Dominant measured channel: `Some(phase)` when its magnitude exceeds
    /// every other measured channel by [`ALIGN_DOMINANCE`].
    fn dominant_channel(c: &PhaseCurrents) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        let mut second = 0.0f32;
        for i in 0..3 {
            if let Some(v) = c.channel(i) {
                let mag = v.abs();
                match best {
                    Some((_, bm)) if mag <= bm => second = second.max(mag),
                    _ => {
                        if let Some((_, bm)) = best {
                            second = second.max(bm);
                        }
                        best = Some((i, mag));
                    }
                }
            }
        }
        match best {
            Some((i, mag)) if second == 0.0 || mag >= ALIGN_DOMINANCE * second => Some(i),
            _ => None,
        }
    }

    /// Energize one phase with a slow voltage ramp, hold, and return the
    /// averaged currents. `ua`/`ub`/`uc` select the phase (0 or 1 weights).
    fn probe_phase_bldc(
        &mut self,
        driver: &mut dyn BldcDriver,
        weights: [f32; 3],
        voltage: f32,
        zero: f32,
        clock: &dyn Clock,
    ) -> PhaseCurrents {
        for i in 0..100 {
            let u = voltage / 100.0 * (i + 1) as f32;
            driver.set_pwm(
                zero + weights[0] * u,
                zero + weights[1] * u,
                zero + weights[2] * u,
            );
            clock.delay_ms(3);
        }
        clock.delay_ms(500);
        let c = self.read_average(100, clock);
        driver.set_pwm(zero, zero, zero);
        c
    }

    fn align_bldc_inner(
        &mut self,
        driver: &mut dyn BldcDriver,
        voltage: f32,
        modulation_centered: bool,
        clock: &dyn Clock,
    ) -> Result<AlignReport> {
        let mut report = AlignReport::default();
        // Centered modulation idles at half the rail, not at zero.
        let zero = if modulation_centered {
            driver.voltage_limit() / 2.0
        } else {
            0.0
        };

        // Phase A: expect +I on channel A, -I/2 on the return phases.
        let c_a = self.probe_phase_bldc(driver, [1.0, 0.0, 0.0], voltage, zero, clock);
        let floor = [c_a.a, c_a.b, c_a.c]
            .iter()
            .flatten()
            .fold(0.0f32, |m, v| m.max(v.abs()));
        if floor < ALIGN_DETECT_FLOOR {
            debug!("align: probe current {} below floor", floor);
            return Err(FocError::CurrentTooLow);
        }
        let mut c_a = c_a;
        match Self::dominant_channel(&c_a) {
            Some(0) => {}
            Some(i) => {
                info!("align: phase A current found on channel {}", i as u32);
                self.swap_channels(0, i);
                c_a.swap(0, i);
                report.pins_swapped = true;
            }
            None => {
                if c_a.a.is_some() && c_a.b.is_some() && c_a.c.is_some() {
                    return Err(FocError::AmbiguousCurrent);
                }
                // One channel unmeasured and no dominance: the unmeasured
                // channel is the energized phase. Move it to slot A.
                if c_a.a.is_some() {
                    let j = if c_a.b.is_none() { 1 } else { 2 };
                    self.swap_channels(0, j);
                    c_a.swap(0, j);
                    report.pins_swapped = true;
                }
            }
        }
        if let Some(a) = c_a.a {
            if a < 0.0 {
                info!("align: channel A gain inverted");
                self.gains[0] = -self.gains[0];
                report.gains_inverted = true;
            }
        }

        // Phase B: channel A is settled, expect +I on channel B.
        let mut c_b = self.probe_phase_bldc(driver, [0.0, 1.0, 0.0], voltage, zero, clock);
        match Self::dominant_channel(&c_b) {
            Some(1) => {}
            Some(2) => {
                info!("align: phase B current found on channel 2");
                self.swap_channels(1, 2);
                c_b.swap(1, 2);
                report.pins_swapped = true;
            }
            Some(_) => return Err(FocError::AmbiguousCurrent),
            None => {
                if c_b.b.is_some() && c_b.c.is_some() {
                    return Err(FocError::AmbiguousCurrent);
                }
                if c_b.b.is_none() && c_b.c.is_some() {
                    self.swap_channels(1, 2);
                    c_b.swap(1, 2);
                    report.pins_swapped = true;
                }
            }
        }
        if let Some(b) = c_b.b {
            if b < 0.0 {
                info!("align: channel B gain inverted");
                self.gains[1] = -self.gains[1];
                report.gains_inverted = true;
            }
        }
        // Phase C follows by elimination. During the B probe it carries
        // return current, so a positive reading means an inverted gain.
        if let Some(cc) = c_b.c {
            if cc > 0.0 {
                info!("align: channel C gain inverted");
                self.gains[2] = -self.gains[2];
                report.gains_inverted = true;
            }
        }

        Ok(report)
    }

    /// Two-phase variant for stepper drivers: both channels must be wired,
    /// the larger probe current identifies phase A.
    pub fn align_stepper(
        &mut self,
        driver: &mut dyn StepperDriver,
        voltage: f32,
        clock: &dyn Clock,
    ) -> Result<AlignReport> {
        let mut report = AlignReport::default();

        for i in 0..100 {
            driver.set_pwm(voltage / 100.0 * (i + 1) as f32, 0.0);
            clock.delay_ms(3);
        }
        clock.delay_ms(500);
        let mut c = self.read_average(100, clock);
        driver.set_pwm(0.0, 0.0);
        let (a, b) = match (c.a, c.b) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(FocError::CurrentSenseNotReady),
        };
        if a.abs() < ALIGN_DETECT_FLOOR && b.abs() < ALIGN_DETECT_FLOOR {
            return Err(FocError::CurrentTooLow);
        }
        if a.abs() < b.abs() {
            self.swap_channels(0, 1);
            c.swap(0, 1);
            report.pins_swapped = true;
        }
        if c.a.unwrap_or(0.0) < 0.0 {
            self.gains[0] = -self.gains[0];
            report.gains_inverted = true;
        }

        for i in 0..100 {
            driver.set_pwm(0.0, voltage / 100.0 * (i + 1) as f32);
            clock.delay_ms(3);
        }
        clock.delay_ms(500);
        let c = self.read_average(100, clock);
        driver.set_pwm(0.0, 0.0);
        let b = c.b.unwrap_or(0.0);
        if b.abs() < ALIGN_DETECT_FLOOR {
            return Err(FocError::CurrentTooLow);
        }
        if b < 0.0 {
            self.gains[1] = -self.gains[1];
            report.gains_inverted = true;
        }

        Ok(report)
    }
}

impl<R: CurrentReader> CurrentSense for GenericCurrentSense<R> {
    fn foc_currents(&mut self, angle_el: f32) -> DqCurrents {
        let c = self.phase_currents();
        let ab = self.ab_currents(c);
        self.dq_currents(ab, angle_el)
    }

    fn dc_current(&mut self, angle_el: Option<f32>) -> f32 {
        let c = self.phase_currents();
        let ab = self.ab_currents(c);
        let magnitude = sqrt_approx(ab.alpha * ab.alpha + ab.beta * ab.beta);
        match angle_el {
            // Sign from the q-axis projection.
            Some(th) => {
                let (st, ct) = sincos(th);
                if ab.beta * ct - ab.alpha * st < 0.0 {
                    -magnitude
                } else {
                    magnitude
                }
            }
            None => magnitude,
        }
    }

    fn align_bldc(
        &mut self,
        driver: &mut dyn BldcDriver,
        voltage: f32,
        modulation_centered: bool,
        clock: &dyn Clock,
    ) -> Result<AlignReport> {
        if self.skip_align {
            return Ok(AlignReport::default());
        }
        if self.driver_type != DriverType::Bldc {
            return Err(FocError::CurrentSenseNotReady);
        }
        // Limit the probe voltage the same way normal operation would.
        let voltage = voltage.min(driver.voltage_limit());
        self.align_bldc_inner(driver, voltage, modulation_centered, clock)
    }

    fn skip_align(&self) -> bool {
        self.skip_align
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math;
    use crate::time::mock::MockClock;
    use core::cell::RefCell;
    use core::f32::consts::TAU;
    use std::rc::Rc;

    fn cs_with(
        reader: impl FnMut() -> [Option<f32>; 3],
    ) -> GenericCurrentSense<impl CurrentReader> {
        GenericCurrentSense::new(reader, DriverType::Bldc)
    }

    #[test]
    fn clarke_three_phase_balanced() {
        let cs = cs_with(|| [None; 3]);
        // ia = cos(θ), ib/ic shifted by ±120°.
        let th = 0.7f32;
        let c = PhaseCurrents {
            a: Some(libm::cosf(th)),
            b: Some(libm::cosf(th - TAU / 3.0)),
            c: Some(libm::cosf(th + TAU / 3.0)),
        };
        let ab = cs.ab_currents(c);
        assert!((ab.alpha - libm::cosf(th)).abs() < 1e-4);
        assert!((ab.beta - libm::sinf(th)).abs() < 1e-4);
    }

    #[test]
    fn clarke_two_phase_matches_three_phase() {
        let cs = cs_with(|| [None; 3]);
        let th = 2.1f32;
        let full = PhaseCurrents {
            a: Some(libm::cosf(th)),
            b: Some(libm::cosf(th - TAU / 3.0)),
            c: Some(libm::cosf(th + TAU / 3.0)),
        };
        let two = PhaseCurrents { c: None, ..full };
        let ab3 = cs.ab_currents(full);
        let ab2 = cs.ab_currents(two);
        assert!((ab3.alpha - ab2.alpha).abs() < 1e-4);
        assert!((ab3.beta - ab2.beta).abs() < 1e-4);
    }

    #[test]
    fn park_aligns_q_axis() {
        let cs = cs_with(|| [None; 3]);
        // A current vector 90° ahead of the rotor is pure q.
        let th = 1.2f32;
        let ab = AbCurrents {
            alpha: -math::sin(th),
            beta: math::cos(th),
        };
        let dq = cs.dq_currents(ab, th);
        assert!(dq.d.abs() < 1e-3);
        assert!((dq.q - 1.0).abs() < 1e-3);
    }

    #[test]
    fn dc_current_sign_follows_q() {
        let th = 0.9f32;
        let mut cs = cs_with(move || {
            // Vector opposing the q axis.
            let alpha = 0.5 * math::sin(th);
            let beta = -0.5 * math::cos(th);
            [
                Some(alpha),
                Some(-0.5 * alpha + 0.866_025_4 * beta),
                Some(-0.5 * alpha - 0.866_025_4 * beta),
            ]
        });
        assert!(cs.dc_current(Some(th)) < 0.0);
        assert!(cs.dc_current(None) > 0.0);
    }

    struct MockDriver {
        /// Phase voltages last commanded, shared with the reader.
        pwm: Rc<RefCell<[f32; 3]>>,
    }

    impl BldcDriver for MockDriver {
        fn is_ready(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn set_pwm(&mut self, ua: f32, ub: f32, uc: f32) {
            *self.pwm.borrow_mut() = [ua, ub, uc];
        }
        fn set_phase_state(
            &mut self,
            _a: crate::driver::PhaseState,
            _b: crate::driver::PhaseState,
            _c: crate::driver::PhaseState,
        ) {
        }
        fn voltage_limit(&self) -> f32 {
            12.0
        }
        fn voltage_power_supply(&self) -> f32 {
            12.0
        }
    }

    /// Electrical model: the driven phase carries +u/R, the two return
    /// phases -u/2R. `wiring` permutes phase currents onto reader slots.
    fn model_reader(
        pwm: Rc<RefCell<[f32; 3]>>,
        wiring: [usize; 3],
        signs: [f32; 3],
    ) -> impl FnMut() -> [Option<f32>; 3] {
        move || {
            let u = *pwm.borrow();
            let mean = (u[0] + u[1] + u[2]) / 3.0;
            let phase_i = [u[0] - mean, u[1] - mean, u[2] - mean].map(|v| v / 4.0);
            let mut out = [None; 3];
            for slot in 0..3 {
                out[slot] = Some(signs[slot] * phase_i[wiring[slot]]);
            }
            out
        }
    }

    #[test]
    fn align_detects_swapped_pins() {
        let pwm = Rc::new(RefCell::new([0.0f32; 3]));
        // Slots read phases B, A, C: slot 0 and 1 are crossed.
        let reader = model_reader(pwm.clone(), [1, 0, 2], [1.0; 3]);
        let mut cs = GenericCurrentSense::new(reader, DriverType::Bldc);
        let mut driver = MockDriver { pwm };
        let clock = MockClock::new();
        let report = cs.align_bldc(&mut driver, 3.0, false, &clock).unwrap();
        assert!(report.pins_swapped);
        assert!(!report.gains_inverted);
        // After alignment, slot A must track phase A.
        driver.set_pwm(4.0, 0.0, 0.0);
        let c = cs.phase_currents();
        assert!(c.a.unwrap() > 0.0);
        assert!(c.a.unwrap() > c.b.unwrap().abs() * 1.4);
    }

    #[test]
    fn align_fixes_inverted_gain() {
        let pwm = Rc::new(RefCell::new([0.0f32; 3]));
        let reader = model_reader(pwm.clone(), [0, 1, 2], [-1.0, 1.0, 1.0]);
        let mut cs = GenericCurrentSense::new(reader, DriverType::Bldc);
        let mut driver = MockDriver { pwm };
        let clock = MockClock::new();
        let report = cs.align_bldc(&mut driver, 3.0, false, &clock).unwrap();
        assert!(!report.pins_swapped);
        assert!(report.gains_inverted);
        driver.set_pwm(4.0, 0.0, 0.0);
        assert!(cs.phase_currents().a.unwrap() > 0.0);
    }

    #[test]
    fn align_rejects_dead_sensor() {
        let pwm = Rc::new(RefCell::new([0.0f32; 3]));
        let mut cs = GenericCurrentSense::new(|| [Some(0.0); 3], DriverType::Bldc);
        let mut driver = MockDriver { pwm };
        let clock = MockClock::new();
        assert_eq!(
            cs.align_bldc(&mut driver, 3.0, false, &clock),
            Err(FocError::CurrentTooLow)
        );
    }

    #[test]
    fn stepper_clarke_is_a_passthrough() {
        let cs = GenericCurrentSense::new(|| [None; 3], DriverType::Stepper);
        let ab = cs.ab_currents(PhaseCurrents {
            a: Some(0.3),
            b: Some(-0.7),
            c: None,
        });
        assert_eq!(ab.alpha, 0.3);
        assert_eq!(ab.beta, -0.7);
    }

    struct MockStepperDriver {
        pwm: Rc<RefCell<[f32; 2]>>,
    }

    impl StepperDriver for MockStepperDriver {
        fn is_ready(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn set_pwm(&mut self, ua: f32, ub: f32) {
            *self.pwm.borrow_mut() = [ua, ub];
        }
        fn voltage_limit(&self) -> f32 {
            12.0
        }
        fn voltage_power_supply(&self) -> f32 {
            12.0
        }
    }

    /// Stepper phases are independent: each carries u/R. `wiring` permutes
    /// phase currents onto the two reader slots.
    fn stepper_model_reader(
        pwm: Rc<RefCell<[f32; 2]>>,
        wiring: [usize; 2],
        signs: [f32; 2],
    ) -> impl FnMut() -> [Option<f32>; 3] {
        move || {
            let u = *pwm.borrow();
            let phase_i = [u[0] / 4.0, u[1] / 4.0];
            [
                Some(signs[0] * phase_i[wiring[0]]),
                Some(signs[1] * phase_i[wiring[1]]),
                None,
            ]
        }
    }

    #[test]
    fn stepper_align_detects_swapped_pins() {
        let pwm = Rc::new(RefCell::new([0.0f32; 2]));
        // Slots read phases B, A: crossed wiring.
        let reader = stepper_model_reader(pwm.clone(), [1, 0], [1.0; 2]);
        let mut cs = GenericCurrentSense::new(reader, DriverType::Stepper);
        let mut driver = MockStepperDriver { pwm };
        let clock = MockClock::new();
        let report = cs.align_stepper(&mut driver, 3.0, &clock).unwrap();
        assert!(report.pins_swapped);
        assert!(!report.gains_inverted);
        // After alignment, slot A must track phase A.
        driver.set_pwm(4.0, 0.0);
        let c = cs.phase_currents();
        assert!(c.a.unwrap() > 0.0);
        assert_eq!(c.b.unwrap(), 0.0);
    }

    #[test]
    fn stepper_align_fixes_inverted_gain() {
        let pwm = Rc::new(RefCell::new([0.0f32; 2]));
        let reader = stepper_model_reader(pwm.clone(), [0, 1], [-1.0, 1.0]);
        let mut cs = GenericCurrentSense::new(reader, DriverType::Stepper);
        let mut driver = MockStepperDriver { pwm };
        let clock = MockClock::new();
        let report = cs.align_stepper(&mut driver, 3.0, &clock).unwrap();
        assert!(!report.pins_swapped);
        assert!(report.gains_inverted);
        driver.set_pwm(4.0, 0.0);
        assert!(cs.phase_currents().a.unwrap() > 0.0);
    }

    #[test]
    fn stepper_align_rejects_dead_sensor() {
        let pwm = Rc::new(RefCell::new([0.0f32; 2]));
        let mut cs =
            GenericCurrentSense::new(|| [Some(0.0), Some(0.0), None], DriverType::Stepper);
        let mut driver = MockStepperDriver { pwm };
        let clock = MockClock::new();
        assert_eq!(
            cs.align_stepper(&mut driver, 3.0, &clock),
            Err(FocError::CurrentTooLow)
        );
    }

    #[test]
    fn skip_align_is_a_no_op() {
        let pwm = Rc::new(RefCell::new([0.0f32; 3]));
        let mut cs = GenericCurrentSense::new(|| [Some(0.0); 3], DriverType::Bldc);
        cs.skip_align = true;
        let mut driver = MockDriver { pwm };
        let clock = MockClock::new();
        assert_eq!(
            cs.align_bldc(&mut driver, 3.0, false, &clock),
            Ok(AlignReport::default())
        );
    }
}
