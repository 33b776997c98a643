//! Three-phase BLDC motor control object.
//!
//! Owns the cascaded controllers and filters, borrows the hardware (driver,
//! sensor, current sense, clock) through trait references, and implements the
//! two iteration functions [`BldcMotor::loop_foc`] (inner, fast) and
//! [`BldcMotor::move_to`] (outer, optionally downsampled) plus the blocking
//! calibration sequences behind [`BldcMotor::init_foc`].

use crate::current_sense::CurrentSense;
use crate::driver::{BldcDriver, PhaseState};
use crate::lpf::LowPassFilter;
use crate::math::{self, normalize_angle, sincos, MIN_ANGLE_DETECT_MOVEMENT, _3PI_2};
use crate::motor::{Direction, Modulation, MotionControlType, MotorStatus, TorqueControlType};
use crate::pid::Pid;
use crate::sensor::Sensor;
use crate::time::Clock;
use crate::{defaults, DqCurrents, DqVoltages, FocError, Result};
use core::f32::consts::{FRAC_PI_6, TAU};

const SQRT_3: f32 = 1.732_050_8;
const SQRT_3_2: f32 = 0.866_025_4;
const RPM_TO_RADS: f32 = 0.104_719_755;

/// 60° commutation sectors; per phase: 1 = high, -1 = low, 0 = floating.
static TRAP_120: [[i8; 3]; 6] = [
    [0, 1, -1],
    [-1, 1, 0],
    [-1, 0, 1],
    [0, -1, 1],
    [1, -1, 0],
    [1, 0, -1],
];

/// 30° commutation sectors; rows with no zero drive all three legs.
static TRAP_150: [[i8; 3]; 12] = [
    [0, 1, -1],
    [-1, 1, -1],
    [-1, 1, 0],
    [-1, 1, 1],
    [-1, 0, 1],
    [-1, -1, 1],
    [0, -1, 1],
    [1, -1, 1],
    [1, -1, 0],
    [1, -1, -1],
    [1, 0, -1],
    [1, 1, -1],
];

fn leg_state(v: i8) -> PhaseState {
    if v == 0 {
        PhaseState::Off
    } else {
        PhaseState::On
    }
}

/// BLDC motor control object. All tuning surfaces (limits, PID gains, filter
/// time constants, mode selectors) are public fields, adjusted directly
/// before `init`/`init_foc` or at runtime between iterations.
pub struct BldcMotor<'a> {
    pole_pairs: u8,
    /// Phase resistance [Ω], enables current-from-voltage estimation.
    pub phase_resistance: Option<f32>,
    /// Motor KV rating [rpm/V], enables back-EMF estimation.
    pub kv_rating: Option<f32>,
    /// Phase inductance [H], enables d-axis lag compensation.
    pub phase_inductance: Option<f32>,

    driver: Option<&'a mut dyn BldcDriver>,
    sensor: Option<&'a mut dyn Sensor>,
    current_sense: Option<&'a mut dyn CurrentSense>,
    clock: &'a dyn Clock,

    pub controller: MotionControlType,
    pub torque_controller: TorqueControlType,
    pub foc_modulation: Modulation,
    /// Center phase voltages at half the driver limit instead of shifting
    /// the minimum phase to zero.
    pub modulation_centered: bool,

    pub voltage_limit: f32,
    pub current_limit: f32,
    pub velocity_limit: f32,
    /// Voltage used by the calibration probes; clamped to `voltage_limit`.
    pub voltage_sensor_align: f32,
    /// Velocity used by the index-search sweep [rad/s].
    pub velocity_index_search: f32,

    pub pid_velocity: Pid,
    pub p_angle: Pid,
    pub pid_current_q: Pid,
    pub pid_current_d: Pid,
    pub lpf_velocity: LowPassFilter,
    pub lpf_angle: LowPassFilter,
    pub lpf_current_q: LowPassFilter,
    pub lpf_current_d: LowPassFilter,

    /// Run the outer loop every `motion_downsample + 1` calls of `move_to`.
    pub motion_downsample: u32,
    motion_cnt: u32,
    /// Velocity feed-forward added to the position controller output.
    pub feed_forward_velocity: f32,
    /// User zero offset subtracted from the sensor angle [rad].
    pub sensor_offset: f32,

    pub sensor_direction: Direction,
    /// Electrical-angle offset captured during calibration; set it before
    /// `init_foc` to skip the zero-search.
    pub zero_electric_angle: Option<f32>,
    /// Pole-pair cross-check outcome from the direction sweep.
    pub pp_check_ok: Option<bool>,

    pub status: MotorStatus,
    pub enabled: bool,

    pub target: f32,
    pub shaft_angle: f32,
    pub shaft_velocity: f32,
    pub electrical_angle: f32,
    pub shaft_angle_sp: f32,
    pub shaft_velocity_sp: f32,
    pub current_sp: f32,
    pub voltage: DqVoltages,
    pub current: DqCurrents,
    pub voltage_bemf: f32,
    open_loop_timestamp: u64,
}

impl<'a> BldcMotor<'a> {
    pub fn new(pole_pairs: u8, clock: &'a dyn Clock) -> Self {
        Self {
            pole_pairs: pole_pairs.max(1),
            phase_resistance: None,
            kv_rating: None,
            phase_inductance: None,
            driver: None,
            sensor: None,
            current_sense: None,
            clock,
            controller: MotionControlType::Torque,
            torque_controller: TorqueControlType::Voltage,
            foc_modulation: Modulation::SinePwm,
            modulation_centered: true,
            voltage_limit: defaults::POWER_SUPPLY,
            current_limit: defaults::CURRENT_LIMIT,
            velocity_limit: defaults::VELOCITY_LIMIT,
            voltage_sensor_align: defaults::VOLTAGE_SENSOR_ALIGN,
            velocity_index_search: defaults::INDEX_SEARCH_VELOCITY,
            pid_velocity: Pid::new(
                defaults::PID_VEL_P,
                defaults::PID_VEL_I,
                defaults::PID_VEL_D,
                defaults::PID_VEL_RAMP,
                defaults::POWER_SUPPLY,
            ),
            p_angle: Pid::new(defaults::P_ANGLE_P, 0.0, 0.0, 1e10, defaults::VELOCITY_LIMIT),
            pid_current_q: Pid::new(
                defaults::PID_CURR_P,
                defaults::PID_CURR_I,
                defaults::PID_CURR_D,
                defaults::PID_CURR_RAMP,
                defaults::POWER_SUPPLY,
            ),
            pid_current_d: Pid::new(
                defaults::PID_CURR_P,
                defaults::PID_CURR_I,
                defaults::PID_CURR_D,
                defaults::PID_CURR_RAMP,
                defaults::POWER_SUPPLY,
            ),
            lpf_velocity: LowPassFilter::new(defaults::VEL_FILTER_TF),
            lpf_angle: LowPassFilter::new(0.0),
            lpf_current_q: LowPassFilter::new(defaults::CURR_FILTER_TF),
            lpf_current_d: LowPassFilter::new(defaults::CURR_FILTER_TF),
            motion_downsample: 0,
            motion_cnt: 0,
            feed_forward_velocity: 0.0,
            sensor_offset: 0.0,
            sensor_direction: Direction::Unknown,
            zero_electric_angle: None,
            pp_check_ok: None,
            status: MotorStatus::Uninitialized,
            enabled: false,
            target: 0.0,
            shaft_angle: 0.0,
            shaft_velocity: 0.0,
            electrical_angle: 0.0,
            shaft_angle_sp: 0.0,
            shaft_velocity_sp: 0.0,
            current_sp: 0.0,
            voltage: DqVoltages::default(),
            current: DqCurrents::default(),
            voltage_bemf: 0.0,
            open_loop_timestamp: 0,
        }
    }

    pub fn link_driver(&mut self, driver: &'a mut dyn BldcDriver) {
        self.driver = Some(driver);
    }

    pub fn link_sensor(&mut self, sensor: &'a mut dyn Sensor) {
        self.sensor = Some(sensor);
    }

    pub fn link_current_sense(&mut self, current_sense: &'a mut dyn CurrentSense) {
        self.current_sense = Some(current_sense);
    }

    pub fn pole_pairs(&self) -> u8 {
        self.pole_pairs
    }

    /// Sanity-check limits against the driver, pick cascaded-PID limits for
    /// the configured torque path, and enable the motor.
    pub fn init(&mut self) -> Result<()> {
        let driver_ready = match self.driver.as_deref() {
            Some(d) => d.is_ready(),
            None => false,
        };
        if !driver_ready {
            error!("motor: init failed, driver not ready");
            self.status = MotorStatus::InitFailed;
            return Err(FocError::DriverNotReady);
        }
        self.status = MotorStatus::Initializing;
        info!("motor: initializing");

        if let Some(d) = self.driver.as_deref() {
            if self.voltage_limit > d.voltage_limit() {
                self.voltage_limit = d.voltage_limit();
            }
        }
        if self.voltage_sensor_align > self.voltage_limit {
            self.voltage_sensor_align = self.voltage_limit;
        }

        if self.current_sense.is_some() {
            // Current loops command voltage.
            self.pid_current_q.limit = self.voltage_limit;
            self.pid_current_d.limit = self.voltage_limit;
        }
        if self.phase_resistance.is_some()
            || self.torque_controller != TorqueControlType::Voltage
        {
            // Velocity loop commands current.
            self.pid_velocity.limit = self.current_limit;
        } else {
            // Velocity loop commands voltage.
            self.pid_velocity.limit = self.voltage_limit;
        }
        self.p_angle.limit = self.velocity_limit;

        // Open-loop modes have no sensor to calibrate against.
        if self.controller.is_open_loop() && self.sensor_direction == Direction::Unknown {
            self.sensor_direction = Direction::Cw;
        }

        self.clock.delay_ms(500);
        self.enable();
        self.clock.delay_ms(500);
        self.status = MotorStatus::Uncalibrated;
        Ok(())
    }

    pub fn enable(&mut self) {
        if let Some(d) = self.driver.as_deref_mut() {
            d.enable();
            d.set_pwm(0.0, 0.0, 0.0);
        }
        if let Some(cs) = self.current_sense.as_deref_mut() {
            cs.enable();
        }
        self.pid_velocity.reset();
        self.p_angle.reset();
        self.pid_current_q.reset();
        self.pid_current_d.reset();
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        if let Some(cs) = self.current_sense.as_deref_mut() {
            cs.disable();
        }
        if let Some(d) = self.driver.as_deref_mut() {
            d.set_pwm(0.0, 0.0, 0.0);
            d.disable();
        }
        self.enabled = false;
    }

    /// Calibrate: sensor direction, zero electrical angle, index homing and
    /// current-sense alignment as applicable. Blocks for the duration of the
    /// probe sequences.
    pub fn init_foc(&mut self) -> Result<()> {
        self.status = MotorStatus::Calibrating;
        match self.init_foc_inner() {
            Ok(()) => {
                info!("motor: ready");
                self.status = MotorStatus::Ready;
                Ok(())
            }
            Err(e) => {
                error!("motor: calibration failed");
                self.status = MotorStatus::CalibFailed;
                self.disable();
                Err(e)
            }
        }
    }

    fn init_foc_inner(&mut self) -> Result<()> {
        if self.sensor.is_none() {
            if self.controller.is_open_loop() {
                info!("motor: no sensor, open loop only");
                return Ok(());
            }
            return Err(FocError::NoSensor);
        }

        self.align_sensor()?;
        self.sensor_update();
        self.shaft_angle = self.read_shaft_angle();

        if self.current_sense.is_some() {
            self.align_current_sense()?;
        }
        Ok(())
    }

    /// Inner FOC iteration: refresh the sensor, regulate current if a
    /// current-mode torque controller is selected, and command the
    /// modulation stage. Run as fast as the platform allows.
    pub fn loop_foc(&mut self) {
        // Update even in open-loop modes so rotation tracking survives a
        // later switch to closed loop.
        self.sensor_update();

        if self.controller.is_open_loop() {
            return;
        }
        if !self.enabled {
            return;
        }

        self.electrical_angle = self.read_electrical_angle();
        let now = self.clock.now_us();
        match self.torque_controller {
            TorqueControlType::Voltage => {}
            TorqueControlType::DcCurrent => {
                let angle = self.electrical_angle;
                let iq = match self.current_sense.as_deref_mut() {
                    Some(cs) => cs.dc_current(Some(angle)),
                    None => return,
                };
                self.current.q = self.lpf_current_q.update(iq, now);
                self.voltage.q = self
                    .pid_current_q
                    .update(self.current_sp - self.current.q, now);
                // d axis: inductive lag compensation only.
                self.voltage.d = match self.phase_inductance {
                    Some(l) => (-self.current_sp
                        * self.shaft_velocity
                        * self.pole_pairs as f32
                        * l)
                        .clamp(-self.voltage_limit, self.voltage_limit),
                    None => 0.0,
                };
            }
            TorqueControlType::FocCurrent => {
                let angle = self.electrical_angle;
                let dq = match self.current_sense.as_deref_mut() {
                    Some(cs) => cs.foc_currents(angle),
                    None => return,
                };
                self.current.q = self.lpf_current_q.update(dq.q, now);
                self.current.d = self.lpf_current_d.update(dq.d, now);
                self.voltage.q = self
                    .pid_current_q
                    .update(self.current_sp - self.current.q, now);
                self.voltage.d = self.pid_current_d.update(-self.current.d, now);
            }
        }

        self.set_phase_voltage(self.voltage.q, self.voltage.d, self.electrical_angle);
    }

    /// Outer iteration: dispatch on the motion-control mode and produce the
    /// current/voltage setpoints consumed by [`BldcMotor::loop_foc`].
    /// `None` keeps the previous target.
    pub fn move_to(&mut self, new_target: Option<f32>) {
        if let Some(t) = new_target {
            self.target = t;
        }

        let cnt = self.motion_cnt;
        self.motion_cnt += 1;
        if cnt < self.motion_downsample {
            return;
        }
        self.motion_cnt = 0;

        if !self.controller.is_open_loop() {
            self.shaft_angle = self.read_shaft_angle();
        }
        self.shaft_velocity = self.read_shaft_velocity();

        if !self.enabled {
            return;
        }

        if let Some(kv) = self.kv_rating {
            self.voltage_bemf = self.shaft_velocity / (kv * SQRT_3) / RPM_TO_RADS;
        }
        if self.current_sense.is_none() {
            if let Some(r) = self.phase_resistance {
                self.current.q = (self.voltage.q - self.voltage_bemf) / r;
            }
        }

        match self.controller {
            MotionControlType::Torque => {
                if self.torque_controller == TorqueControlType::Voltage {
                    self.voltage.q = match self.phase_resistance {
                        None => self.target,
                        Some(r) => self.target * r + self.voltage_bemf,
                    }
                    .clamp(-self.voltage_limit, self.voltage_limit);
                    self.voltage.d = self.d_axis_compensation(self.target);
                } else {
                    self.current_sp = self.target;
                }
            }
            MotionControlType::Angle => {
                self.shaft_angle_sp = self.target;
                let now = self.clock.now_us();
                let sp = self.feed_forward_velocity
                    + self
                        .p_angle
                        .update(self.shaft_angle_sp - self.shaft_angle, now);
                self.shaft_velocity_sp = sp.clamp(-self.velocity_limit, self.velocity_limit);
                self.current_sp = self
                    .pid_velocity
                    .update(self.shaft_velocity_sp - self.shaft_velocity, now);
                if self.torque_controller == TorqueControlType::Voltage {
                    self.voltage_torque_command();
                }
            }
            MotionControlType::Velocity => {
                self.shaft_velocity_sp = self.target;
                let now = self.clock.now_us();
                self.current_sp = self
                    .pid_velocity
                    .update(self.shaft_velocity_sp - self.shaft_velocity, now);
                if self.torque_controller == TorqueControlType::Voltage {
                    self.voltage_torque_command();
                }
            }
            MotionControlType::VelocityOpenloop => {
                self.shaft_velocity_sp = self.target;
                self.voltage.q = self.velocity_openloop(self.shaft_velocity_sp);
                self.voltage.d = 0.0;
            }
            MotionControlType::AngleOpenloop => {
                self.shaft_angle_sp = self.target;
                self.voltage.q = self.angle_openloop(self.shaft_angle_sp);
                self.voltage.d = 0.0;
            }
        }
    }

    /// Voltage-mode torque from the current setpoint: resistive and
    /// back-EMF compensation when the phase resistance is known.
    fn voltage_torque_command(&mut self) {
        self.voltage.q = match self.phase_resistance {
            None => self.current_sp,
            Some(r) => (self.current_sp * r + self.voltage_bemf)
                .clamp(-self.voltage_limit, self.voltage_limit),
        };
        self.voltage.d = self.d_axis_compensation(self.current_sp);
    }

    fn d_axis_compensation(&self, i_q: f32) -> f32 {
        match self.phase_inductance {
            None => 0.0,
            Some(l) => (-i_q * self.shaft_velocity * self.pole_pairs as f32 * l)
                .clamp(-self.voltage_limit, self.voltage_limit),
        }
    }

    /// Modulation stage: convert `(Uq, Ud, electrical angle)` into phase
    /// voltages and hand them to the driver.
    pub fn set_phase_voltage(&mut self, uq: f32, ud: f32, angle_el: f32) {
        let centered = self.modulation_centered;
        let Some(driver) = self.driver.as_deref_mut() else {
            return;
        };

        let (ua, ub, uc);
        match self.foc_modulation {
            Modulation::Trapezoid120 | Modulation::Trapezoid150 => {
                // +30° puts sector boundaries where the sine modes cross.
                let pos = normalize_angle(angle_el + FRAC_PI_6) / TAU;
                let row = if self.foc_modulation == Modulation::Trapezoid120 {
                    TRAP_120[((pos * 6.0) as usize).min(5)]
                } else {
                    TRAP_150[((pos * 12.0) as usize).min(11)]
                };
                // Uncentered trapezoid rides on Uq so all phases hit zero
                // when Uq does.
                let center = if centered {
                    driver.voltage_limit() / 2.0
                } else {
                    uq
                };
                let drive = |v: i8| if v == 0 { center } else { v as f32 * uq + center };
                ua = drive(row[0]);
                ub = drive(row[1]);
                uc = drive(row[2]);
                driver.set_phase_state(leg_state(row[0]), leg_state(row[1]), leg_state(row[2]));
            }
            Modulation::SinePwm | Modulation::SpaceVectorPwm => {
                // The table-based sincos expects [0, 2π); callers may hand
                // in unnormalized or negative angles.
                let (sa, ca) = sincos(normalize_angle(angle_el));
                // Inverse Park.
                let u_alpha = ca * ud - sa * uq;
                let u_beta = sa * ud + ca * uq;
                // Inverse Clarke.
                let mut a = u_alpha;
                let mut b = -0.5 * u_alpha + SQRT_3_2 * u_beta;
                let mut c = -0.5 * u_alpha - SQRT_3_2 * u_beta;

                let mut center = driver.voltage_limit() / 2.0;
                if self.foc_modulation == Modulation::SpaceVectorPwm {
                    // Midpoint clamp (zero-sequence injection).
                    let u_min = a.min(b).min(c);
                    let u_max = a.max(b).max(c);
                    center -= (u_max + u_min) / 2.0;
                }
                if centered {
                    a += center;
                    b += center;
                    c += center;
                } else {
                    let u_min = a.min(b).min(c);
                    a -= u_min;
                    b -= u_min;
                    c -= u_min;
                }
                ua = a;
                ub = b;
                uc = c;
            }
        }

        driver.set_pwm(ua, ub, uc);
    }

    /// Advance the analytic shaft angle at the target velocity and drive at
    /// the voltage (or current-equivalent) limit. Returns the commanded Uq.
    fn velocity_openloop(&mut self, target_velocity: f32) -> f32 {
        let now = self.clock.now_us();
        let mut ts = now.wrapping_sub(self.open_loop_timestamp) as f32 * 1e-6;
        if ts <= 0.0 || ts > 0.5 {
            ts = 1e-3;
        }

        self.shaft_angle = normalize_angle(self.shaft_angle + target_velocity * ts);
        self.shaft_velocity = target_velocity;

        let uq = self.open_loop_voltage();
        self.set_phase_voltage(uq, 0.0, math::electrical_angle(self.shaft_angle, self.pole_pairs));
        self.open_loop_timestamp = now;
        uq
    }

    /// Step the analytic shaft angle toward the target, rate-limited by
    /// `velocity_limit`. Returns the commanded Uq.
    fn angle_openloop(&mut self, target_angle: f32) -> f32 {
        let now = self.clock.now_us();
        let mut ts = now.wrapping_sub(self.open_loop_timestamp) as f32 * 1e-6;
        if ts <= 0.0 || ts > 0.5 {
            ts = 1e-3;
        }

        let max_step = (self.velocity_limit * ts).abs();
        let delta = target_angle - self.shaft_angle;
        if delta.abs() > max_step {
            self.shaft_angle += delta.signum() * max_step;
            self.shaft_velocity = self.velocity_limit;
        } else {
            self.shaft_angle = target_angle;
            self.shaft_velocity = 0.0;
        }

        let uq = self.open_loop_voltage();
        self.set_phase_voltage(
            uq,
            0.0,
            math::electrical_angle(normalize_angle(self.shaft_angle), self.pole_pairs),
        );
        self.open_loop_timestamp = now;
        uq
    }

    /// Open-loop drive voltage: the plain voltage limit, or a
    /// current-limited equivalent when the phase resistance is known.
    fn open_loop_voltage(&mut self) -> f32 {
        match self.phase_resistance {
            None => self.voltage_limit,
            Some(r) => {
                let uq = (self.current_limit * r + self.voltage_bemf.abs())
                    .clamp(-self.voltage_limit, self.voltage_limit);
                self.current.q = (uq - self.voltage_bemf.abs()) / r;
                uq
            }
        }
    }

    // Calibration sequences.

    /// Detect sensor direction with a forward/backward electrical sweep and
    /// capture the zero electrical angle, unless both are preconfigured.
    fn align_sensor(&mut self) -> Result<()> {
        info!("motor: aligning sensor");

        if self.sensor_needs_search() {
            self.absolute_zero_search()?;
        }

        let voltage_align = self.voltage_sensor_align;
        let clock = self.clock;

        if self.sensor_direction == Direction::Unknown {
            // Sweep one electrical revolution forward.
            for i in 0..=500 {
                let angle = _3PI_2 + TAU * i as f32 / 500.0;
                self.set_phase_voltage(voltage_align, 0.0, angle);
                self.sensor_update();
                clock.delay_ms(2);
            }
            self.sensor_update();
            let mid_angle = self.sensor_angle();
            // And back.
            for i in (0..=500).rev() {
                let angle = _3PI_2 + TAU * i as f32 / 500.0;
                self.set_phase_voltage(voltage_align, 0.0, angle);
                self.sensor_update();
                clock.delay_ms(2);
            }
            self.sensor_update();
            let end_angle = self.sensor_angle();
            clock.delay_ms(200);

            let moved = (mid_angle - end_angle).abs();
            if moved < MIN_ANGLE_DETECT_MOVEMENT {
                error!("motor: sensor did not move during alignment");
                return Err(FocError::NoMovement);
            }
            self.sensor_direction = if mid_angle < end_angle {
                info!("motor: sensor direction CCW");
                Direction::Ccw
            } else {
                info!("motor: sensor direction CW");
                Direction::Cw
            };

            // One electrical revolution should move 2π/pole_pairs.
            let ok = (moved * self.pole_pairs as f32 - TAU).abs() <= 0.5;
            self.pp_check_ok = Some(ok);
            if !ok {
                warning!(
                    "motor: pole pair mismatch, estimated {}",
                    TAU / moved
                );
            }
        } else {
            debug!("motor: skipping direction calibration");
        }

        if self.zero_electric_angle.is_none() {
            // Hold the rotor at electrical -90° and read the offset.
            self.set_phase_voltage(voltage_align, 0.0, _3PI_2);
            clock.delay_ms(700);
            self.sensor_update();
            self.zero_electric_angle = Some(0.0);
            let zea = self.read_electrical_angle();
            self.zero_electric_angle = Some(zea);
            info!("motor: zero electrical angle {}", zea);
            clock.delay_ms(20);
            self.set_phase_voltage(0.0, 0.0, 0.0);
            clock.delay_ms(200);
        } else {
            debug!("motor: skipping offset calibration");
        }
        Ok(())
    }

    /// Sweep up to one mechanical rotation open loop until the sensor
    /// reports its index found. Limits are lowered for the sweep and
    /// restored afterwards.
    fn absolute_zero_search(&mut self) -> Result<()> {
        info!("motor: index search");
        let limit_vel = self.velocity_limit;
        let limit_volt = self.voltage_limit;
        self.velocity_limit = self.velocity_index_search;
        self.voltage_limit = self.voltage_sensor_align;
        self.shaft_angle = 0.0;

        while self.sensor_needs_search() && self.shaft_angle < TAU {
            self.angle_openloop(1.5 * TAU);
            // Keeps count-based sensors from losing edges during the sweep.
            self.sensor_update();
        }
        self.set_phase_voltage(0.0, 0.0, 0.0);
        self.velocity_limit = limit_vel;
        self.voltage_limit = limit_volt;

        if self.sensor_needs_search() {
            error!("motor: index not found");
            Err(FocError::IndexNotFound)
        } else {
            Ok(())
        }
    }

    fn align_current_sense(&mut self) -> Result<()> {
        info!("motor: aligning current sense");
        let voltage = self.voltage_sensor_align;
        let centered = self.modulation_centered;
        let clock = self.clock;
        let (Some(cs), Some(driver)) =
            (self.current_sense.as_deref_mut(), self.driver.as_deref_mut())
        else {
            return Err(FocError::CurrentSenseNotReady);
        };
        let report = cs.align_bldc(driver, voltage, centered, clock)?;
        info!(
            "motor: current sense aligned, pins swapped {} gains inverted {}",
            report.pins_swapped, report.gains_inverted
        );
        Ok(())
    }

    // Sensor access helpers. All of them fall back to the previous state
    // when no sensor is linked (open-loop operation).

    fn sensor_update(&mut self) {
        let now = self.clock.now_us();
        if let Some(s) = self.sensor.as_deref_mut() {
            s.update(now);
        }
    }

    fn sensor_needs_search(&self) -> bool {
        match self.sensor.as_deref() {
            Some(s) => s.needs_search(),
            None => false,
        }
    }

    fn sensor_angle(&self) -> f32 {
        match self.sensor.as_deref() {
            Some(s) => s.angle(),
            None => 0.0,
        }
    }

    fn read_shaft_angle(&mut self) -> f32 {
        let now = self.clock.now_us();
        let dir = self.sensor_direction.as_f32();
        match self.sensor.as_deref() {
            None => self.shaft_angle,
            Some(s) => dir * self.lpf_angle.update(s.angle(), now) - self.sensor_offset,
        }
    }

    fn read_shaft_velocity(&mut self) -> f32 {
        let now = self.clock.now_us();
        let dir = self.sensor_direction.as_f32();
        match self.sensor.as_deref_mut() {
            None => self.shaft_velocity,
            Some(s) => {
                let v = s.velocity(now);
                dir * self.lpf_velocity.update(v, now)
            }
        }
    }

    fn read_electrical_angle(&mut self) -> f32 {
        let dir = self.sensor_direction.as_f32();
        match self.sensor.as_deref() {
            None => self.electrical_angle,
            Some(s) => normalize_angle(
                dir * self.pole_pairs as f32 * s.mechanical_angle()
                    - self.zero_electric_angle.unwrap_or(0.0),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::GenericSensor;
    use crate::time::mock::MockClock;
    use core::cell::RefCell;
    use std::rc::Rc;

    struct DriverLog {
        pwm: [f32; 3],
        states: [PhaseState; 3],
    }

    impl Default for DriverLog {
        fn default() -> Self {
            Self {
                pwm: [0.0; 3],
                states: [PhaseState::On; 3],
            }
        }
    }

    struct MockDriver {
        log: Rc<RefCell<DriverLog>>,
        limit: f32,
    }

    impl MockDriver {
        fn new(log: Rc<RefCell<DriverLog>>) -> Self {
            Self { log, limit: 12.0 }
        }
    }

    impl BldcDriver for MockDriver {
        fn is_ready(&self) -> bool {
            true
        }
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn set_pwm(&mut self, ua: f32, ub: f32, uc: f32) {
            self.log.borrow_mut().pwm = [ua, ub, uc];
        }
        fn set_phase_state(&mut self, a: PhaseState, b: PhaseState, c: PhaseState) {
            self.log.borrow_mut().states = [a, b, c];
        }
        fn voltage_limit(&self) -> f32 {
            self.limit
        }
        fn voltage_power_supply(&self) -> f32 {
            self.limit
        }
    }

    #[test]
    fn velocity_loop_converges_on_uniform_rotation() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log);
        // Kinematic mock: the shaft turns at exactly 10 rad/s.
        let mut sensor = GenericSensor::new(|| {
            Ok(normalize_angle(10.0 * clock.now_us() as f32 * 1e-6))
        });

        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);
        motor.link_sensor(&mut sensor);
        motor.controller = MotionControlType::Velocity;
        motor.sensor_direction = Direction::Cw;
        motor.zero_electric_angle = Some(0.0);
        motor.init().unwrap();
        motor.init_foc().unwrap();

        let mut uq_history = [0.0f32; 200];
        for i in 0..2000 {
            motor.loop_foc();
            motor.move_to(Some(10.0));
            uq_history[i % 200] = motor.voltage.q;
            clock.advance_us(1_000);
        }

        assert!(
            (motor.shaft_velocity - 10.0).abs() < 0.1,
            "shaft velocity {}",
            motor.shaft_velocity
        );
        // Commanded Uq has settled.
        let spread = uq_history.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        assert!(spread.1 - spread.0 < 0.05, "uq spread {:?}", spread);
    }

    #[test]
    fn align_detects_direction_from_sensor_trace() {
        // Trace: rises 0 -> 1.5 rad over the forward sweep, back to 0 on the
        // return sweep. Mid sample > end sample means CW.
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log);
        let mut sensor = GenericSensor::new(|| {
            let t = clock.now_us() as f32 * 1e-6;
            let angle = if t < 1.0 {
                1.5 * t
            } else if t < 2.0 {
                1.5 * (2.0 - t)
            } else {
                0.0
            };
            Ok(angle.max(0.0))
        });

        let mut motor = BldcMotor::new(4, &clock);
        motor.link_driver(&mut driver);
        motor.link_sensor(&mut sensor);
        motor.zero_electric_angle = Some(0.0);
        motor.init().unwrap();
        clock.set_us(0);
        motor.init_foc().unwrap();
        assert_eq!(motor.sensor_direction, Direction::Cw);
    }

    #[test]
    fn align_fails_without_movement() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log);
        let mut sensor = GenericSensor::new(|| Ok(1.0f32));

        let mut motor = BldcMotor::new(4, &clock);
        motor.link_driver(&mut driver);
        motor.link_sensor(&mut sensor);
        motor.init().unwrap();
        assert_eq!(motor.init_foc(), Err(FocError::NoMovement));
        assert_eq!(motor.status, MotorStatus::CalibFailed);
    }

    #[test]
    fn sine_modulation_centers_at_half_rail() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);

        motor.set_phase_voltage(2.0, 0.0, 1.0);
        let pwm = log.borrow().pwm;
        let mean = (pwm[0] + pwm[1] + pwm[2]) / 3.0;
        assert!((mean - 6.0).abs() < 1e-3, "mean {}", mean);

        // Uncentered mode shifts the minimum phase to zero instead.
        motor.modulation_centered = false;
        motor.set_phase_voltage(2.0, 0.0, 1.0);
        let pwm = log.borrow().pwm;
        let min = pwm[0].min(pwm[1]).min(pwm[2]);
        assert!(min.abs() < 1e-6, "min {}", min);
    }

    #[test]
    fn phase_voltage_accepts_unnormalized_angle() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);

        motor.set_phase_voltage(2.0, 0.0, -1.0);
        let neg = log.borrow().pwm;
        motor.set_phase_voltage(2.0, 0.0, TAU - 1.0);
        let folded = log.borrow().pwm;
        for i in 0..3 {
            assert!((neg[i] - folded[i]).abs() < 1e-4, "phase {}", i);
        }
        // Same for angles past one electrical revolution.
        motor.set_phase_voltage(2.0, 0.0, _3PI_2 + TAU);
        let large = log.borrow().pwm;
        motor.set_phase_voltage(2.0, 0.0, _3PI_2);
        let base = log.borrow().pwm;
        for i in 0..3 {
            assert!((large[i] - base[i]).abs() < 1e-4, "phase {}", i);
        }
    }

    #[test]
    fn space_vector_clamps_midpoint() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);
        motor.foc_modulation = Modulation::SpaceVectorPwm;

        motor.set_phase_voltage(3.0, 0.0, 0.4);
        let pwm = log.borrow().pwm;
        let min = pwm[0].min(pwm[1]).min(pwm[2]);
        let max = pwm[0].max(pwm[1]).max(pwm[2]);
        // Midpoint clamping symmetrizes the envelope around half rail.
        assert!(((max + min) / 2.0 - 6.0).abs() < 1e-3);
    }

    #[test]
    fn trapezoid_120_floats_one_leg() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);
        motor.foc_modulation = Modulation::Trapezoid120;
        motor.modulation_centered = false;

        // angle 0 + 30° offset lands in sector 0: phase A floating.
        motor.set_phase_voltage(1.0, 0.0, 0.0);
        let l = log.borrow();
        assert_eq!(l.states[0], PhaseState::Off);
        assert_eq!(l.states[1], PhaseState::On);
        assert_eq!(l.states[2], PhaseState::On);
        // Uncentered: center rides on Uq.
        assert!((l.pwm[0] - 1.0).abs() < 1e-6);
        assert!((l.pwm[1] - 2.0).abs() < 1e-6);
        assert!(l.pwm[2].abs() < 1e-6);
    }

    #[test]
    fn trapezoid_150_drives_all_legs_between_sectors() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);
        motor.foc_modulation = Modulation::Trapezoid150;
        motor.modulation_centered = false;

        // 15° electrical + the 30° offset lands in sector 1, which drives
        // all three phases.
        motor.set_phase_voltage(1.0, 0.0, FRAC_PI_6 / 2.0);
        let l = log.borrow();
        assert_eq!(l.states, [PhaseState::On, PhaseState::On, PhaseState::On]);
        assert!((l.pwm[0] - 0.0).abs() < 1e-6);
        assert!((l.pwm[1] - 2.0).abs() < 1e-6);
        assert!((l.pwm[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn open_loop_velocity_advances_angle() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log.clone());
        let mut motor = BldcMotor::new(7, &clock);
        motor.link_driver(&mut driver);
        motor.controller = MotionControlType::VelocityOpenloop;
        motor.init().unwrap();

        for _ in 0..100 {
            motor.move_to(Some(5.0));
            clock.advance_us(1_000);
        }
        assert_eq!(motor.shaft_velocity, 5.0);
        // Without phase resistance the drive runs at the voltage limit.
        assert_eq!(motor.voltage.q, motor.voltage_limit);
        // 100 steps of 1 ms at 5 rad/s.
        assert!((motor.shaft_angle - 0.5).abs() < 0.01);
    }

    struct IndexlessSensor;

    impl Sensor for IndexlessSensor {
        fn update(&mut self, _now_us: u64) {}
        fn mechanical_angle(&self) -> f32 {
            0.0
        }
        fn angle(&self) -> f32 {
            0.0
        }
        fn precise_angle(&self) -> f64 {
            0.0
        }
        fn full_rotations(&self) -> i32 {
            0
        }
        fn velocity(&mut self, _now_us: u64) -> f32 {
            0.0
        }
        fn needs_search(&self) -> bool {
            true
        }
        fn init(&mut self, _clock: &dyn Clock) {}
    }

    #[test]
    fn index_search_gives_up_after_one_rotation() {
        let clock = MockClock::new();
        let log = Rc::new(RefCell::new(DriverLog::default()));
        let mut driver = MockDriver::new(log);
        let mut sensor = IndexlessSensor;

        let mut motor = BldcMotor::new(4, &clock);
        motor.link_driver(&mut driver);
        motor.link_sensor(&mut sensor);
        motor.init().unwrap();
        assert_eq!(motor.init_foc(), Err(FocError::IndexNotFound));
        // Limits restored after the sweep.
        assert_eq!(motor.velocity_limit, defaults::VELOCITY_LIMIT);
    }
}
