//! Field-oriented control engine for BLDC and stepper motors.
//!
//! The crate implements the control-and-calibration core of an FOC drive:
//! Clarke/Park transforms, the cascaded angle/velocity/current loop, the
//! modulation stage (sinusoidal, space-vector, trapezoidal), generic
//! PID/low-pass primitives, sensor and current-sense abstractions, and the
//! runtime calibration sequences (direction detection, zero-electrical-angle
//! capture, index homing, current-sense alignment).
//!
//! Hardware stays outside: PWM drivers, angle sources, current readers and
//! the clock are injected through the traits in [`driver`], [`sensor`],
//! [`current_sense`] and [`time`]. The crate is `no_std` and single
//! threaded; the only interrupt-shared state (encoder/hall edge counters)
//! is snapshotted under `critical-section`.

#![cfg_attr(not(test), no_std)]

// This mod must go first so the log macros are visible everywhere.
#[macro_use]
mod fmt;

pub mod current_sense;
pub mod driver;
pub mod lpf;
pub mod math;
pub mod motor;
pub mod pid;
pub mod sensor;
pub mod time;

pub use current_sense::{AlignReport, CurrentReader, CurrentSense, GenericCurrentSense};
pub use driver::{BldcDriver, DriverType, PhaseState, StepperDriver};
pub use lpf::LowPassFilter;
pub use motor::bldc::BldcMotor;
pub use motor::{Direction, Modulation, MotionControlType, MotorStatus, TorqueControlType};
pub use pid::Pid;
pub use sensor::{Encoder, GenericSensor, HallSensor, RawAngleSource, Sensor};
pub use time::Clock;

/// Engine error type. Calibration failures are recoverable (retry
/// `init_foc`); `DriverNotReady` from `init` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FocError {
    /// No driver linked, or the driver never reported ready.
    DriverNotReady,
    /// Closed-loop control requested without a linked position sensor.
    NoSensor,
    /// Transient sensor read failure.
    SensorRead,
    /// Rotor did not move during sensor alignment.
    NoMovement,
    /// Index sweep completed a full rotation without finding the index.
    IndexNotFound,
    /// Alignment probe current below the detection floor.
    CurrentTooLow,
    /// No current channel dominates although all are wired.
    AmbiguousCurrent,
    /// Current sense linked but not operational.
    CurrentSenseNotReady,
}

pub type Result<T> = core::result::Result<T, FocError>;

/// Two-axis stationary (alpha-beta) frame current.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AbCurrents {
    pub alpha: f32,
    pub beta: f32,
}

/// Rotating-frame (d-q) current.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DqCurrents {
    pub d: f32,
    pub q: f32,
}

/// Rotating-frame (d-q) voltage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DqVoltages {
    pub d: f32,
    pub q: f32,
}

/// Instantaneous per-phase currents in amperes. `None` marks a phase whose
/// shunt is not wired (two-shunt topologies).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: Option<f32>,
    pub b: Option<f32>,
    pub c: Option<f32>,
}

// Default tuning. All of these are starting points; real hardware gets
// retuned through the public fields.
pub mod defaults {
    /// Default supply voltage [V].
    pub const POWER_SUPPLY: f32 = 12.0;
    /// Default current limit [A].
    pub const CURRENT_LIMIT: f32 = 2.0;
    /// Default velocity limit [rad/s].
    pub const VELOCITY_LIMIT: f32 = 20.0;
    /// Sensor/motor alignment voltage [V].
    pub const VOLTAGE_SENSOR_ALIGN: f32 = 3.0;
    /// Index-search target velocity [rad/s].
    pub const INDEX_SEARCH_VELOCITY: f32 = 1.0;

    pub const PID_VEL_P: f32 = 0.5;
    pub const PID_VEL_I: f32 = 10.0;
    pub const PID_VEL_D: f32 = 0.0;
    pub const PID_VEL_RAMP: f32 = 1000.0;

    pub const PID_CURR_P: f32 = 3.0;
    pub const PID_CURR_I: f32 = 300.0;
    pub const PID_CURR_D: f32 = 0.0;
    pub const PID_CURR_RAMP: f32 = 0.0;

    pub const P_ANGLE_P: f32 = 20.0;

    /// Current low-pass filter time constant [s].
    pub const CURR_FILTER_TF: f32 = 0.005;
    /// Velocity low-pass filter time constant [s].
    pub const VEL_FILTER_TF: f32 = 0.005;
}
