//! Motor control core: cascaded control loop, calibration state machine and
//! the voltage modulation stage.

pub mod bldc;

pub use bldc::BldcMotor;

/// Outer-loop control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionControlType {
    /// Target is torque (voltage or current depending on the torque mode).
    Torque,
    /// Target is angular velocity [rad/s].
    Velocity,
    /// Target is shaft angle [rad].
    Angle,
    /// Analytic velocity ramp, no sensor feedback.
    VelocityOpenloop,
    /// Analytic angle ramp, no sensor feedback.
    AngleOpenloop,
}

impl MotionControlType {
    pub(crate) fn is_open_loop(self) -> bool {
        matches!(self, Self::VelocityOpenloop | Self::AngleOpenloop)
    }
}

/// How the torque target is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TorqueControlType {
    /// Open current loop: command voltage, optionally compensating
    /// resistance and back-EMF.
    Voltage,
    /// Regulate the scalar current magnitude.
    DcCurrent,
    /// Regulate d and q currents independently.
    FocCurrent,
}

/// Modulation scheme used by the phase-voltage stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    SinePwm,
    SpaceVectorPwm,
    Trapezoid120,
    Trapezoid150,
}

/// Sensor counting direction relative to positive drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Cw,
    Ccw,
    /// Not yet determined; `init_foc` calibration resolves it.
    Unknown,
}

impl Direction {
    pub(crate) fn as_f32(self) -> f32 {
        match self {
            Self::Cw => 1.0,
            Self::Ccw => -1.0,
            Self::Unknown => 0.0,
        }
    }
}

/// Lifecycle state of the motor control object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorStatus {
    Uninitialized,
    Initializing,
    Uncalibrated,
    Calibrating,
    Ready,
    Error,
    /// Calibration failed; `init_foc` may be retried.
    CalibFailed,
    /// Driver never became ready; not recoverable without re-`init`.
    InitFailed,
}
