//! Driver contracts: the narrow interface the control core needs from the
//! hardware PWM stage. Timer configuration, duty-register writes and pin
//! setup live entirely behind these traits.

/// Output-stage state of a single phase leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseState {
    /// Both sides of the half-bridge off (high impedance).
    Off,
    /// Phase driven by PWM.
    On,
}

/// Driver flavor, used by the current-sense pipeline to pick the transform
/// variant (two-phase steppers skip the Clarke transform).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverType {
    Bldc,
    Stepper,
}

/// Three-phase driver. Implementations clamp the requested phase voltages
/// to their own `voltage_limit` before converting to duty cycles; the core
/// keeps its commands within that limit but does not re-check per call.
pub trait BldcDriver {
    /// True once the hardware PWM stage is configured.
    fn is_ready(&self) -> bool;

    fn enable(&mut self);
    fn disable(&mut self);

    /// Set the three phase voltage targets, in volts.
    fn set_pwm(&mut self, ua: f32, ub: f32, uc: f32);

    /// Set per-phase output-stage states. Drivers without independent phase
    /// enables may ignore this (trapezoidal modulation degrades gracefully).
    fn set_phase_state(&mut self, a: PhaseState, b: PhaseState, c: PhaseState);

    /// Maximum phase voltage the driver will output.
    fn voltage_limit(&self) -> f32;

    /// DC bus voltage.
    fn voltage_power_supply(&self) -> f32;
}

/// Two-phase (stepper) driver.
pub trait StepperDriver {
    fn is_ready(&self) -> bool;

    fn enable(&mut self);
    fn disable(&mut self);

    /// Set the two phase voltage targets, in volts.
    fn set_pwm(&mut self, ua: f32, ub: f32);

    fn voltage_limit(&self) -> f32;

    fn voltage_power_supply(&self) -> f32;
}
