//! Discrete PID controller with anti-windup and slew limiting.

/// PID controller operating on an error signal.
///
/// Timestamps are injected by the caller (microseconds from the [`Clock`]
/// the motor owns), keeping the controller deterministic under test. Gains
/// and limits are public and may be retuned at runtime.
///
/// [`Clock`]: crate::time::Clock
#[derive(Debug, Clone)]
pub struct Pid {
    /// Proportional gain.
    pub p: f32,
    /// Integral gain.
    pub i: f32,
    /// Derivative gain.
    pub d: f32,
    /// Maximum output rate of change per second; 0 disables slew limiting.
    pub output_ramp: f32,
    /// Symmetric magnitude limit applied to the integral term and the output.
    pub limit: f32,
    error_prev: f32,
    output_prev: f32,
    integral_prev: f32,
    timestamp_prev: u64,
}

impl Pid {
    pub fn new(p: f32, i: f32, d: f32, output_ramp: f32, limit: f32) -> Self {
        Self {
            p,
            i,
            d,
            output_ramp,
            limit,
            error_prev: 0.0,
            output_prev: 0.0,
            integral_prev: 0.0,
            timestamp_prev: 0,
        }
    }

    /// One controller step: bounded, rate-limited output for `error`.
    pub fn update(&mut self, error: f32, now_us: u64) -> f32 {
        let mut ts = (now_us.wrapping_sub(self.timestamp_prev)) as f32 * 1e-6;
        // First call or counter glitch: substitute a nominal timestep.
        if ts <= 0.0 || ts > 0.5 {
            ts = 1e-3;
        }

        // u(s) = (P + I/s + Ds) e(s), discretized.
        let proportional = self.p * error;
        // Tustin transform of the integral part, clamped for anti-windup.
        let integral = (self.integral_prev + self.i * ts * 0.5 * (error + self.error_prev))
            .clamp(-self.limit, self.limit);
        let derivative = self.d * (error - self.error_prev) / ts;

        let mut output = (proportional + integral + derivative).clamp(-self.limit, self.limit);

        if self.output_ramp > 0.0 {
            let output_rate = (output - self.output_prev) / ts;
            if output_rate > self.output_ramp {
                output = self.output_prev + self.output_ramp * ts;
            } else if output_rate < -self.output_ramp {
                output = self.output_prev - self.output_ramp * ts;
            }
        }

        self.integral_prev = integral;
        self.output_prev = output;
        self.error_prev = error;
        self.timestamp_prev = now_us;
        output
    }

    /// Clear accumulated error, integral and output. The timestamp is kept;
    /// the next update after a long gap falls back to the nominal timestep
    /// anyway.
    pub fn reset(&mut self) {
        self.integral_prev = 0.0;
        self.output_prev = 0.0;
        self.error_prev = 0.0;
    }
}
