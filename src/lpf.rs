//! First-order low-pass filter (exponential moving average).

/// Low-pass filter with time constant `tf` seconds.
///
/// `Y(n) = alpha * Y(n-1) + (1 - alpha) * X(n)` with `alpha = Tf/(Tf+dt)`.
/// A gap longer than 0.3 s (first call, stall) bypasses the filter and
/// re-seeds it with the raw input.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    /// Filter time constant in seconds.
    pub tf: f32,
    y_prev: f32,
    timestamp_prev: u64,
}

impl LowPassFilter {
    pub fn new(tf: f32) -> Self {
        Self {
            tf,
            y_prev: 0.0,
            timestamp_prev: 0,
        }
    }

    pub fn update(&mut self, x: f32, now_us: u64) -> f32 {
        let dt = (now_us.wrapping_sub(self.timestamp_prev)) as f32 * 1e-6;
        self.timestamp_prev = now_us;

        let dt = if dt < 0.0 {
            1e-3
        } else if dt > 0.3 {
            self.y_prev = x;
            return x;
        } else {
            dt
        };

        let alpha = self.tf / (self.tf + dt);
        let y = alpha * self.y_prev + (1.0 - alpha) * x;
        self.y_prev = y;
        y
    }

    /// Re-seed the filter output, forgetting history.
    pub fn reset(&mut self, value: f32) {
        self.y_prev = value;
    }
}
