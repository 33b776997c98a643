//! Time source abstraction.
//!
//! The control core never talks to a hardware timer directly; it is handed a
//! [`Clock`] at construction. Implementations wrap whatever the platform
//! provides (DWT cycle counter, a 32 kHz tick timer, `std::time` on the
//! host). The counter must be monotonic and safe to read from both main and
//! interrupt context, which is why `now_us` takes `&self`.

/// Monotonic microsecond counter plus blocking delays.
///
/// The default delay implementations busy-wait on `now_us`. Platforms with a
/// proper delay primitive (WFI-based, timer queue) should override them.
/// Delays are only exercised by the calibration routines, never by the
/// steady-state control path.
pub trait Clock {
    /// Microseconds since some arbitrary epoch.
    fn now_us(&self) -> u64;

    fn delay_us(&self, us: u32) {
        let end = self.now_us() + us as u64;
        while self.now_us() < end {
            core::hint::spin_loop();
        }
    }

    fn delay_ms(&self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}
