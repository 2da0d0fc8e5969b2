//! Wakeup signal set: the hand-off point between interrupt handlers and the
//! sleeping main loop.

use core::sync::atomic::{AtomicU8, Ordering};

/// Event sources an interrupt handler may raise towards the main loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeSource {
    /// The bus transaction engine finished a transaction, ok or fault.
    BusComplete = 0,
    /// Accelerometer data-ready line fired.
    AccelReady = 1,
    /// Gyroscope data-ready line fired.
    GyroReady = 2,
    /// Periodic system tick.
    Tick = 3,
}

impl WakeSource {
    const fn mask(self) -> u8 {
        1 << self as u8
    }
}

/// Process-wide set of raised wakeup sources.
///
/// Interrupt handlers `signal` sources, the main loop `clear`s (or `take`s)
/// them. Both sides are single atomic read-modify-writes, so neither can
/// lose a concurrent update to a neighbouring bit.
pub struct WakeFlags(AtomicU8);

impl WakeFlags {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Raise `source`. Interrupt context.
    pub fn signal(&self, source: WakeSource) {
        self.0.fetch_or(source.mask(), Ordering::Release);
    }

    pub fn is_set(&self, source: WakeSource) -> bool {
        self.0.load(Ordering::Acquire) & source.mask() != 0
    }

    /// Drop `source`. Main-loop context.
    pub fn clear(&self, source: WakeSource) {
        self.0.fetch_and(!source.mask(), Ordering::Release);
    }

    /// Clear `source` and report whether it was set.
    pub fn take(&self, source: WakeSource) -> bool {
        self.0.fetch_and(!source.mask(), Ordering::AcqRel) & source.mask() != 0
    }

    /// True while any source is raised.
    pub fn any(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// Park the CPU until any source is raised.
    ///
    /// The emptiness check runs with interrupts masked, so a signal raised
    /// between the check and the wait instruction still ends the wait (WFI
    /// wakes on pended interrupts even while masked). Must not be called
    /// inside a critical section: interrupts are unconditionally re-enabled
    /// on the way out.
    pub fn sleep_until_signal(&self) {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        {
            cortex_m::interrupt::disable();
            if !self.any() {
                cortex_m::asm::wfi();
            }
            // Pended handlers run from here on and may raise more sources.
            unsafe { cortex_m::interrupt::enable() };
        }
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

impl Default for WakeFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_independent() {
        let flags = WakeFlags::new();
        flags.signal(WakeSource::AccelReady);
        flags.signal(WakeSource::Tick);

        assert!(flags.is_set(WakeSource::AccelReady));
        assert!(flags.is_set(WakeSource::Tick));
        assert!(!flags.is_set(WakeSource::GyroReady));

        flags.clear(WakeSource::AccelReady);
        assert!(!flags.is_set(WakeSource::AccelReady));
        assert!(flags.is_set(WakeSource::Tick));
    }

    #[test]
    fn take_reports_only_once() {
        let flags = WakeFlags::new();
        flags.signal(WakeSource::BusComplete);

        assert!(flags.take(WakeSource::BusComplete));
        assert!(!flags.take(WakeSource::BusComplete));
        assert!(!flags.is_set(WakeSource::BusComplete));
    }

    #[test]
    fn any_tracks_emptiness() {
        let flags = WakeFlags::new();
        assert!(!flags.any());

        flags.signal(WakeSource::GyroReady);
        assert!(flags.any());

        flags.clear(WakeSource::GyroReady);
        assert!(!flags.any());
    }
}
