//! Accelerometer processor: debounced horizon plus shake-pair recognition
//! on the z axis of a LIS302DL.

use crate::bus::{Bus, BusPort};
use crate::wakeup::{WakeFlags, WakeSource};

/// LIS302DL, 7-bit bus address.
pub const ACCEL_ADDR: u8 = 0x1C;

const REG_CTRL1: u8 = 0x20;
const REG_OUT_Z: u8 = 0x2D;

/// Power up, enable the z axis; defaults; data-ready on INT2, push-pull,
/// high-active.
const CONFIG_ON: [u8; 3] = [0b0100_0100, 0b0000_0000, 0b0010_0000];
/// Back into power-down mode.
const CONFIG_OFF: [u8; 1] = [0b0000_0000];

/// 1 g in raw counts at the ±2 g range (measured).
const ACCEL_1G: i16 = 55;
/// A new horizon commits once the agreeing run grows past this.
const HORIZON_DEBOUNCE: u8 = 5;
/// Peak threshold for excursions the known horizon agrees with: gravity
/// already contributes 1 g in that direction, so demand more.
const SHAKE_HIGH: i16 = 90;
/// Peak threshold against the known horizon, offset by gravity.
const SHAKE_LOW: i16 = SHAKE_HIGH - ACCEL_1G;
/// Samples (100 Hz data rate) within which the opposite peak of a pair has
/// to arrive.
const SHAKE_WINDOW: u8 = 10;

/// Coarse up/down orientation, the sign of gravity on the z axis.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Horizon {
    #[default]
    Unknown,
    Positive,
    Negative,
}

impl Horizon {
    fn of(z: i16) -> Self {
        if z >= 0 {
            Horizon::Positive
        } else {
            Horizon::Negative
        }
    }
}

/// Debounces the raw orientation sign.
///
/// The externally visible horizon flips only after a run of more than
/// [`HORIZON_DEBOUNCE`] consecutive samples agreeing on a new sign, so a
/// single shake excursion cannot flip the reported orientation.
pub struct HorizonTracker {
    known: Horizon,
    prev_raw: Horizon,
    run: u8,
}

impl HorizonTracker {
    pub const fn new() -> Self {
        Self {
            known: Horizon::Unknown,
            prev_raw: Horizon::Unknown,
            run: 0,
        }
    }

    pub fn horizon(&self) -> Horizon {
        self.known
    }

    /// Feed one raw z sample; returns the (possibly just committed) known
    /// horizon.
    pub fn update(&mut self, z: i16) -> Horizon {
        let raw = Horizon::of(z);
        if raw == self.known {
            self.run = 0;
        } else if raw == self.prev_raw {
            self.run += 1;
        } else {
            // First sample of a new candidate run.
            self.run = 1;
        }
        if self.run > HORIZON_DEBOUNCE {
            self.known = raw;
            self.run = 0;
        }
        self.prev_raw = raw;
        self.known
    }
}

impl Default for HorizonTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Peak {
    None,
    Positive,
    Negative,
}

/// Classify a raw sample against the horizon-relative threshold pair.
fn peak_of(z: i16, horizon: Horizon) -> Peak {
    let (pos_threshold, neg_threshold) = match horizon {
        Horizon::Positive => (SHAKE_HIGH, SHAKE_LOW),
        Horizon::Negative => (SHAKE_LOW, SHAKE_HIGH),
        Horizon::Unknown => (SHAKE_HIGH, SHAKE_HIGH),
    };
    if z >= pos_threshold {
        Peak::Positive
    } else if z <= -neg_threshold {
        Peak::Negative
    } else {
        Peak::None
    }
}

/// Pairs opposite-direction acceleration peaks into shake gestures.
///
/// A peak opens a countdown window; an opposite-sign peak inside the window
/// closes the pair and counts one shake. A window that runs out discards
/// its dangling peak without counting.
pub struct ShakeDetector {
    last_peak: Peak,
    window: u8,
    armed_horizon: Horizon,
    count: u8,
}

impl ShakeDetector {
    pub const fn new() -> Self {
        Self {
            last_peak: Peak::None,
            window: 0,
            armed_horizon: Horizon::Unknown,
            count: 0,
        }
    }

    /// Completed opposite-sign peak pairs since the last reset.
    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn reset_count(&mut self) {
        self.count = 0;
    }

    /// Feed one raw sample under the currently known horizon.
    pub fn update(&mut self, z: i16, horizon: Horizon) {
        if self.window > 0 && horizon != self.armed_horizon {
            // Orientation flipped mid-gesture; drop the half-done pair.
            self.disarm();
        }

        let peak = peak_of(z, horizon);

        match peak {
            Peak::None => {
                if self.window > 0 {
                    self.window -= 1;
                    if self.window == 0 {
                        // Dangling first peak timed out; counts nothing.
                        self.last_peak = Peak::None;
                    }
                }
            }
            _ if peak == self.last_peak => {
                // Still riding the same excursion; keep the window open.
                self.window = SHAKE_WINDOW;
            }
            _ => {
                if self.window > 0 {
                    // Opposite peak inside the window closes the pair.
                    self.count = self.count.saturating_add(1);
                    self.disarm();
                } else {
                    self.last_peak = peak;
                    self.armed_horizon = horizon;
                    self.window = SHAKE_WINDOW;
                }
            }
        }
    }

    fn disarm(&mut self) {
        self.window = 0;
        self.last_peak = Peak::None;
    }
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Sensor lifecycle / transaction state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Stopped,
    Starting,
    Idle,
    Reading,
    Stopping,
    /// Device bring-up failed; the sensor must not be sampled.
    Failed,
}

/// The accelerometer processor. Main-loop-only state; all cross-context
/// traffic goes through the bus engine and the wakeup set.
pub struct Accelerometer {
    state: State,
    z: i16,
    z_normal: i16,
    horizon: HorizonTracker,
    shake: ShakeDetector,
    fault: Option<u8>,
}

impl Accelerometer {
    pub const fn new() -> Self {
        Self {
            state: State::Stopped,
            z: 0,
            z_normal: 0,
            horizon: HorizonTracker::new(),
            shake: ShakeDetector::new(),
            fault: None,
        }
    }

    /// Power the device up. False while the bus is busy; call again on the
    /// next poll.
    pub fn start<P: BusPort>(&mut self, bus: &Bus, port: &mut P) -> bool {
        if self.state != State::Stopped {
            return false;
        }
        if !bus.request_write(port, ACCEL_ADDR, REG_CTRL1, &CONFIG_ON) {
            return false;
        }
        self.state = State::Starting;
        true
    }

    /// Power the device back down.
    pub fn stop<P: BusPort>(&mut self, bus: &Bus, port: &mut P) -> bool {
        if self.state != State::Idle {
            return false;
        }
        if !bus.request_write(port, ACCEL_ADDR, REG_CTRL1, &CONFIG_OFF) {
            return false;
        }
        self.state = State::Stopping;
        true
    }

    /// Drive the processor one step. Returns true when a new sample was
    /// consumed this poll.
    pub fn poll<P: BusPort>(&mut self, bus: &Bus, wake: &WakeFlags, port: &mut P) -> bool {
        match self.state {
            State::Stopped | State::Failed => false,
            State::Starting => {
                match bus.take_completion() {
                    Some(Ok(())) => self.state = State::Idle,
                    Some(Err(code)) => {
                        // An unconfigured sensor must not be sampled.
                        self.fault = Some(code);
                        self.state = State::Failed;
                    }
                    None => {}
                }
                false
            }
            State::Idle => {
                if wake.is_set(WakeSource::AccelReady)
                    && bus.request_read(port, ACCEL_ADDR, REG_OUT_Z, 1)
                {
                    wake.clear(WakeSource::AccelReady);
                    self.state = State::Reading;
                }
                false
            }
            State::Reading => match bus.take_completion() {
                Some(Ok(())) => {
                    let mut raw = [0u8; 1];
                    bus.read_into(&mut raw);
                    self.consume_sample(raw[0] as i8);
                    self.state = State::Idle;
                    true
                }
                Some(Err(code)) => {
                    // Transient sampling fault: report upward, try again on
                    // the next data-ready.
                    self.fault = Some(code);
                    self.state = State::Idle;
                    false
                }
                None => false,
            },
            State::Stopping => {
                match bus.take_completion() {
                    Some(Ok(())) => self.state = State::Stopped,
                    Some(Err(code)) => {
                        self.fault = Some(code);
                        self.state = State::Failed;
                    }
                    None => {}
                }
                false
            }
        }
    }

    fn consume_sample(&mut self, z: i8) {
        self.z = z as i16;
        let horizon = self.horizon.update(self.z);
        // Gravity-free view for diagnostics and the UI.
        self.z_normal = match horizon {
            Horizon::Positive => self.z - ACCEL_1G,
            Horizon::Negative => self.z + ACCEL_1G,
            Horizon::Unknown => self.z,
        };
        self.shake.update(self.z, horizon);
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon.horizon()
    }

    /// Last raw z sample.
    pub fn z(&self) -> i16 {
        self.z
    }

    /// Last z sample with the gravity component removed.
    pub fn z_normalised(&self) -> i16 {
        self.z_normal
    }

    /// Completed opposite-sign peak pairs since the last reset.
    pub fn shake_count(&self) -> u8 {
        self.shake.count()
    }

    pub fn reset_shake_count(&mut self) {
        self.shake.reset_count();
    }

    /// Last bus fault, reported once.
    pub fn take_fault(&mut self) -> Option<u8> {
        self.fault.take()
    }

    /// True after a fatal bring-up failure.
    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }
}

impl Default for Accelerometer {
    fn default() -> Self {
        Self::new()
    }
}
