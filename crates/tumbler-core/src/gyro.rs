//! Gyroscope integrator: noise-filtered z rotation accumulated into
//! discrete dial ticks from an L3GD20.

use crate::bus::{Bus, BusPort};
use crate::wakeup::{WakeFlags, WakeSource};

/// L3GD20, 7-bit bus address.
pub const GYRO_ADDR: u8 = 0x6A;

const REG_CTRL1: u8 = 0x20;
const REG_OUT_Z_L: u8 = 0x2C;

/// Power up, all axes; defaults; data-ready on INT2; 500 dps full scale.
const CONFIG_ON: [u8; 4] = [0b0000_1111, 0b0000_0000, 0b0000_1000, 0b0001_0000];
/// Back into power-down mode.
const CONFIG_OFF: [u8; 1] = [0b0000_0000];

/// Samples at or below this magnitude are sensor noise, not rotation.
const NOISE_FLOOR: u32 = 64;
/// One tick per 2^13 accumulated raw units.
const TICK_SHIFT: u32 = 13;
/// Accumulated angular displacement per tick.
pub const TICK_WEIGHT: i32 = 1 << TICK_SHIFT;

/// Exact fixed-point integrator.
///
/// Whole ticks move out of the accumulator, the sub-tick remainder stays:
/// `ticks * TICK_WEIGHT + accumulator` always equals the running sum of
/// accepted samples.
pub struct TickIntegrator {
    accum: i32,
    ticks: i32,
}

impl TickIntegrator {
    pub const fn new() -> Self {
        Self { accum: 0, ticks: 0 }
    }

    /// Accumulate one sample; samples inside the noise floor are dropped.
    pub fn feed(&mut self, sample: i16) {
        if (sample as i32).unsigned_abs() <= NOISE_FLOOR {
            return;
        }
        self.accum += sample as i32;
        self.extract();
    }

    fn extract(&mut self) {
        let whole = (self.accum.unsigned_abs() >> TICK_SHIFT) as i32;
        if whole == 0 {
            return;
        }
        // Only the consumed high-order bits leave the accumulator.
        let consumed = whole << TICK_SHIFT;
        if self.accum > 0 {
            self.ticks += whole;
            self.accum -= consumed;
        } else {
            self.ticks -= whole;
            self.accum += consumed;
        }
    }

    pub fn ticks(&self) -> i32 {
        self.ticks
    }

    pub fn reset_ticks(&mut self) {
        self.ticks = 0;
    }

    pub fn accumulator(&self) -> i32 {
        self.accum
    }

    pub fn reset_accumulator(&mut self) {
        self.accum = 0;
    }
}

impl Default for TickIntegrator {
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

/// The gyroscope processor. Main-loop-only state; all cross-context traffic
/// goes through the bus engine and the wakeup set.
pub struct Gyroscope {
    state: State,
    raw: i16,
    integrator: TickIntegrator,
    fault: Option<u8>,
}

impl Gyroscope {
    pub const fn new() -> Self {
        Self {
            state: State::Stopped,
            raw: 0,
            integrator: TickIntegrator::new(),
            fault: None,
        }
    }

    /// Power the device up. False while the bus is busy; call again on the
    /// next poll.
    pub fn start<P: BusPort>(&mut self, bus: &Bus, port: &mut P) -> bool {
        if self.state != State::Stopped {
            return false;
        }
        if !bus.request_write(port, GYRO_ADDR, REG_CTRL1, &CONFIG_ON) {
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
        if !bus.request_write(port, GYRO_ADDR, REG_CTRL1, &CONFIG_OFF) {
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
                if wake.is_set(WakeSource::GyroReady)
                    && bus.request_read(port, GYRO_ADDR, REG_OUT_Z_L, 2)
                {
                    wake.clear(WakeSource::GyroReady);
                    self.state = State::Reading;
                }
                false
            }
            State::Reading => match bus.take_completion() {
                Some(Ok(())) => {
                    let mut raw = [0u8; 2];
                    bus.read_into(&mut raw);
                    self.raw = i16::from_le_bytes(raw);
                    self.integrator.feed(self.raw);
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

    /// Last raw z angular-rate sample.
    pub fn z_raw(&self) -> i16 {
        self.raw
    }

    /// Accumulated whole dial ticks since the last reset.
    pub fn z_ticks(&self) -> i32 {
        self.integrator.ticks()
    }

    pub fn reset_z_ticks(&mut self) {
        self.integrator.reset_ticks();
    }

    /// Sub-tick remainder of the accumulator.
    pub fn accumulator(&self) -> i32 {
        self.integrator.accumulator()
    }

    pub fn reset_accumulator(&mut self) {
        self.integrator.reset_accumulator();
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

impl Default for Gyroscope {
    fn default() -> Self {
        Self::new()
    }
}
