//! Two-wire bus-master transaction engine.
//!
//! At most one transaction is in flight at any time. The platform's bus
//! interrupt advances it one protocol step per byte through
//! [`Bus::on_event`]; completion (ok or fault) is reported exactly once
//! through the wakeup signal set. The engine never retries; retry policy
//! belongs to the issuing sensor processor.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::wakeup::{WakeFlags, WakeSource};

/// Largest register block a single transaction may move.
pub const MAX_TRANSFER: usize = 8;

/// Iterations to wait for a previous STOP to leave the wire before a new
/// START is armed. Bounds the only spin in the crate: a wedged peripheral
/// makes `request_*` fail instead of hanging the loop.
pub const BUS_IDLE_SPIN_LIMIT: u32 = 10_000;

/// Register-address auto-increment flag, honoured by both sensors.
const REG_AUTO_INCREMENT: u8 = 0x80;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

/// One per-byte bus event, as classified by the platform port.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    StartSent,
    RepeatedStartSent,
    AddrWriteAcked,
    DataWriteAcked,
    AddrReadAcked,
    /// A data byte arrived and was answered with ACK.
    DataAcked,
    /// The final data byte arrived and was answered with NACK.
    DataNacked,
    /// Anything the port could not classify, with the raw status it saw.
    Fault(u8),
}

impl BusEvent {
    /// Canonical I2C master-mode status code for this event. Recorded when
    /// a protocol step observes the wrong event.
    pub fn code(self) -> u8 {
        match self {
            BusEvent::StartSent => 0x08,
            BusEvent::RepeatedStartSent => 0x10,
            BusEvent::AddrWriteAcked => 0x18,
            BusEvent::DataWriteAcked => 0x28,
            BusEvent::AddrReadAcked => 0x40,
            BusEvent::DataAcked => 0x50,
            BusEvent::DataNacked => 0x58,
            BusEvent::Fault(code) => code,
        }
    }
}

/// Physical bus layer, supplied by the platform (mocked on the host).
///
/// Every call releases the bus for its next step; the resulting event comes
/// back through the platform's bus interrupt.
pub trait BusPort {
    /// Generate a START condition.
    fn start(&mut self);
    /// Generate a repeated START without releasing the bus.
    fn restart(&mut self);
    /// Generate a STOP condition.
    fn stop(&mut self);
    /// Transmit one byte (address or data).
    fn write_byte(&mut self, byte: u8);
    /// Take the received byte out of the data register.
    fn read_byte(&mut self) -> u8;
    /// Request another data byte, to be answered with ACK.
    fn resume_ack(&mut self);
    /// Request the final data byte, to be answered with NACK.
    fn resume_nack(&mut self);
    /// True once the previous STOP has physically left the wire.
    fn bus_idle(&self) -> bool;
}

/// Engine status. `Ready` doubles as "idle" and "last transaction ok".
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwiStatus {
    Ready,
    Pending,
    /// Protocol violation, with the observed bus status code.
    Fault(u8),
}

/// Protocol position of the pending transaction. One variant per legal
/// step; an event that does not match the variant's expectation is a
/// protocol violation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
    /// START armed, address byte not yet sent.
    Start,
    /// Address + write bit sent.
    AddrWrite,
    /// Register address sent.
    Register,
    /// Write path: data byte `pos - 1` is on the wire.
    WriteData,
    /// Read path: repeated START armed.
    Restart,
    /// Address + read bit sent.
    AddrRead,
    /// Read path: receiving data bytes.
    ReadData,
}

/// Transaction state machine. Pure against [`BusPort`], so the protocol
/// table is unit-testable without hardware.
///
/// The engine owns the transfer buffer for the whole pending lifetime:
/// callers copy payloads in when arming and copy results out after the
/// completion signal, so nothing can observe bytes mid-transfer.
pub struct Engine {
    dir: Direction,
    addr: u8,
    reg: u8,
    buf: Vec<u8, MAX_TRANSFER>,
    len: usize,
    pos: usize,
    stage: Stage,
    status: TwiStatus,
}

impl Engine {
    pub const fn new() -> Self {
        Self {
            dir: Direction::Write,
            addr: 0,
            reg: 0,
            buf: Vec::new(),
            len: 0,
            pos: 0,
            stage: Stage::Start,
            status: TwiStatus::Ready,
        }
    }

    pub fn status(&self) -> TwiStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TwiStatus::Pending)
    }

    /// Arm a register write. Rejects while a transaction is pending and for
    /// payloads outside `1..=MAX_TRANSFER`. The caller still triggers START.
    pub fn arm_write(&mut self, addr: u8, reg: u8, data: &[u8]) -> bool {
        if self.is_pending() || data.is_empty() || data.len() > MAX_TRANSFER {
            return false;
        }
        self.dir = Direction::Write;
        self.addr = addr;
        self.reg = reg;
        self.buf.clear();
        // Length checked above.
        let _ = self.buf.extend_from_slice(data);
        self.len = data.len();
        self.pos = 0;
        self.stage = Stage::Start;
        self.status = TwiStatus::Pending;
        true
    }

    /// Arm a register read of `len` bytes. Same rejection rules as
    /// [`Engine::arm_write`].
    pub fn arm_read(&mut self, addr: u8, reg: u8, len: usize) -> bool {
        if self.is_pending() || len == 0 || len > MAX_TRANSFER {
            return false;
        }
        self.dir = Direction::Read;
        self.addr = addr;
        self.reg = reg;
        self.buf.clear();
        self.len = len;
        self.pos = 0;
        self.stage = Stage::Start;
        self.status = TwiStatus::Pending;
        true
    }

    /// Advance the pending transaction by one protocol step.
    ///
    /// Returns true when the transaction just completed, ok or fault.
    pub fn on_event<P: BusPort>(&mut self, port: &mut P, event: BusEvent) -> bool {
        if !self.is_pending() {
            // Stray event after completion; nothing to advance.
            return false;
        }
        match (self.stage, event) {
            (Stage::Start, BusEvent::StartSent) => {
                port.write_byte(self.addr << 1);
                self.stage = Stage::AddrWrite;
            }
            (Stage::AddrWrite, BusEvent::AddrWriteAcked) => {
                let auto_increment = if self.len > 1 { REG_AUTO_INCREMENT } else { 0 };
                port.write_byte(self.reg | auto_increment);
                self.stage = Stage::Register;
            }
            (Stage::Register, BusEvent::DataWriteAcked) => match self.dir {
                Direction::Write => {
                    port.write_byte(self.buf[self.pos]);
                    self.pos += 1;
                    self.stage = Stage::WriteData;
                }
                Direction::Read => {
                    port.restart();
                    self.stage = Stage::Restart;
                }
            },
            (Stage::WriteData, BusEvent::DataWriteAcked) => {
                if self.pos < self.len {
                    port.write_byte(self.buf[self.pos]);
                    self.pos += 1;
                } else {
                    port.stop();
                    self.status = TwiStatus::Ready;
                    return true;
                }
            }
            (Stage::Restart, BusEvent::RepeatedStartSent) => {
                port.write_byte(self.addr << 1 | 1);
                self.stage = Stage::AddrRead;
            }
            (Stage::AddrRead, BusEvent::AddrReadAcked) => {
                if self.len == 1 {
                    // Single-byte read: the only byte is also the last.
                    port.resume_nack();
                } else {
                    port.resume_ack();
                }
                self.stage = Stage::ReadData;
            }
            (Stage::ReadData, BusEvent::DataAcked) if self.buf.len() + 1 < self.len => {
                let byte = port.read_byte();
                let _ = self.buf.push(byte);
                if self.buf.len() + 1 < self.len {
                    port.resume_ack();
                } else {
                    port.resume_nack();
                }
            }
            (Stage::ReadData, BusEvent::DataNacked) if self.buf.len() + 1 == self.len => {
                let byte = port.read_byte();
                let _ = self.buf.push(byte);
                port.stop();
                self.status = TwiStatus::Ready;
                return true;
            }
            (_, observed) => {
                // Protocol violation: park with the offending code and
                // release the wire. The engine never retries.
                port.stop();
                self.status = TwiStatus::Fault(observed.code());
                return true;
            }
        }
        false
    }

    /// Copy a completed read's bytes into `dst`; returns the count. Yields
    /// nothing while a transaction is pending, since the engine still owns
    /// the buffer then.
    pub fn copy_result(&self, dst: &mut [u8]) -> usize {
        if self.is_pending() {
            return 0;
        }
        let n = self.buf.len().min(dst.len());
        dst[..n].copy_from_slice(&self.buf[..n]);
        n
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared engine handle: the bus interrupt advances it, the main loop arms
/// it and collects results. All cross-context access goes through one
/// critical-section mutex.
pub struct Bus {
    engine: Mutex<CriticalSectionRawMutex, RefCell<Engine>>,
    wake: &'static WakeFlags,
}

impl Bus {
    pub const fn new(wake: &'static WakeFlags) -> Self {
        Self {
            engine: Mutex::new(RefCell::new(Engine::new())),
            wake,
        }
    }

    /// Arm a register write and trigger START.
    ///
    /// False while a transaction is pending, while the previous completion
    /// has not been consumed yet, for oversize payloads, or when the wire
    /// does not go idle within [`BUS_IDLE_SPIN_LIMIT`]. The main loop is
    /// the only armer, so a non-pending engine cannot become pending
    /// between the check and the arm.
    pub fn request_write<P: BusPort>(&self, port: &mut P, addr: u8, reg: u8, data: &[u8]) -> bool {
        if !self.ready_to_arm(port) {
            return false;
        }
        if !self.engine.lock(|e| e.borrow_mut().arm_write(addr, reg, data)) {
            return false;
        }
        port.start();
        true
    }

    /// Arm a register read of `len` bytes and trigger START. Same rejection
    /// rules as [`Bus::request_write`].
    pub fn request_read<P: BusPort>(&self, port: &mut P, addr: u8, reg: u8, len: usize) -> bool {
        if !self.ready_to_arm(port) {
            return false;
        }
        if !self.engine.lock(|e| e.borrow_mut().arm_read(addr, reg, len)) {
            return false;
        }
        port.start();
        true
    }

    fn ready_to_arm<P: BusPort>(&self, port: &P) -> bool {
        if self.engine.lock(|e| e.borrow().is_pending()) {
            return false;
        }
        // An unconsumed completion still belongs to the previous issuer.
        // Arming now would let the next completion signal be taken by the
        // wrong processor and strand the other one.
        if self.wake.is_set(WakeSource::BusComplete) {
            return false;
        }
        wait_idle(port)
    }

    /// Advance the transaction from the bus interrupt. Raises
    /// [`WakeSource::BusComplete`] exactly once per completed transaction.
    pub fn on_event<P: BusPort>(&self, port: &mut P, event: BusEvent) {
        let done = self.engine.lock(|e| e.borrow_mut().on_event(port, event));
        if done {
            self.wake.signal(WakeSource::BusComplete);
        }
    }

    pub fn status(&self) -> TwiStatus {
        self.engine.lock(|e| e.borrow().status())
    }

    /// Consume a pending completion notification, if any: `Ok` for a clean
    /// finish, `Err` with the bus status code for a fault.
    pub fn take_completion(&self) -> Option<Result<(), u8>> {
        if !self.wake.take(WakeSource::BusComplete) {
            return None;
        }
        match self.status() {
            TwiStatus::Ready => Some(Ok(())),
            TwiStatus::Fault(code) => Some(Err(code)),
            // Completion was signalled, so the engine cannot still be
            // pending.
            TwiStatus::Pending => None,
        }
    }

    /// Copy a completed read's bytes into `dst`; 0 while pending.
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        self.engine.lock(|e| e.borrow().copy_result(dst))
    }
}

fn wait_idle<P: BusPort>(port: &P) -> bool {
    for _ in 0..BUS_IDLE_SPIN_LIMIT {
        if port.bus_idle() {
            return true;
        }
    }
    false
}
