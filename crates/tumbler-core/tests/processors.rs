//! End-to-end flows of the sensor processors over a scripted bus port:
//! request from the main-loop side, event delivery as the bus interrupt
//! would, completion hand-off through the wakeup set.

use std::collections::VecDeque;

use tumbler_core::accel::{Accelerometer, Horizon, ACCEL_ADDR};
use tumbler_core::bus::{Bus, BusEvent, BusPort, TwiStatus};
use tumbler_core::gyro::{Gyroscope, GYRO_ADDR};
use tumbler_core::wakeup::{WakeFlags, WakeSource};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Op {
    Start,
    Restart,
    Stop,
    Write(u8),
    ResumeAck,
    ResumeNack,
}

#[derive(Default)]
struct ScriptPort {
    ops: Vec<Op>,
    rx: VecDeque<u8>,
}

impl ScriptPort {
    fn supply(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }
}

impl BusPort for ScriptPort {
    fn start(&mut self) {
        self.ops.push(Op::Start);
    }
    fn restart(&mut self) {
        self.ops.push(Op::Restart);
    }
    fn stop(&mut self) {
        self.ops.push(Op::Stop);
    }
    fn write_byte(&mut self, byte: u8) {
        self.ops.push(Op::Write(byte));
    }
    fn read_byte(&mut self) -> u8 {
        self.rx.pop_front().expect("read past supplied bytes")
    }
    fn resume_ack(&mut self) {
        self.ops.push(Op::ResumeAck);
    }
    fn resume_nack(&mut self) {
        self.ops.push(Op::ResumeNack);
    }
    fn bus_idle(&self) -> bool {
        true
    }
}

/// Deliver the happy-path event sequence of a register write of `len`
/// bytes, as the bus interrupt would.
fn complete_write(bus: &Bus, port: &mut ScriptPort, len: usize) {
    bus.on_event(port, BusEvent::StartSent);
    bus.on_event(port, BusEvent::AddrWriteAcked);
    for _ in 0..len + 1 {
        bus.on_event(port, BusEvent::DataWriteAcked);
    }
}

/// Deliver the happy-path event sequence of a register read of `len` bytes.
fn complete_read(bus: &Bus, port: &mut ScriptPort, len: usize) {
    bus.on_event(port, BusEvent::StartSent);
    bus.on_event(port, BusEvent::AddrWriteAcked);
    bus.on_event(port, BusEvent::DataWriteAcked);
    bus.on_event(port, BusEvent::RepeatedStartSent);
    bus.on_event(port, BusEvent::AddrReadAcked);
    for _ in 0..len - 1 {
        bus.on_event(port, BusEvent::DataAcked);
    }
    bus.on_event(port, BusEvent::DataNacked);
}

/// One accelerometer sample round-trip: data-ready, read request, sample
/// delivery, consumption.
fn accel_sample(accel: &mut Accelerometer, bus: &Bus, wake: &WakeFlags, port: &mut ScriptPort, z: i8) -> bool {
    wake.signal(WakeSource::AccelReady);
    assert!(!accel.poll(bus, wake, port));
    port.supply(&[z as u8]);
    complete_read(bus, port, 1);
    accel.poll(bus, wake, port)
}

#[test]
fn accelerometer_full_cycle() {
    static WAKE: WakeFlags = WakeFlags::new();
    static BUS: Bus = Bus::new(&WAKE);
    let mut port = ScriptPort::default();
    let mut accel = Accelerometer::new();

    // Bring-up writes the three control registers in one transaction.
    assert!(accel.start(&BUS, &mut port));
    assert!(!accel.start(&BUS, &mut port));
    assert_eq!(port.ops.as_slice(), [Op::Start]);

    complete_write(&BUS, &mut port, 3);
    assert_eq!(port.ops[1], Op::Write(ACCEL_ADDR << 1));
    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert!(!WAKE.is_set(WakeSource::BusComplete));

    // Without a data-ready signal the processor issues nothing.
    let ops_before = port.ops.len();
    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert_eq!(port.ops.len(), ops_before);

    // Six positive samples commit the horizon.
    for _ in 0..5 {
        assert!(accel_sample(&mut accel, &BUS, &WAKE, &mut port, 55));
        assert_eq!(accel.horizon(), Horizon::Unknown);
    }
    assert!(accel_sample(&mut accel, &BUS, &WAKE, &mut port, 55));
    assert_eq!(accel.horizon(), Horizon::Positive);
    assert_eq!(accel.z(), 55);
    assert_eq!(accel.z_normalised(), 0);

    // A shake pair on top of the known horizon.
    assert!(accel_sample(&mut accel, &BUS, &WAKE, &mut port, 127));
    assert!(accel_sample(&mut accel, &BUS, &WAKE, &mut port, -60));
    assert_eq!(accel.shake_count(), 1);
    accel.reset_shake_count();
    assert_eq!(accel.shake_count(), 0);

    // Power back down.
    assert!(accel.stop(&BUS, &mut port));
    complete_write(&BUS, &mut port, 1);
    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert!(!accel.is_failed());
}

#[test]
fn accelerometer_bringup_fault_is_fatal() {
    static WAKE: WakeFlags = WakeFlags::new();
    static BUS: Bus = Bus::new(&WAKE);
    let mut port = ScriptPort::default();
    let mut accel = Accelerometer::new();

    assert!(accel.start(&BUS, &mut port));
    // Address NACK during configuration.
    BUS.on_event(&mut port, BusEvent::StartSent);
    BUS.on_event(&mut port, BusEvent::Fault(0x20));

    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert!(accel.is_failed());
    assert_eq!(accel.take_fault(), Some(0x20));
    assert_eq!(accel.take_fault(), None);

    // A failed sensor never talks to the bus again.
    WAKE.signal(WakeSource::AccelReady);
    let ops_before = port.ops.len();
    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert_eq!(port.ops.len(), ops_before);
}

#[test]
fn sampling_fault_reports_and_self_heals() {
    static WAKE: WakeFlags = WakeFlags::new();
    static BUS: Bus = Bus::new(&WAKE);
    let mut port = ScriptPort::default();
    let mut accel = Accelerometer::new();

    assert!(accel.start(&BUS, &mut port));
    complete_write(&BUS, &mut port, 3);
    accel.poll(&BUS, &WAKE, &mut port);

    // The read transaction dies with a data NACK from the device.
    WAKE.signal(WakeSource::AccelReady);
    accel.poll(&BUS, &WAKE, &mut port);
    BUS.on_event(&mut port, BusEvent::StartSent);
    BUS.on_event(&mut port, BusEvent::Fault(0x30));

    assert!(!accel.poll(&BUS, &WAKE, &mut port));
    assert_eq!(accel.take_fault(), Some(0x30));
    assert!(!accel.is_failed());

    // Next data-ready samples normally again.
    assert!(accel_sample(&mut accel, &BUS, &WAKE, &mut port, 40));
    assert_eq!(accel.z(), 40);
}

#[test]
fn gyroscope_reads_two_bytes_and_integrates() {
    static WAKE: WakeFlags = WakeFlags::new();
    static BUS: Bus = Bus::new(&WAKE);
    let mut port = ScriptPort::default();
    let mut gyro = Gyroscope::new();

    assert!(gyro.start(&BUS, &mut port));
    complete_write(&BUS, &mut port, 4);
    assert_eq!(port.ops[1], Op::Write(GYRO_ADDR << 1));
    assert!(!gyro.poll(&BUS, &WAKE, &mut port));

    // 0x0400 = 1024: over the noise floor, under a tick.
    WAKE.signal(WakeSource::GyroReady);
    assert!(!gyro.poll(&BUS, &WAKE, &mut port));
    port.supply(&[0x00, 0x04]);
    complete_read(&BUS, &mut port, 2);
    assert!(gyro.poll(&BUS, &WAKE, &mut port));

    assert_eq!(gyro.z_raw(), 1024);
    assert_eq!(gyro.z_ticks(), 0);
    assert_eq!(gyro.accumulator(), 1024);

    // Seven more of the same and a tick falls out.
    for _ in 0..7 {
        WAKE.signal(WakeSource::GyroReady);
        gyro.poll(&BUS, &WAKE, &mut port);
        port.supply(&[0x00, 0x04]);
        complete_read(&BUS, &mut port, 2);
        assert!(gyro.poll(&BUS, &WAKE, &mut port));
    }
    assert_eq!(gyro.z_ticks(), 1);
    assert_eq!(gyro.accumulator(), 0);

    gyro.reset_z_ticks();
    assert_eq!(gyro.z_ticks(), 0);
}

#[test]
fn processors_never_overlap_on_the_bus() {
    static WAKE: WakeFlags = WakeFlags::new();
    static BUS: Bus = Bus::new(&WAKE);
    let mut port = ScriptPort::default();
    let mut accel = Accelerometer::new();
    let mut gyro = Gyroscope::new();

    assert!(accel.start(&BUS, &mut port));
    // The gyroscope cannot start while the accelerometer's configuration
    // write is on the wire.
    assert!(!gyro.start(&BUS, &mut port));

    complete_write(&BUS, &mut port, 3);
    accel.poll(&BUS, &WAKE, &mut port);
    assert!(gyro.start(&BUS, &mut port));
    complete_write(&BUS, &mut port, 4);
    gyro.poll(&BUS, &WAKE, &mut port);

    // Both data-ready lines fire; only one read goes out, the other stays
    // queued behind its still-raised wakeup source.
    WAKE.signal(WakeSource::AccelReady);
    WAKE.signal(WakeSource::GyroReady);

    accel.poll(&BUS, &WAKE, &mut port);
    assert_eq!(BUS.status(), TwiStatus::Pending);
    let ops_before = port.ops.len();
    assert!(!gyro.poll(&BUS, &WAKE, &mut port));
    assert_eq!(port.ops.len(), ops_before);
    assert!(WAKE.is_set(WakeSource::GyroReady));

    // Accelerometer transaction drains; the gyroscope gets its turn.
    port.supply(&[10]);
    complete_read(&BUS, &mut port, 1);
    assert!(accel.poll(&BUS, &WAKE, &mut port));

    assert!(!gyro.poll(&BUS, &WAKE, &mut port));
    assert_eq!(BUS.status(), TwiStatus::Pending);
    port.supply(&[0x00, 0x00]);
    complete_read(&BUS, &mut port, 2);
    assert!(gyro.poll(&BUS, &WAKE, &mut port));
    assert!(!WAKE.is_set(WakeSource::GyroReady));
}
