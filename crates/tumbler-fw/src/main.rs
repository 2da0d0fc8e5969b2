#![no_std]
#![no_main]

mod board;
mod twi_port;

use core::cell::RefCell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::NVIC;
use cortex_m_rt::{entry, exception};
use critical_section::Mutex;
use embassy_stm32::gpio::{AnyPin, Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::pac;
use {defmt_rtt as _, panic_probe as _};

use tumbler_core::accel::Accelerometer;
use tumbler_core::bus::Bus;
use tumbler_core::gyro::Gyroscope;
use tumbler_core::wakeup::{WakeFlags, WakeSource};

use crate::board::Board;
use crate::twi_port::I2c1Port;

/// Wakeup sources raised by the handlers below, drained by the main loop.
static WAKE: WakeFlags = WakeFlags::new();
/// The single shared bus transaction engine.
static TWI: Bus = Bus::new(&WAKE);
/// I2C1 port state, shared between the main loop and the bus interrupt.
static PORT: Mutex<RefCell<I2c1Port>> = Mutex::new(RefCell::new(I2c1Port::new()));

/// System tick rate and the heartbeat derived from it.
const TICK_HZ: u32 = 100;
const HEARTBEAT_TICKS: u32 = TICK_HZ;

fn with_port<R>(f: impl FnOnce(&mut I2c1Port) -> R) -> R {
    critical_section::with(|cs| f(&mut PORT.borrow(cs).borrow_mut()))
}

fn init_systick(syst: &mut cortex_m::peripheral::SYST) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(168_000_000 / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Fail-safe: a sensor could not be configured, so gesture input cannot be
/// trusted. Show a solid LED and park until power-cycled.
fn shutdown_error(led: &mut Output<'static, AnyPin>) -> ! {
    defmt::error!("sensor bring-up failed, halting");
    led.set_low(); // PC13 LED is active-low
    loop {
        cortex_m::asm::wfi();
    }
}

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();
    let board = Board::init();
    let p = board.p;
    defmt::info!("tumbler starting");

    // Heartbeat LED (PC13) and the two data-ready inputs.
    let mut led = Output::new(p.PC13.degrade(), Level::High, Speed::Low);
    let _accel_drdy = Input::new(p.PC1, Pull::Down);
    let _gyro_drdy = Input::new(p.PB0, Pull::Down);

    I2c1Port::init();
    board::init_drdy_lines();
    init_systick(&mut cp.SYST);

    unsafe {
        NVIC::unmask(pac::Interrupt::I2C1_EV);
        NVIC::unmask(pac::Interrupt::I2C1_ER);
        NVIC::unmask(pac::Interrupt::EXTI0);
        NVIC::unmask(pac::Interrupt::EXTI1);
    }

    let mut accel = Accelerometer::new();
    let mut gyro = Gyroscope::new();

    // The bus serialises the two configuration writes: whichever start
    // lands second keeps getting retried until the wire is free.
    let mut accel_started = false;
    let mut gyro_started = false;

    let mut check_gyro_first = false;
    let mut ticks: u32 = 0;

    loop {
        if !accel_started {
            accel_started = with_port(|port| accel.start(&TWI, port));
        }
        if !gyro_started {
            gyro_started = with_port(|port| gyro.start(&TWI, port));
        }

        // Round-robin so neither sensor starves the other.
        let new_sample = with_port(|port| {
            if check_gyro_first {
                let g = gyro.poll(&TWI, &WAKE, port);
                let a = accel.poll(&TWI, &WAKE, port);
                g | a
            } else {
                let a = accel.poll(&TWI, &WAKE, port);
                let g = gyro.poll(&TWI, &WAKE, port);
                a | g
            }
        });
        check_gyro_first = !check_gyro_first;

        if let Some(code) = accel.take_fault() {
            defmt::warn!("accelerometer bus fault, status {=u8:#x}", code);
        }
        if let Some(code) = gyro.take_fault() {
            defmt::warn!("gyroscope bus fault, status {=u8:#x}", code);
        }
        if accel.is_failed() || gyro.is_failed() {
            shutdown_error(&mut led);
        }

        if new_sample {
            // The UI layer consumes horizon, shake count and dial ticks
            // here; out of scope for this core.
            defmt::trace!(
                "z {=i16} horizon {} shakes {=u8} ticks {=i32}",
                accel.z(),
                accel.horizon(),
                accel.shake_count(),
                gyro.z_ticks()
            );
        }

        if WAKE.take(WakeSource::Tick) {
            ticks = ticks.wrapping_add(1);
            if ticks % HEARTBEAT_TICKS == 0 {
                led.toggle();
            }
        }

        WAKE.sleep_until_signal();
    }
}

#[interrupt]
fn I2C1_EV() {
    critical_section::with(|cs| {
        let mut port = PORT.borrow(cs).borrow_mut();
        if let Some(event) = port.service_event() {
            TWI.on_event(&mut *port, event);
        }
    });
}

#[interrupt]
fn I2C1_ER() {
    critical_section::with(|cs| {
        let mut port = PORT.borrow(cs).borrow_mut();
        if let Some(event) = port.service_event() {
            TWI.on_event(&mut *port, event);
        }
    });
}

#[interrupt]
fn EXTI0() {
    pac::EXTI.pr(0).write(|w| w.set_line(0, true));
    WAKE.signal(WakeSource::GyroReady);
}

#[interrupt]
fn EXTI1() {
    pac::EXTI.pr(0).write(|w| w.set_line(1, true));
    WAKE.signal(WakeSource::AccelReady);
}

#[exception]
fn SysTick() {
    WAKE.signal(WakeSource::Tick);
}
