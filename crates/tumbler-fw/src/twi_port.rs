//! I2C1 physical layer on PB8 (SCL) / PB9 (SDA), standard mode 100 kHz.
//!
//! The peripheral raises one event interrupt per protocol step; a byte on
//! the wire takes ~90 µs at this clock, so the handler only ever sees one
//! pending condition at a time.

use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals as gpio_vals;

use tumbler_core::bus::{BusEvent, BusPort};

pub struct I2c1Port {
    /// The next start condition on the wire is a repeated START.
    restart_armed: bool,
    /// The next received byte will be answered with NACK.
    nack_armed: bool,
}

impl I2c1Port {
    pub const fn new() -> Self {
        Self {
            restart_armed: false,
            nack_armed: false,
        }
    }

    /// Clock the peripheral, put the pins into open-drain alternate
    /// function and enable the event/error interrupts.
    pub fn init() {
        pac::RCC.ahb1enr().modify(|w| w.set_gpioben(true));
        pac::RCC.apb1enr().modify(|w| w.set_i2c1en(true));

        let gpio = pac::GPIOB;
        for pin in [8usize, 9] {
            gpio.otyper()
                .modify(|w| w.set_ot(pin, gpio_vals::Ot::OPENDRAIN));
            gpio.pupdr()
                .modify(|w| w.set_pupdr(pin, gpio_vals::Pupdr::PULLUP));
            gpio.afr(1).modify(|w| w.set_afr(pin - 8, 4)); // AF4 = I2C1
            gpio.moder()
                .modify(|w| w.set_moder(pin, gpio_vals::Moder::ALTERNATE));
        }

        let i2c = pac::I2C1;
        i2c.cr1().modify(|w| w.set_pe(false));
        i2c.cr2().modify(|w| w.set_freq(crate::board::PCLK1_MHZ));
        // Standard mode: CCR = pclk / (2 * 100 kHz), TRISE = pclk MHz + 1.
        i2c.ccr().modify(|w| {
            w.set_f_s(false);
            w.set_ccr(crate::board::PCLK1_MHZ as u16 * 5);
        });
        i2c.trise()
            .modify(|w| w.set_trise(crate::board::PCLK1_MHZ + 1));
        i2c.cr2().modify(|w| {
            w.set_itevten(true);
            w.set_iterren(true);
        });
        i2c.cr1().modify(|w| w.set_pe(true));
    }

    /// Classify the pending peripheral condition as a bus event, clearing
    /// what it consumes. None for conditions that need no engine step.
    pub fn service_event(&mut self) -> Option<BusEvent> {
        let i2c = pac::I2C1;
        let sr1 = i2c.sr1().read();

        if sr1.af() || sr1.berr() || sr1.arlo() || sr1.ovr() {
            // NACK or bus fault: hand the raw status register upward.
            let code = sr1.0 as u8;
            i2c.sr1().modify(|w| {
                w.set_af(false);
                w.set_berr(false);
                w.set_arlo(false);
                w.set_ovr(false);
            });
            return Some(BusEvent::Fault(code));
        }
        if sr1.start() {
            // SB clears with the address byte write that follows.
            return Some(if self.restart_armed {
                self.restart_armed = false;
                BusEvent::RepeatedStartSent
            } else {
                BusEvent::StartSent
            });
        }
        if sr1.addr() {
            // Reading SR2 clears the ADDR condition.
            let receiving = !i2c.sr2().read().tra();
            return Some(if receiving {
                BusEvent::AddrReadAcked
            } else {
                BusEvent::AddrWriteAcked
            });
        }
        if sr1.rxne() {
            return Some(if self.nack_armed {
                BusEvent::DataNacked
            } else {
                BusEvent::DataAcked
            });
        }
        if sr1.btf() {
            return Some(BusEvent::DataWriteAcked);
        }
        None
    }
}

impl Default for I2c1Port {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for I2c1Port {
    fn start(&mut self) {
        self.restart_armed = false;
        self.nack_armed = false;
        pac::I2C1.cr1().modify(|w| w.set_start(true));
    }

    fn restart(&mut self) {
        self.restart_armed = true;
        pac::I2C1.cr1().modify(|w| w.set_start(true));
    }

    fn stop(&mut self) {
        pac::I2C1.cr2().modify(|w| w.set_itbufen(false));
        pac::I2C1.cr1().modify(|w| w.set_stop(true));
    }

    fn write_byte(&mut self, byte: u8) {
        pac::I2C1.dr().write(|w| w.set_dr(byte));
    }

    fn read_byte(&mut self) -> u8 {
        pac::I2C1.dr().read().dr()
    }

    fn resume_ack(&mut self) {
        self.nack_armed = false;
        pac::I2C1.cr1().modify(|w| w.set_ack(true));
        // Receive stepping needs the buffer interrupt for per-byte RXNE.
        pac::I2C1.cr2().modify(|w| w.set_itbufen(true));
    }

    fn resume_nack(&mut self) {
        self.nack_armed = true;
        pac::I2C1.cr1().modify(|w| w.set_ack(false));
        pac::I2C1.cr2().modify(|w| w.set_itbufen(true));
    }

    fn bus_idle(&self) -> bool {
        !pac::I2C1.sr2().read().busy()
    }
}
