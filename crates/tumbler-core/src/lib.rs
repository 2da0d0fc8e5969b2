//! Sensor-acquisition core of the tumbler gesture timer.
//!
//! Everything here is hardware-independent: the bus physical layer comes in
//! through [`bus::BusPort`], interrupts show up as [`bus::BusEvent`] values
//! and [`wakeup::WakeFlags`] signals. The firmware crate supplies both on
//! the real machine; the tests supply them on the host.

#![cfg_attr(not(test), no_std)]

pub mod accel;
pub mod bus;
pub mod gyro;
pub mod wakeup;
