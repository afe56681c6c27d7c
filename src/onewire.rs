//! A driver for the DS2483 I2C to 1-Wire bridge, and the DS18B20
//! temperature sensor behind it
//!
//! The bridge is driven through any [`embedded_hal::i2c::I2c`], which on
//! the appliance is [`crate::twi::Blocking`].

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use embedded_hal::i2c::I2c;

use crate::config::ONEWIRE_WAIT_POLLS;

/// Bridge commands
mod cmd {
    pub(super) const BUS_RESET: u8 = 0xB4;
    pub(super) const DEVICE_RESET: u8 = 0xF0;
    pub(super) const SET_READ_POINTER: u8 = 0xE1;
    pub(super) const WRITE_BYTE: u8 = 0xA5;
    pub(super) const READ_BYTE: u8 = 0x96;
}

/// 1-Wire Busy
const STATUS_BUSY: u8 = 0x01;
/// Presence Pulse Detect
const STATUS_PRESENCE: u8 = 0x02;

/// Registers the bridge's read pointer can select
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    /// Bus and device status flags
    Status = 0xF0,
    /// The byte from the last 1-Wire read
    ReadData = 0xE1,
    /// Active pullup, strong pullup, power down and overdrive settings
    DeviceConfig = 0xC3,
    /// 1-Wire timing parameters
    PortConfig = 0xB4,
}

/// Errors from the 1-Wire driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Nothing answered the reset pulse
    NoDevice,
    /// The I2C transfer to the bridge failed
    Bus(E),
}

impl<E: core::fmt::Display> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoDevice => write!(f, "no 1-Wire device present"),
            Error::Bus(e) => write!(f, "1-Wire bridge: {}", e),
        }
    }
}

impl<E: core::fmt::Debug + core::fmt::Display> core::error::Error for Error<E> {}

/// A DS2483 single-channel 1-Wire master
pub struct Ds2483<I> {
    i2c: I,
}

impl<I: I2c> Ds2483<I> {
    /// The bridge's fixed 7-bit I2C address
    pub const ADDRESS: u8 = 0x18;

    /// Talk to a bridge on the given bus
    pub const fn new(i2c: I) -> Ds2483<I> {
        Ds2483 { i2c }
    }

    /// Give the bus back
    pub fn release(self) -> I {
        self.i2c
    }

    /// Reset the bridge itself
    pub fn device_reset(&mut self) -> Result<(), Error<I::Error>> {
        self.command(&[cmd::DEVICE_RESET])
    }

    /// Send a reset pulse on the 1-Wire bus
    ///
    /// Returns `true` if a device answered with a presence pulse.
    pub fn bus_reset(&mut self) -> Result<bool, Error<I::Error>> {
        self.command(&[cmd::BUS_RESET])?;
        let status = self.wait_idle()?;
        Ok(status & STATUS_PRESENCE != 0)
    }

    /// Write a byte to the 1-Wire bus
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error<I::Error>> {
        self.command(&[cmd::WRITE_BYTE, byte])?;
        self.wait_idle()?;
        Ok(())
    }

    /// Read a byte from the 1-Wire bus
    pub fn read_byte(&mut self) -> Result<u8, Error<I::Error>> {
        self.command(&[cmd::READ_BYTE])?;
        self.wait_idle()?;
        self.read_register(Register::ReadData)
    }

    /// Point subsequent plain reads at `register`
    pub fn set_read_pointer(&mut self, register: Register) -> Result<(), Error<I::Error>> {
        self.command(&[cmd::SET_READ_POINTER, register as u8])
    }

    /// Read whichever register the read pointer selects
    pub fn read_pointer(&mut self) -> Result<u8, Error<I::Error>> {
        let mut value = [0u8];
        self.i2c
            .read(Self::ADDRESS, &mut value)
            .map_err(Error::Bus)?;
        Ok(value[0])
    }

    /// Select `register` and read it, in one transaction
    pub fn read_register(&mut self, register: Register) -> Result<u8, Error<I::Error>> {
        let mut value = [0u8];
        self.i2c
            .write_read(
                Self::ADDRESS,
                &[cmd::SET_READ_POINTER, register as u8],
                &mut value,
            )
            .map_err(Error::Bus)?;
        Ok(value[0])
    }

    /// Poll the status register until the 1-Wire bus is idle
    ///
    /// Gives up after [`ONEWIRE_WAIT_POLLS`] extra polls. Returns the last
    /// status read either way.
    pub fn wait_idle(&mut self) -> Result<u8, Error<I::Error>> {
        let mut status = self.read_register(Register::Status)?;
        let mut polls = 0;
        while status & STATUS_BUSY != 0 {
            if polls == ONEWIRE_WAIT_POLLS {
                warn!("1-Wire still busy, status {=u8:02x}", status);
                break;
            }
            polls += 1;
            status = self.read_register(Register::Status)?;
        }
        Ok(status)
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), Error<I::Error>> {
        trace!("DS2483 command {=[u8]:x}", bytes);
        self.i2c.write(Self::ADDRESS, bytes).map_err(Error::Bus)
    }
}

/// The DS18B20 digital thermometer
///
/// These functions address every device on the bus at once, so there must
/// be only one.
pub mod ds18b20 {
    use super::{Ds2483, Error};
    use embedded_hal::i2c::I2c;

    const SKIP_ROM: u8 = 0xCC;
    const CONVERT_T: u8 = 0x44;
    const READ_SCRATCHPAD: u8 = 0xBE;

    /// A temperature reading
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Temperature(i16);

    impl Temperature {
        /// The raw reading, in sixteenths of a degree Celsius
        pub const fn sixteenths(self) -> i16 {
            self.0
        }

        /// Whole degrees Celsius, rounded towards zero
        pub const fn degrees(self) -> i16 {
            self.0 / 16
        }
    }

    /// Start a temperature conversion
    ///
    /// A conversion takes up to 750 ms at full resolution.
    pub fn start_conversion<I: I2c>(bridge: &mut Ds2483<I>) -> Result<(), Error<I::Error>> {
        select(bridge)?;
        bridge.write_byte(CONVERT_T)
    }

    /// Read the result of the last conversion
    pub fn read_temperature<I: I2c>(
        bridge: &mut Ds2483<I>,
    ) -> Result<Temperature, Error<I::Error>> {
        select(bridge)?;
        bridge.write_byte(READ_SCRATCHPAD)?;
        let low = bridge.read_byte()?;
        let high = bridge.read_byte()?;
        Ok(Temperature(i16::from_le_bytes([low, high])))
    }

    fn select<I: I2c>(bridge: &mut Ds2483<I>) -> Result<(), Error<I::Error>> {
        if !bridge.bus_reset()? {
            return Err(Error::NoDevice);
        }
        bridge.write_byte(SKIP_ROM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::VecDeque;

    /// Models enough of a DS2483, with whatever is on its 1-Wire bus
    #[derive(Default)]
    struct FakeBridge {
        present: bool,
        /// How many status polls report busy after each 1-Wire action
        busy_polls: u8,
        busy_left: u8,
        pointer: u8,
        read_data: u8,
        from_bus: VecDeque<u8>,
        to_bus: Vec<u8>,
        status_reads: usize,
        fail: bool,
    }

    impl FakeBridge {
        fn register(&mut self, register: u8) -> u8 {
            match register {
                0xF0 => {
                    self.status_reads += 1;
                    let busy = if self.busy_left > 0 {
                        self.busy_left -= 1;
                        STATUS_BUSY
                    } else {
                        0
                    };
                    busy | if self.present { STATUS_PRESENCE } else { 0 }
                }
                0xE1 => self.read_data,
                _ => 0,
            }
        }

        fn command(&mut self, bytes: &[u8]) {
            match bytes {
                [0xF0] => {}
                [0xB4] => self.busy_left = self.busy_polls,
                [0xA5, byte] => {
                    self.to_bus.push(*byte);
                    self.busy_left = self.busy_polls;
                }
                [0x96] => {
                    self.read_data = self.from_bus.pop_front().unwrap_or(0xFF);
                    self.busy_left = self.busy_polls;
                }
                [0xE1, register] => self.pointer = *register,
                other => panic!("unexpected command {:02x?}", other),
            }
        }
    }

    impl ErrorType for FakeBridge {
        type Error = ErrorKind;
    }

    impl I2c for FakeBridge {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, 0x18);
            if self.fail {
                return Err(ErrorKind::ArbitrationLoss);
            }
            match operations {
                [Operation::Write(tx)] => self.command(tx),
                [Operation::Write([0xE1, register]), Operation::Read([value])] => {
                    *value = self.register(*register);
                }
                [Operation::Read([value])] => *value = self.register(self.pointer),
                _ => panic!("unexpected transaction"),
            }
            Ok(())
        }
    }

    #[test]
    fn bus_reset_reports_presence() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            ..Default::default()
        });
        assert_eq!(bridge.bus_reset(), Ok(true));

        let mut bridge = Ds2483::new(FakeBridge::default());
        assert_eq!(bridge.bus_reset(), Ok(false));
    }

    #[test]
    fn reads_temperature_in_sixteenths() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            busy_polls: 2,
            from_bus: VecDeque::from([0x91, 0x01]),
            ..Default::default()
        });
        let temperature = ds18b20::read_temperature(&mut bridge).unwrap();
        assert_eq!(temperature.sixteenths(), 0x0191);
        assert_eq!(temperature.degrees(), 25);
        assert_eq!(bridge.release().to_bus, [0xCC, 0xBE]);
    }

    #[test]
    fn negative_temperature_rounds_towards_zero() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            from_bus: VecDeque::from([0x5E, 0xFF]),
            ..Default::default()
        });
        let temperature = ds18b20::read_temperature(&mut bridge).unwrap();
        assert_eq!(temperature.sixteenths(), -162);
        assert_eq!(temperature.degrees(), -10);
    }

    #[test]
    fn conversion_without_device_fails() {
        let mut bridge = Ds2483::new(FakeBridge::default());
        assert_eq!(
            ds18b20::start_conversion(&mut bridge),
            Err(Error::NoDevice)
        );
        assert!(bridge.release().to_bus.is_empty());
    }

    #[test]
    fn conversion_sends_skip_rom_then_convert() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            ..Default::default()
        });
        assert_eq!(ds18b20::start_conversion(&mut bridge), Ok(()));
        assert_eq!(bridge.release().to_bus, [0xCC, 0x44]);
    }

    #[test]
    fn wait_idle_gives_up() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            busy_polls: u8::MAX,
            ..Default::default()
        });
        bridge.device_reset().unwrap();
        let status = bridge.bus_reset();
        assert_eq!(status, Ok(true));
        let fake = bridge.release();
        assert_eq!(fake.status_reads, 1 + usize::from(ONEWIRE_WAIT_POLLS));
    }

    #[test]
    fn read_pointer_reads_selected_register() {
        let mut bridge = Ds2483::new(FakeBridge {
            present: true,
            ..Default::default()
        });
        bridge.set_read_pointer(Register::Status).unwrap();
        assert_eq!(bridge.read_pointer(), Ok(STATUS_PRESENCE));
    }

    #[test]
    fn bus_errors_are_passed_on() {
        let mut bridge = Ds2483::new(FakeBridge {
            fail: true,
            ..Default::default()
        });
        assert_eq!(
            bridge.write_byte(0x55),
            Err(Error::Bus(ErrorKind::ArbitrationLoss))
        );
    }
}

// End of File
