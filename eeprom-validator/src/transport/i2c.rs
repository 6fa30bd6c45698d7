//! Adapter from [`embedded_hal::i2c::I2c`] to this crate's [`Transport`] trait.
//!
//! Handles the two addressing schemes of the 24Cxx family:
//!
//! - Parts with a 1-byte word address (up to 24C16) take the upper address bits as the low
//!   bits of the device address. Every 256-byte segment answers on its own bus address.
//! - Parts with a 2-byte word address send the address big-endian on a single bus address.
//!
//! ```ignore
//! use eeprom_validator::transport::i2c::I2cTransport;
//!
//! let transport = I2cTransport::from_config(i2c, delay, &config, validator.profile());
//! let report = validator.run_full(transport)?;
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c, Operation};

use super::{Transport, TransportError};
use crate::config::{ChipProfile, SEGMENT_SIZE};
use crate::settings::ValidatorConfig;

/// How often the next segment is polled before a write spanning segments gives up.
const SEGMENT_POLL_ATTEMPTS: u32 = 20;

/// Pause between two segment polls.
const SEGMENT_POLL_DELAY_MS: u32 = 1;

/// A 24Cxx EEPROM on a blocking I2C bus.
pub struct I2cTransport<I, D> {
    i2c: I,
    delay: D,
    base_address: u8,
    address_width: u8,
    segment_mask: u8,
    capacity: u32,
    last_device: u8,
}

impl<I: I2c, D: DelayNs> I2cTransport<I, D> {
    /// Wraps `i2c` for a chip with the geometry of `profile`, strapped to `base_address`.
    ///
    /// For 1-byte-address parts the segment bits are OR'ed into `base_address`.
    pub fn new(i2c: I, delay: D, base_address: u8, profile: &ChipProfile) -> Self {
        let segment_mask = ((1u32 << profile.segment_bits()) - 1) as u8;

        Self {
            i2c,
            delay,
            base_address,
            address_width: profile.address_width,
            segment_mask,
            capacity: profile.capacity,
            last_device: base_address,
        }
    }

    /// Wraps `i2c` for a chip with the geometry of `profile`, on the bus address of `config`.
    pub fn from_config(i2c: I, delay: D, config: &ValidatorConfig, profile: &ChipProfile) -> Self {
        Self::new(i2c, delay, config.bus_address, profile)
    }

    /// Returns the wrapped bus and delay.
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn device_address(&self, address: u32) -> u8 {
        if self.address_width == 1 {
            self.base_address | ((address / SEGMENT_SIZE) as u8 & self.segment_mask)
        } else {
            self.base_address
        }
    }

    fn word_address(&self, address: u32) -> ([u8; 2], usize) {
        if self.address_width == 1 {
            ([address as u8, 0], 1)
        } else {
            ((address as u16).to_be_bytes(), 2)
        }
    }

    fn check_range(&self, address: u32, length: usize) -> Result<(), TransportError> {
        if u64::from(address) + length as u64 > u64::from(self.capacity) {
            return Err(TransportError::OutOfRange { address, length });
        }
        Ok(())
    }

    /// Splits an access at segment boundaries for 1-byte-address parts.
    fn chunks(&self, address: u32, length: usize) -> Vec<(u32, std::ops::Range<usize>)> {
        let mut chunks = Vec::new();
        let mut offset = 0;

        while offset < length {
            let chunk_address = address + offset as u32;
            let chunk_length = if self.address_width == 1 {
                let to_boundary = SEGMENT_SIZE - chunk_address % SEGMENT_SIZE;
                (length - offset).min(to_boundary as usize)
            } else {
                length - offset
            };
            chunks.push((chunk_address, offset..offset + chunk_length));
            offset += chunk_length;
        }

        chunks
    }

    /// Waits until `device` acknowledges again, bounded by [`SEGMENT_POLL_ATTEMPTS`].
    fn poll_device(&mut self, device: u8) -> Result<(), TransportError> {
        for _ in 0..SEGMENT_POLL_ATTEMPTS {
            if self.i2c.write(device, &[]).is_ok() {
                return Ok(());
            }
            self.delay.delay_ms(SEGMENT_POLL_DELAY_MS);
        }

        tracing::warn!("Device {:#04x} did not acknowledge between segments", device);
        Err(TransportError::Nack(device))
    }
}

fn map_error<E: embedded_hal::i2c::Error>(device: u8, error: E) -> TransportError {
    match error.kind() {
        ErrorKind::NoAcknowledge(_) => TransportError::Nack(device),
        kind => TransportError::Bus(kind.to_string()),
    }
}

impl<I: I2c, D: DelayNs> Transport for I2cTransport<I, D> {
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.check_range(address, data.len())?;

        for (i, (chunk_address, range)) in self.chunks(address, data.len()).into_iter().enumerate()
        {
            let device = self.device_address(chunk_address);
            if i > 0 {
                self.poll_device(device)?;
            }

            let (word, width) = self.word_address(chunk_address);
            self.i2c
                .transaction(
                    device,
                    &mut [
                        Operation::Write(&word[..width]),
                        Operation::Write(&data[range]),
                    ],
                )
                .map_err(|e| map_error(device, e))?;
            self.last_device = device;
        }

        Ok(())
    }

    fn read_bytes(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        self.check_range(address, data.len())?;

        for (chunk_address, range) in self.chunks(address, data.len()) {
            let device = self.device_address(chunk_address);
            let (word, width) = self.word_address(chunk_address);
            self.i2c
                .write_read(device, &word[..width], &mut data[range])
                .map_err(|e| map_error(device, e))?;
        }

        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        self.i2c.write(self.last_device, &[]).is_ok()
    }
}
