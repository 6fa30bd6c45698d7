//! The byte-level bus interface consumed by the validation engine.
//!
//! The engine never touches a bus directly. Anything that can write bytes at an address, read
//! them back, and report whether the chip finished its internal write cycle can be validated.

pub mod i2c;
pub mod simulated;

use serde::Serialize;

/// A failed bus transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error, docsplay::Display)]
pub enum TransportError {
    /// The device at bus address {0:#04x} did not acknowledge.
    Nack(u8),

    /// Access of {length} bytes at {address:#06x} is outside the device.
    OutOfRange {
        /// The first address of the access.
        address: u32,
        /// The number of bytes accessed.
        length: usize,
    },

    /// Bus error: {0}
    Bus(String),
}

/// Register-addressed access to an EEPROM.
///
/// Every call is one blocking bus transaction. Implementations are not expected to be
/// reentrant; the engine never has more than one transaction in flight.
pub trait Transport {
    /// Sends `data` to the chip in a single write operation starting at `address`.
    ///
    /// The chip starts its internal write cycle once the operation ends. Whether bytes past a
    /// page boundary are committed linearly is up to the chip and adapter, which is exactly
    /// what the boundary subtests check.
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Reads `data.len()` bytes starting at `address` into `data`.
    fn read_bytes(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError>;

    /// Returns `true` once the chip acknowledges again after a write cycle.
    fn is_ready(&mut self) -> bool;

    /// Reads `length` bytes starting at `address` into a new buffer.
    fn read_vec(&mut self, address: u32, length: usize) -> Result<Vec<u8>, TransportError> {
        let mut data = vec![0; length];
        self.read_bytes(address, &mut data)?;
        Ok(data)
    }
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_bytes(address, data)
    }

    fn read_bytes(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        (**self).read_bytes(address, data)
    }

    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }
}
