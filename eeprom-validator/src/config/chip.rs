//! Geometry of a single EEPROM part.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::Error;

/// Size of the address window reachable with a single address byte.
///
/// 1-byte-address parts larger than this select the segment through the low bits of the
/// device address.
pub const SEGMENT_SIZE: u32 = 256;

/// The most block-select bits a 1-byte-address part can carry in its device address.
const MAX_SEGMENT_BITS: u32 = 3;

/// Geometry of a supported EEPROM part.
///
/// Profiles are immutable once selected and are shared read-only for a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChipProfile {
    /// The part identifier, e.g. `24c08`.
    pub part_id: String,
    /// Width of the on-wire memory address in bytes (1 or 2).
    pub address_width: u8,
    /// Largest number of bytes committed by one internal write cycle.
    pub page_size: u32,
    /// Total capacity in bytes.
    pub capacity: u32,
    /// Size of a block, the coarser boundary used by the block-cross subtest.
    pub block_size: u32,
}

impl ChipProfile {
    /// Checks the geometry invariants of this profile.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: &'static str| Error::InvalidGeometry {
            part_id: self.part_id.clone(),
            reason,
        };

        if self.page_size == 0 || self.capacity == 0 || self.block_size == 0 {
            return Err(invalid("sizes must be non-zero"));
        }
        if self.capacity % self.page_size != 0 {
            return Err(invalid("capacity is not a multiple of the page size"));
        }
        if self.block_size % self.page_size != 0 {
            return Err(invalid("block size is not a multiple of the page size"));
        }
        if self.capacity % self.block_size != 0 {
            return Err(invalid("block size does not divide the capacity"));
        }
        if self.block_size == self.capacity {
            return Err(invalid("a part needs at least two blocks"));
        }
        if self.page_cross_range().overlaps(&self.block_cross_range()) {
            return Err(invalid(
                "the first block boundary is too close to the first page boundary",
            ));
        }

        match self.address_width {
            1 => {
                let segments = self.capacity.div_ceil(SEGMENT_SIZE);
                if !segments.is_power_of_two() || segments > 1 << MAX_SEGMENT_BITS {
                    return Err(invalid(
                        "capacity is not addressable with a 1-byte address",
                    ));
                }
            }
            2 => {
                if self.capacity > 1 << 16 {
                    return Err(invalid(
                        "capacity is not addressable with a 2-byte address",
                    ));
                }
            }
            _ => return Err(invalid("address width must be 1 or 2 bytes")),
        }

        Ok(())
    }

    /// Returns the start of the page containing `address`.
    pub fn page_start(&self, address: u32) -> u32 {
        address - address % self.page_size
    }

    /// Returns the first page boundary strictly after `address`.
    pub fn next_page_boundary(&self, address: u32) -> u32 {
        self.page_start(address) + self.page_size
    }

    /// Returns the number of device-address bits used to select a 256-byte segment.
    ///
    /// This is always zero for 2-byte-address parts.
    pub fn segment_bits(&self) -> u32 {
        if self.address_width == 1 {
            self.capacity.div_ceil(SEGMENT_SIZE).trailing_zeros()
        } else {
            0
        }
    }

    /// Half a page, but at least two bytes, centred on the first page boundary.
    pub fn page_cross_range(&self) -> AddressRange {
        let length = (self.page_size / 2).max(2);
        AddressRange::new(self.page_size.saturating_sub(length / 2), length)
    }

    /// Two pages centred on the first block boundary.
    pub fn block_cross_range(&self) -> AddressRange {
        AddressRange::new(
            self.block_size.saturating_sub(self.page_size),
            2 * self.page_size,
        )
    }

    /// The address of the last byte of the part.
    pub fn last_address(&self) -> u32 {
        self.capacity - 1
    }

    /// Checks that `range` is non-empty and lies entirely within the part.
    pub fn check_range(&self, range: AddressRange) -> Result<(), Error> {
        if range.length == 0 {
            return Err(Error::InvalidRange {
                range,
                reason: "the range is empty".to_string(),
            });
        }
        if range.end() > u64::from(self.capacity) {
            return Err(Error::InvalidRange {
                range,
                reason: format!(
                    "the range exceeds the {} byte capacity of part '{}'",
                    self.capacity, self.part_id
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {} byte pages, {} byte blocks, {}-byte addressing)",
            self.part_id, self.capacity, self.page_size, self.block_size, self.address_width
        )
    }
}

/// A contiguous range of EEPROM addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    /// The first address of the range.
    pub start: u32,
    /// The number of bytes in the range.
    pub length: u32,
}

impl AddressRange {
    /// Creates a new range of `length` bytes starting at `start`.
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// The first address after the range.
    ///
    /// Computed in 64 bits so that ranges read from untrusted input can not overflow.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.length)
    }

    /// Returns true if `address` lies within the range.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && u64::from(address) < self.end()
    }

    /// Returns true if the two ranges share at least one address.
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }

    /// Returns the range as a `Range<u64>`.
    pub fn as_range(&self) -> Range<u64> {
        u64::from(self.start)..self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}..{:#06x}", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(address_width: u8, page_size: u32, capacity: u32, block_size: u32) -> ChipProfile {
        ChipProfile {
            part_id: "test".to_string(),
            address_width,
            page_size,
            capacity,
            block_size,
        }
    }

    #[test]
    fn page_boundaries() {
        let chip = profile(1, 16, 1024, 256);

        assert_eq!(chip.page_start(14), 0);
        assert_eq!(chip.next_page_boundary(14), 16);
        assert_eq!(chip.next_page_boundary(16), 32);
        assert_eq!(chip.page_start(1023), 1008);
    }

    #[test]
    fn segment_bits_follow_capacity() {
        assert_eq!(profile(1, 16, 1024, 256).segment_bits(), 2);
        assert_eq!(profile(1, 16, 2048, 256).segment_bits(), 3);
        assert_eq!(profile(1, 8, 256, 256).segment_bits(), 0);
        assert_eq!(profile(2, 32, 8192, 256).segment_bits(), 0);
    }

    #[test]
    fn rejects_capacity_not_multiple_of_page() {
        let result = profile(2, 32, 8200, 256).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn rejects_block_not_multiple_of_page() {
        let result = profile(2, 32, 8192, 48).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn rejects_single_block_part() {
        let result = profile(1, 8, 256, 256).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn rejects_block_as_small_as_a_page() {
        let result = profile(1, 8, 256, 8).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn rejects_block_boundary_next_to_page_boundary() {
        // Page-cross covers 0x0c..0x14, block-cross 0x10..0x30.
        let result = profile(2, 16, 1024, 32).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
        assert!(profile(2, 16, 1536, 48).validate().is_ok());
    }

    #[test]
    fn boundary_ranges() {
        let chip = profile(1, 8, 256, 128);

        assert_eq!(chip.page_cross_range(), AddressRange::new(6, 4));
        assert_eq!(chip.block_cross_range(), AddressRange::new(120, 16));
        assert!(chip.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_one_byte_part() {
        let result = profile(1, 16, 4096, 256).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn rejects_bad_address_width() {
        let result = profile(3, 32, 8192, 256).validate();
        assert!(matches!(result, Err(Error::InvalidGeometry { .. })));
    }

    #[test]
    fn check_range_bounds() {
        let chip = profile(1, 16, 1024, 256);

        assert!(chip.check_range(AddressRange::new(1023, 1)).is_ok());
        assert!(chip.check_range(AddressRange::new(1023, 2)).is_err());
        assert!(chip.check_range(AddressRange::new(10, 0)).is_err());
        assert!(chip.check_range(AddressRange::new(u32::MAX, 2)).is_err());
    }

    #[test]
    fn range_overlap() {
        let a = AddressRange::new(12, 8);
        assert!(a.overlaps(&AddressRange::new(19, 4)));
        assert!(!a.overlaps(&AddressRange::new(20, 4)));
        assert!(!a.overlaps(&AddressRange::new(0, 12)));
        assert!(a.contains(19));
        assert!(!a.contains(20));
    }

    #[test]
    fn range_display() {
        assert_eq!(AddressRange::new(0xF0, 0x20).to_string(), "0x00f0..0x0110");
    }
}
