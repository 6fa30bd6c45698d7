//! An in-memory EEPROM for tests and dry runs.

use std::collections::BTreeMap;

use super::{Transport, TransportError};
use crate::config::ChipProfile;

/// The value of an erased EEPROM cell.
pub const ERASED_BYTE_VALUE: u8 = 0xFF;

/// Number of readiness polls a write cycle takes unless configured otherwise.
const DEFAULT_WRITE_CYCLE_POLLS: u32 = 3;

/// A simulated EEPROM honoring the timing of a real part.
///
/// After every write operation the chip stays busy for a fixed number of
/// [`is_ready`](Transport::is_ready) polls and refuses any transaction until then, just like a
/// 24Cxx part that does not acknowledge during its internal write cycle.
///
/// Faults can be injected to exercise the failure paths of the engine.
#[derive(Debug, Clone)]
pub struct SimulatedChip {
    profile: ChipProfile,
    bus_address: u8,
    memory: Vec<u8>,

    write_cycle_polls: u32,
    busy_polls_left: u32,
    page_rollover: bool,

    never_ready: bool,
    fail_reads: bool,
    writes_until_failure: Option<usize>,
    stuck_bytes: BTreeMap<u32, u8>,

    writes: Vec<(u32, usize)>,
}

impl SimulatedChip {
    /// Creates an erased chip with the given geometry.
    pub fn new(profile: ChipProfile) -> Self {
        let memory = vec![ERASED_BYTE_VALUE; profile.capacity as usize];

        Self {
            profile,
            bus_address: 0x50,
            memory,
            write_cycle_polls: DEFAULT_WRITE_CYCLE_POLLS,
            busy_polls_left: 0,
            page_rollover: false,
            never_ready: false,
            fail_reads: false,
            writes_until_failure: None,
            stuck_bytes: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    /// Sets the bus address reported in NACK errors.
    pub fn with_bus_address(mut self, bus_address: u8) -> Self {
        self.bus_address = bus_address;
        self
    }

    /// Sets how many readiness polls each write cycle lasts.
    pub fn with_write_cycle_polls(mut self, polls: u32) -> Self {
        self.write_cycle_polls = polls;
        self
    }

    /// Makes a single write operation wrap around at the end of its page, as a raw 24Cxx does.
    ///
    /// Without this, bytes past a page boundary are committed linearly.
    pub fn with_page_rollover(mut self) -> Self {
        self.page_rollover = true;
        self
    }

    /// The geometry of the simulated part.
    pub fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// The raw cell contents, bypassing stuck bytes and bus timing.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Mutable access to the cells, for preloading or corrupting data.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// The `(address, length)` of every accepted write operation, in order.
    pub fn writes(&self) -> &[(u32, usize)] {
        &self.writes
    }

    /// Forgets all logged write operations.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Keeps the chip in its write cycle until the next power cycle.
    pub fn set_never_ready(&mut self, never_ready: bool) {
        self.never_ready = never_ready;
    }

    /// Makes every read fail with a bus error.
    pub fn set_fail_reads(&mut self, fail_reads: bool) {
        self.fail_reads = fail_reads;
    }

    /// Accepts `count` more write operations, then fails every following one.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_until_failure = Some(count);
    }

    /// Makes the cell at `address` always read back as `value`.
    pub fn stick_byte(&mut self, address: u32, value: u8) {
        self.stuck_bytes.insert(address, value);
    }

    /// Simulates removing and restoring power.
    ///
    /// Memory contents survive, an interrupted write cycle does not.
    pub fn power_cycle(&mut self) {
        self.busy_polls_left = 0;
        self.never_ready = false;
    }

    fn check_access(&self, address: u32, length: usize) -> Result<(), TransportError> {
        let end = u64::from(address) + length as u64;
        if end > u64::from(self.profile.capacity) {
            return Err(TransportError::OutOfRange { address, length });
        }
        if self.busy_polls_left > 0 || self.never_ready {
            return Err(TransportError::Nack(self.bus_address));
        }
        Ok(())
    }
}

impl Transport for SimulatedChip {
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.check_access(address, data.len())?;

        if let Some(remaining) = self.writes_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::Bus("injected write failure".to_string()));
            }
            *remaining -= 1;
        }

        let page_start = self.profile.page_start(address);
        let page_size = self.profile.page_size;
        for (i, byte) in data.iter().enumerate() {
            let target = if self.page_rollover {
                page_start + (address - page_start + i as u32) % page_size
            } else {
                address + i as u32
            };
            self.memory[target as usize] = *byte;
        }

        tracing::trace!("Simulated write of {} bytes at {:#06x}", data.len(), address);
        self.writes.push((address, data.len()));
        self.busy_polls_left = self.write_cycle_polls;

        Ok(())
    }

    fn read_bytes(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        self.check_access(address, data.len())?;

        if self.fail_reads {
            return Err(TransportError::Bus("injected read failure".to_string()));
        }

        let start = address as usize;
        data.copy_from_slice(&self.memory[start..start + data.len()]);

        for (stuck_address, value) in self.stuck_bytes.range(address..) {
            let offset = (stuck_address - address) as usize;
            if offset >= data.len() {
                break;
            }
            data[offset] = *value;
        }

        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        if self.never_ready {
            return false;
        }
        if self.busy_polls_left > 0 {
            self.busy_polls_left -= 1;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    fn chip(part_id: &str) -> SimulatedChip {
        SimulatedChip::new(Registry::from_builtin_profiles().get_profile(part_id).unwrap())
    }

    fn wait_ready(chip: &mut SimulatedChip) {
        while !chip.is_ready() {}
    }

    #[test]
    fn starts_erased() {
        let mut chip = chip("24c08");
        assert_eq!(chip.read_vec(0, 4).unwrap(), vec![ERASED_BYTE_VALUE; 4]);
    }

    #[test]
    fn busy_after_write() {
        let mut chip = chip("24c08").with_write_cycle_polls(2);
        chip.write_bytes(0x10, &[1, 2]).unwrap();

        assert_eq!(
            chip.write_bytes(0x12, &[3]),
            Err(TransportError::Nack(0x50))
        );
        assert!(!chip.is_ready());
        assert!(!chip.is_ready());
        assert!(chip.is_ready());
        assert_eq!(chip.read_vec(0x10, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn linear_write_across_page() {
        let mut chip = chip("24c08");
        chip.write_bytes(14, &[1, 2, 3, 4]).unwrap();
        wait_ready(&mut chip);

        assert_eq!(chip.read_vec(14, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn page_rollover_wraps_within_page() {
        let mut chip = chip("24c08").with_page_rollover();
        chip.write_bytes(14, &[1, 2, 3, 4]).unwrap();
        wait_ready(&mut chip);

        assert_eq!(chip.memory()[0..2], [3, 4]);
        assert_eq!(chip.memory()[14..18], [1, 2, ERASED_BYTE_VALUE, ERASED_BYTE_VALUE]);
    }

    #[test]
    fn out_of_range_access() {
        let mut chip = chip("24c08");
        assert_eq!(
            chip.write_bytes(1023, &[1, 2]),
            Err(TransportError::OutOfRange {
                address: 1023,
                length: 2
            })
        );
    }

    #[test]
    fn stuck_byte_reads_fixed_value() {
        let mut chip = chip("24c08");
        chip.stick_byte(0x21, 0x00);
        chip.write_bytes(0x20, &[0xAA, 0xBB, 0xCC]).unwrap();
        wait_ready(&mut chip);

        assert_eq!(chip.read_vec(0x20, 3).unwrap(), vec![0xAA, 0x00, 0xCC]);
        assert_eq!(chip.read_vec(0x22, 1).unwrap(), vec![0xCC]);
    }

    #[test]
    fn injected_write_failure() {
        let mut chip = chip("24c08").with_write_cycle_polls(0);
        chip.fail_writes_after(1);

        chip.write_bytes(0, &[1]).unwrap();
        assert!(matches!(
            chip.write_bytes(1, &[2]),
            Err(TransportError::Bus(_))
        ));
        assert_eq!(chip.writes(), &[(0, 1)]);
    }

    #[test]
    fn power_cycle_keeps_memory() {
        let mut chip = chip("24c64");
        chip.write_bytes(0x1000, &[9, 8, 7]).unwrap();
        chip.power_cycle();

        assert!(chip.is_ready());
        assert_eq!(chip.read_vec(0x1000, 3).unwrap(), vec![9, 8, 7]);
    }
}
