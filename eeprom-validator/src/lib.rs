//! # eeprom-validator
//!
//! A validation engine for 24Cxx serial EEPROMs on manufacturing test fixtures.
//!
//! The engine exercises the address boundaries of a known part, writes randomized patterns
//! with CRC-32 verification, and checks data retention across a power cycle by way of a
//! snapshot artifact shared between two separate runs.
//!
//! It does not talk to a bus itself. Everything goes through the [`Transport`] trait, which is
//! implemented for any [`embedded_hal::i2c::I2c`] bus by [`transport::i2c::I2cTransport`] and
//! by the in-memory [`SimulatedChip`] used for testing and dry runs.
//!
//! ## Examples
//!
//! ### Running the full suite
//!
//! ```
//! use eeprom_validator::{Registry, SimulatedChip, Validator, ValidatorConfig};
//!
//! # let dir = tempfile::tempdir()?;
//! let config = ValidatorConfig {
//!     snapshot_path: dir.path().join("midblock.bin"),
//!     ..ValidatorConfig::default()
//! };
//! let profile = Registry::from_builtin_profiles().get_profile(&config.chip)?;
//!
//! let mut chip = SimulatedChip::new(profile.clone());
//! let report = Validator::new(profile, &config).run_full(&mut chip)?;
//!
//! assert!(report.passed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Verifying retention after a power cycle
//!
//! ```no_run
//! use eeprom_validator::{SimulatedChip, Validator, ValidatorConfig};
//!
//! let config = ValidatorConfig::load("validator.toml")?;
//! let profile = config.profile()?;
//! let mut chip = SimulatedChip::new(profile.clone());
//!
//! let outcome = Validator::new(profile, &config).verify_retention(&mut chip, "midblock.bin")?;
//! println!("retained {} bytes", outcome.range().length);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
mod error;
pub mod progress;
pub mod retention;
pub mod sequencer;
pub mod settings;
pub mod subtests;
pub mod transport;
mod validator;

pub use config::{AddressRange, ChipProfile, Registry};
pub use error::Error;
pub use progress::{ProgressEvent, ValidationProgress};
pub use retention::{RetentionOutcome, RetentionSnapshot};
pub use sequencer::{BurstMode, Sequencer, WriteBurst, WriteError};
pub use settings::ValidatorConfig;
pub use subtests::{Mismatch, Subtest, SubtestFailure, SubtestResult, SubtestSuite};
pub use transport::{simulated::SimulatedChip, Transport, TransportError};
pub use validator::{ValidationReport, Validator};

/// Computes the CRC-32 checksum used for read-back and retention comparisons.
///
/// This is CRC-32/ISO-HDLC, the same checksum as zlib's `crc32`.
pub fn checksum(data: &[u8]) -> u32 {
    crc::crc32::checksum_ieee(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_zlib() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(&[]), 0);
    }
}
