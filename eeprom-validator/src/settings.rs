//! Run configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `EEPROM_VALIDATOR_`. Later layers override earlier ones.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::config::{ChipProfile, Registry};
use crate::Error;

/// Prefix of the environment variables read by [`ValidatorConfig::load`].
pub const ENV_PREFIX: &str = "EEPROM_VALIDATOR_";

/// Bus address of the first segment of the default 24c08 part, with A2 strapped high.
pub const DEFAULT_BUS_ADDRESS: u8 = 0x54;

/// Everything the engine needs to know about a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    /// The part identifier of the chip under test.
    pub chip: String,
    /// The 7-bit bus address of the chip. For 1-byte-address parts this is the address of the
    /// first segment.
    ///
    /// Read by [`I2cTransport::from_config`](crate::transport::i2c::I2cTransport::from_config).
    pub bus_address: u8,
    /// Bound on a single write cycle, in milliseconds.
    #[serde(with = "duration_ms")]
    pub write_timeout: Duration,
    /// Pause between two readiness polls, in milliseconds.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Length of the mid-block pattern.
    ///
    /// Defaults to [`DEFAULT_MID_BLOCK_LENGTH`](crate::subtests::DEFAULT_MID_BLOCK_LENGTH)
    /// bytes. Without an offset either, the default is
    /// cut short at the end of the block on small parts.
    pub mid_block_length: Option<u32>,
    /// Start of the mid-block pattern. Placed half a page past the middle of the chip if unset.
    pub mid_block_offset: Option<u32>,
    /// Seed of the mid-block pattern.
    pub pattern_seed: u64,
    /// Where the retention snapshot is written and read.
    pub snapshot_path: PathBuf,
    /// Additional part profiles. A profile with the id of a built-in part replaces it.
    pub chips: Vec<ChipProfile>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            chip: "24c08".to_string(),
            bus_address: DEFAULT_BUS_ADDRESS,
            write_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            mid_block_length: None,
            mid_block_offset: None,
            pattern_seed: 1234,
            snapshot_path: PathBuf::from("midblock.bin"),
            chips: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Builds the configuration layers, with the TOML file at `path` if one is given.
    ///
    /// A missing file contributes nothing.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ValidatorConfig::default()));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Loads the configuration from defaults, the TOML file at `path` and the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(Some(path.as_ref())).extract()
    }

    /// Loads the configuration from defaults and the environment only.
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// The built-in parts plus the custom profiles of this configuration.
    pub fn registry(&self) -> Result<Registry, Error> {
        let mut registry = Registry::from_builtin_profiles();
        for profile in &self.chips {
            registry.add_profile(profile.clone())?;
        }
        Ok(registry)
    }

    /// The profile of the configured chip.
    ///
    /// Fails with [`Error::UnsupportedChip`] if the part is neither built in nor configured.
    pub fn profile(&self) -> Result<ChipProfile, Error> {
        self.registry()?.get_profile(&self.chip)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
