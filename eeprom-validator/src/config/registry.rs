//! The enumeration of supported parts.

use super::chip::ChipProfile;
use crate::Error;

/// `(part_id, address_width, page_size, capacity, block_size)` of every built-in part.
const BUILTIN_PROFILES: &[(&str, u8, u32, u32, u32)] = &[
    ("24c08", 1, 16, 1024, 256),
    ("24c16", 1, 16, 2048, 256),
    ("24c32", 2, 32, 4096, 256),
    ("24c64", 2, 32, 8192, 256),
    ("24c128", 2, 64, 16384, 256),
    ("24c256", 2, 64, 32768, 256),
];

/// The set of EEPROM parts the validator knows how to exercise.
#[derive(Debug, Clone)]
pub struct Registry {
    profiles: Vec<ChipProfile>,
}

impl Registry {
    /// Creates a registry holding the built-in 24Cxx profiles.
    pub fn from_builtin_profiles() -> Self {
        let profiles = BUILTIN_PROFILES
            .iter()
            .map(
                |&(part_id, address_width, page_size, capacity, block_size)| ChipProfile {
                    part_id: part_id.to_string(),
                    address_width,
                    page_size,
                    capacity,
                    block_size,
                },
            )
            .collect();

        Self { profiles }
    }

    /// All profiles known to this registry.
    pub fn profiles(&self) -> &[ChipProfile] {
        &self.profiles
    }

    /// Looks up the profile for `part_id`, ignoring case.
    pub fn get_profile(&self, part_id: &str) -> Result<ChipProfile, Error> {
        let part_id = part_id.trim();

        self.profiles
            .iter()
            .find(|profile| profile.part_id.eq_ignore_ascii_case(part_id))
            .cloned()
            .ok_or_else(|| Error::UnsupportedChip(part_id.to_string()))
    }

    /// Adds a custom profile, replacing any existing profile with the same part id.
    pub fn add_profile(&mut self, profile: ChipProfile) -> Result<(), Error> {
        profile.validate()?;

        if let Some(index) = self
            .profiles
            .iter()
            .position(|old| old.part_id.eq_ignore_ascii_case(&profile.part_id))
        {
            tracing::warn!("Replacing existing profile for part {}", profile.part_id);
            self.profiles.remove(index);
        }
        self.profiles.push(profile);

        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::from_builtin_profiles()
    }
}
