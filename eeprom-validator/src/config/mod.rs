//! Chip geometry and the registry of supported parts.

pub mod chip;
pub mod registry;

pub use chip::{AddressRange, ChipProfile, SEGMENT_SIZE};
pub use registry::Registry;
