use std::path::PathBuf;

use crate::config::AddressRange;
use crate::subtests::Mismatch;
use crate::transport::TransportError;

/// Errors that end a validation run.
///
/// Failures local to a single subtest never show up here, they are recorded in the
/// subtest's [`SubtestResult`](crate::SubtestResult) instead.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum Error {
    /// The part '{0}' is not a supported EEPROM.
    UnsupportedChip(String),

    /// The geometry of part '{part_id}' is invalid: {reason}.
    InvalidGeometry {
        /// The part whose profile was rejected.
        part_id: String,
        /// The violated invariant.
        reason: &'static str,
    },

    /// The address range {range} is invalid: {reason}.
    InvalidRange {
        /// The offending range.
        range: AddressRange,
        /// Why the range was rejected.
        reason: String,
    },

    /// Error communicating with the EEPROM.
    Transport(#[from] TransportError),

    /// No snapshot artifact was found at {0:?}.
    SnapshotNotFound(PathBuf),

    /// The snapshot artifact is corrupt: {0}.
    SnapshotCorrupt(String),

    /// The snapshot was captured from part '{snapshot}', but part '{configured}' is configured.
    ChipMismatch {
        /// The part recorded in the snapshot.
        snapshot: String,
        /// The part of the current run.
        configured: String,
    },

    /// The EEPROM did not retain the captured data: {0}.
    RetentionMismatch(Mismatch),

    /// An I/O error occurred.
    Io(#[from] std::io::Error),
}
