//! Retention snapshots
//!
//! Retention can only be checked across a power cycle, which never happens inside one
//! process. A full run captures the mid-block pattern into a snapshot file, and a later run
//! loads that file and reads the same range back from the chip.
//!
//! File layout:
//!
//! | Field    | Size     | Content                                              |
//! |----------|----------|------------------------------------------------------|
//! | Magic    | 4 bytes  | `EERS`                                               |
//! | Version  | 4 bytes  | Format version, little-endian `u32`                  |
//! | Payload  | variable | bincode `{part_id, start, length, checksum, data}`   |
//!
//! The raw pattern bytes are the last field of the payload and therefore the last `length`
//! bytes of the file.

use std::path::{Path, PathBuf};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::config::{AddressRange, ChipProfile};
use crate::subtests::verify;
use crate::transport::Transport;
use crate::Error;

const MAGIC: &[u8; 4] = b"EERS";

const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = MAGIC.len() + 4;

/// Fixed-width integers, and nothing may follow the payload.
fn payload_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// A captured pattern, waiting to be compared against the chip after a power cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSnapshot {
    part_id: String,
    range: AddressRange,
    checksum: u32,
    data: Vec<u8>,
}

/// The on-disk payload after the header.
#[derive(Serialize, Deserialize)]
struct Payload {
    part_id: String,
    start: u32,
    length: u32,
    checksum: u32,
    data: Vec<u8>,
}

impl RetentionSnapshot {
    /// Captures `data`, written to `range` of a `part_id` chip.
    pub fn capture(part_id: impl Into<String>, range: AddressRange, data: Vec<u8>) -> Self {
        let checksum = crate::checksum(&data);

        Self {
            part_id: part_id.into(),
            range,
            checksum,
            data,
        }
    }

    /// The part the snapshot was captured from.
    pub fn part_id(&self) -> &str {
        &self.part_id
    }

    /// The captured address range.
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// The CRC-32 recorded at capture time.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The captured bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the snapshot into the artifact format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let payload = Payload {
            part_id: self.part_id.clone(),
            start: self.range.start,
            length: self.range.length,
            checksum: self.checksum,
            data: self.data.clone(),
        };
        let payload = payload_codec()
            .serialize(&payload)
            .map_err(|e| Error::SnapshotCorrupt(format!("failed to encode payload: {e}")))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decodes a snapshot from the artifact format.
    ///
    /// Only the structure is checked here. Bytes that do not match the recorded checksum are
    /// reported when the snapshot is verified against the chip.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::SnapshotCorrupt(format!(
                "file is {} bytes, shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::SnapshotCorrupt("bad magic".to_string()));
        }

        let mut version = [0; 4];
        version.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(Error::SnapshotCorrupt(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }

        let payload: Payload = payload_codec()
            .deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| Error::SnapshotCorrupt(format!("failed to decode payload: {e}")))?;

        if payload.length as usize != payload.data.len() {
            return Err(Error::SnapshotCorrupt(format!(
                "range length {} does not match the {} captured bytes",
                payload.length,
                payload.data.len()
            )));
        }
        if payload.length == 0 {
            return Err(Error::SnapshotCorrupt("the snapshot is empty".to_string()));
        }

        Ok(Self {
            part_id: payload.part_id,
            range: AddressRange::new(payload.start, payload.length),
            checksum: payload.checksum,
            data: payload.data,
        })
    }

    /// Writes the snapshot to `path`, replacing any previous file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()?)?;
        tracing::debug!("Saved retention snapshot of {} to {:?}", self.range, path);
        Ok(())
    }

    /// Reads a snapshot from `path`.
    ///
    /// Fails with [`Error::SnapshotNotFound`] if there is no file, and with
    /// [`Error::SnapshotCorrupt`] if its structure is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SnapshotNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_bytes(&bytes)
    }

    /// Reads the captured range back from the chip and compares it against the snapshot.
    ///
    /// Returns the checksum of the retained bytes.
    pub fn verify<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        profile: &ChipProfile,
    ) -> Result<u32, Error> {
        if !self.part_id.eq_ignore_ascii_case(&profile.part_id) {
            return Err(Error::ChipMismatch {
                snapshot: self.part_id.clone(),
                configured: profile.part_id.clone(),
            });
        }
        if profile.check_range(self.range).is_err() {
            return Err(Error::SnapshotCorrupt(format!(
                "range {} does not fit part '{}'",
                self.range, profile.part_id
            )));
        }

        let read_back = transport.read_vec(self.range.start, self.data.len())?;

        verify(self.range.start, &self.data, self.checksum, &read_back).map_err(|mismatch| {
            tracing::error!("Retention check of {} failed: {}", self.range, mismatch);
            Error::RetentionMismatch(mismatch)
        })
    }
}

/// The outcome of one half of the retention protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionOutcome {
    /// A snapshot was captured at the end of a full run.
    Captured {
        /// Where the snapshot was written.
        path: PathBuf,
        /// The captured range.
        range: AddressRange,
        /// The CRC-32 of the captured bytes.
        checksum: u32,
    },
    /// A snapshot was compared against the chip and the data was retained.
    Verified {
        /// The compared range.
        range: AddressRange,
        /// The CRC-32 of the retained bytes.
        checksum: u32,
    },
}

impl RetentionOutcome {
    /// The address range covered by the snapshot.
    pub fn range(&self) -> AddressRange {
        match self {
            RetentionOutcome::Captured { range, .. } | RetentionOutcome::Verified { range, .. } => {
                *range
            }
        }
    }

    /// The checksum of the captured or retained bytes.
    pub fn checksum(&self) -> u32 {
        match self {
            RetentionOutcome::Captured { checksum, .. }
            | RetentionOutcome::Verified { checksum, .. } => *checksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtests::random_pattern;
    use crate::{Registry, SimulatedChip};
    use pretty_assertions::assert_eq;

    fn snapshot() -> RetentionSnapshot {
        RetentionSnapshot::capture(
            "24c64",
            AddressRange::new(4000, 64),
            random_pattern(1234, 64),
        )
    }

    fn chip_with(snapshot: &RetentionSnapshot) -> SimulatedChip {
        let profile = Registry::from_builtin_profiles().get_profile("24c64").unwrap();
        let mut chip = SimulatedChip::new(profile);
        let start = snapshot.range().start as usize;
        chip.memory_mut()[start..start + snapshot.data().len()].copy_from_slice(snapshot.data());
        chip
    }

    #[test]
    fn capture_is_idempotent() {
        let first = snapshot();
        let second = snapshot();

        assert_eq!(first.checksum(), second.checksum());
        assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
    }

    #[test]
    fn payload_is_at_the_end_of_the_file() {
        let snapshot = snapshot();
        let bytes = snapshot.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"EERS");
        assert_eq!(&bytes[bytes.len() - 64..], snapshot.data());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midblock.bin");

        let snapshot = snapshot();
        snapshot.save(&path).unwrap();

        assert_eq!(RetentionSnapshot::load(&path).unwrap(), snapshot);
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.bin");

        assert!(matches!(
            RetentionSnapshot::load(&path),
            Err(Error::SnapshotNotFound(p)) if p == path
        ));
    }

    #[test]
    fn structural_corruption() {
        let bytes = snapshot().to_bytes().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        let mut bad_version = bytes.clone();
        bad_version[4] = 2;
        let truncated = &bytes[..bytes.len() - 10];

        for corrupt in [&bad_magic[..], &bad_version[..], truncated, &bytes[..6], &bytes[..0]] {
            assert!(matches!(
                RetentionSnapshot::from_bytes(corrupt),
                Err(Error::SnapshotCorrupt(_))
            ));
        }
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut bytes = snapshot().to_bytes().unwrap();
        bytes.extend_from_slice(b"GARBAGE");

        assert!(matches!(
            RetentionSnapshot::from_bytes(&bytes),
            Err(Error::SnapshotCorrupt(_))
        ));
    }

    #[test]
    fn length_must_match_data() {
        let payload = Payload {
            part_id: "24c64".to_string(),
            start: 4000,
            length: 65,
            checksum: 0,
            data: vec![0; 64],
        };
        let mut bytes = b"EERS".to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&bincode::serialize(&payload).unwrap());

        assert!(matches!(
            RetentionSnapshot::from_bytes(&bytes),
            Err(Error::SnapshotCorrupt(_))
        ));
    }

    #[test]
    fn verify_retained_data() {
        let snapshot = snapshot();
        let mut chip = chip_with(&snapshot);
        chip.power_cycle();
        let profile = chip.profile().clone();

        let checksum = snapshot.verify(&mut chip, &profile).unwrap();
        assert_eq!(checksum, snapshot.checksum());
    }

    #[test]
    fn tampered_payload_reports_offset() {
        let snapshot = snapshot();
        let mut chip = chip_with(&snapshot);

        let mut bytes = snapshot.to_bytes().unwrap();
        let len = bytes.len();
        bytes[len - 64 + 17] ^= 0xFF;
        let tampered = RetentionSnapshot::from_bytes(&bytes).unwrap();

        let profile = chip.profile().clone();
        match tampered.verify(&mut chip, &profile) {
            Err(Error::RetentionMismatch(mismatch)) => assert_eq!(mismatch.address, Some(4017)),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn other_chip_is_rejected() {
        let snapshot = snapshot();
        let profile = Registry::from_builtin_profiles().get_profile("24c08").unwrap();
        let mut chip = SimulatedChip::new(profile.clone());

        assert!(matches!(
            snapshot.verify(&mut chip, &profile),
            Err(Error::ChipMismatch { .. })
        ));
        assert!(chip.writes().is_empty());
    }

    #[test]
    fn read_failure_is_fatal() {
        let snapshot = snapshot();
        let mut chip = chip_with(&snapshot);
        chip.set_fail_reads(true);
        let profile = chip.profile().clone();

        assert!(matches!(
            snapshot.verify(&mut chip, &profile),
            Err(Error::Transport(_))
        ));
    }
}
