//! The four boundary and pattern checks run against every chip.

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{AddressRange, ChipProfile};
use crate::error::Error;
use crate::progress::ValidationProgress;
use crate::sequencer::{BurstMode, Sequencer, WriteError};
use crate::settings::ValidatorConfig;
use crate::transport::{Transport, TransportError};

/// The byte written by the last-byte subtest.
pub const LAST_BYTE_VALUE: u8 = 0xAA;

/// Length of the mid-block pattern unless configured otherwise.
pub const DEFAULT_MID_BLOCK_LENGTH: u32 = 128;

/// First value of the incrementing block-cross pattern.
const BLOCK_CROSS_PATTERN_BASE: u8 = 0xA0;

/// One of the checks in the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtest {
    /// Writes a single byte at the highest address.
    LastByte,
    /// Writes a short pattern across the first page boundary in one burst.
    PageCross,
    /// Writes a longer pattern across the first block boundary in one burst.
    BlockCross,
    /// Writes a pseudo-random pattern inside a block, split at page boundaries.
    MidBlock,
}

impl Subtest {
    /// All subtests in the order they are run.
    pub const ALL: [Subtest; 4] = [
        Subtest::LastByte,
        Subtest::PageCross,
        Subtest::BlockCross,
        Subtest::MidBlock,
    ];

    /// The name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Subtest::LastByte => "last_byte",
            Subtest::PageCross => "page_cross",
            Subtest::BlockCross => "block_cross",
            Subtest::MidBlock => "mid_block",
        }
    }

    /// The boundary subtests bypass page splitting on purpose.
    pub fn burst_mode(&self) -> BurstMode {
        match self {
            Subtest::PageCross | Subtest::BlockCross => BurstMode::Unsplit,
            Subtest::LastByte | Subtest::MidBlock => BurstMode::Paged,
        }
    }
}

impl fmt::Display for Subtest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A difference between the bytes expected on the chip and the bytes read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Absolute chip address of the first differing byte.
    ///
    /// `None` if all bytes match and only the checksums differ.
    pub address: Option<u32>,
    /// CRC-32 of the expected bytes.
    pub expected_checksum: u32,
    /// CRC-32 of the bytes read back.
    pub actual_checksum: u32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "first difference at {address:#06x}, ")?,
            None => write!(f, "bytes match, ")?,
        }
        write!(
            f,
            "expected checksum {:#010x}, got {:#010x}",
            self.expected_checksum, self.actual_checksum
        )
    }
}

/// Compares the bytes read back from `start` against `expected`.
///
/// Passes only if both the byte-for-byte comparison and the CRC-32 comparison succeed, and
/// returns the checksum in that case.
pub fn verify(
    start: u32,
    expected: &[u8],
    expected_checksum: u32,
    actual: &[u8],
) -> Result<u32, Mismatch> {
    let actual_checksum = crate::checksum(actual);

    let first_difference = expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())));

    if first_difference.is_none() && expected_checksum == actual_checksum {
        return Ok(actual_checksum);
    }

    Err(Mismatch {
        address: first_difference.map(|i| start + i as u32),
        expected_checksum,
        actual_checksum,
    })
}

/// Why a single subtest failed.
///
/// Failures are recorded in the [`SubtestResult`] and never stop the remaining subtests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error, docsplay::Display)]
pub enum SubtestFailure {
    /// A bus transaction at {address:#06x} failed: {source}
    Transport {
        /// The first address of the failed burst or read.
        address: u32,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
        /// The address of the last burst that was fully committed.
        last_committed: Option<u32>,
    },

    /// The chip did not finish the write cycle of the burst at {address:#06x} within {timeout:?}.
    WriteTimeout {
        /// The first address of the unacknowledged burst.
        address: u32,
        /// The configured write-cycle timeout.
        timeout: Duration,
        /// The address of the last burst that was fully committed.
        last_committed: Option<u32>,
    },

    /// Read-back mismatch: {0}
    VerifyMismatch(Mismatch),
}

impl From<WriteError> for SubtestFailure {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::WriteTimeout {
                address,
                timeout,
                last_committed,
            } => SubtestFailure::WriteTimeout {
                address,
                timeout,
                last_committed,
            },
            WriteError::Transport {
                address,
                source,
                last_committed,
            } => SubtestFailure::Transport {
                address,
                source,
                last_committed,
            },
        }
    }
}

/// The outcome of one subtest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtestResult {
    /// The subtest that produced this result.
    pub subtest: Subtest,
    /// Human readable description of the written pattern.
    pub pattern_description: String,
    /// The address range written and read back.
    pub range: AddressRange,
    /// Number of bytes committed to the chip.
    pub bytes_written: usize,
    /// Number of bytes read back.
    pub bytes_read_back: usize,
    /// CRC-32 of the written pattern.
    pub checksum_expected: u32,
    /// CRC-32 of the bytes read back, if the read succeeded.
    pub checksum_actual: Option<u32>,
    /// Whether the subtest passed.
    pub passed: bool,
    /// What went wrong, if the subtest failed.
    pub error: Option<SubtestFailure>,
    /// Time spent writing and reading back.
    pub elapsed: Duration,
}

impl SubtestResult {
    /// The name of the subtest.
    pub fn name(&self) -> &'static str {
        self.subtest.name()
    }
}

/// The data and location of one subtest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPattern {
    /// The subtest this pattern belongs to.
    pub subtest: Subtest,
    /// Where the pattern is written.
    pub range: AddressRange,
    /// The bytes to write.
    pub data: Vec<u8>,
    /// Human readable description of the bytes.
    pub description: String,
}

/// Generates `length` pseudo-random bytes from `seed`.
///
/// The same seed always yields the same bytes.
pub fn random_pattern(seed: u64, length: usize) -> Vec<u8> {
    let mut data = vec![0; length];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// The planned subtests for one chip.
#[derive(Debug, Clone)]
pub struct SubtestSuite {
    patterns: Vec<TestPattern>,
}

impl SubtestSuite {
    /// Places the four subtests on the chip described by `profile`.
    ///
    /// Fails with [`Error::InvalidGeometry`] for a profile that does not pass
    /// [`ChipProfile::validate`], and with [`Error::InvalidRange`] if a range does not fit on
    /// the chip or two ranges overlap. Nothing is sent to the chip.
    pub fn plan(profile: &ChipProfile, config: &ValidatorConfig) -> Result<Self, Error> {
        profile.validate()?;

        let page_cross = profile.page_cross_range();
        let block_cross = profile.block_cross_range();

        let mid_block = match config.mid_block_offset {
            Some(start) => AddressRange::new(
                start,
                config.mid_block_length.unwrap_or(DEFAULT_MID_BLOCK_LENGTH),
            ),
            None => default_mid_block(profile, config.mid_block_length),
        };

        let patterns = vec![
            TestPattern {
                subtest: Subtest::LastByte,
                range: AddressRange::new(profile.last_address(), 1),
                data: vec![LAST_BYTE_VALUE],
                description: format!("{LAST_BYTE_VALUE:#04x}"),
            },
            TestPattern {
                subtest: Subtest::PageCross,
                range: page_cross,
                data: (0..page_cross.length).map(|i| i as u8).collect(),
                description: "incrementing from 0x00".to_string(),
            },
            TestPattern {
                subtest: Subtest::BlockCross,
                range: block_cross,
                data: (0..block_cross.length)
                    .map(|i| BLOCK_CROSS_PATTERN_BASE.wrapping_add(i as u8))
                    .collect(),
                description: format!("incrementing from {BLOCK_CROSS_PATTERN_BASE:#04x}"),
            },
            TestPattern {
                subtest: Subtest::MidBlock,
                range: mid_block,
                data: random_pattern(config.pattern_seed, mid_block.length as usize),
                description: format!("pseudo-random, seed {}", config.pattern_seed),
            },
        ];

        for (i, pattern) in patterns.iter().enumerate() {
            profile.check_range(pattern.range)?;

            if let Some(other) = patterns[..i]
                .iter()
                .find(|other| other.range.overlaps(&pattern.range))
            {
                return Err(Error::InvalidRange {
                    range: pattern.range,
                    reason: format!(
                        "the {} range overlaps the {} range {}",
                        pattern.subtest, other.subtest, other.range
                    ),
                });
            }
        }

        Ok(Self { patterns })
    }

    /// The planned patterns, in run order.
    pub fn patterns(&self) -> &[TestPattern] {
        &self.patterns
    }

    /// The pattern of a single subtest.
    pub fn pattern(&self, subtest: Subtest) -> Option<&TestPattern> {
        self.patterns.iter().find(|p| p.subtest == subtest)
    }

    /// Runs every subtest, in order, and collects the results.
    pub fn run<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        sequencer: &Sequencer,
        progress: &ValidationProgress,
    ) -> Vec<SubtestResult> {
        self.patterns
            .iter()
            .map(|pattern| {
                progress.subtest_started(pattern.subtest, pattern.range);
                let result = run_subtest(pattern, transport, sequencer);
                progress.subtest_finished(pattern.subtest, result.passed);
                result
            })
            .collect()
    }
}

/// Places the mid-block pattern half a page past the middle of the chip, or past the
/// block-cross range if that reaches further.
///
/// Without a configured length the pattern ends early at the end of its block, and always
/// before the last byte.
fn default_mid_block(profile: &ChipProfile, length: Option<u32>) -> AddressRange {
    let block_cross = profile.block_cross_range();
    let start = (profile.capacity / 2).max(block_cross.start + block_cross.length)
        + profile.page_size / 2;

    let length = length.unwrap_or_else(|| {
        let block_end = (start / profile.block_size + 1) * profile.block_size;
        let limit = block_end.min(profile.last_address());
        DEFAULT_MID_BLOCK_LENGTH.min(limit.saturating_sub(start))
    });

    AddressRange::new(start, length)
}

/// Writes a pattern, reads it back and verifies it.
pub fn run_subtest<T: Transport + ?Sized>(
    pattern: &TestPattern,
    transport: &mut T,
    sequencer: &Sequencer,
) -> SubtestResult {
    let t = Instant::now();
    let range = pattern.range;
    let mode = pattern.subtest.burst_mode();
    let checksum_expected = crate::checksum(&pattern.data);

    let mut result = SubtestResult {
        subtest: pattern.subtest,
        pattern_description: pattern.description.clone(),
        range,
        bytes_written: 0,
        bytes_read_back: 0,
        checksum_expected,
        checksum_actual: None,
        passed: false,
        error: None,
        elapsed: Duration::ZERO,
    };

    let mut last_committed = None;
    match sequencer.write(transport, range.start, &pattern.data, mode) {
        Ok(bursts) => {
            result.bytes_written = pattern.data.len();
            last_committed = bursts.last().map(|burst| burst.address);
        }
        Err(error) => {
            result.bytes_written = committed_bytes(sequencer, pattern, error.last_committed());
            result.error = Some(error.into());
        }
    }

    if result.error.is_none() {
        match transport.read_vec(range.start, pattern.data.len()) {
            Ok(read_back) => {
                result.bytes_read_back = read_back.len();
                result.checksum_actual = Some(crate::checksum(&read_back));

                match verify(range.start, &pattern.data, checksum_expected, &read_back) {
                    Ok(_) => result.passed = true,
                    Err(mismatch) => {
                        tracing::warn!("{} mismatch in {}: {}", pattern.subtest, range, mismatch);
                        result.error = Some(SubtestFailure::VerifyMismatch(mismatch));
                    }
                }
            }
            Err(source) => {
                result.error = Some(SubtestFailure::Transport {
                    address: range.start,
                    source,
                    last_committed,
                })
            }
        }
    }

    result.elapsed = t.elapsed();

    match &result.error {
        None => tracing::info!("{} ({}): OK", pattern.subtest, range),
        Some(error) => tracing::info!("{} ({}): FAILED, {}", pattern.subtest, range, error),
    }

    result
}

fn committed_bytes(sequencer: &Sequencer, pattern: &TestPattern, last: Option<u32>) -> usize {
    let Some(last) = last else {
        return 0;
    };

    sequencer
        .plan(
            pattern.range.start,
            pattern.data.len(),
            pattern.subtest.burst_mode(),
        )
        .iter()
        .take_while(|burst| burst.address <= last)
        .map(|burst| burst.length)
        .sum()
}
