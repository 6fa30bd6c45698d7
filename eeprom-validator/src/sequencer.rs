//! Page-aware writing with write-cycle polling.
//!
//! An EEPROM commits at most one page per internal write cycle. The [`Sequencer`] splits a
//! write into bursts that each stay inside a page, sends them one at a time and waits for the
//! chip to acknowledge again after each of them before sending the next.

use std::ops::Range;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ChipProfile;
use crate::progress::ValidationProgress;
use crate::transport::{Transport, TransportError};

/// How a write is cut into bursts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BurstMode {
    /// Split at every page boundary.
    #[default]
    Paged,
    /// Send the whole range as one burst, even if it crosses page boundaries.
    ///
    /// Only the boundary subtests use this, to provoke the split on purpose.
    Unsplit,
}

/// A single physical write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBurst {
    /// The chip address of the first byte.
    pub address: u32,
    /// Offset of the first byte within the data being written.
    pub offset: usize,
    /// Number of bytes in the burst.
    pub length: usize,
}

impl WriteBurst {
    /// The slice of the written data covered by this burst.
    pub fn data_range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// A write that did not complete.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum WriteError {
    /// The chip did not finish the write cycle of the burst at {address:#06x} within {timeout:?}.
    WriteTimeout {
        /// The first address of the unacknowledged burst.
        address: u32,
        /// The configured write-cycle timeout.
        timeout: Duration,
        /// The address of the last burst that was fully committed.
        last_committed: Option<u32>,
    },

    /// Sending the burst at {address:#06x} failed.
    Transport {
        /// The first address of the failed burst.
        address: u32,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
        /// The address of the last burst that was fully committed.
        last_committed: Option<u32>,
    },
}

impl WriteError {
    /// The address of the last burst that was fully committed before the failure.
    pub fn last_committed(&self) -> Option<u32> {
        match self {
            WriteError::WriteTimeout { last_committed, .. }
            | WriteError::Transport { last_committed, .. } => *last_committed,
        }
    }

    /// The address of the burst that failed.
    pub fn address(&self) -> u32 {
        match self {
            WriteError::WriteTimeout { address, .. } | WriteError::Transport { address, .. } => {
                *address
            }
        }
    }
}

/// Writes byte ranges burst by burst and waits for every write cycle to finish.
#[derive(Debug, Clone)]
pub struct Sequencer {
    page_size: u32,
    timeout: Duration,
    poll_interval: Duration,
    progress: ValidationProgress,
}

impl Sequencer {
    /// The default bound on a single write cycle.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

    /// The default pause between two readiness polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Creates a sequencer for the page geometry of `profile`.
    pub fn new(profile: &ChipProfile, timeout: Duration) -> Self {
        Self {
            page_size: profile.page_size,
            timeout,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            progress: ValidationProgress::silent(),
        }
    }

    /// Sets the pause between two readiness polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the handler receiving a [`BurstCommitted`](crate::ProgressEvent::BurstCommitted)
    /// event for every burst.
    pub fn with_progress(mut self, progress: ValidationProgress) -> Self {
        self.progress = progress;
        self
    }

    /// The configured write-cycle timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cuts `length` bytes starting at `address` into bursts.
    ///
    /// In [`BurstMode::Paged`] the first burst runs up to the first page boundary after
    /// `address`, every following burst is one full page and the last one may be shorter.
    ///
    /// The plan is empty if the range runs past the 32-bit address space.
    pub fn plan(&self, address: u32, length: usize, mode: BurstMode) -> Vec<WriteBurst> {
        let mut bursts = Vec::new();
        let mut offset = 0;

        if u64::from(address) + length as u64 > u64::from(u32::MAX) + 1 {
            return bursts;
        }

        while offset < length {
            let burst_address = address + offset as u32;
            let remaining = length - offset;

            let burst_length = match mode {
                BurstMode::Paged => {
                    let to_boundary = self.page_size - burst_address % self.page_size;
                    remaining.min(to_boundary as usize)
                }
                BurstMode::Unsplit => remaining,
            };

            bursts.push(WriteBurst {
                address: burst_address,
                offset,
                length: burst_length,
            });
            offset += burst_length;
        }

        bursts
    }

    /// Writes `data` to the chip starting at `address`.
    ///
    /// Returns the bursts that were committed. On failure no burst after the failing one is
    /// sent, and the error names the last burst that was fully committed.
    pub fn write<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        address: u32,
        data: &[u8],
        mode: BurstMode,
    ) -> Result<Vec<WriteBurst>, WriteError> {
        let bursts = self.plan(address, data.len(), mode);
        let mut last_committed = None;

        if bursts.is_empty() && !data.is_empty() {
            return Err(WriteError::Transport {
                address,
                source: TransportError::OutOfRange {
                    address,
                    length: data.len(),
                },
                last_committed,
            });
        }

        for burst in &bursts {
            let t = Instant::now();

            tracing::debug!(
                "Writing burst of {} bytes at {:#06x}",
                burst.length,
                burst.address
            );

            transport
                .write_bytes(burst.address, &data[burst.data_range()])
                .map_err(|source| WriteError::Transport {
                    address: burst.address,
                    source,
                    last_committed,
                })?;

            if !self.wait_for_completion(transport) {
                return Err(WriteError::WriteTimeout {
                    address: burst.address,
                    timeout: self.timeout,
                    last_committed,
                });
            }

            last_committed = Some(burst.address);
            self.progress
                .burst_committed(burst.address, burst.length, t.elapsed());
        }

        Ok(bursts)
    }

    /// Polls the chip until it signals the end of its write cycle.
    ///
    /// Returns `false` if the chip was not ready within the timeout. The chip is polled at
    /// least once, even with a zero timeout. A poll interval longer than the timeout is cut
    /// short, so the last poll happens at the deadline.
    #[tracing::instrument(skip(self, transport))]
    pub fn wait_for_completion<T: Transport + ?Sized>(&self, transport: &mut T) -> bool {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            if transport.is_ready() {
                tracing::trace!("Chip ready after {} polls", polls);
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                break;
            }
            std::thread::sleep(self.poll_interval.min(self.timeout - elapsed));
        }

        tracing::warn!(
            "Chip still busy after {} polls within {:?}",
            polls,
            self.timeout
        );
        false
    }
}
