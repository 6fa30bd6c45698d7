//! Progress reporting for validation runs.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AddressRange;
use crate::subtests::Subtest;

/// A structure to manage progress reporting during a validation run.
///
/// This struct stores a handler closure which will be called every time an event happens
/// during validation, such as a committed write burst or a finished subtest.
///
/// # Example
///
/// ```
/// use eeprom_validator::ValidationProgress;
///
/// // Print events
/// let progress = ValidationProgress::new(|event| println!("Event: {:#?}", event));
/// ```
#[derive(Clone)]
pub struct ValidationProgress {
    handler: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl ValidationProgress {
    /// Create a new `ValidationProgress` structure with a given `handler` to be called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A progress handler that discards all events.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(crate) fn subtest_started(&self, subtest: Subtest, range: AddressRange) {
        self.emit(ProgressEvent::SubtestStarted { subtest, range });
    }

    pub(crate) fn burst_committed(&self, address: u32, size: usize, time: Duration) {
        self.emit(ProgressEvent::BurstCommitted {
            address,
            size,
            time,
        });
    }

    pub(crate) fn subtest_finished(&self, subtest: Subtest, passed: bool) {
        self.emit(ProgressEvent::SubtestFinished { subtest, passed });
    }

    pub(crate) fn snapshot_captured(&self, range: AddressRange, checksum: u32) {
        self.emit(ProgressEvent::SnapshotCaptured { range, checksum });
    }

    pub(crate) fn retention_verified(&self, range: AddressRange, passed: bool) {
        self.emit(ProgressEvent::RetentionVerified { range, passed });
    }
}

impl Default for ValidationProgress {
    fn default() -> Self {
        Self::silent()
    }
}

impl std::fmt::Debug for ValidationProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationProgress").finish_non_exhaustive()
    }
}

/// Possible events during a validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A subtest is about to touch the chip.
    SubtestStarted {
        /// The subtest.
        subtest: Subtest,
        /// The range it writes.
        range: AddressRange,
    },
    /// A write burst was sent and the chip finished its write cycle.
    BurstCommitted {
        /// The first address of the burst.
        address: u32,
        /// The size of the burst in bytes.
        size: usize,
        /// The time it took to write the burst and see the chip ready again.
        time: Duration,
    },
    /// A subtest produced its result.
    SubtestFinished {
        /// The subtest.
        subtest: Subtest,
        /// Whether it passed.
        passed: bool,
    },
    /// A retention snapshot was captured.
    SnapshotCaptured {
        /// The captured range.
        range: AddressRange,
        /// The CRC-32 of the captured bytes.
        checksum: u32,
    },
    /// A retention snapshot was compared against the chip.
    RetentionVerified {
        /// The compared range.
        range: AddressRange,
        /// Whether the chip retained the data.
        passed: bool,
    },
}
