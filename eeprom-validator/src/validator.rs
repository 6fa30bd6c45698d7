use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ChipProfile;
use crate::progress::ValidationProgress;
use crate::retention::{RetentionOutcome, RetentionSnapshot};
use crate::sequencer::Sequencer;
use crate::settings::ValidatorConfig;
use crate::subtests::{Subtest, SubtestResult, SubtestSuite};
use crate::transport::Transport;
use crate::Error;

/// The results of a validation run, handed to whatever renders reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// The part that was validated.
    pub part_id: String,
    /// One result per subtest, in run order.
    pub results: Vec<SubtestResult>,
    /// The retention half of the run, if one took place.
    pub retention: Option<RetentionOutcome>,
    /// Total time of the run.
    pub elapsed: Duration,
}

impl ValidationReport {
    /// Whether every subtest passed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|result| result.passed)
    }

    /// The result of a single subtest.
    pub fn result(&self, subtest: Subtest) -> Option<&SubtestResult> {
        self.results.iter().find(|result| result.subtest == subtest)
    }
}

/// Entry points of the validation engine.
///
/// A validator is bound to one chip profile. The bus is passed to every call, so the same
/// validator can run against a real chip and a simulated one.
#[derive(Debug, Clone)]
pub struct Validator {
    profile: ChipProfile,
    config: ValidatorConfig,
    sequencer: Sequencer,
    progress: ValidationProgress,
}

impl Validator {
    /// Creates a validator for `profile` using the timing and pattern settings of `config`.
    pub fn new(profile: ChipProfile, config: &ValidatorConfig) -> Self {
        let sequencer = Sequencer::new(&profile, config.write_timeout)
            .with_poll_interval(config.poll_interval);

        Self {
            profile,
            config: config.clone(),
            sequencer,
            progress: ValidationProgress::silent(),
        }
    }

    /// Creates a validator for the chip named in `config`.
    ///
    /// Fails with [`Error::UnsupportedChip`] if the part is unknown.
    pub fn from_config(config: &ValidatorConfig) -> Result<Self, Error> {
        Ok(Self::new(config.profile()?, config))
    }

    /// Sets the handler receiving progress events.
    pub fn with_progress(mut self, progress: ValidationProgress) -> Self {
        self.sequencer = self.sequencer.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    /// The profile of the chip under test.
    pub fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// Runs the four subtests and captures the mid-block pattern into the snapshot file.
    ///
    /// Subtest failures are part of the report. The snapshot is only captured if the mid-block
    /// subtest passed. Invalid subtest placement and a failure to write the snapshot file are
    /// fatal.
    pub fn run_full<T: Transport>(&self, mut transport: T) -> Result<ValidationReport, Error> {
        let t = Instant::now();
        tracing::info!("Validating {}", self.profile);

        let suite = SubtestSuite::plan(&self.profile, &self.config)?;
        let results = suite.run(&mut transport, &self.sequencer, &self.progress);

        let mid_block_passed = results
            .iter()
            .any(|result| result.subtest == Subtest::MidBlock && result.passed);

        let retention = match suite.pattern(Subtest::MidBlock) {
            Some(pattern) if mid_block_passed => {
                let snapshot = RetentionSnapshot::capture(
                    self.profile.part_id.clone(),
                    pattern.range,
                    pattern.data.clone(),
                );
                Some(self.capture(&snapshot, &self.config.snapshot_path)?)
            }
            _ => {
                tracing::warn!("Mid-block subtest failed, no retention snapshot captured");
                None
            }
        };

        let report = ValidationReport {
            part_id: self.profile.part_id.clone(),
            results,
            retention,
            elapsed: t.elapsed(),
        };

        tracing::info!(
            "Validation of {} {} in {:?}",
            report.part_id,
            if report.passed() { "passed" } else { "failed" },
            report.elapsed
        );

        Ok(report)
    }

    fn capture(
        &self,
        snapshot: &RetentionSnapshot,
        path: &Path,
    ) -> Result<RetentionOutcome, Error> {
        snapshot.save(path)?;
        self.progress
            .snapshot_captured(snapshot.range(), snapshot.checksum());

        Ok(RetentionOutcome::Captured {
            path: PathBuf::from(path),
            range: snapshot.range(),
            checksum: snapshot.checksum(),
        })
    }

    /// Loads the snapshot at `path` and checks that the chip still holds the captured bytes.
    ///
    /// Nothing is written to the chip. Every failure is fatal.
    pub fn verify_retention<T: Transport>(
        &self,
        mut transport: T,
        path: impl AsRef<Path>,
    ) -> Result<RetentionOutcome, Error> {
        let snapshot = RetentionSnapshot::load(path)?;
        let range = snapshot.range();

        match snapshot.verify(&mut transport, &self.profile) {
            Ok(checksum) => {
                tracing::info!("Retention of {} verified, CRC-32 {:#010x}", range, checksum);
                self.progress.retention_verified(range, true);
                Ok(RetentionOutcome::Verified { range, checksum })
            }
            Err(error) => {
                if let Error::RetentionMismatch(_) = error {
                    self.progress.retention_verified(range, false);
                }
                Err(error)
            }
        }
    }

    /// Runs [`verify_retention`](Self::verify_retention) against the configured snapshot path
    /// and wraps the outcome in a report without subtest results.
    pub fn verify_retention_report<T: Transport>(
        &self,
        transport: T,
    ) -> Result<ValidationReport, Error> {
        let t = Instant::now();
        let outcome = self.verify_retention(transport, &self.config.snapshot_path)?;

        Ok(ValidationReport {
            part_id: self.profile.part_id.clone(),
            results: Vec::new(),
            retention: Some(outcome),
            elapsed: t.elapsed(),
        })
    }
}
