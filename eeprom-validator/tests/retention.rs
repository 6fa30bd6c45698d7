use eeprom_validator::{
    Error, RetentionOutcome, RetentionSnapshot, SimulatedChip, Subtest, Validator,
    ValidatorConfig,
};
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs the full suite and returns the chip, the configuration and the temporary directory
/// holding the snapshot.
fn captured_run(chip: &str) -> (SimulatedChip, ValidatorConfig, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ValidatorConfig {
        chip: chip.to_string(),
        snapshot_path: dir.path().join("midblock.bin"),
        poll_interval: std::time::Duration::ZERO,
        ..ValidatorConfig::default()
    };

    let validator = Validator::from_config(&config).unwrap();
    let mut chip = SimulatedChip::new(validator.profile().clone());
    let report = validator.run_full(&mut chip).unwrap();
    assert!(report.passed());

    (chip, config, dir)
}

#[test]
fn retention_survives_power_cycle() {
    init_logging();
    let (mut chip, config, _dir) = captured_run("24c64");
    chip.power_cycle();
    chip.clear_writes();

    // A new validator, as a separate invocation would build it.
    let validator = Validator::from_config(&config).unwrap();
    let outcome = validator
        .verify_retention(&mut chip, &config.snapshot_path)
        .unwrap();

    let snapshot = RetentionSnapshot::load(&config.snapshot_path).unwrap();
    assert_eq!(
        outcome,
        RetentionOutcome::Verified {
            range: snapshot.range(),
            checksum: snapshot.checksum(),
        }
    );
    assert!(chip.writes().is_empty());
}

#[test]
fn captured_outcome_matches_mid_block() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = ValidatorConfig {
        chip: "24c08".to_string(),
        snapshot_path: dir.path().join("midblock.bin"),
        ..ValidatorConfig::default()
    };
    let validator = Validator::from_config(&config).unwrap();
    let mut chip = SimulatedChip::new(validator.profile().clone());

    let report = validator.run_full(&mut chip).unwrap();
    let mid = report.result(Subtest::MidBlock).unwrap();

    match &report.retention {
        Some(RetentionOutcome::Captured {
            path,
            range,
            checksum,
        }) => {
            assert_eq!(path, &config.snapshot_path);
            assert_eq!(*range, mid.range);
            assert_eq!(*checksum, mid.checksum_expected);
        }
        other => panic!("unexpected retention outcome {other:?}"),
    }
}

#[test]
fn tampered_snapshot_reports_corrupted_offset() {
    init_logging();
    let (mut chip, config, _dir) = captured_run("24c64");
    chip.power_cycle();

    let snapshot = RetentionSnapshot::load(&config.snapshot_path).unwrap();
    let range = snapshot.range();

    // The captured bytes are the tail of the file.
    let mut bytes = std::fs::read(&config.snapshot_path).unwrap();
    let len = bytes.len();
    let corrupted = 42;
    bytes[len - range.length as usize + corrupted] ^= 0x01;
    std::fs::write(&config.snapshot_path, bytes).unwrap();

    let validator = Validator::from_config(&config).unwrap();
    match validator.verify_retention(&mut chip, &config.snapshot_path) {
        Err(Error::RetentionMismatch(mismatch)) => {
            assert_eq!(mismatch.address, Some(range.start + corrupted as u32));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn lost_data_is_a_mismatch() {
    init_logging();
    let (mut chip, config, _dir) = captured_run("24c08");
    chip.power_cycle();

    let range = RetentionSnapshot::load(&config.snapshot_path)
        .unwrap()
        .range();
    let lost = range.start as usize + 100;
    let retained = chip.memory()[lost];
    chip.memory_mut()[lost] = !retained;

    let validator = Validator::from_config(&config).unwrap();
    let error = validator.verify_retention_report(&mut chip).unwrap_err();

    match error {
        Error::RetentionMismatch(mismatch) => {
            assert_eq!(mismatch.address, Some(lost as u32));
            assert_ne!(mismatch.expected_checksum, mismatch.actual_checksum);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn missing_snapshot() {
    init_logging();
    let (mut chip, config, dir) = captured_run("24c08");
    let path = dir.path().join("never-written.bin");

    let validator = Validator::from_config(&config).unwrap();
    assert!(matches!(
        validator.verify_retention(&mut chip, &path),
        Err(Error::SnapshotNotFound(p)) if p == path
    ));
}

#[test]
fn truncated_snapshot_is_corrupt() {
    init_logging();
    let (mut chip, config, _dir) = captured_run("24c08");

    let bytes = std::fs::read(&config.snapshot_path).unwrap();
    std::fs::write(&config.snapshot_path, &bytes[..bytes.len() / 2]).unwrap();

    let validator = Validator::from_config(&config).unwrap();
    assert!(matches!(
        validator.verify_retention(&mut chip, &config.snapshot_path),
        Err(Error::SnapshotCorrupt(_))
    ));
}

#[test]
fn snapshot_from_other_part_is_rejected() {
    init_logging();
    let (_chip, config, _dir) = captured_run("24c08");

    let other = ValidatorConfig {
        chip: "24c64".to_string(),
        ..config.clone()
    };
    let validator = Validator::from_config(&other).unwrap();
    let mut chip = SimulatedChip::new(validator.profile().clone());

    match validator.verify_retention(&mut chip, &config.snapshot_path) {
        Err(Error::ChipMismatch {
            snapshot,
            configured,
        }) => {
            assert_eq!(snapshot, "24c08");
            assert_eq!(configured, "24c64");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn verify_report_has_no_subtests() {
    init_logging();
    let (mut chip, config, _dir) = captured_run("24c64");
    chip.power_cycle();

    let report = Validator::from_config(&config)
        .unwrap()
        .verify_retention_report(&mut chip)
        .unwrap();

    assert!(report.results.is_empty());
    assert!(matches!(
        report.retention,
        Some(RetentionOutcome::Verified { .. })
    ));
}
