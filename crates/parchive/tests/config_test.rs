//! Tests for loading the backfiller configuration from disk.

use alopex_parchive::backfill::{BackFillerConfig, Schedule, ScheduleConfig};
use alopex_parchive::ArchiveError;
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
warmupTime = 120
maxSegmentSize = 2500
streamUpdateFillFrequency = 60
monitorStreams = ["tm_realtime", "pp_realtime"]
timestampColumn = "obt"

[[schedule]]
startSegment = 10
numSegments = 3
interval = 3600

[[schedule]]
startSegment = 1
numSegments = 1
interval = -1
"#
    )
    .unwrap();

    let config = BackFillerConfig::load(file.path()).unwrap();
    assert_eq!(config.warmup_millis(), 120_000);
    assert_eq!(config.max_segment_size, 2500);
    assert_eq!(config.fill_frequency(), Duration::from_secs(60));
    assert_eq!(
        config.monitor_streams,
        Some(vec!["tm_realtime".to_string(), "pp_realtime".to_string()])
    );
    assert_eq!(config.timestamp_column, "obt");

    let schedules = config.validate().unwrap();
    assert_eq!(
        schedules,
        vec![
            Schedule::Periodic {
                interval: Duration::from_secs(3600),
                start_segment: 10,
                num_segments: 3,
            },
            Schedule::SegmentAligned {
                start_segment: 1,
                num_segments: 1,
            },
        ]
    );
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backfiller.toml");
    std::fs::write(&path, "").unwrap();

    let config = BackFillerConfig::load(&path).unwrap();
    assert_eq!(config.warmup_millis(), 60_000);
    assert_eq!(config.fill_frequency(), Duration::from_secs(600));
    assert!(config.schedule.is_empty());
    assert!(config.validate().unwrap().is_empty());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = BackFillerConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ArchiveError::IoError(_)));
}

#[test]
fn test_bad_documents_are_rejected() {
    // Schedule entries need both segment fields.
    let err = BackFillerConfig::from_toml_str("[[schedule]]\nstartSegment = 1\n").unwrap_err();
    assert!(matches!(err, ArchiveError::ConfigParse(_)));

    let err = BackFillerConfig::from_toml_str("warmupTime = -1").unwrap_err();
    assert!(matches!(err, ArchiveError::ConfigParse(_)));

    let config = BackFillerConfig::from_toml_str("timestampColumn = \"\"").unwrap();
    assert!(matches!(config.validate(), Err(ArchiveError::Configuration(_))));
}

#[test]
fn test_builder_matches_document() {
    let built = BackFillerConfig::default()
        .with_warmup_time(5)
        .with_schedule(ScheduleConfig::segment_aligned(0, 2))
        .with_monitor_streams(["tm_realtime"]);
    let parsed = BackFillerConfig::from_toml_str(
        r#"
warmupTime = 5
monitorStreams = ["tm_realtime"]

[[schedule]]
startSegment = 0
numSegments = 2
"#,
    )
    .unwrap();
    assert_eq!(built, parsed);
}
