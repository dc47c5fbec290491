use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{NaiveDateTime, Weekday};
use serde_json::{json, Value};
use tempfile::TempDir;

use gym_crowdmeter::bucket::parse_timestamp;
use gym_crowdmeter::models::CURRENT_COUNT_COLUMN;
use gym_crowdmeter::{
    curve_for, Config, DeliveryStatus, Notifier, Pipeline, PipelineError, RawReading,
    RunOutcome, Sampler, SummaryReportBuilder, TimeSeriesStore, WeatherProvider,
};

// ---

struct FixedSampler {
    current: Value,
    capacity: Value,
}

impl Sampler for FixedSampler {
    async fn fetch_reading(&self, now: NaiveDateTime) -> gym_crowdmeter::Result<RawReading> {
        let mut raw = RawReading::new(now.format("%Y-%m-%d %H:%M").to_string());
        raw.occupancy_current = Some(self.current.clone());
        raw.occupancy_capacity = Some(self.capacity.clone());
        Ok(raw)
    }
}

struct DownSampler;

impl Sampler for DownSampler {
    async fn fetch_reading(&self, _now: NaiveDateTime) -> gym_crowdmeter::Result<RawReading> {
        Err(PipelineError::Sampler("connection refused".to_string()))
    }
}

struct FakeWeather {
    fail: bool,
}

impl WeatherProvider for FakeWeather {
    async fn fetch_weather(&self) -> gym_crowdmeter::Result<BTreeMap<String, Value>> {
        if self.fail {
            return Err(PipelineError::Weather("timed out".to_string()));
        }
        Ok(BTreeMap::from([
            ("temp".to_string(), json!(26.5)),
            ("humidity".to_string(), json!(81)),
        ]))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        text: &str,
        _image_url: Option<&str>,
    ) -> gym_crowdmeter::Result<DeliveryStatus> {
        if self.fail {
            return Err(PipelineError::Delivery("503 Service Unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(DeliveryStatus::Delivered)
    }
}

fn config_in(dir: &TempDir) -> Config {
    Config {
        data_path: dir.path().join("NTU_GYM_Counter.csv"),
        ..Config::default()
    }
}

fn pipeline<S: Sampler>(
    cfg: &Config,
    sampler: S,
    weather: Option<FakeWeather>,
    notifier: RecordingNotifier,
) -> Pipeline<S, FakeWeather, SummaryReportBuilder, RecordingNotifier> {
    Pipeline::new(cfg, sampler, weather, SummaryReportBuilder::new("NTU Gym"), notifier)
}

fn at(ts: &str) -> NaiveDateTime {
    parse_timestamp(ts).unwrap()
}

fn sampler(current: u32, capacity: u32) -> FixedSampler {
    FixedSampler {
        current: json!(current),
        capacity: json!(capacity),
    }
}

// ---

#[tokio::test]
async fn first_run_bootstraps_dataset_and_curve() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = pipeline(&cfg, sampler(5, 50), None, RecordingNotifier::default());

    let outcome = p.run(at("2024-03-04 08:00")).await?;
    assert_eq!(
        outcome,
        RunOutcome::Complete {
            rows: 1,
            reported: true
        }
    );
    assert_eq!(outcome.exit_code(), 0);

    let text = fs::read_to_string(&cfg.data_path)?;
    assert_eq!(
        text,
        "Timestamp,current_count,capacity_full,capacity_ratio\n2024-03-04 08:00,5,50,0.1\n"
    );

    let store = TimeSeriesStore::new(&cfg.data_path, cfg.duplicate_policy);
    let dataset = store.load()?;
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.records()[0].value("capacity_ratio"), Some(0.1));

    let curve = curve_for(&dataset, Weekday::Mon, CURRENT_COUNT_COLUMN);
    assert_eq!(curve.len(), 1);
    assert_eq!(curve.points[0].bucket, 32);
    assert_eq!(curve.points[0].mean, 5.0);

    let sent = p.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Now: 5 / 50 (10.0%)"));
    assert!(sent[0].contains("Typical Monday 08:00: 5.0 (1 samples)"));
    Ok(())
}

#[tokio::test]
async fn sampler_failure_writes_nothing() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = pipeline(&cfg, DownSampler, None, RecordingNotifier::default());

    let err = p.run(at("2024-03-04 08:00")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Sampler(_)));
    assert!(err.is_fatal());
    assert!(!cfg.data_path.exists());
    assert!(p.notifier.sent.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn weather_failure_is_not_fatal() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = pipeline(
        &cfg,
        sampler(12, 150),
        Some(FakeWeather { fail: true }),
        RecordingNotifier::default(),
    );

    let outcome = p.run(at("2024-03-04 09:00")).await?;
    assert_eq!(outcome.exit_code(), 0);

    let header = fs::read_to_string(&cfg.data_path)?
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    assert_eq!(header, "Timestamp,current_count,capacity_full,capacity_ratio");
    Ok(())
}

struct MisconfiguredWeather;

impl WeatherProvider for MisconfiguredWeather {
    async fn fetch_weather(&self) -> gym_crowdmeter::Result<BTreeMap<String, Value>> {
        Err(PipelineError::Config("WEATHER_URL has no appid".to_string()))
    }
}

#[tokio::test]
async fn fatal_weather_error_aborts_before_writing() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = Pipeline::new(
        &cfg,
        sampler(12, 150),
        Some(MisconfiguredWeather),
        SummaryReportBuilder::new("NTU Gym"),
        RecordingNotifier::default(),
    );

    let err = p.run(at("2024-03-04 09:00")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(!cfg.data_path.exists());
    assert!(p.notifier.sent.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn delivery_failure_keeps_persisted_row() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };
    let p = pipeline(&cfg, sampler(30, 150), None, notifier);

    let outcome = p.run(at("2024-03-04 10:00")).await?;
    assert!(matches!(outcome, RunOutcome::Degraded { rows: 1, .. }));
    assert_eq!(outcome.exit_code(), 2);

    let dataset = TimeSeriesStore::new(&cfg.data_path, cfg.duplicate_policy).load()?;
    assert_eq!(dataset.len(), 1);
    Ok(())
}

#[tokio::test]
async fn off_hour_runs_store_without_reporting() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = pipeline(&cfg, sampler(8, 150), None, RecordingNotifier::default());

    let outcome = p.run(at("2024-03-04 10:15")).await?;
    assert_eq!(
        outcome,
        RunOutcome::Complete {
            rows: 1,
            reported: false
        }
    );
    assert!(p.notifier.sent.lock().unwrap().is_empty());

    let mut every_run = config_in(&dir);
    every_run.notify_on_hour_only = false;
    let p = pipeline(&every_run, sampler(9, 150), None, RecordingNotifier::default());
    let outcome = p.run(at("2024-03-04 10:30")).await?;
    assert_eq!(outcome.rows(), 2);
    assert_eq!(p.notifier.sent.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn schema_drift_across_runs() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);

    let before = pipeline(&cfg, sampler(5, 50), None, RecordingNotifier::default());
    before.run(at("2024-03-04 08:00")).await?;

    let after = pipeline(
        &cfg,
        sampler(7, 0),
        Some(FakeWeather { fail: false }),
        RecordingNotifier::default(),
    );
    after.run(at("2024-03-11 08:00")).await?;

    let text = fs::read_to_string(&cfg.data_path)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Timestamp,current_count,capacity_full,capacity_ratio,humidity,temp",
            "2024-03-11 08:00,7,0,,81,26.5",
            "2024-03-04 08:00,5,50,0.1,,",
        ]
    );

    let sent = after.notifier.sent.lock().unwrap();
    assert!(sent[0].contains("Typical Monday 08:00: 6.0 (2 samples)"));
    assert!(sent[0].contains("26.5°C, humidity 81%"));
    Ok(())
}

#[tokio::test]
async fn corrupt_dataset_aborts_without_overwriting() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    fs::write(&cfg.data_path, "id,count\n1,2\n")?;

    let p = pipeline(&cfg, sampler(5, 50), None, RecordingNotifier::default());
    let err = p.run(at("2024-03-04 08:00")).await.unwrap_err();

    assert!(matches!(err, PipelineError::CorruptDataset { .. }));
    assert_eq!(fs::read_to_string(&cfg.data_path)?, "id,count\n1,2\n");
    assert!(p.notifier.sent.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_counter_values_become_missing_fields() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let bad = FixedSampler {
        current: json!("closed"),
        capacity: json!("150"),
    };
    let p = pipeline(&cfg, bad, None, RecordingNotifier::default());

    p.run(at("2024-03-04 22:00")).await?;
    let text = fs::read_to_string(&cfg.data_path)?;
    assert!(text.ends_with("2024-03-04 22:00,,150,\n"));
    assert!(p.notifier.sent.lock().unwrap()[0].contains("Now: unavailable"));
    Ok(())
}

struct BrokenBuilder;

impl gym_crowdmeter::ReportBuilder for BrokenBuilder {
    async fn build(
        &self,
        _curve: &gym_crowdmeter::Curve,
        _latest: &gym_crowdmeter::Reading,
    ) -> gym_crowdmeter::Result<gym_crowdmeter::Report> {
        Err(PipelineError::Report("renderer crashed".to_string()))
    }
}

#[tokio::test]
async fn report_failure_is_degraded_not_fatal() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let cfg = config_in(&dir);
    let p = Pipeline::new(
        &cfg,
        sampler(40, 150),
        None::<FakeWeather>,
        BrokenBuilder,
        RecordingNotifier::default(),
    );

    let outcome = p.run(at("2024-03-04 18:00")).await?;
    match &outcome {
        RunOutcome::Degraded { rows, reason } => {
            assert_eq!(*rows, 1);
            assert!(reason.contains("renderer crashed"));
        }
        other => panic!("expected degraded run, got {other:?}"),
    }
    assert!(p.notifier.sent.lock().unwrap().is_empty());
    assert!(cfg.data_path.exists());
    Ok(())
}
