//! Application entry point for the `gym-crowdmeter` scheduled job.
//!
//! Each invocation performs exactly one pipeline run:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Sampling the occupancy counter and (optionally) the weather
//! - Appending the reading to the CSV dataset and persisting it atomically
//! - Building the same-weekday report and delivering it
//!
//! # Exit codes
//! - `0` – reading stored, report delivered or skipped
//! - `1` – configuration, sampling, normalization or persistence failed
//! - `2` – reading stored, but the report could not be built or delivered
//!
//! # Environment Variables
//! See [`gym_crowdmeter::config::load_from_env`] for the job settings, plus:
//! - `GYM_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `GYM_SPAN_EVENTS` (optional) – span event mode for tracing
use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use gym_crowdmeter::{
    config, local_now, ConfiguredNotifier, CounterFeedSampler, LogNotifier, OpenWeatherProvider,
    Pipeline, SummaryReportBuilder, WebhookNotifier,
};

// ---

#[tokio::main]
async fn main() -> ExitCode {
    // ---
    dotenv().ok();
    init_tracing();

    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Run failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<u8> {
    // ---
    let cfg = config::load_from_env().context("loading configuration")?;
    cfg.log_config();

    let client = cfg.http_client()?;
    let sampler = CounterFeedSampler::new(client.clone(), &cfg.counter_url);
    let weather = cfg
        .weather_url
        .as_ref()
        .map(|url| OpenWeatherProvider::new(client.clone(), url));
    let notifier = match &cfg.notify_webhook_url {
        Some(url) => ConfiguredNotifier::Webhook(WebhookNotifier::new(client.clone(), url)),
        None => ConfiguredNotifier::Log(LogNotifier),
    };
    let builder = SummaryReportBuilder::new("NTU Gym");

    let pipeline = Pipeline::new(&cfg, sampler, weather, builder, notifier);
    let now = local_now(cfg.timezone);

    let outcome = pipeline.run(now).await.context("mandatory stage failed")?;
    if let gym_crowdmeter::RunOutcome::Degraded { reason, .. } = &outcome {
        tracing::warn!("Run degraded: {}", reason);
    }

    Ok(u8::try_from(outcome.exit_code()).unwrap_or(1))
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `GYM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `GYM_LOG_LEVEL` env var
///
/// This should be called once at startup before any logging macros are
/// invoked. It installs the subscriber globally for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("GYM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to GYM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("GYM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},reqwest=warn,hyper=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
