//! Report and notification collaborators.
//!
//! The pipeline hands a [`ReportBuilder`] the weekday curve and the newest
//! reading, then passes the resulting text and optional image link to a
//! [`Notifier`]. Chart rendering and image hosting live outside this crate:
//! the [`Chart`] here is the serializable artifact a renderer consumes.

use std::future::Future;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::aggregate::Curve;
use crate::bucket::{bucket_label, bucket_of, format_timestamp, weekday_label, weekday_of};
use crate::error::{PipelineError, Result};
use crate::models::{OccupancyRatio, Reading};

// ---

/// One labelled point of the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Renderable description of the weekday profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub title: String,
    pub weekday: String,
    pub points: Vec<ChartPoint>,
    /// The latest reading, placed in its bucket.
    pub current: Option<ChartPoint>,
}

/// Output of a [`ReportBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub text: String,
    pub chart: Chart,
    pub image_url: Option<String>,
}

/// Turns a curve and the latest reading into a report.
pub trait ReportBuilder {
    fn build(&self, curve: &Curve, latest: &Reading) -> impl Future<Output = Result<Report>> + Send;
}

/// Result of a delivery attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Accepted by a remote endpoint.
    Delivered,
    /// No endpoint configured; the text went to the log.
    Logged,
}

/// Push channel for the report.
pub trait Notifier {
    fn send(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> impl Future<Output = Result<DeliveryStatus>> + Send;
}

/// Text summary plus chart description; does not upload any image.
#[derive(Debug, Clone)]
pub struct SummaryReportBuilder {
    facility: String,
}

impl SummaryReportBuilder {
    pub fn new(facility: impl Into<String>) -> Self {
        SummaryReportBuilder {
            facility: facility.into(),
        }
    }

    /// Synchronous core of [`ReportBuilder::build`].
    pub fn summarize(&self, curve: &Curve, latest: &Reading) -> Report {
        // ---
        let weekday = weekday_label(weekday_of(&latest.timestamp));
        let bucket = bucket_of(&latest.timestamp);
        let slot = bucket_label(bucket).unwrap_or_default();

        let mut lines = vec![format!(
            "{} {}",
            self.facility,
            format_timestamp(&latest.timestamp)
        )];

        let now_line = match (latest.occupancy_current, latest.occupancy_capacity) {
            (Some(current), Some(capacity)) => match latest.occupancy_ratio() {
                OccupancyRatio::Defined(r) => {
                    format!("Now: {current} / {capacity} ({:.1}%)", r * 100.0)
                }
                OccupancyRatio::Undefined => format!("Now: {current} / {capacity}"),
            },
            (Some(current), None) => format!("Now: {current}"),
            _ => "Now: unavailable".to_string(),
        };
        lines.push(now_line);

        match curve.get(bucket) {
            Some(point) => lines.push(format!(
                "Typical {weekday} {slot}: {:.1} ({} samples)",
                point.mean, point.samples
            )),
            None => lines.push(format!("No {weekday} history for {slot} yet")),
        }
        if let Some(peak) = curve.peak() {
            lines.push(format!("Busiest {weekday} slot: {} ({:.1})", peak.label(), peak.mean));
        }

        let temp = latest.auxiliary.get("temp");
        let humidity = latest.auxiliary.get("humidity");
        match (temp, humidity) {
            (Some(t), Some(h)) => lines.push(format!("{t:.1}°C, humidity {h:.0}%")),
            (Some(t), None) => lines.push(format!("{t:.1}°C")),
            _ => {}
        }

        let chart = Chart {
            title: format!("{} - {}", self.facility, weekday),
            weekday: weekday.to_string(),
            points: curve
                .points
                .iter()
                .map(|p| ChartPoint {
                    label: p.label(),
                    value: p.mean,
                })
                .collect(),
            current: latest.occupancy_current.map(|c| ChartPoint {
                label: slot.clone(),
                value: f64::from(c),
            }),
        };

        Report {
            text: lines.join("\n"),
            chart,
            image_url: None,
        }
    }
}

impl ReportBuilder for SummaryReportBuilder {
    async fn build(&self, curve: &Curve, latest: &Reading) -> Result<Report> {
        Ok(self.summarize(curve, latest))
    }
}

/// POSTs `{"text": ..., "image_url": ...}` as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        WebhookNotifier {
            client,
            url: url.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<DeliveryStatus> {
        // ---
        let payload = json!({ "text": text, "image_url": image_url });
        let status = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Delivery(e.without_url().to_string()))?
            .status();
        debug!("Webhook answered {}", status);
        Ok(DeliveryStatus::Delivered)
    }
}

/// Writes the report to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<DeliveryStatus> {
        info!("Report (no notification endpoint configured):\n{}", text);
        if let Some(url) = image_url {
            info!("Chart image: {}", url);
        }
        Ok(DeliveryStatus::Logged)
    }
}

/// Notifier chosen from configuration at startup.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl Notifier for ConfiguredNotifier {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<DeliveryStatus> {
        match self {
            ConfiguredNotifier::Webhook(n) => n.send(text, image_url).await,
            ConfiguredNotifier::Log(n) => n.send(text, image_url).await,
        }
    }
}
