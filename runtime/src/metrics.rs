//! Prometheus metrics for the relay.
//!
//! Every operation records through the [`metrics`] facade, so nothing is
//! collected unless a recorder is installed. The operator binary is a
//! short-lived process; instead of serving a scrape endpoint it installs
//! [`MetricsRecorder`] and writes the rendered exposition to a file for the
//! node exporter's textfile collector.
//!
//! # Example
//!
//! ```rust,no_run
//! use travel_messaging_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.start()?;
//!
//! // ... run a requeue ...
//!
//! recorder.write_textfile("/var/lib/node_exporter/dlqctl.prom")?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to write the exposition file
    #[error("Failed to write metrics file: {0}")]
    Write(#[from] std::io::Error),
}

/// Prometheus recorder with a render handle.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every relay metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves [`Self::render`] returning `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::debug!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// Write the rendered metrics to `path`, replacing it atomically.
    ///
    /// Does nothing if this recorder was not the one installed.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Write`] on I/O failure.
    pub fn write_textfile(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let Some(rendered) = self.render() else {
            return Ok(());
        };
        let path = path.as_ref();
        let staging = path.with_extension("prom.tmp");
        std::fs::write(&staging, rendered)?;
        std::fs::rename(&staging, path)?;
        tracing::debug!(path = %path.display(), "Metrics written");
        Ok(())
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "relay_messages_published_total",
        "Total number of envelopes published, by queue"
    );
    describe_counter!(
        "relay_publish_failures_total",
        "Total number of publish attempts the broker refused, by queue"
    );
    describe_counter!(
        "relay_requeued_total",
        "Total number of dead letters republished to their target queue"
    );
    describe_counter!(
        "relay_parked_total",
        "Total number of dead letters moved to the parking queue"
    );
    describe_counter!(
        "relay_malformed_total",
        "Total number of deliveries that could not be decoded"
    );
    describe_counter!(
        "relay_poll_empty_total",
        "Total number of polls that timed out without a delivery"
    );
    describe_counter!(
        "relay_purged_total",
        "Total number of messages dropped by purges, by queue"
    );
    describe_histogram!(
        "relay_requeue_run_duration_seconds",
        "Time taken by one requeue run"
    );
}

/// Relay metrics recorder.
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record a successful publish.
    pub fn record_publish(queue: &str) {
        counter!("relay_messages_published_total", "queue" => queue.to_string()).increment(1);
    }

    /// Record a refused publish.
    pub fn record_publish_failure(queue: &str) {
        counter!("relay_publish_failures_total", "queue" => queue.to_string()).increment(1);
    }

    /// Record a requeued dead letter.
    pub fn record_requeued() {
        counter!("relay_requeued_total").increment(1);
    }

    /// Record a parked dead letter.
    pub fn record_parked() {
        counter!("relay_parked_total").increment(1);
    }

    /// Record an undecodable delivery.
    pub fn record_malformed() {
        counter!("relay_malformed_total").increment(1);
    }

    /// Record a poll that came back empty.
    pub fn record_poll_empty() {
        counter!("relay_poll_empty_total").increment(1);
    }

    /// Record a purge.
    pub fn record_purge(queue: &str, purged: u32) {
        counter!("relay_purged_total", "queue" => queue.to_string()).increment(u64::from(purged));
    }

    /// Record the duration of a requeue run.
    pub fn record_requeue_run(duration: Duration) {
        histogram!("relay_requeue_run_duration_seconds").record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn recorder_starts_uninstalled() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.render().is_none());
        assert!(recorder.write_textfile("/nonexistent/dir/relay.prom").is_ok());
    }

    #[test]
    fn renders_relay_metrics() {
        let mut recorder = MetricsRecorder::new();
        recorder.start().unwrap();

        RelayMetrics::record_publish("travel.bookings");
        RelayMetrics::record_requeued();
        RelayMetrics::record_requeue_run(Duration::from_millis(120));

        // Another test binary thread may have installed the recorder first.
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("relay_messages_published_total"));
            assert!(rendered.contains("relay_requeued_total"));
        }
    }
}
