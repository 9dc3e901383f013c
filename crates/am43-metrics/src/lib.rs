//! Metric declarations for the AM43 proxy controller.
//!
//! Every value the controller records is declared once here as a const
//! [`Metric`]: name, kind, unit and label keys. Recording sites use the
//! `metrics` macros with the declared name; whichever recorder the binary
//! installs receives the values.
//!
//! ```rust,ignore
//! use am43_metrics::{describe_metrics, metric_defs, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("02:AB:CD:EF:01:23").with_command("move_to");
//! metrics::counter!(metric_defs::COMMANDS_SUBMITTED.name, &labels.to_labels()).increment(1);
//! ```
//!
//! ```rust
//! use am43_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const RETRIES: Metric = Metric::counter("am43.example.retries")
//!     .with_description("Frames resent")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["device"]);
//!
//! assert_eq!(RETRIES.kind, MetricKind::Counter);
//! ```

pub use metrics;

use metrics::{KeyName, SharedString, Unit};

/// Counter, gauge or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded value, declared as a `const`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    /// Help text shown by the exporter.
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys every recording site attaches.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Metric {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Hand the unit and help text to the current recorder.
    ///
    /// A no-op when no recorder is installed.
    pub fn describe(&self) {
        let name = KeyName::from_const_str(self.name);
        let description = SharedString::const_str(self.description);
        metrics::with_recorder(|recorder| match self.kind {
            MetricKind::Counter => recorder.describe_counter(name, self.unit, description),
            MetricKind::Gauge => recorder.describe_gauge(name, self.unit, description),
            MetricKind::Histogram => recorder.describe_histogram(name, self.unit, description),
        });
    }
}

/// All metric definitions for the controller.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Standard Label Keys
    // ========================================================================

    /// Labels present on every device-scoped metric.
    pub const DEVICE_LABELS: &[&str] = &["device"];

    /// Labels on per-command metrics.
    pub const COMMAND_LABELS: &[&str] = &["device", "command"];

    // ========================================================================
    // Command Dispatch
    // ========================================================================

    /// Commands accepted into a device queue.
    pub const COMMANDS_SUBMITTED: Metric = Metric::counter("am43.commands.submitted")
        .with_description("Commands accepted into a device queue")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Commands resolved, labelled with the outcome.
    ///
    /// Labels: device, command, outcome (ok, rejected, timeout, unreachable, error)
    pub const COMMANDS_COMPLETED: Metric = Metric::counter("am43.commands.completed")
        .with_description("Commands resolved, by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["device", "command", "outcome"]);

    /// Command frames resent after an attempt timed out.
    pub const COMMAND_RETRIES: Metric = Metric::counter("am43.commands.retries")
        .with_description("Command frames resent after an attempt timed out")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Commands that exhausted every attempt.
    pub const COMMAND_TIMEOUTS: Metric = Metric::counter("am43.commands.timeouts")
        .with_description("Commands that exhausted every attempt without a reply")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Time from first write to accepted reply.
    pub const COMMAND_LATENCY: Metric = Metric::histogram("am43.command.latency")
        .with_description("Time from the first write to the accepted reply")
        .with_unit(Unit::Seconds)
        .with_labels(COMMAND_LABELS);

    // ========================================================================
    // Frames
    // ========================================================================

    /// Inbound frames discarded as corrupt.
    ///
    /// Labels: device, reason (checksum, malformed, truncated, unknown_command)
    pub const FRAMES_DROPPED: Metric = Metric::counter("am43.frames.dropped")
        .with_description("Inbound frames discarded as corrupt, incomplete or unknown")
        .with_unit(Unit::Count)
        .with_labels(&["device", "reason"]);

    /// Notifications dropped because an observer lagged.
    pub const NOTIFICATIONS_LAGGED: Metric = Metric::counter("am43.notifications.lagged")
        .with_description("Notifications skipped by a lagging observer")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    // ========================================================================
    // Link and Sessions
    // ========================================================================

    /// Successful reconnections of the proxy link.
    pub const LINK_RECONNECTS: Metric = Metric::counter("am43.link.reconnects")
        .with_description("Successful reconnections of the proxy link")
        .with_unit(Unit::Count);

    /// Sessions that reached Ready.
    pub const SESSIONS_OPENED: Metric = Metric::counter("am43.sessions.opened")
        .with_description("Device sessions that reached Ready")
        .with_unit(Unit::Count)
        .with_labels(DEVICE_LABELS);

    /// Sessions currently registered.
    pub const SESSIONS_ACTIVE: Metric = Metric::gauge("am43.sessions.active")
        .with_description("Device sessions currently registered")
        .with_unit(Unit::Count);

    /// Every declared metric.
    pub const ALL: &[&Metric] = &[
        &COMMANDS_SUBMITTED,
        &COMMANDS_COMPLETED,
        &COMMAND_RETRIES,
        &COMMAND_TIMEOUTS,
        &COMMAND_LATENCY,
        &FRAMES_DROPPED,
        &NOTIFICATIONS_LAGGED,
        &LINK_RECONNECTS,
        &SESSIONS_OPENED,
        &SESSIONS_ACTIVE,
    ];
}

/// Labels identifying the device (and optionally the command) a value
/// belongs to.
///
/// # Example
///
/// ```rust
/// use am43_metrics::MetricLabels;
///
/// let labels = MetricLabels::new("02:AB:CD:EF:01:23").with_command("stop");
/// assert_eq!(labels.to_labels().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    /// Device address.
    pub device: String,
    /// Command name, for per-command metrics.
    pub command: Option<&'static str>,
}

impl MetricLabels {
    /// Labels for a device.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            command: None,
        }
    }

    /// Adds the command label.
    pub fn with_command(mut self, command: &'static str) -> Self {
        self.command = Some(command);
        self
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("device", self.device.clone())];
        if let Some(command) = self.command {
            labels.push(("command", command.to_string()));
        }
        labels
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describe every declared metric to the current recorder.
///
/// Call at startup, after any recorder has been installed.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr`.
///
/// Descriptions are registered separately by [`describe_metrics`].
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_labels_new() {
        let labels = MetricLabels::new("02:AB:CD:EF:01:23");
        assert_eq!(labels.device, "02:AB:CD:EF:01:23");
        assert_eq!(labels.command, None);
        assert_eq!(labels.to_labels(), vec![("device", "02:AB:CD:EF:01:23".to_string())]);
    }

    #[test]
    fn test_metric_labels_with_command() {
        let labels = MetricLabels::new("dev").with_command("move_to");
        let label_vec = labels.to_labels();

        assert_eq!(label_vec.len(), 2);
        assert!(label_vec.contains(&("command", "move_to".to_string())));
    }

    #[test]
    fn test_with_extra_labels() {
        let labels = MetricLabels::new("dev").with_command("stop");
        let extended = labels.with(&[("outcome", "ok".to_string())]);

        assert_eq!(extended.len(), 3);
        assert!(extended.contains(&("outcome", "ok".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::COMMANDS_SUBMITTED.name, "am43.commands.submitted");
        assert_eq!(metric_defs::COMMANDS_SUBMITTED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::COMMAND_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::COMMAND_LATENCY.unit, Some(Unit::Seconds));
        assert_eq!(metric_defs::SESSIONS_ACTIVE.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::LINK_RECONNECTS.labels, &[] as &[&str]);
    }

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::gauge("minimal");

        assert_eq!(MINIMAL.name, "minimal");
        assert_eq!(MINIMAL.kind.as_str(), "gauge");
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }

    /// Keeps the name, kind and unit of every description it is given.
    #[derive(Default)]
    struct DescriptionLog(std::sync::Mutex<Vec<(String, MetricKind, Option<Unit>)>>);

    impl DescriptionLog {
        fn record(&self, key: KeyName, kind: MetricKind, unit: Option<Unit>) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push((key.as_str().to_string(), kind, unit));
            }
        }
    }

    impl metrics::Recorder for DescriptionLog {
        fn describe_counter(&self, key: KeyName, unit: Option<Unit>, _: SharedString) {
            self.record(key, MetricKind::Counter, unit);
        }

        fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, _: SharedString) {
            self.record(key, MetricKind::Gauge, unit);
        }

        fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, _: SharedString) {
            self.record(key, MetricKind::Histogram, unit);
        }

        fn register_counter(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(
            &self,
            _: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_every_metric_is_described() {
        let log = DescriptionLog::default();
        metrics::with_local_recorder(&log, describe_metrics);

        let seen = log.0.lock().unwrap();
        assert_eq!(seen.len(), metric_defs::ALL.len());
        for metric in metric_defs::ALL {
            assert!(
                seen.iter()
                    .any(|(name, kind, unit)| name == metric.name && *kind == metric.kind && *unit == metric.unit),
                "{} not described",
                metric.name
            );
        }
    }
}
