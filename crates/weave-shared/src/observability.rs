//! Observability features: structured logging and query metrics

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Global observability system
static OBSERVABILITY: OnceCell<ObservabilitySystem> = OnceCell::new();

/// Observability system for centralized logging and metrics
#[derive(Debug)]
pub struct ObservabilitySystem {
    metrics_enabled: bool,
}

impl ObservabilitySystem {
    /// Initialize the observability system
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        let system = Self {
            metrics_enabled: config.metrics.enabled,
        };

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        OBSERVABILITY.set(system).map_err(|_| {
            anyhow::anyhow!("Observability system already initialized")
        })?;

        info!("Observability system initialized");
        Ok(())
    }

    /// Initialize structured logging
    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let level = parse_level(&config.level);

        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(json_layer).try_init()?;
            }
            _ => {
                let pretty_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(pretty_layer).try_init()?;
            }
        }

        Ok(())
    }

    /// Initialize the Prometheus recorder and its scrape endpoint
    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics initialized on {}", bind_addr);
        Ok(())
    }

    /// Get the global observability system
    pub fn get() -> Option<&'static ObservabilitySystem> {
        OBSERVABILITY.get()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Plan execution metrics
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record a statement sent to the database
    pub fn statement_executed(depth: usize, rows: usize, duration: Duration) {
        counter!("weave_statements_total").increment(1);
        counter!("weave_rows_fetched_total").increment(rows as u64);
        histogram!("weave_statement_duration_seconds", "depth" => depth.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a statement that failed at the database
    pub fn statement_failed(depth: usize) {
        counter!("weave_statements_failed_total", "depth" => depth.to_string()).increment(1);
    }

    /// Record a statement skipped because its parent produced no link values
    pub fn statement_skipped() {
        counter!("weave_statements_skipped_total").increment(1);
    }

    /// Record a failed branch folded as empty
    pub fn branch_degraded() {
        counter!("weave_branches_degraded_total").increment(1);
    }

    /// Record a plan cache lookup
    pub fn plan_cache(hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        counter!("weave_plan_cache_lookups_total", "outcome" => outcome).increment(1);
    }

    /// Record a database round trip issued by an adapter
    pub fn database_operation(operation: &str, duration: Duration) {
        counter!("weave_database_operations_total", "operation" => operation.to_string())
            .increment(1);
        histogram!("weave_database_operation_duration_seconds",
                  "operation" => operation.to_string())
            .record(duration.as_secs_f64());
    }
}

/// Performance timer helper
pub struct PerfTimer {
    start: Instant,
    metric_name: String,
    labels: Vec<(String, String)>,
}

impl PerfTimer {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric_name: metric_name.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let labels: Vec<metrics::Label> = self
                .labels
                .iter()
                .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
                .collect();
            histogram!(self.metric_name.clone(), labels).record(self.start.elapsed().as_secs_f64());
        }
    }
}
