//! # Telemetry
//!
//! Console logging is always on: both binaries install a `tracing-subscriber`
//! registry with an `EnvFilter` (default `info`, override with `RUST_LOG`) and
//! a human-readable `fmt` layer.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters and histograms).
//! - `stdout`: Exports those metrics to stdout every five seconds.
//!
//! The metric helpers at the bottom of this module compile to no-ops when
//! `metrics` is disabled, so call sites never need a `cfg`.
//!
//! ```bash
//! cargo run --bin keysweep-coordinator --features metrics,stdout -- --help
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// Handles that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down exporters. Errors are printed, not returned:
    /// by the time this runs the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber (and meter provider when enabled).
///
/// `service` names the binary in exported metrics.
pub fn init_telemetry(service: &'static str) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics(service)?;
    #[cfg(not(feature = "metrics"))]
    let _ = service;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder(service)
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource(service: &'static str) -> Resource {
    Resource::builder()
        .with_service_name(service)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics(service: &'static str) -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource(service));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static PARTICIPANTS_REGISTERED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PROTOCOL_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SESSIONS_RESOLVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CANDIDATES_SCANNED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SCAN_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = PARTICIPANTS_REGISTERED.set(
        meter
            .u64_counter("participants_registered")
            .with_description("Participants that passed registration")
            .build(),
    );

    let _ = PROTOCOL_ERRORS.set(
        meter
            .u64_counter("protocol_errors")
            .with_description("Framing and sequence errors on participant connections")
            .build(),
    );

    let _ = SESSIONS_RESOLVED.set(
        meter
            .u64_counter("sessions_resolved")
            .with_description("Sessions resolved, by outcome")
            .build(),
    );

    let _ = CANDIDATES_SCANNED.set(
        meter
            .u64_counter("candidates_scanned")
            .with_description("Candidates fingerprinted by local scanners")
            .build(),
    );

    let _ = SCAN_DURATION_MS.set(
        meter
            .f64_histogram("scan_duration")
            .with_unit("ms")
            .with_description("Wall time of a single scanner")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_participants_registered() {
    if let Some(counter) = PARTICIPANTS_REGISTERED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_participants_registered() {}

#[cfg(feature = "metrics")]
pub fn increment_protocol_errors() {
    if let Some(counter) = PROTOCOL_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_protocol_errors() {}

#[cfg(feature = "metrics")]
pub fn increment_sessions_resolved(outcome: &'static str) {
    if let Some(counter) = SESSIONS_RESOLVED.get() {
        counter.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sessions_resolved(_outcome: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_candidates_scanned(count: u64) {
    if let Some(counter) = CANDIDATES_SCANNED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_candidates_scanned(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn record_scan_duration(duration_ms: f64) {
    if let Some(histogram) = SCAN_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_scan_duration(_duration_ms: f64) {}
