//! # Logging and tracing helpers
//!
//! Every binary in the workspace calls [init_opentelemetry] once at startup.
//! Logs go to stdout, either with the compact [SyncFormat] or as JSON when
//! `RUST_LOG_FORMAT=json`. Traces are exported over OTLP only when
//! `OTEL_SDK_DISABLED=false`.

mod sync_fmt;

use error_stack::{Result, ResultExt};
use opentelemetry::sdk::{trace, Resource};
use opentelemetry::KeyValue;
use tracing::Subscriber;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub use self::sync_fmt::SyncFormat;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug)]
pub struct OpenTelemetryInitError;
impl error_stack::Context for OpenTelemetryInitError {}

impl std::fmt::Display for OpenTelemetryInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize opentelemetry")
    }
}

/// Initialize logging and (optionally) OpenTelemetry tracing.
///
/// Must be called from inside the tokio runtime since the OTLP exporter
/// spawns its batch task there.
///
/// ```rs
/// use tradesync_observability::init_opentelemetry;
///
/// init_opentelemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).unwrap();
/// ```
pub fn init_opentelemetry(
    package_name: &'static str,
    package_version: &'static str,
) -> Result<(), OpenTelemetryInitError> {
    // The otel sdk doesn't follow the disabled env variable flag, so it's
    // implemented here. Exports are disabled unless explicitly enabled.
    let sdk_disabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v != "false")
        .unwrap_or(true);

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let mut layers = vec![stdout()];

    if !sdk_disabled {
        let otel_layer = otel(package_name, package_version)?;
        layers.push(otel_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to install global tracing subscriber")?;

    Ok(())
}

fn otel<S>(
    package_name: &'static str,
    package_version: &'static str,
) -> Result<BoxedLayer<S>, OpenTelemetryInitError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let otel_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let resource = Resource::new(vec![
        KeyValue::new("service.name", package_name),
        KeyValue::new("service.version", package_version),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(trace::config().with_resource(resource))
        .install_batch(opentelemetry::runtime::Tokio)
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to create otlp trace pipeline")?;

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(otel_env_filter)
        .boxed();

    Ok(otel_layer)
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));

    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(SyncFormat::default())
            .fmt_fields(SyncFormat::default())
            .with_filter(log_env_filter)
            .boxed()
    }
}
