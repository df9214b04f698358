//! Logging, tracing and metrics export for the classguard binary
//!
//! Log lines go to stdout, JSON unless [`LogFormat::Text`] is asked for.
//! With an OTLP endpoint configured (`OTEL_EXPORTER_OTLP_ENDPOINT`) the
//! `reconcile` spans and the instruments in [`crate::metrics`] are pushed to
//! it as well, tagged with the pod identity and the watched namespace.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,classguard=debug,kube=info,tower=warn,hyper=warn";

/// Downward-API variables copied onto the exported resource
const POD_ATTRIBUTES: [(&str, &str); 3] = [
    ("POD_NAME", "k8s.pod.name"),
    ("POD_NAMESPACE", "k8s.namespace.name"),
    ("NODE_NAME", "k8s.node.name"),
];

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The OTLP span or metric exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// "span" or "metric"
        signal: &'static str,
        /// Exporter error
        message: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Shape of the stdout log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the current span's fields
    #[default]
    Json,
    /// Human-readable lines for local runs
    Text,
}

impl LogFormat {
    /// `Json` when `json` is set, `Text` otherwise
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// What [`init_telemetry`] installs
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` of exported spans and metrics
    pub service_name: String,
    /// OTLP gRPC collector; nothing is exported when unset
    pub otlp_endpoint: Option<String>,
    /// Stdout log format
    pub log_format: LogFormat,
    /// Namespace the controllers watch, `None` for all
    pub watch_namespace: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "classguard".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty()),
            log_format: LogFormat::Json,
            watch_namespace: None,
        }
    }
}

/// Install the global subscriber, and the OTLP exporters when an endpoint
/// is configured. Fails if a subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            global::set_text_map_propagator(TraceContextPropagator::new());
            let resource = Resource::new(resource_attributes(&config, |var| {
                std::env::var(var).ok()
            }));
            install_meter_provider(endpoint, resource.clone())?;
            let tracer = install_tracer_provider(endpoint, resource)?
                .tracer(config.service_name.clone());
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = (config.log_format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_file(false)
            .with_line_number(false)
    });
    let text = (config.log_format == LogFormat::Text).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}

/// Resource attributes for exported telemetry; `env` looks up variables
fn resource_attributes(
    config: &TelemetryConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        KeyValue::new(
            "classguard.watch_namespace",
            config
                .watch_namespace
                .clone()
                .unwrap_or_else(|| "*".to_string()),
        ),
    ];
    attributes.extend(
        POD_ATTRIBUTES
            .iter()
            .filter_map(|(var, key)| env(var).map(|value| KeyValue::new(*key, value))),
    );
    attributes
}

fn install_tracer_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "span",
            message: e.to_string(),
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();
    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn install_meter_provider(endpoint: &str, resource: Resource) -> Result<(), TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metric",
            message: e.to_string(),
        })?;

    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build();
    global::set_meter_provider(provider);
    Ok(())
}
