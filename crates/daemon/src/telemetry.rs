//! OpenTelemetry trace export (optional)
//!
//! Enabled by building with `--features telemetry` and setting
//! `OTEL_EXPORTER_OTLP_ENDPOINT`:
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=sarpras-sekolah \
//!     ./sarpras-daemon
//! ```

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub const ENABLED: bool = cfg!(feature = "telemetry");

/// OTLP endpoint, when configured
pub fn endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|endpoint| !endpoint.is_empty())
}

/// Tracing layer exporting spans over OTLP, if configured and compiled in
pub fn otel_layer() -> Result<Option<BoxedLayer>> {
    match endpoint() {
        Some(endpoint) if ENABLED => build_layer(&endpoint).map(Some),
        _ => Ok(None),
    }
}

#[cfg(feature = "telemetry")]
fn build_layer(endpoint: &str) -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::Resource;

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "sarpras-daemon".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
}

#[cfg(not(feature = "telemetry"))]
fn build_layer(_endpoint: &str) -> Result<BoxedLayer> {
    Err(anyhow::anyhow!("built without the 'telemetry' feature"))
}
