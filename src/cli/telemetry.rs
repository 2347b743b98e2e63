//! Log output plus optional OTLP/gRPC span export.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::SdkTracerProvider,
    Resource,
};
use std::{env::var, time::Duration};
use tonic::metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

static PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

const LOCAL_COLLECTOR: &str = "http://localhost:4317";

/// Where spans go and which gRPC metadata rides along, from the `OTEL_*`
/// environment.
struct Exporter {
    endpoint: String,
    metadata: MetadataMap,
}

impl Exporter {
    fn from_env() -> Result<Self> {
        if let Ok(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            if protocol != "grpc" {
                debug!("OTLP protocol {protocol} not available, exporting over grpc");
            }
        }
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .map_or_else(|_| LOCAL_COLLECTOR.to_string(), |raw| with_scheme(&raw));
        let metadata = match var("OTEL_EXPORTER_OTLP_HEADERS") {
            Ok(raw) => otlp_metadata(&raw)?,
            Err(_) => MetadataMap::new(),
        };
        Ok(Self { endpoint, metadata })
    }

    fn provider(self) -> Result<SdkTracerProvider> {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(Duration::from_secs(3))
            .with_metadata(self.metadata)
            .build()?;

        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(service_resource())
            .build())
    }
}

/// Parse `key=value,key=value`. Pairs without `=` are dropped; `-bin` keys
/// carry base64 payloads.
fn otlp_metadata(raw: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();
    for (key, value) in raw.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.ends_with("-bin") {
            let bytes = general_purpose::STANDARD
                .decode(value)
                .map_err(|e| anyhow!("{key} is not valid base64: {e}"))?;
            let key = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("bad metadata key {key}: {e}"))?;
            metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let parsed_key = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("bad metadata key {key}: {e}"))?;
            let parsed_value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("bad metadata value for {key}: {e}"))?;
            metadata.insert(parsed_key, parsed_value);
        }
    }
    Ok(metadata)
}

/// Bare `host:port` endpoints are assumed to be TLS collectors.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn service_resource() -> Resource {
    let instance = var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());
    Resource::builder_empty()
        .with_attributes(vec![
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance),
        ])
        .build()
}

fn install(provider: &SdkTracerProvider) {
    if PROVIDER.set(provider.clone()).is_err() {
        debug!("span exporter already installed");
    }
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
}

/// Install the global subscriber. Spans are exported only when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error for unusable `OTEL_*` settings or when a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let provider = Exporter::from_env()?.provider()?;
        install(&provider);
        Some(tracing_opentelemetry::layer().with_tracer(provider.tracer(env!("CARGO_PKG_NAME"))))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Flush buffered spans. Does nothing when export was never enabled.
pub fn flush() {
    if let Some(provider) = PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("span exporter shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascii(metadata: &MetadataMap, key: &str) -> Option<String> {
        metadata
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    #[test]
    fn metadata_trims_and_drops_pairs_without_value() -> Result<()> {
        assert!(otlp_metadata("")?.is_empty());

        let metadata = otlp_metadata(" Authorization = Bearer abc ,malformed, x-tenant=a=b")?;
        assert_eq!(metadata.len(), 2);
        assert_eq!(ascii(&metadata, "authorization").as_deref(), Some("Bearer abc"));
        assert_eq!(ascii(&metadata, "x-tenant").as_deref(), Some("a=b"));
        assert!(ascii(&metadata, "malformed").is_none());
        Ok(())
    }

    #[test]
    fn binary_metadata_is_base64_decoded() -> Result<()> {
        let metadata = otlp_metadata("trace-key-bin=YmluYXJ5IGRhdGE=")?;
        let bytes = metadata
            .get_bin("trace-key-bin")
            .and_then(|value| value.to_bytes().ok())
            .map(|bytes| bytes.to_vec());
        assert_eq!(bytes.as_deref(), Some(&b"binary data"[..]));
        Ok(())
    }

    #[test]
    fn binary_metadata_rejects_bad_base64() {
        let err = otlp_metadata("trace-key-bin=not-valid-base64!!!")
            .err()
            .map(|err| err.to_string());
        assert!(err.is_some_and(|message| message.contains("not valid base64")));
    }

    #[test]
    fn bare_endpoints_get_https() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(with_scheme("localhost:4317"), "https://localhost:4317");
        assert_eq!(with_scheme("otel.agora.dev:4317/"), "https://otel.agora.dev:4317");
    }

    #[test]
    fn flush_without_exporter_is_a_no_op() {
        flush();
    }
}
