//! Log output and optional OTLP span export.
//!
//! Spans are exported only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. The
//! exporter speaks gRPC; `OTEL_SERVICE_NAME` overrides the reported service
//! name, which defaults to the package name.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Exporter settings read from the standard `OTEL_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExporterSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    service_name: String,
    instance_id: String,
}

impl ExporterSettings {
    /// `None` when no collector endpoint is configured.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|ep| !ep.trim().is_empty())?;

        if let Some(protocol) = lookup("OTEL_EXPORTER_OTLP_PROTOCOL")
            && protocol != "grpc"
        {
            debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{}' ignored, using grpc", protocol);
        }

        Some(Self {
            endpoint: with_scheme(endpoint.trim()),
            headers: lookup("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| header_pairs(&raw))
                .unwrap_or_default(),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            instance_id: lookup("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|| Ulid::new().to_string()),
        })
    }

    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split(['/', ':']).next())
            .filter(|host| !host.is_empty())
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let key = MetadataKey::<Ascii>::from_bytes(name.to_ascii_lowercase().as_bytes())
                .with_context(|| format!("invalid OTLP header name: {name}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .with_context(|| format!("invalid OTLP header value for {name}"))?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new("service.name", self.service_name.clone()),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
                KeyValue::new("vcs.commit", crate::GIT_COMMIT_HASH),
            ])
            .build()
    }
}

// `k1=v1,k2=v2`, pairs without `=` are skipped.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

fn init_tracer(settings: &ExporterSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(host) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(host.to_string())
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(settings.metadata()?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(settings.resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(settings.service_name.clone()))
}

/// Install the global subscriber: compact log lines, plus OTLP export when a
/// collector endpoint is configured.
///
/// # Errors
///
/// Returns an error if tracer or subscriber initialization fails
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    match ExporterSettings::from_lookup(|key| env::var(key).ok()) {
        Some(settings) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(init_tracer(&settings)?);
            let subscriber = Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

/// Flush pending spans; a no-op when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn disabled_without_endpoint() {
        assert!(ExporterSettings::from_lookup(lookup(&[])).is_none());
        assert!(
            ExporterSettings::from_lookup(lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", " ")]))
                .is_none()
        );
    }

    #[test]
    fn service_name_defaults_to_package() {
        let settings = ExporterSettings::from_lookup(lookup(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://localhost:4317",
        )]));
        assert_eq!(
            settings.map(|s| s.service_name),
            Some("tessera".to_string())
        );

        let settings = ExporterSettings::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_SERVICE_NAME", "tessera-eu"),
            ("OTEL_SERVICE_INSTANCE_ID", "node-1"),
        ]));
        assert_eq!(
            settings.map(|s| (s.service_name, s.instance_id)),
            Some(("tessera-eu".to_string(), "node-1".to_string()))
        );
    }

    #[test]
    fn bare_endpoint_gets_https_and_tls_domain() {
        let settings = ExporterSettings::from_lookup(lookup(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "otel.tessera.dev:4317/",
        )]));
        let Some(settings) = settings else {
            panic!("endpoint is set");
        };
        assert_eq!(settings.endpoint, "https://otel.tessera.dev:4317");
        assert_eq!(settings.tls_domain(), Some("otel.tessera.dev"));

        let plain = ExporterSettings::from_lookup(lookup(&[(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://localhost:4317",
        )]));
        assert_eq!(plain.as_ref().and_then(ExporterSettings::tls_domain), None);
    }

    #[test]
    fn headers_become_metadata() -> Result<()> {
        assert_eq!(
            header_pairs("authorization = Bearer t0k,malformed,=x,tenant=a=b"),
            vec![
                ("authorization".to_string(), "Bearer t0k".to_string()),
                ("tenant".to_string(), "a=b".to_string()),
            ]
        );

        let settings = ExporterSettings::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "Authorization=Bearer t0k"),
        ]))
        .context("endpoint is set")?;
        let metadata = settings.metadata()?;
        assert_eq!(
            metadata.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer t0k")
        );
        Ok(())
    }

    #[test]
    fn invalid_header_value_is_an_error() {
        let settings = ExporterSettings {
            endpoint: "http://localhost:4317".to_string(),
            headers: vec![("x-token".to_string(), "line\nbreak".to_string())],
            service_name: "tessera".to_string(),
            instance_id: "node-1".to_string(),
        };
        assert!(settings.metadata().is_err());
    }

    #[test]
    fn shutdown_tracer_without_provider() {
        shutdown_tracer();
    }
}
