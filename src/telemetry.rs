//! Logging and optional OpenTelemetry export.
//!
//! Logs always go to stdout through `tracing_subscriber::fmt`, filtered by
//! `RUST_LOG` (default `info`). With the `telemetry` feature, spans are also
//! exported over OTLP when any `OTEL_EXPORTER_OTLP_*` variable is set.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "telemetry")]
use otel::{TelemetryProtocol, init_tracer_provider};

/// Holds exporter state for graceful shutdown.
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

impl Telemetry {
    /// Installs the global subscriber. A second call leaves the first subscriber in place.
    #[cfg(not(feature = "telemetry"))]
    pub fn init() -> Self {
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        Self {}
    }

    #[cfg(feature = "telemetry")]
    pub fn init() -> Self {
        use opentelemetry::trace::TracerProvider as _;
        use tracing_opentelemetry::OpenTelemetryLayer;

        let protocol = TelemetryProtocol::from_env();
        let tracer_provider = protocol.and_then(|protocol| match init_tracer_provider(protocol) {
            Ok(provider) => Some(provider),
            Err(e) => {
                eprintln!("Failed to build OTLP span exporter: {e}");
                None
            }
        });
        let otel_layer = tracer_provider
            .as_ref()
            .map(|provider| OpenTelemetryLayer::new(provider.tracer(env!("CARGO_PKG_NAME"))));
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .try_init();

        match (protocol, tracer_provider.is_some()) {
            (Some(protocol), true) => {
                tracing::info!("OpenTelemetry tracing exporter is enabled via {:?}", protocol)
            }
            _ => tracing::info!("OpenTelemetry is not enabled"),
        }
        Self { tracer_provider }
    }
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}

#[cfg(feature = "telemetry")]
mod otel {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::ExporterBuildError;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::{
        SCHEMA_URL,
        attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
    };
    use std::env;

    #[allow(clippy::upper_case_acronyms)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TelemetryProtocol {
        HTTP,
        GRPC,
    }

    impl TelemetryProtocol {
        /// `Some` when any OTLP exporter variable is set.
        pub fn from_env() -> Option<Self> {
            let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
            if !is_enabled {
                return None;
            }
            let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => TelemetryProtocol::GRPC,
                _ => TelemetryProtocol::HTTP,
            };
            Some(protocol)
        }
    }

    fn resource() -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    pub fn init_tracer_provider(protocol: TelemetryProtocol) -> Result<SdkTracerProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter.with_http().build(),
            TelemetryProtocol::GRPC => exporter.with_tonic().build(),
        }?;
        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(1.0))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(exporter)
            .build())
    }
}
