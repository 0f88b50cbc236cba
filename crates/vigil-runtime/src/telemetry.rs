//! Logging and OpenTelemetry setup for a Vigil board.
//!
//! [`init_tracing`] installs the global subscriber once per process:
//!
//! - an [`EnvFilter`] that defaults to `info` for the Vigil crates and `warn`
//!   for everything else ([`DEFAULT_DIRECTIVES`]), overridable via `RUST_LOG`;
//! - a compact or JSON formatter picked by [`LogFormat::from_env`];
//! - when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP/HTTP span exporter
//!   whose resource names the board (`vigil.board.ip`, `vigil.board.mac`),
//!   so the `health_tick` and `on_link_event` spans of several boards can be
//!   told apart in one collector.
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_types::NetworkConfig;
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = vigil_runtime::telemetry::init_tracing("vigil", &NetworkConfig::default());
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};
use vigil_types::NetworkConfig;

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "VIGIL_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVES: &str =
    "warn,vigil_kernel=info,vigil_runtime=info,vigil_middleware=info,vigil_hal=info,vigil_cli=info";

/// Resource attribute carrying the board's configured address.
pub const BOARD_IP_ATTRIBUTE: &str = "vigil.board.ip";

/// Resource attribute carrying the board's MAC address.
pub const BOARD_MAC_ATTRIBUTE: &str = "vigil.board.mac";

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Output format of the console log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is compact.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }

    /// Read [`LOG_FORMAT_ENV`].
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let fmt = tracing_subscriber::fmt::layer().with_target(true);
        match self {
            LogFormat::Compact => fmt.compact().boxed(),
            LogFormat::Json => fmt.json().boxed(),
        }
    }
}

/// The filter [`init_tracing`] installs.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber for the board described by `network`.
///
/// The returned [`TracerProviderGuard`] must be held for the lifetime of the
/// process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, network: &NetworkConfig) -> TracerProviderGuard {
    let format = LogFormat::from_env();
    let provider = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .and_then(|endpoint| build_provider(&endpoint, board_resource(service_name, network)));

    let init = tracing_subscriber::registry()
        .with(format.layer())
        .with(env_filter())
        .with(
            provider
                .as_ref()
                .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))),
        )
        .try_init();
    if let Err(e) = init {
        eprintln!("[vigil] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the OTLP provider on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[vigil] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Resource identifying this process and the board it simulates.
pub fn board_resource(service_name: &str, network: &NetworkConfig) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new(BOARD_IP_ATTRIBUTE, network.ip.to_string()),
            KeyValue::new(BOARD_MAC_ATTRIBUTE, network.mac.to_string()),
        ])
        .build()
}

fn build_provider(endpoint: &str, resource: Resource) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[vigil] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The CLI builds its Tokio runtime after this runs, so the
            // exporter must not need one.
            .with_simple_exporter(exporter)
            .build(),
    )
}
