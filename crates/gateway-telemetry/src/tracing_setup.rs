//! Logging and tracing setup.
//!
//! Installs a global `tracing` subscriber with an `EnvFilter`, a human or JSON
//! formatter, and optionally an OpenTelemetry tracer provider so governance
//! spans carry trace ids.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{
    trace::{Config, RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::collections::HashMap;
use tracing::{info, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Attach an OpenTelemetry tracer provider
    pub enabled: bool,
    /// Service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (dev, staging, prod)
    pub environment: String,
    /// Sampling rate (0.0 - 1.0)
    pub sampling_rate: f64,
    /// Additional resource attributes
    pub attributes: HashMap<String, String>,
    /// Log level, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "ai-gateway-governance".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sampling_rate: 1.0,
            attributes: HashMap::new(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the environment
    #[must_use]
    pub fn with_environment(mut self, env: impl Into<String>) -> Self {
        self.environment = env.into();
        self
    }

    /// Enable or disable the OpenTelemetry provider
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Switch between JSON and human-readable log lines
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the sampling rate
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the log level
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Add a resource attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

fn fmt_layer<S>(json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    }
}

/// Initialize tracing with the given configuration
///
/// # Errors
/// Returns error if a global subscriber is already installed
pub fn init_tracing(config: &TracingConfig) -> Result<Option<TracerProvider>, TracingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if !config.enabled {
        tracing_subscriber::registry()
            .with(fmt_layer(config.json_logs).with_filter(filter))
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;

        return Ok(None);
    }

    let mut attributes = vec![
        opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
        opentelemetry::KeyValue::new("service.version", config.service_version.clone()),
        opentelemetry::KeyValue::new("deployment.environment", config.environment.clone()),
    ];
    attributes.extend(
        config
            .attributes
            .iter()
            .map(|(k, v)| opentelemetry::KeyValue::new(k.clone(), v.clone())),
    );
    let resource = Resource::new(attributes);

    // Build tracer provider
    let sampler = if config.sampling_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sampling_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sampling_rate)
    };

    let tracer_config = Config::default()
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    let provider = TracerProvider::builder()
        .with_config(tracer_config)
        .build();

    let tracer = provider.tracer(config.service_name.clone());

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer(config.json_logs).with_filter(filter))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        sampling_rate = config.sampling_rate,
        "Tracing initialized"
    );

    Ok(Some(provider))
}

/// Shutdown tracing and flush remaining spans
pub fn shutdown_tracing(provider: Option<TracerProvider>) {
    if let Some(provider) = provider {
        for result in provider.force_flush() {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to flush spans");
            }
        }
        drop(provider);
        info!("Tracing shutdown complete");
    }
}

/// Tracing initialization error
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to initialize tracing
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Create a span for one governed request
#[macro_export]
macro_rules! governance_span {
    ($operation:expr, $identity_id:expr, $tier:expr) => {
        tracing::info_span!(
            "governed_request",
            operation = %$operation,
            identity_id = %$identity_id,
            tier = %$tier,
            otel.kind = "internal"
        )
    };
}

/// Create a span for one backend attempt
#[macro_export]
macro_rules! backend_span {
    ($backend:expr, $model:expr, $attempt:expr) => {
        tracing::debug_span!(
            "backend_call",
            backend = %$backend,
            model = %$model,
            attempt = $attempt,
            otel.kind = "client"
        )
    };
}
