//! Log output and optional trace export.
//!
//! Logs always go to stderr so that `--print` output on stdout stays clean.
//! Spans are exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` or
//! `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set; the standard `OTEL_*`
//! variables configure the exporter and resource.

use std::io::IsTerminal;

use anyhow::Result;
use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "kubesync";

/// Format of log lines on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	/// Pretty when stderr is a terminal, JSON otherwise.
	#[default]
	Auto,
	Pretty,
	Json,
}

impl LogFormat {
	fn use_json(self) -> bool {
		match self {
			LogFormat::Auto => !std::io::stderr().is_terminal(),
			LogFormat::Pretty => false,
			LogFormat::Json => true,
		}
	}
}

/// Keeps the trace pipeline alive; flushes pending spans when dropped.
#[must_use = "dropping the guard shuts down trace export"]
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("failed to shut down tracer provider: {e}");
			}
		}
	}
}

/// `--log-level` wins over `RUST_LOG`, which wins over `info`.
fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

fn otlp_configured() -> bool {
	[
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT,
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
	]
	.iter()
	.any(|var| std::env::var_os(var).is_some())
}

/// Install the global subscriber. Must be called from within a Tokio runtime
/// when OTLP export is configured.
pub fn init(log_level: Option<Level>, format: LogFormat) -> Result<TelemetryGuard> {
	let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	let fmt_layer = if format.use_json() {
		fmt_layer.json().boxed()
	} else {
		fmt_layer.pretty().boxed()
	};

	let (otel_layer, tracer_provider) = if otlp_configured() {
		let provider = tracer_provider()?;
		let layer = tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME));
		opentelemetry::global::set_tracer_provider(provider.clone());
		(Some(layer), Some(provider))
	} else {
		(None, None)
	};

	tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer)
		.with(otel_layer)
		.try_init()?;

	Ok(TelemetryGuard { tracer_provider })
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	let mut resource = opentelemetry_sdk::Resource::builder();
	// The builder already honors OTEL_SERVICE_NAME.
	if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.unwrap_or_else(|_| opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT.to_string());
	let exporter = if protocol == "grpc" {
		opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?
	} else {
		opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?
	};

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_explicit_formats() {
		assert!(LogFormat::Json.use_json());
		assert!(!LogFormat::Pretty.use_json());
	}
}
