//! Metrics collection and export module
//!
//! Components report through an injected [`Telemetry`] handle tagged by
//! module and function. [`NoopTelemetry`] is the default; the binary wires
//! [`PrometheusTelemetry`].

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tags identifying the reporting call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tags {
    pub module: &'static str,
    pub func: &'static str,
}

impl Tags {
    pub const fn new(module: &'static str, func: &'static str) -> Self {
        Self { module, func }
    }
}

/// Telemetry sink for function calls, durations and errors
pub trait Telemetry: Send + Sync + std::fmt::Debug {
    fn report_call(&self, tags: Tags);
    fn report_timing(&self, tags: Tags, elapsed: Duration);
    fn report_error(&self, tags: Tags);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn report_call(&self, _tags: Tags) {}
    fn report_timing(&self, _tags: Tags, _elapsed: Duration) {}
    fn report_error(&self, _tags: Tags) {}
}

pub fn noop() -> Arc<dyn Telemetry> {
    Arc::new(NoopTelemetry)
}

/// Prometheus-backed telemetry
#[derive(Debug, Clone)]
pub struct PrometheusTelemetry {
    registry: Registry,
    calls: IntCounterVec,
    errors: IntCounterVec,
    durations: HistogramVec,
}

impl PrometheusTelemetry {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let calls = IntCounterVec::new(
            Opts::new("func_calls_total", "Number of function calls"),
            &["module", "func"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("func_errors_total", "Number of function calls that failed"),
            &["module", "func"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new("func_duration_seconds", "Function call duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 20.0]),
            &["module", "func"],
        )?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(durations.clone()))?;

        Ok(Self {
            registry,
            calls,
            errors,
            durations,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn calls(&self, tags: Tags) -> u64 {
        self.calls.with_label_values(&[tags.module, tags.func]).get()
    }

    pub fn errors(&self, tags: Tags) -> u64 {
        self.errors.with_label_values(&[tags.module, tags.func]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn export(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Telemetry for PrometheusTelemetry {
    fn report_call(&self, tags: Tags) {
        self.calls.with_label_values(&[tags.module, tags.func]).inc();
    }

    fn report_timing(&self, tags: Tags, elapsed: Duration) {
        self.durations
            .with_label_values(&[tags.module, tags.func])
            .observe(elapsed.as_secs_f64());
    }

    fn report_error(&self, tags: Tags) {
        self.errors.with_label_values(&[tags.module, tags.func]).inc();
    }
}

/// Reports the call on creation and its duration when dropped
pub struct FuncTimer<'a> {
    telemetry: &'a dyn Telemetry,
    tags: Tags,
    start: Instant,
}

impl<'a> FuncTimer<'a> {
    pub fn start(telemetry: &'a dyn Telemetry, tags: Tags) -> Self {
        telemetry.report_call(tags);
        Self {
            telemetry,
            tags,
            start: Instant::now(),
        }
    }

    pub fn error(&self) {
        self.telemetry.report_error(self.tags);
    }
}

impl Drop for FuncTimer<'_> {
    fn drop(&mut self) {
        self.telemetry.report_timing(self.tags, self.start.elapsed());
    }
}
