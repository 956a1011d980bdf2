//! Observability setup for unitflow: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
