//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! runtime concerns (configuration, metrics, tracing, health).

/// Topic bus for fanning decoded messages out to consumers.
pub mod broadcast;

/// Typed configuration and environment loading.
pub mod config;

/// Health check and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;

/// Connection client, transports, keepalive and reconnect policy.
pub mod websocket;
