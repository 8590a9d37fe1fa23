//! HTTP surface of the export generator.
//!
//! ## Structure
//!
//! - [`config`] - command line and environment configuration.
//! - [`service`] - router, shared state, handlers and error responses.
//! - [`streaming`] - runs one export pipeline per download and feeds the
//!   response body.
//! - [`telemetry`] - logging and optional OpenTelemetry export.

pub mod config;
pub mod service;
pub mod streaming;
pub mod telemetry;
