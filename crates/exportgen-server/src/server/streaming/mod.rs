//! Bridges the export pipeline to an HTTP response body.
//!
//! - [`coordinator`] - spawns the pipeline and hands back the body stream.

pub mod coordinator;
