//! Prometheus metrics exporter (§4.4).

pub mod exporter;

pub use exporter::{ExporterError, ExporterHandleParts, serve};
