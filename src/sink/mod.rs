//! Collaborators on the far side of the pipeline: durable forwarding of
//! raw records and rendering of rolled-up series.

pub mod chart;
pub mod http;

pub use chart::JsonChartSink;
pub use http::HttpPersistenceSink;

use std::path::Path;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::monitor::{AggregatedSeries, Family, Record};

/// Best-effort forwarding of a raw record to an external store.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, record: &Record) -> Result<(), SinkError>;
}

/// One rolled-up family for one method on one day.
#[derive(Debug, Clone, Copy)]
pub struct Chart<'a> {
    pub family: Family,
    pub service: &'a str,
    pub method: &'a str,
    /// `yyyyMMdd`
    pub day: &'a str,
    pub series: &'a AggregatedSeries,
}

/// Turns a chart into an artifact at `path`.
///
/// The aggregator compares the artifact's mtime against the raw logs,
/// so a successful render must leave a file at `path`.
pub trait ChartSink: Send + Sync {
    fn render(&self, chart: &Chart<'_>, path: &Path) -> Result<(), SinkError>;

    /// File extension of the artifacts this sink produces.
    fn extension(&self) -> &str {
        "png"
    }
}
