use std::path::PathBuf;

use thiserror::Error;

/// Failure to build a `Record` from its URL form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing protocol separator in {0:?}")]
    MissingProtocol(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("record has no service interface")]
    MissingService,

    #[error("record has no method")]
    MissingMethod,
}

/// Failure inside a `Store` backend. Always carries the path involved.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("creating directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("appending to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listing {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure inside one of the external sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sending statistics: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("persistence endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("writing chart {path}: {source}")]
    ChartIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding chart: {0}")]
    ChartEncode(#[from] serde_json::Error),
}
