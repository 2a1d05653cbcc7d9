pub mod aggregator;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod writer;

pub use aggregator::{AggregatedSeries, Aggregator, Family, MethodRollup, RollupReport, Summary};
pub use queue::{Envelope, IngestQueue};
pub use service::MonitorService;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

// ─── Parameter keys ──────────────────────────────────────────────

pub const INTERFACE_KEY: &str = "interface";
pub const METHOD_KEY: &str = "method";
pub const PROVIDER_KEY: &str = "provider";
pub const CONSUMER_KEY: &str = "consumer";
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Literal timestamp layout accepted alongside epoch milliseconds.
const TIMESTAMP_LAYOUT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LAYOUT_LEN: usize = "yyyyMMddHHmmss".len();

/// Store segment used when a record lacks the service, method or peer.
pub const MISSING_SEGMENT: &str = "null";

// ─── Role ────────────────────────────────────────────────────────

/// Which side of the call reported the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Consumer,
    Provider,
}

impl Role {
    /// Traversal and vector order: consumer first.
    pub const ALL: [Role; 2] = [Role::Consumer, Role::Provider];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Provider => "provider",
        }
    }

    /// Slot of this role inside a per-minute vector.
    pub fn index(self) -> usize {
        match self {
            Role::Consumer => 0,
            Role::Provider => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Metric types ────────────────────────────────────────────────

/// The six counters every record carries, one store file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Success,
    Failure,
    Elapsed,
    Concurrent,
    MaxElapsed,
    MaxConcurrent,
}

impl MetricType {
    pub const ALL: [MetricType; 6] = [
        MetricType::Success,
        MetricType::Failure,
        MetricType::Elapsed,
        MetricType::Concurrent,
        MetricType::MaxElapsed,
        MetricType::MaxConcurrent,
    ];

    /// Parameter key, also the suffix of the store file name.
    pub fn key(self) -> &'static str {
        match self {
            MetricType::Success => "success",
            MetricType::Failure => "failure",
            MetricType::Elapsed => "elapsed",
            MetricType::Concurrent => "concurrent",
            MetricType::MaxElapsed => "max.elapsed",
            MetricType::MaxConcurrent => "max.concurrent",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ─── Record ──────────────────────────────────────────────────────

/// One statistics report for an RPC call pair.
/// Producers build these and hand them to `MonitorService::collect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Transport tag of the report, e.g. "count"
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Address of the side that produced the report
    pub host: String,
    /// Call identity plus one value per metric type
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_protocol() -> String {
    "count".into()
}

impl Record {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            parameters: HashMap::new(),
        }
    }

    /// Builder-style parameter insert.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(key.into(), value.to_string());
        self
    }

    /// Non-empty parameter value. An empty string counts as absent.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn service(&self) -> Option<&str> {
        self.parameter(INTERFACE_KEY)
    }

    pub fn method(&self) -> Option<&str> {
        self.parameter(METHOD_KEY)
    }

    /// A `provider` parameter means the consumer sent this report.
    pub fn role(&self) -> Role {
        if self.parameter(PROVIDER_KEY).is_some() {
            Role::Consumer
        } else {
            Role::Provider
        }
    }

    /// Host of the counterpart, port stripped.
    pub fn peer_host(&self) -> Option<&str> {
        let peer = match self.role() {
            Role::Consumer => self.parameter(PROVIDER_KEY),
            Role::Provider => self.parameter(CONSUMER_KEY),
        }?;
        Some(strip_port(peer))
    }

    /// Metric value; absent or unparseable reads as 0.
    pub fn metric(&self, metric: MetricType) -> i64 {
        self.parameter(metric.key())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// When the call was observed, in monitor-local time.
    ///
    /// Accepts a 14-digit `yyyyMMddHHmmss` literal or epoch
    /// milliseconds. Anything else falls back to now.
    pub fn observed_at(&self) -> NaiveDateTime {
        self.parameter(TIMESTAMP_KEY)
            .and_then(parse_timestamp)
            .unwrap_or_else(|| Local::now().naive_local())
    }

    /// Identity checks needed before the record can be stored meaningfully.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.service().is_none() {
            return Err(RecordError::MissingService);
        }
        if self.method().is_none() {
            return Err(RecordError::MissingMethod);
        }
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    // 14 characters is always the literal layout, never epoch millis.
    if raw.len() == TIMESTAMP_LAYOUT_LEN {
        return NaiveDateTime::parse_from_str(raw, TIMESTAMP_LAYOUT).ok();
    }
    let millis: i64 = raw.parse().ok()?;
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.naive_local())
}

/// `10.0.0.1:20880` → `10.0.0.1`. A leading colon is left alone.
pub fn strip_port(address: &str) -> &str {
    match address.find(':') {
        Some(i) if i > 0 => &address[..i],
        _ => address,
    }
}

// ─── URL form ────────────────────────────────────────────────────

/// `count://10.0.0.2:0/com.acme.Bar?method=foo&success=5&...`
///
/// The path names the service when no `interface` parameter is given.
impl FromStr for Record {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| RecordError::MissingProtocol(s.to_string()))?;
        if protocol.is_empty() {
            return Err(RecordError::MissingProtocol(s.to_string()));
        }

        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (authority, path) = location.split_once('/').unwrap_or((location, ""));
        let host = strip_port(authority);
        if host.is_empty() {
            return Err(RecordError::MissingHost(s.to_string()));
        }

        let mut record = Record::new(protocol, host);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            record.parameters.insert(k.to_string(), v.to_string());
        }
        if record.service().is_none() && !path.is_empty() {
            record
                .parameters
                .insert(INTERFACE_KEY.to_string(), path.to_string());
        }
        Ok(record)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}",
            self.protocol,
            self.host,
            self.service().unwrap_or_default()
        )?;
        // Sorted so log lines are stable.
        let sorted: BTreeMap<_, _> = self.parameters.iter().collect();
        for (i, (k, v)) in sorted.into_iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}
