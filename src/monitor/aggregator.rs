use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::StoreError;
use crate::sink::{Chart, ChartSink};
use crate::store::{MinuteOfDay, Store, StoreKey, StoreLine};

use super::{MetricType, Role};

/// Bucket width of the raw counters.
const SECONDS_PER_BUCKET: f64 = 60.0;

// ─── Public types ────────────────────────────────────────────────

/// The two derived series produced per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Calls per second, from `success` counters.
    Rate,
    /// Milliseconds per call, from `elapsed / success`.
    Latency,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Rate, Family::Latency];

    /// Artifact file stem.
    pub fn stem(self) -> &'static str {
        self.metric().key()
    }

    /// Unit label shown on the chart axis.
    pub fn unit(self) -> &'static str {
        match self {
            Family::Rate => "t/s",
            Family::Latency => "ms/t",
        }
    }

    /// Raw counter whose changes trigger recomputation.
    fn metric(self) -> MetricType {
        match self {
            Family::Rate => MetricType::Success,
            Family::Latency => MetricType::Elapsed,
        }
    }
}

/// `max / min / avg / sum` of one family. `None` marks a value that
/// has no meaning for the family.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub max: f64,
    pub min: Option<f64>,
    pub avg: f64,
    pub sum: Option<f64>,
}

/// Per-minute values indexed by `Role::index`, plus the summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedSeries {
    pub points: BTreeMap<MinuteOfDay, [f64; 2]>,
    pub summary: Summary,
}

impl AggregatedSeries {
    pub fn value(&self, minute: MinuteOfDay, role: Role) -> Option<f64> {
        self.points.get(&minute).map(|v| v[role.index()])
    }

    /// Both roles added together.
    pub fn total(&self, minute: MinuteOfDay) -> Option<f64> {
        self.points.get(&minute).map(|v| v.iter().sum())
    }
}

/// Result of one method's rollup. A `None` family was unchanged since
/// its artifact was last produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRollup {
    pub day: String,
    pub service: String,
    pub method: String,
    pub rate: Option<AggregatedSeries>,
    pub latency: Option<AggregatedSeries>,
}

impl MethodRollup {
    pub fn family(&self, family: Family) -> Option<&AggregatedSeries> {
        match family {
            Family::Rate => self.rate.as_ref(),
            Family::Latency => self.latency.as_ref(),
        }
    }
}

/// Counts from one full pass over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub methods: usize,
    pub rendered: usize,
    pub unchanged: usize,
    pub failed: usize,
}

// ─── Raw accumulation ────────────────────────────────────────────

/// Running totals for one raw metric across all peers of a method.
/// Additions saturate at the `i64` bounds.
#[derive(Debug, Default)]
struct Accumulator {
    buckets: BTreeMap<MinuteOfDay, [i64; 2]>,
    max: i64,
    min: Option<i64>,
    /// `acc = (acc + file_mean) / 2`, consumer files only.
    avg: f64,
    sum: i64,
}

impl Accumulator {
    fn absorb(&mut self, role: Role, lines: &[StoreLine]) {
        if lines.is_empty() {
            return;
        }
        let slot = role.index();
        let mut file_sum = 0i64;
        for line in lines {
            let bucket = self.buckets.entry(line.minute).or_default();
            bucket[slot] = bucket[slot].saturating_add(line.value);
            let seen = bucket[slot];

            if role == Role::Consumer {
                self.max = self.max.max(seen);
            }
            self.min = Some(self.min.map_or(seen, |m| m.min(seen)));
            file_sum = file_sum.saturating_add(line.value);
        }
        if role == Role::Consumer {
            self.sum = self.sum.saturating_add(file_sum);
            let file_mean = file_sum as f64 / lines.len() as f64;
            self.avg = (self.avg + file_mean) / 2.0;
        }
    }

    fn raw(&self, minute: &MinuteOfDay, role: Role) -> i64 {
        self.buckets.get(minute).map_or(0, |v| v[role.index()])
    }
}

fn rate_series(success: &Accumulator) -> AggregatedSeries {
    let points = success
        .buckets
        .iter()
        .map(|(minute, v)| {
            (
                *minute,
                [
                    v[0] as f64 / SECONDS_PER_BUCKET,
                    v[1] as f64 / SECONDS_PER_BUCKET,
                ],
            )
        })
        .collect();
    AggregatedSeries {
        points,
        summary: Summary {
            max: success.max as f64 / SECONDS_PER_BUCKET,
            min: success.min.map(|m| m as f64 / SECONDS_PER_BUCKET),
            avg: success.avg / SECONDS_PER_BUCKET,
            sum: Some(success.sum as f64),
        },
    }
}

fn latency_series(elapsed: &Accumulator, success: &Accumulator, max_elapsed: i64) -> AggregatedSeries {
    let points = elapsed
        .buckets
        .iter()
        .map(|(minute, v)| {
            let mut out = [0.0; 2];
            for role in Role::ALL {
                let calls = success.raw(minute, role);
                if calls != 0 {
                    out[role.index()] = v[role.index()] as f64 / calls as f64;
                }
            }
            (*minute, out)
        })
        .collect();
    let avg = if success.sum == 0 {
        0.0
    } else {
        elapsed.sum as f64 / success.sum as f64
    };
    AggregatedSeries {
        points,
        summary: Summary {
            max: max_elapsed as f64,
            min: None,
            avg,
            sum: None,
        },
    }
}

// ─── Aggregator ──────────────────────────────────────────────────

/// Walks the store and rolls raw per-peer counters up into per-method
/// rate and latency series, handing each changed family to the chart sink.
///
/// Passes are serialized; a second caller waits for the running pass.
pub struct Aggregator {
    store: Arc<dyn Store>,
    charts: Arc<dyn ChartSink>,
    charts_root: PathBuf,
    pass: Mutex<()>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, charts: Arc<dyn ChartSink>, charts_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            charts,
            charts_root: charts_root.into(),
            pass: Mutex::new(()),
        }
    }

    /// Artifact location for one family of one method.
    pub fn artifact_path(&self, day: &str, service: &str, method: &str, family: Family) -> PathBuf {
        self.charts_root
            .join(day)
            .join(service)
            .join(method)
            .join(format!("{}.{}", family.stem(), self.charts.extension()))
    }

    /// One full pass over every day, service and method in the store.
    pub fn run(&self) -> RollupReport {
        let _pass = self.pass.lock();
        let mut report = RollupReport::default();

        for day in self.list(&[]) {
            for service in self.list(&[&day]) {
                for method in self.list(&[&day, &service]) {
                    report.methods += 1;
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.rollup(&day, &service, &method)
                            .map(|rollup| self.render(&rollup, &mut report))
                    }));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            report.failed += 1;
                            tracing::error!(%day, %service, %method, error = %e, "rollup failed");
                        }
                        Err(_) => {
                            report.failed += 1;
                            tracing::error!(%day, %service, %method, "rollup panicked, method skipped");
                        }
                    }
                }
            }
        }

        tracing::debug!(
            methods = report.methods,
            rendered = report.rendered,
            unchanged = report.unchanged,
            failed = report.failed,
            "aggregation pass finished",
        );
        report
    }

    /// Recomputes the families of one method whose raw logs are newer
    /// than their artifact.
    pub fn rollup(&self, day: &str, service: &str, method: &str) -> Result<MethodRollup, StoreError> {
        let peers = self.peers(day, service, method)?;
        let key = |role: Role, peer: &str, metric: MetricType| StoreKey {
            day: day.to_string(),
            service: service.to_string(),
            method: method.to_string(),
            role,
            peer: peer.to_string(),
            metric,
        };

        let changed = |family: Family| {
            let artifact = modified(&self.artifact_path(day, service, method, family));
            peers.iter().any(|(role, peer)| {
                match (self.store.modified(&key(*role, peer.as_str(), family.metric())), artifact) {
                    (Some(raw), Some(artifact)) => raw > artifact,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            })
        };
        let rate_changed = changed(Family::Rate);
        let latency_changed = changed(Family::Latency);

        let mut rollup = MethodRollup {
            day: day.to_string(),
            service: service.to_string(),
            method: method.to_string(),
            rate: None,
            latency: None,
        };
        if !rate_changed && !latency_changed {
            return Ok(rollup);
        }

        // Latency divides by success, so success is read either way.
        let mut success = Accumulator::default();
        for (role, peer) in &peers {
            success.absorb(*role, &self.store.read(&key(*role, peer.as_str(), MetricType::Success))?);
        }

        if latency_changed {
            let mut elapsed = Accumulator::default();
            let mut max_elapsed = 0i64;
            for (role, peer) in &peers {
                elapsed.absorb(*role, &self.store.read(&key(*role, peer.as_str(), MetricType::Elapsed))?);
                let peak = self
                    .store
                    .read(&key(*role, peer.as_str(), MetricType::MaxElapsed))?
                    .iter()
                    .map(|l| l.value)
                    .max()
                    .unwrap_or(0);
                max_elapsed = max_elapsed.max(peak);
            }
            rollup.latency = Some(latency_series(&elapsed, &success, max_elapsed));
        }
        if rate_changed {
            rollup.rate = Some(rate_series(&success));
        }
        Ok(rollup)
    }

    fn render(&self, rollup: &MethodRollup, report: &mut RollupReport) {
        let mut any = false;
        for family in Family::ALL {
            let Some(series) = rollup.family(family) else {
                continue;
            };
            any = true;
            let path = self.artifact_path(&rollup.day, &rollup.service, &rollup.method, family);
            let chart = Chart {
                family,
                service: &rollup.service,
                method: &rollup.method,
                day: &rollup.day,
                series,
            };
            match self.charts.render(&chart, &path) {
                Ok(()) => {
                    report.rendered += 1;
                    tracing::info!(path = %path.display(), "chart written");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "chart render failed");
                }
            }
        }
        if !any {
            report.unchanged += 1;
        }
    }

    /// `(role, peer)` pairs below a method, consumer side first.
    fn peers(&self, day: &str, service: &str, method: &str) -> Result<Vec<(Role, String)>, StoreError> {
        let mut out = Vec::new();
        for role in Role::ALL {
            for peer in self.store.children(&[day, service, method, role.as_str()])? {
                out.push((role, peer));
            }
        }
        Ok(out)
    }

    fn list(&self, prefix: &[&str]) -> Vec<String> {
        self.store.children(prefix).unwrap_or_else(|e| {
            tracing::warn!(prefix = %prefix.join("/"), error = %e, "cannot list store");
            Vec::new()
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
