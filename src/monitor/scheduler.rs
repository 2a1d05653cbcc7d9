use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::Aggregator;

/// Fires an aggregation pass, waits `delay` after it finishes, repeats.
///
/// Passes run on the blocking pool and are awaited, so ticks never
/// overlap; passes triggered elsewhere queue on the aggregator's lock.
pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    initial_delay: Duration,
    delay: Duration,
}

impl Scheduler {
    pub fn new(aggregator: Arc<Aggregator>, initial_delay: Duration, delay: Duration) -> Self {
        Self {
            aggregator,
            initial_delay,
            delay,
        }
    }

    /// Starts ticking. Abort the handle to cancel.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.initial_delay).await;
            loop {
                let aggregator = Arc::clone(&self.aggregator);
                match tokio::task::spawn_blocking(move || aggregator.run()).await {
                    Ok(report) => tracing::debug!(
                        methods = report.methods,
                        rendered = report.rendered,
                        "scheduled aggregation done",
                    ),
                    Err(e) => tracing::error!(error = %e, "scheduled aggregation failed"),
                }
                tokio::time::sleep(self.delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::monitor::{MetricType, Role};
    use crate::sink::{Chart, ChartSink};
    use crate::store::{FsStore, MinuteOfDay, Store, StoreKey, StoreLine};
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    struct Counting(Mutex<usize>);

    impl ChartSink for Counting {
        fn render(&self, _chart: &Chart<'_>, path: &Path) -> Result<(), SinkError> {
            *self.0.lock() += 1;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).ok();
            }
            std::fs::write(path, b"chart").ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_tick_runs_after_initial_delay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::new(dir.path().join("statistics"));
        let key = StoreKey {
            day: "20240305".into(),
            service: "Bar".into(),
            method: "foo".into(),
            role: Role::Consumer,
            peer: "10.0.0.1".into(),
            metric: MetricType::Success,
        };
        store
            .append(
                &key,
                StoreLine {
                    minute: MinuteOfDay::new(10, 0).expect("valid"),
                    value: 60,
                },
            )
            .expect("append");

        let sink = Arc::new(Counting::default());
        let aggregator = Arc::new(Aggregator::new(
            Arc::new(store),
            sink.clone(),
            dir.path().join("charts"),
        ));
        let handle = Scheduler::new(aggregator, Duration::from_millis(1), Duration::from_secs(3600)).spawn();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while *sink.0.lock() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(*sink.0.lock(), 1);
    }
}
