use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::SinkError;
use crate::sink::{ChartSink, HttpPersistenceSink, JsonChartSink, PersistenceSink};
use crate::store::{FsStore, Store};

use super::scheduler::Scheduler;
use super::writer::WriterLoop;
use super::{Aggregator, IngestQueue, Record};

/// Entry point for statistics producers.
///
/// `collect` hands a record to the queue and returns immediately. A
/// single writer task persists queued records; a scheduler rolls the
/// store up into charts on a fixed delay.
pub struct MonitorService {
    queue: Arc<IngestQueue>,
    running: Arc<AtomicBool>,
    aggregator: Arc<Aggregator>,
    writer: Mutex<Option<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorService {
    /// Builds the filesystem store, JSON chart sink and, when a URL is
    /// configured, the HTTP persistence sink. Must run inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, SinkError> {
        let store: Arc<dyn Store> = Arc::new(FsStore::new(&config.statistics_dir));
        let charts: Arc<dyn ChartSink> = Arc::new(JsonChartSink);
        let persistence = match config.persist_url() {
            Some(url) => {
                let sink: Arc<dyn PersistenceSink> =
                    Arc::new(HttpPersistenceSink::new(url, config.persist.timeout)?);
                Some(sink)
            }
            None => {
                tracing::warn!("persist.url not set, statistics are not forwarded");
                None
            }
        };
        Ok(Self::start(config, store, charts, persistence))
    }

    /// Spawns the writer and the scheduler. Must run inside a tokio runtime.
    pub fn start(
        config: &Config,
        store: Arc<dyn Store>,
        charts: Arc<dyn ChartSink>,
        persistence: Option<Arc<dyn PersistenceSink>>,
    ) -> Self {
        let queue = Arc::new(IngestQueue::new(config.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&store),
            charts,
            &config.charts_dir,
        ));

        let mut writer = WriterLoop::new(Arc::clone(&queue), store, Arc::clone(&running))
            .with_retry_delay(config.writer_retry_delay);
        if let Some(sink) = persistence {
            writer = writer.with_persistence(sink, config.persist.timeout);
        }
        if config.aggregate_after_write {
            writer = writer.with_aggregate_after_write(Arc::clone(&aggregator));
        }

        let scheduler = Scheduler::new(
            Arc::clone(&aggregator),
            config.aggregate_initial_delay,
            config.aggregate_interval,
        );

        tracing::info!(
            capacity = config.queue_capacity,
            statistics_dir = %config.statistics_dir.display(),
            charts_dir = %config.charts_dir.display(),
            "monitor started",
        );

        Self {
            queue,
            running,
            aggregator,
            writer: Mutex::new(Some(writer.spawn())),
            scheduler: Mutex::new(Some(scheduler.spawn())),
        }
    }

    /// Queues `record` for persistence. Never blocks; when the queue is
    /// full the record is dropped. Returns whether it was queued.
    pub fn collect(&self, record: Record) -> bool {
        tracing::debug!(%record, "collect statistics");
        let accepted = self.queue.offer(record);
        if !accepted && !self.queue.is_closed() {
            tracing::warn!(
                capacity = self.queue.capacity(),
                dropped = self.queue.dropped(),
                "statistics queue full, record dropped",
            );
        }
        accepted
    }

    /// Older name for `collect`.
    pub fn count(&self, record: Record) -> bool {
        self.collect(record)
    }

    /// Historical lookups are not served; always empty.
    pub fn lookup(&self, _query: &Record) -> Vec<Record> {
        Vec::new()
    }

    /// Stops the writer at its next iteration and cancels the scheduler.
    /// Records still queued are not drained.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.close();
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
        tracing::info!("monitor closing");
    }

    /// Waits for the writer task to exit. Only meaningful after `close`.
    pub async fn stopped(&self) {
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        if self.is_running() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{INTERFACE_KEY, METHOD_KEY, PROVIDER_KEY, TIMESTAMP_KEY};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording(Mutex<Vec<Record>>);

    #[async_trait]
    impl PersistenceSink for Recording {
        async fn persist(&self, record: &Record) -> Result<(), SinkError> {
            self.0.lock().push(record.clone());
            Ok(())
        }
    }

    fn config(root: &std::path::Path, capacity: usize) -> Config {
        Config {
            queue_capacity: capacity,
            statistics_dir: root.join("statistics"),
            charts_dir: root.join("charts"),
            aggregate_interval: Duration::from_secs(3600),
            writer_retry_delay: Duration::from_millis(10),
            ..Config::default()
        }
    }

    fn record(success: i64) -> Record {
        Record::new("count", "10.0.0.9")
            .with_parameter(INTERFACE_KEY, "com.acme.Bar")
            .with_parameter(METHOD_KEY, "foo")
            .with_parameter(PROVIDER_KEY, "10.0.0.1:20880")
            .with_parameter(TIMESTAMP_KEY, "20240305143000")
            .with_parameter("success", success)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_collect_persists_and_forwards() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path(), 16);
        let sink = Arc::new(Recording::default());
        let monitor = MonitorService::start(
            &cfg,
            Arc::new(FsStore::new(&cfg.statistics_dir)),
            Arc::new(JsonChartSink),
            Some(sink.clone() as Arc<dyn PersistenceSink>),
        );

        assert!(monitor.collect(record(3)));
        wait_for(|| sink.0.lock().len() == 1).await;

        let file = cfg
            .statistics_dir
            .join("20240305/com.acme.Bar/foo/consumer/10.0.0.1/consumer.success");
        wait_for(|| file.exists()).await;
        assert_eq!(std::fs::read_to_string(&file).expect("file"), "1430 3\n");
        assert_eq!(sink.0.lock()[0].metric(crate::monitor::MetricType::Success), 3);

        monitor.close();
        monitor.stopped().await;
    }

    #[tokio::test]
    async fn test_close_stops_writer_and_rejects_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path(), 16);
        let monitor = MonitorService::from_config(&cfg).expect("monitor");

        monitor.close();
        tokio::time::timeout(Duration::from_secs(5), monitor.stopped())
            .await
            .expect("writer exits after close");

        assert!(!monitor.is_running());
        assert!(!monitor.collect(record(1)));
        assert!(!cfg.statistics_dir.join("20240305").exists());
    }

    #[tokio::test]
    async fn test_lookup_is_always_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = MonitorService::from_config(&config(dir.path(), 4)).expect("monitor");
        monitor.collect(record(1));
        assert!(monitor.lookup(&record(1)).is_empty());
        monitor.close();
    }

    #[tokio::test]
    async fn test_count_is_collect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(dir.path(), 4);
        let monitor = MonitorService::from_config(&cfg).expect("monitor");
        assert!(monitor.count(record(2)));
        let file = cfg
            .statistics_dir
            .join("20240305/com.acme.Bar/foo/consumer/10.0.0.1/consumer.success");
        wait_for(|| file.exists()).await;
        assert!(file.exists());
        monitor.close();
        monitor.stopped().await;
    }

    #[tokio::test]
    async fn test_aggregate_after_write_renders_without_a_scheduled_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config {
            aggregate_after_write: true,
            // Keep the scheduler out of the way.
            aggregate_initial_delay: Duration::from_secs(3600),
            ..config(dir.path(), 16)
        };
        let monitor = MonitorService::from_config(&cfg).expect("monitor");

        assert!(monitor.collect(record(120)));

        let chart = cfg.charts_dir.join("20240305/com.acme.Bar/foo/success.json");
        wait_for(|| chart.exists()).await;
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&chart).expect("chart")).expect("json");
        assert_eq!(doc["unit"], "t/s");
        assert_eq!(doc["consumer"][0]["time"], "14:30");
        assert_eq!(doc["consumer"][0]["value"], 2.0);

        monitor.close();
        monitor.stopped().await;
    }
}
