use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::sink::PersistenceSink;
use crate::store::{MinuteOfDay, Store, StoreKey, StoreLine};

use super::{Aggregator, Envelope, IngestQueue, MetricType, Record, MISSING_SEGMENT};

// ─── Configuration ───────────────────────────────────────────────

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// The only task that appends to the store.
///
/// Drains the ingest queue one record at a time: forward to the
/// persistence sink, append one line per metric type, optionally run
/// a rollup. Nothing a single record does can stop the loop; only the
/// shutdown envelope or the running flag end it.
pub struct WriterLoop {
    queue: Arc<IngestQueue>,
    store: Arc<dyn Store>,
    running: Arc<AtomicBool>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    persist_timeout: Duration,
    aggregator: Option<Arc<Aggregator>>,
    retry_delay: Duration,
}

impl WriterLoop {
    pub fn new(queue: Arc<IngestQueue>, store: Arc<dyn Store>, running: Arc<AtomicBool>) -> Self {
        Self {
            queue,
            store,
            running,
            persistence: None,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            aggregator: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Forwards every record to `sink`, each call bounded by `timeout`.
    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>, timeout: Duration) -> Self {
        self.persistence = Some(sink);
        self.persist_timeout = timeout;
        self
    }

    /// Runs a full rollup after every stored record.
    pub fn with_aggregate_after_write(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Back-off before the loop is restarted after it died.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Starts the supervised loop. The handle finishes on shutdown.
    pub fn spawn(self) -> JoinHandle<()> {
        let writer = Arc::new(self);
        tokio::spawn(async move {
            loop {
                let worker = Arc::clone(&writer);
                match tokio::spawn(async move { worker.drain().await }).await {
                    Ok(()) => break,
                    Err(e) => {
                        if !writer.running.load(Ordering::Acquire) {
                            break;
                        }
                        tracing::error!(error = %e, "statistics writer died, restarting");
                        tokio::time::sleep(writer.retry_delay).await;
                    }
                }
            }
            tracing::info!("statistics writer stopped");
        })
    }

    async fn drain(&self) {
        while self.running.load(Ordering::Acquire) {
            match self.queue.take().await {
                Envelope::Shutdown => return,
                Envelope::Data(record) => self.process(record).await,
            }
        }
    }

    async fn process(&self, record: Record) {
        tracing::debug!(%record, "writing statistics");
        self.forward(&record).await;

        if panic::catch_unwind(AssertUnwindSafe(|| self.store_record(&record))).is_err() {
            tracing::error!(%record, "storing statistics panicked, record skipped");
        }

        if let Some(aggregator) = &self.aggregator {
            let aggregator = Arc::clone(aggregator);
            if let Err(e) = tokio::task::spawn_blocking(move || aggregator.run()).await {
                tracing::error!(error = %e, "aggregation after write failed");
            }
        }
    }

    async fn forward(&self, record: &Record) {
        let Some(sink) = &self.persistence else {
            return;
        };
        match tokio::time::timeout(self.persist_timeout, sink.persist(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "persisting statistics failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.persist_timeout.as_millis() as u64,
                "persisting statistics timed out",
            ),
        }
    }

    /// Appends one line per metric type. Returns how many were written.
    pub fn store_record(&self, record: &Record) -> usize {
        let at = record.observed_at();
        let day = at.format("%Y%m%d").to_string();
        let minute = MinuteOfDay::of(&at);
        let role = record.role();
        let service = record.service().unwrap_or(MISSING_SEGMENT);
        let method = record.method().unwrap_or(MISSING_SEGMENT);
        let peer = record.peer_host().unwrap_or(MISSING_SEGMENT);

        let mut written = 0;
        for metric in MetricType::ALL {
            let key = StoreKey {
                day: day.clone(),
                service: service.to_string(),
                method: method.to_string(),
                role,
                peer: peer.to_string(),
                metric,
            };
            let line = StoreLine {
                minute,
                value: record.metric(metric),
            };
            match self.store.append(&key, line) {
                Ok(()) => written += 1,
                Err(e) => tracing::error!(%metric, error = %e, "appending statistics failed"),
            }
        }
        written
    }
}
