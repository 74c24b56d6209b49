use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logwarden_config::CollectorConfig;
use logwarden_model::{Level, LogEntry};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::collect::filter::{LevelFilter, LogFilter};
use crate::collect::queue::EntryQueue;
use crate::collect::tailer;
use crate::compress;
use crate::error::Result;

/// Destination for flushed batches. The agent binds this to its TCP client;
/// tests bind it to an in-memory vector.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send_batch(&self, batch: Vec<LogEntry>) -> Result<()>;
}

/// Outcome of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    Filtered,
    Rejected,
}

pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type SendCallback = Arc<dyn Fn(usize) + Send + Sync>;

pub(crate) struct CollectorInner {
    pub(crate) config: CollectorConfig,
    pub(crate) active: AtomicBool,
    queue: EntryQueue,
    filters: Mutex<Vec<Arc<dyn LogFilter>>>,
    sink: Arc<dyn LogSink>,
    /// Bounds concurrent retry/flush tasks to the configured pool size.
    workers: Arc<Semaphore>,
    pub(crate) shutdown: Arc<Notify>,
    /// Serializes tail-file truncation with the backup writer.
    pub(crate) truncate_lock: tokio::sync::Mutex<()>,
    error_callback: Mutex<Option<ErrorCallback>>,
    send_callback: Mutex<Option<SendCallback>>,
}

impl CollectorInner {
    pub(crate) fn report_error(&self, message: &str) {
        let callback = self.error_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn report_sent(&self, count: usize) {
        let callback = self.send_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(count);
        }
    }

    pub(crate) fn submit(self: &Arc<Self>, content: &[u8], level: Level) -> Submission {
        if !self.active.load(Ordering::Acquire) {
            self.report_error("collector is not active");
            return Submission::Rejected;
        }

        let mut entry = LogEntry::new(content.to_vec(), level);

        let dropped = {
            let filters = self.filters.lock().unwrap();
            filters.iter().any(|filter| filter.should_drop(&entry))
        };
        if dropped {
            return Submission::Filtered;
        }

        if self.config.compress_logs {
            let (compressed, flag) = compress::compress(&entry.content);
            entry.content = compressed;
            entry.compressed = flag;
        }

        self.queue.push(entry);

        // Soft bound: the entry is already accepted, the overflow only
        // schedules an early flush.
        if self.queue.len() >= self.config.max_queue_size {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.flush_once().await;
            });
        }

        Submission::Accepted
    }

    async fn flush_once(self: &Arc<Self>) {
        let batch = self.queue.pop_batch(self.config.batch_size);
        if batch.is_empty() {
            return;
        }
        self.deliver(batch).await;
    }

    async fn deliver(self: &Arc<Self>, batch: Vec<LogEntry>) {
        let count = batch.len();
        let retry_copy = if self.config.enable_retry {
            Some(batch.clone())
        } else {
            None
        };

        match self.sink.send_batch(batch).await {
            Ok(()) => {
                debug!("Flushed {count} log entries");
                self.report_sent(count);
            }
            Err(e) => {
                warn!("Failed to send log batch: {e}");
                match retry_copy {
                    Some(batch) => self.schedule_retry(batch),
                    None => self.report_error(&format!("failed to send logs: {e}")),
                }
            }
        }
    }

    /// Retries run on worker tasks so the flusher never blocks on a slow
    /// sink.
    fn schedule_retry(self: &Arc<Self>, batch: Vec<LogEntry>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match inner.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            for attempt in 1..=inner.config.max_retry_count {
                tokio::time::sleep(inner.config.retry_interval).await;
                if !inner.active.load(Ordering::Acquire) {
                    return;
                }
                match inner.sink.send_batch(batch.clone()).await {
                    Ok(()) => {
                        debug!("Retry attempt {attempt} delivered {} entries", batch.len());
                        inner.report_sent(batch.len());
                        return;
                    }
                    Err(e) => {
                        warn!("Retry attempt {attempt} failed: {e}");
                    }
                }
            }

            inner.report_error("failed to send logs after maximum retry attempts");
        });
    }
}

/// Batching, filtering, retrying log collector.
///
/// One periodic flusher task drains the queue; submissions are synchronous
/// and never block on the sink.
pub struct LogCollector {
    inner: Arc<CollectorInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    tailers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCollector")
            .field("pending", &self.inner.queue.len())
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl LogCollector {
    pub fn new(config: CollectorConfig, sink: Arc<dyn LogSink>) -> Self {
        let workers = Arc::new(Semaphore::new(config.thread_pool_size));
        let min_level = config.min_level;

        let inner = Arc::new(CollectorInner {
            config,
            active: AtomicBool::new(true),
            queue: EntryQueue::default(),
            filters: Mutex::new(vec![Arc::new(LevelFilter::new(min_level)) as Arc<dyn LogFilter>]),
            sink,
            workers,
            shutdown: Arc::new(Notify::new()),
            truncate_lock: tokio::sync::Mutex::new(()),
            error_callback: Mutex::new(None),
            send_callback: Mutex::new(None),
        });

        let flusher = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner.shutdown.notified() => break,
                        _ = tokio::time::sleep(inner.config.flush_interval) => {
                            if !inner.active.load(Ordering::Acquire) {
                                break;
                            }
                            inner.flush_once().await;
                        }
                    }
                }
            })
        };

        Self {
            inner,
            flusher: Mutex::new(Some(flusher)),
            tailers: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue one log line after filtering (and compression, when enabled).
    pub fn submit(&self, content: impl AsRef<[u8]>, level: Level) -> Submission {
        self.inner.submit(content.as_ref(), level)
    }

    /// Fan a batch of lines through [`Self::submit`]; returns how many were
    /// accepted.
    pub fn submit_batch<I, C>(&self, contents: I, level: Level) -> usize
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        contents
            .into_iter()
            .filter(|content| self.submit(content, level) == Submission::Accepted)
            .count()
    }

    pub fn add_filter(&self, filter: Arc<dyn LogFilter>) {
        self.inner.filters.lock().unwrap().push(filter);
    }

    pub fn clear_filters(&self) {
        self.inner.filters.lock().unwrap().clear();
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.inner.error_callback.lock().unwrap() = Some(callback);
    }

    pub fn set_send_callback(&self, callback: SendCallback) {
        *self.inner.send_callback.lock().unwrap() = Some(callback);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Drain up to one batch from the head of the queue into the sink.
    pub async fn flush(&self) {
        self.inner.flush_once().await;
    }

    /// Spawn a tailer that periodically reads new lines from `path`,
    /// submits them, and truncates the consumed prefix.
    pub fn collect_from_file(
        &self,
        path: impl Into<PathBuf>,
        level: Level,
        interval: Duration,
        max_lines_per_round: usize,
    ) {
        let handle = tailer::spawn(
            Arc::clone(&self.inner),
            path.into(),
            level,
            interval,
            max_lines_per_round,
        );
        self.tailers.lock().unwrap().push(handle);
    }

    /// Stop background work and flush whatever is still queued.
    pub async fn shutdown(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_waiters();

        let flusher = self.flusher.lock().unwrap().take();
        if let Some(handle) = flusher {
            if let Err(e) = handle.await {
                error!("Flusher task panicked: {e}");
            }
        }
        let tailers: Vec<_> = self.tailers.lock().unwrap().drain(..).collect();
        for handle in tailers {
            handle.abort();
        }

        // Final flush: deliver everything still queued, one batch at a time.
        while !self.inner.queue.is_empty() {
            self.inner.flush_once().await;
        }
    }
}
