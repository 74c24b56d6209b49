//! The processing stage: drains framed payloads, parses them into records,
//! archives raw and structured forms, and forwards records to the analyzer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use logwarden_config::ProcessorConfig;
use logwarden_model::{LogData, format_timestamp};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::analyze::LogAnalyzer;
use crate::compress;
use crate::error::{PipelineError, Result};
use crate::parse::{JsonParser, LogParser, RegexParser, TextParser, parse_log_data};
use crate::storage::{Cache, CacheKeys, LogStore, RAW_LOG_TTL};

pub type ProcessCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

struct ProcessorInner {
    config: ProcessorConfig,
    parsers: Mutex<Vec<Arc<dyn LogParser>>>,
    pending: Mutex<VecDeque<LogData>>,
    running: AtomicBool,
    shutdown: Notify,
    workers: Arc<Semaphore>,
    callback: Mutex<Option<ProcessCallback>>,
    analyzer: Arc<LogAnalyzer>,
    cache: Option<Arc<dyn Cache>>,
    store: Option<Arc<dyn LogStore>>,
}

/// Queue-and-worker-pool processor between the TCP ingest and the analyzer.
///
/// Owns its analyzer by composition: starting and stopping the processor
/// starts and stops the analyzer with it.
pub struct LogProcessor {
    inner: Arc<ProcessorInner>,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogProcessor")
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl LogProcessor {
    pub fn new(
        config: ProcessorConfig,
        analyzer: Arc<LogAnalyzer>,
        cache: Option<Arc<dyn Cache>>,
        store: Option<Arc<dyn LogStore>>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_threads));

        // Default parser chain: JSON frames, then the agent's bracketed
        // format, then plain text as the catch-all.
        let parsers: Vec<Arc<dyn LogParser>> = vec![
            Arc::new(JsonParser::standard()),
            Arc::new(RegexParser::bracketed()),
            Arc::new(TextParser::default()),
        ];

        Self {
            inner: Arc::new(ProcessorInner {
                config,
                parsers: Mutex::new(parsers),
                pending: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                workers,
                callback: Mutex::new(None),
                analyzer,
                cache,
                store,
            }),
            drainer: Mutex::new(None),
        }
    }

    pub fn analyzer(&self) -> &Arc<LogAnalyzer> {
        &self.inner.analyzer
    }

    pub fn add_parser(&self, parser: Arc<dyn LogParser>) {
        self.inner.parsers.lock().unwrap().push(parser);
    }

    pub fn clear_parsers(&self) {
        self.inner.parsers.lock().unwrap().clear();
    }

    pub fn parser_count(&self) -> usize {
        self.inner.parsers.lock().unwrap().len()
    }

    pub fn set_process_callback(&self, callback: ProcessCallback) {
        *self.inner.callback.lock().unwrap() = Some(callback);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Enqueue one payload. Rejects when stopped or when the pending queue
    /// is at its bound; the producer decides whether to retry.
    pub fn submit_log_data(&self, mut data: LogData) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(PipelineError::Rejected("processor is stopped".into()));
        }

        if data.id.is_empty() {
            data.id = Uuid::new_v4().to_string();
        }

        let mut pending = self.inner.pending.lock().unwrap();
        if pending.len() >= self.inner.config.max_queue_size {
            return Err(PipelineError::Rejected("processor queue is full".into()));
        }
        pending.push_back(data);
        Ok(())
    }

    /// Enqueue a batch; returns how many were accepted.
    pub fn submit_batch(&self, batch: Vec<LogData>) -> usize {
        batch
            .into_iter()
            .map(|data| self.submit_log_data(data))
            .filter(Result::is_ok)
            .count()
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.analyzer.start();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { drain_loop(inner).await });
        *self.drainer.lock().unwrap() = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_waiters();

        let drainer = self.drainer.lock().unwrap().take();
        if let Some(handle) = drainer {
            if let Err(e) = handle.await {
                error!("Processor drainer panicked: {e}");
            }
        }

        let permits = self.inner.config.worker_threads as u32;
        if let Ok(_all) = self.inner.workers.acquire_many(permits).await {
            // Every in-flight payload has been processed.
        }

        self.inner.pending.lock().unwrap().clear();
        self.inner.analyzer.stop().await;
    }
}

async fn drain_loop(inner: Arc<ProcessorInner>) {
    loop {
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        let batch: Vec<LogData> = {
            let mut pending = inner.pending.lock().unwrap();
            let count = inner.config.batch_size.min(pending.len());
            pending.drain(..count).collect()
        };

        if batch.is_empty() {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = tokio::time::sleep(inner.config.process_interval) => {}
            }
            continue;
        }

        for data in batch {
            let permit = match inner.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let _permit = permit;
                process_log_data(inner, data).await;
            });
        }
    }
}

/// Parse, archive, and forward one payload. Storage trouble is logged and
/// reported through the callback; it never stops the pipeline.
async fn process_log_data(inner: Arc<ProcessorInner>, data: LogData) {
    let parsers: Vec<Arc<dyn LogParser>> = inner.parsers.lock().unwrap().clone();
    let record = parse_log_data(&parsers, &data);

    let mut success = true;

    if let Some(cache) = &inner.cache {
        if let Err(e) = archive_raw(cache.as_ref(), &inner.config, &data).await {
            warn!("Failed to archive raw payload {}: {e}", data.id);
            success = false;
        }
    }

    if let Some(store) = &inner.store {
        if let Err(e) = store.save_record(&record).await {
            warn!("Failed to archive record {}: {e}", record.id);
            success = false;
        }
    }

    if let Err(e) = inner.analyzer.submit_record(record) {
        warn!("Analyzer rejected record {}: {e}", data.id);
        success = false;
    }

    let callback = inner.callback.lock().unwrap().clone();
    if let Some(callback) = callback {
        callback(&data.id, success);
    }
}

/// Store the raw payload under `raw_log:<id>` with its sibling info hash,
/// compressing on the way in when configured.
async fn archive_raw(cache: &dyn Cache, config: &ProcessorConfig, data: &LogData) -> Result<()> {
    let key = CacheKeys::raw_log(&data.id);

    let (bytes, compressed) = if config.compress_archive && !data.compressed {
        let (bytes, flag) = compress::compress(&data.payload);
        (bytes, flag)
    } else {
        (data.payload.clone(), data.compressed)
    };

    cache.set_bytes(&key, &bytes, Some(RAW_LOG_TTL)).await?;

    let info_key = CacheKeys::raw_log_info(&data.id);
    let mut info = vec![
        ("timestamp".to_string(), format_timestamp(data.timestamp)),
        ("source".to_string(), data.source.clone()),
        ("compressed".to_string(), compressed.to_string()),
    ];
    for (key, value) in &data.metadata {
        info.push((key.clone(), value.clone()));
    }
    cache.hash_set(&info_key, &info).await?;
    cache.expire(&info_key, RAW_LOG_TTL).await?;

    Ok(())
}

/// Decompress a payload for inspection, mirroring the parser fallback.
pub fn decompress_log_data(data: &LogData) -> String {
    compress::payload_text(&data.payload, data.compressed).unwrap_or_else(|e| {
        warn!("Failed to decompress payload {}: {e}", data.id);
        String::from_utf8_lossy(&data.payload).into_owned()
    })
}
