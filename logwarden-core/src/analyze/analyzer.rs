use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use logwarden_config::AnalyzerConfig;
use logwarden_model::{AnalysisResult, LogRecord};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

use crate::analyze::metrics::{AnalyzerMetrics, MetricsSnapshot};
use crate::analyze::rule::AnalysisRule;
use crate::error::{PipelineError, Result};
use crate::storage::{ANALYSIS_RESULT_TTL, Cache, CacheKeys, LogStore};

/// Invoked once per (record, rule) evaluation. The record carries its id;
/// downstream consumers that key off the id alone read `record.id`.
pub type AnalysisCallback = Arc<dyn Fn(&LogRecord, &AnalysisResult) + Send + Sync>;

struct AnalyzerInner {
    config: AnalyzerConfig,
    rules: Mutex<Vec<Arc<dyn AnalysisRule>>>,
    groups: Mutex<HashMap<String, Vec<Arc<dyn AnalysisRule>>>>,
    pending: Mutex<VecDeque<LogRecord>>,
    pending_bytes: AtomicU64,
    running: AtomicBool,
    shutdown: Notify,
    workers: Arc<Semaphore>,
    callback: Mutex<Option<AnalysisCallback>>,
    metrics: AnalyzerMetrics,
    cache: Option<Arc<dyn Cache>>,
    store: Option<Arc<dyn LogStore>>,
}

/// Rule engine applying the prioritized, grouped rule set to every record.
///
/// One drainer task lifts batches off the pending queue and fans records out
/// to a semaphore-bounded pool of worker tasks. Rule failures never abort
/// the record; they surface in the result map and the metrics.
pub struct LogAnalyzer {
    inner: Arc<AnalyzerInner>,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAnalyzer")
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl LogAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self::with_storage(config, None, None)
    }

    pub fn with_storage(
        config: AnalyzerConfig,
        cache: Option<Arc<dyn Cache>>,
        store: Option<Arc<dyn LogStore>>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.thread_pool_size));
        Self {
            inner: Arc::new(AnalyzerInner {
                config,
                rules: Mutex::new(Vec::new()),
                groups: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                pending_bytes: AtomicU64::new(0),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                workers,
                callback: Mutex::new(None),
                metrics: AnalyzerMetrics::default(),
                cache,
                store,
            }),
            drainer: Mutex::new(None),
        }
    }

    /// Append a rule and keep both the flat list and its group sorted by
    /// priority, highest first.
    pub fn add_rule(&self, rule: Arc<dyn AnalysisRule>) {
        let group = rule.config().group.clone();
        {
            let mut rules = self.inner.rules.lock().unwrap();
            rules.push(Arc::clone(&rule));
            rules.sort_by_key(|r| std::cmp::Reverse(r.config().priority));
        }
        let mut groups = self.inner.groups.lock().unwrap();
        let members = groups.entry(group).or_default();
        members.push(rule);
        members.sort_by_key(|r| std::cmp::Reverse(r.config().priority));
    }

    pub fn clear_rules(&self) {
        self.inner.rules.lock().unwrap().clear();
        self.inner.groups.lock().unwrap().clear();
    }

    pub fn rule_count(&self) -> usize {
        self.inner.rules.lock().unwrap().len()
    }

    pub fn rule_groups(&self) -> Vec<String> {
        self.inner.groups.lock().unwrap().keys().cloned().collect()
    }

    pub fn enable_group(&self, group: &str) {
        self.set_group_enabled(group, true);
    }

    pub fn disable_group(&self, group: &str) {
        self.set_group_enabled(group, false);
    }

    fn set_group_enabled(&self, group: &str, enabled: bool) {
        if let Some(members) = self.inner.groups.lock().unwrap().get(group) {
            for rule in members {
                rule.config().set_enabled(enabled);
            }
        }
    }

    pub fn set_analysis_callback(&self, callback: AnalysisCallback) {
        *self.inner.callback.lock().unwrap() = Some(callback);
    }

    /// Enqueue one record. Fails fast when stopped or at the queue bound.
    pub fn submit_record(&self, record: LogRecord) -> Result<()> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(PipelineError::Rejected("analyzer is stopped".into()));
        }

        let size = approx_size(&record) as u64;
        let mut pending = self.inner.pending.lock().unwrap();
        if pending.len() >= self.inner.config.max_queue_size {
            return Err(PipelineError::Rejected("analyzer queue is full".into()));
        }
        pending.push_back(record);
        let len = pending.len();
        drop(pending);

        let resident = self.inner.pending_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.inner.metrics.record_submitted(len, resident);
        Ok(())
    }

    /// Enqueue a batch; returns how many were accepted.
    pub fn submit_records(&self, records: Vec<LogRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.submit_record(record))
            .filter(Result::is_ok)
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            drain_loop(inner).await;
        });
        *self.drainer.lock().unwrap() = Some(handle);
    }

    /// Stop the drainer, wait for in-flight workers, and drop whatever is
    /// still queued.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_waiters();

        let drainer = self.drainer.lock().unwrap().take();
        if let Some(handle) = drainer {
            if let Err(e) = handle.await {
                error!("Analyzer drainer panicked: {e}");
            }
        }

        // Taking every worker permit means every in-flight record finished.
        let permits = self.inner.config.thread_pool_size as u32;
        if let Ok(_all) = self.inner.workers.acquire_many(permits).await {
            // Dropped immediately; the pool is idle.
        }

        self.inner.pending.lock().unwrap().clear();
        self.inner.pending_bytes.store(0, Ordering::Relaxed);
        self.inner.metrics.record_drained(0);
    }
}

async fn drain_loop(inner: Arc<AnalyzerInner>) {
    loop {
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        let batch: Vec<LogRecord> = {
            let mut pending = inner.pending.lock().unwrap();
            let count = inner.config.batch_size.min(pending.len());
            pending.drain(..count).collect()
        };

        if batch.is_empty() {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = tokio::time::sleep(inner.config.analyze_interval) => {}
            }
            continue;
        }

        let drained: u64 = batch.iter().map(|r| approx_size(r) as u64).sum();
        inner.pending_bytes.fetch_sub(drained, Ordering::Relaxed);
        inner.metrics.record_drained(inner.pending.lock().unwrap().len());

        for record in batch {
            let permit = match inner.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let _permit = permit;
                process_record(inner, record).await;
            });
        }
    }
}

async fn process_record(inner: Arc<AnalyzerInner>, record: LogRecord) {
    let started = Instant::now();
    let record = Arc::new(record);
    let mut had_error = false;

    let rules: Vec<Arc<dyn AnalysisRule>> = inner.rules.lock().unwrap().clone();
    for rule in rules {
        if !rule.config().is_enabled() {
            continue;
        }

        let rule_started = Instant::now();
        let results = evaluate_rule(&inner, &rule, &record).await;
        let elapsed_us = rule_started.elapsed().as_micros() as u64;

        let rule_error = results.contains_key("error");
        had_error |= rule_error;
        if inner.config.enable_metrics {
            inner.metrics.record_rule(rule.name(), elapsed_us, rule_error);
        }

        if inner.config.store_results {
            persist_results(&inner, &record, &results).await;
        }

        let callback = inner.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&record, &results);
        }
    }

    if inner.config.enable_metrics {
        inner
            .metrics
            .record_completed(started.elapsed().as_micros() as u64, had_error);
    }
}

/// Run one rule under its deadline on a blocking task. Timeouts and panics
/// degrade to an `error` entry in the result map; the pipeline moves on.
async fn evaluate_rule(
    inner: &Arc<AnalyzerInner>,
    rule: &Arc<dyn AnalysisRule>,
    record: &Arc<LogRecord>,
) -> AnalysisResult {
    let timeout = if rule.config().timeout.is_zero() {
        inner.config.rule_timeout
    } else {
        rule.config().timeout
    };
    let group = rule.config().group.clone();
    let name = rule.name().to_string();

    let evaluation = {
        let rule = Arc::clone(rule);
        let record = Arc::clone(record);
        tokio::task::spawn_blocking(move || rule.analyze(&record))
    };

    match tokio::time::timeout(timeout, evaluation).await {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            warn!("Rule {name} evaluation failed: {e}");
            error_result(&name, &group, &format!("rule evaluation failed: {e}"))
        }
        Err(_) => {
            warn!("Rule {name} exceeded its {timeout:?} deadline");
            error_result(
                &name,
                &group,
                &format!("rule evaluation timed out after {}ms", timeout.as_millis()),
            )
        }
    }
}

fn error_result(rule: &str, group: &str, message: &str) -> AnalysisResult {
    AnalysisResult::from([
        ("rule".to_string(), rule.to_string()),
        ("group".to_string(), group.to_string()),
        ("error".to_string(), message.to_string()),
    ])
}

/// Persist one rule result: merged into the record's result hash in the
/// cache, and written as its own row in the relational store.
async fn persist_results(
    inner: &Arc<AnalyzerInner>,
    record: &Arc<LogRecord>,
    results: &AnalysisResult,
) {
    if let Some(cache) = &inner.cache {
        let key = CacheKeys::analysis_result(&record.id);
        let fields: Vec<(String, String)> = results
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let outcome = async {
            cache.hash_set(&key, &fields).await?;
            cache.expire(&key, ANALYSIS_RESULT_TTL).await?;
            cache
                .set_add(&CacheKeys::recent_analysis_results(), &record.id)
                .await
        };
        if let Err(e) = outcome.await {
            warn!("Failed to cache analysis result for {}: {e}", record.id);
        }
    }

    if let Some(store) = &inner.store {
        let row = result_row(record, results);
        if let Err(e) = store.save_record(&row).await {
            warn!("Failed to persist analysis result for {}: {e}", record.id);
        }
    }
}

/// Relational representation of one result map. Core columns prefer the
/// `record.*` result keys and fall back to the analyzed record; every result
/// key becomes a field row.
fn result_row(record: &LogRecord, results: &AnalysisResult) -> LogRecord {
    let pick = |key: &str, fallback: &str| -> String {
        results
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    let mut summary: Vec<String> = results
        .iter()
        .filter(|(k, _)| !k.starts_with("record."))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    summary.sort();

    let mut fields: HashMap<String, String> = results.clone();
    fields.insert("record.id".to_string(), record.id.clone());

    LogRecord {
        id: Uuid::new_v4().to_string(),
        timestamp: pick("record.timestamp", &record.timestamp),
        level: pick("record.level", &record.level),
        source: pick("record.source", &record.source),
        message: format!("analysis: {}", summary.join(", ")),
        fields,
    }
}

fn approx_size(record: &LogRecord) -> usize {
    record.id.len()
        + record.timestamp.len()
        + record.level.len()
        + record.source.len()
        + record.message.len()
        + record
            .fields
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_row_prefers_record_star_keys() {
        let record = LogRecord {
            id: "rec-9".into(),
            timestamp: "2024-03-09 10:00:00".into(),
            level: "INFO".into(),
            source: "app".into(),
            message: "m".into(),
            ..LogRecord::default()
        };
        let results = AnalysisResult::from([
            ("record.level".to_string(), "ERROR".to_string()),
            ("matched".to_string(), "true".to_string()),
        ]);

        let row = result_row(&record, &results);
        assert_ne!(row.id, record.id);
        assert_eq!(row.level, "ERROR");
        assert_eq!(row.timestamp, "2024-03-09 10:00:00");
        assert_eq!(row.source, "app");
        assert_eq!(row.fields["record.id"], "rec-9");
        assert!(row.message.contains("matched=true"));
        assert!(!row.message.contains("record.level"));
    }
}
