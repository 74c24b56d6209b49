use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use logwarden_config::AlertConfig;
use logwarden_model::{Alert, AlertStatus, AnalysisResult, LogRecord, format_timestamp};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::channel::NotificationChannel;
use crate::alert::rule::AlertRule;
use crate::error::{PipelineError, Result};
use crate::storage::{ALERT_TTL, Cache, CacheKeys, LogStore};

pub type AlertCallback = Arc<dyn Fn(&str, AlertStatus) + Send + Sync>;

struct ManagerInner {
    config: AlertConfig,
    rules: Mutex<Vec<Arc<dyn AlertRule>>>,
    channels: Mutex<Vec<Arc<dyn NotificationChannel>>>,
    /// Alerts in PENDING or ACTIVE state, keyed by id.
    active: Mutex<HashMap<String, Alert>>,
    /// Alerts waiting for notification dispatch.
    pending: Mutex<VecDeque<Alert>>,
    running: AtomicBool,
    shutdown: Notify,
    callback: Mutex<Option<AlertCallback>>,
    cache: Option<Arc<dyn Cache>>,
    store: Option<Arc<dyn LogStore>>,
}

/// Evaluates alert rules over analyzer output, collapses duplicates, owns
/// the alert state machine, and dispatches notifications.
pub struct AlertManager {
    inner: Arc<ManagerInner>,
    notifier: Mutex<Option<JoinHandle<()>>>,
    checker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .field("active", &self.inner.active.lock().unwrap().len())
            .finish()
    }
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self::with_storage(config, None, None)
    }

    pub fn with_storage(
        config: AlertConfig,
        cache: Option<Arc<dyn Cache>>,
        store: Option<Arc<dyn LogStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                rules: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                active: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                callback: Mutex::new(None),
                cache,
                store,
            }),
            notifier: Mutex::new(None),
            checker: Mutex::new(None),
        }
    }

    pub fn add_rule(&self, rule: Arc<dyn AlertRule>) {
        self.inner.rules.lock().unwrap().push(rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.inner.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|rule| rule.name() != name);
        rules.len() != before
    }

    pub fn clear_rules(&self) {
        self.inner.rules.lock().unwrap().clear();
    }

    pub fn rule_count(&self) -> usize {
        self.inner.rules.lock().unwrap().len()
    }

    pub fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.inner.channels.lock().unwrap().push(channel);
    }

    pub fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.inner.channels.lock().unwrap();
        let before = channels.len();
        channels.retain(|channel| channel.name() != name);
        channels.len() != before
    }

    pub fn clear_channels(&self) {
        self.inner.channels.lock().unwrap().clear();
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().unwrap().len()
    }

    pub fn set_alert_callback(&self, callback: AlertCallback) {
        *self.inner.callback.lock().unwrap() = Some(callback);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    /// Evaluate every rule against one record's results; returns the ids of
    /// all alerts triggered or refreshed.
    pub async fn check_alerts(&self, record: &LogRecord, results: &AnalysisResult) -> Vec<String> {
        let rules: Vec<Arc<dyn AlertRule>> = self.inner.rules.lock().unwrap().clone();
        let mut triggered = Vec::new();

        for rule in rules {
            if !rule.check(record, results) {
                continue;
            }
            let candidate = rule.generate(record, results);

            if self.inner.config.suppress_duplicates {
                if let Some(existing) = self.merge_duplicate(&candidate, &record.id) {
                    debug!("Alert {} deduplicated into {}", candidate.name, existing.id);
                    self.save_alert(&existing).await;
                    triggered.push(existing.id);
                    continue;
                }
            }

            triggered.push(self.trigger_alert(candidate).await);
        }

        triggered
    }

    /// Collapse `candidate` into an existing active alert with the same
    /// (name, labels) identity. Returns the updated alert for persistence.
    fn merge_duplicate(&self, candidate: &Alert, record_id: &str) -> Option<Alert> {
        let mut active = self.inner.active.lock().unwrap();
        for existing in active.values_mut() {
            if existing.same_identity(candidate) {
                existing.count += 1;
                existing.update_time = Utc::now();
                existing.related_log_ids.push(record_id.to_string());
                return Some(existing.clone());
            }
        }
        None
    }

    /// Mint a new ACTIVE alert: assign the id, persist, store, and queue it
    /// for notification.
    pub async fn trigger_alert(&self, mut alert: Alert) -> String {
        alert.id = format!("alert-{}", Uuid::new_v4());
        alert.status = AlertStatus::Active;
        alert.timestamp = Utc::now();
        alert.update_time = alert.timestamp;

        info!("Triggering alert {} ({})", alert.id, alert.name);
        self.save_alert(&alert).await;

        self.inner
            .active
            .lock()
            .unwrap()
            .insert(alert.id.clone(), alert.clone());
        self.inner.pending.lock().unwrap().push_back(alert.clone());

        self.invoke_callback(&alert.id, alert.status);
        alert.id
    }

    pub async fn resolve_alert(&self, alert_id: &str, comment: &str) -> bool {
        self.finish_alert(alert_id, AlertStatus::Resolved, "resolution_comment", comment)
            .await
    }

    pub async fn ignore_alert(&self, alert_id: &str, comment: &str) -> bool {
        self.finish_alert(alert_id, AlertStatus::Ignored, "ignore_comment", comment)
            .await
    }

    /// Terminal transition shared by resolve and ignore. Returns false when
    /// the alert is not active (already finished or unknown), with no
    /// callback fired.
    async fn finish_alert(
        &self,
        alert_id: &str,
        status: AlertStatus,
        comment_key: &str,
        comment: &str,
    ) -> bool {
        let finished = {
            let mut active = self.inner.active.lock().unwrap();
            match active.remove(alert_id) {
                Some(mut alert) => {
                    alert.status = status;
                    alert.update_time = Utc::now();
                    if !comment.is_empty() {
                        alert
                            .annotations
                            .insert(comment_key.to_string(), comment.to_string());
                    }
                    Some(alert)
                }
                None => None,
            }
        };

        match finished {
            Some(alert) => {
                info!("Alert {} transitioned to {}", alert_id, status);
                self.save_alert(&alert).await;
                self.invoke_callback(alert_id, status);
                true
            }
            None => false,
        }
    }

    /// Look up an alert in the active store, falling back to the cache.
    pub async fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        if let Some(alert) = self.inner.active.lock().unwrap().get(alert_id) {
            return Some(alert.clone());
        }

        let cache = self.inner.cache.as_ref()?;
        match cache.get_string(&CacheKeys::alert(alert_id)).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!("Cached alert {alert_id} is unreadable: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup for alert {alert_id} failed: {e}");
                None
            }
        }
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.inner.active.lock().unwrap().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().unwrap().len()
    }

    /// Alert history from the relational store, newest first.
    pub async fn get_alert_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Alert>> {
        let Some(store) = &self.inner.store else {
            return Err(PipelineError::Storage(
                "no relational store configured".into(),
            ));
        };

        let records = store.query_range(start, end, limit, offset).await?;
        let mut alerts = Vec::new();
        for record in records {
            let Some(json) = record.fields.get("alert_data") else {
                continue;
            };
            match serde_json::from_str(json) {
                Ok(alert) => alerts.push(alert),
                Err(e) => warn!("Stored alert {} is unreadable: {e}", record.id),
            }
        }
        Ok(alerts)
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let notifier = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { notify_loop(inner).await })
        };
        let checker = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { resend_loop(inner).await })
        };
        *self.notifier.lock().unwrap() = Some(notifier);
        *self.checker.lock().unwrap() = Some(checker);
    }

    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_waiters();

        for slot in [&self.notifier, &self.checker] {
            let handle = slot.lock().unwrap().take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    error!("Alert task panicked: {e}");
                }
            }
        }

        self.inner.pending.lock().unwrap().clear();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn invoke_callback(&self, alert_id: &str, status: AlertStatus) {
        let callback = self.inner.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(alert_id, status);
        }
    }

    async fn save_alert(&self, alert: &Alert) {
        save_alert(&self.inner, alert).await;
    }
}

/// Persist one alert to the cache and the relational store. Failures are
/// logged; the in-memory state machine is authoritative while running.
async fn save_alert(inner: &Arc<ManagerInner>, alert: &Alert) {
    if let Some(cache) = &inner.cache {
        let outcome = async {
            let json = serde_json::to_string(alert)?;
            let key = CacheKeys::alert(&alert.id);
            cache.set_string(&key, &json, Some(ALERT_TTL)).await?;
            cache
                .set_add(&CacheKeys::alerts_by_status(alert.status), &alert.id)
                .await?;
            if alert.status == AlertStatus::Active {
                cache.set_add(&CacheKeys::alerts_active(), &alert.id).await
            } else {
                cache
                    .set_remove(&CacheKeys::alerts_active(), &alert.id)
                    .await
            }
        };
        if let Err(e) = outcome.await {
            warn!("Failed to cache alert {}: {e}", alert.id);
        }
    }

    if let Some(store) = &inner.store {
        let row = alert_row(alert);
        if let Err(e) = store.save_record(&row).await {
            warn!("Failed to persist alert {}: {e}", alert.id);
        }
    }
}

/// Alerts reuse the log tables: the canonical JSON rides in `alert_data`
/// with status and name as indexable sibling fields.
fn alert_row(alert: &Alert) -> LogRecord {
    let mut fields = HashMap::new();
    if let Ok(json) = serde_json::to_string(alert) {
        fields.insert("alert_data".to_string(), json);
    }
    fields.insert("alert_status".to_string(), alert.status.to_string());
    fields.insert("alert_name".to_string(), alert.name.clone());

    LogRecord {
        id: alert.id.clone(),
        timestamp: format_timestamp(alert.timestamp),
        level: alert.level.to_string(),
        source: alert.source.clone(),
        message: format!("{}: {}", alert.name, alert.description),
        fields,
    }
}

/// Drain pending alerts in batches and fan each one out to every channel.
async fn notify_loop(inner: Arc<ManagerInner>) {
    while inner.running.load(Ordering::Acquire) {
        let batch: Vec<Alert> = {
            let mut pending = inner.pending.lock().unwrap();
            let count = inner.config.batch_size.min(pending.len());
            pending.drain(..count).collect()
        };

        if batch.is_empty() {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            continue;
        }

        for alert in batch {
            dispatch(&inner, &alert).await;
        }
    }
}

/// Channel dispatch for one alert, serialized across channels. Failures do
/// not propagate: the alert stays ACTIVE and the resend loop retries.
async fn dispatch(inner: &Arc<ManagerInner>, alert: &Alert) {
    let channels: Vec<Arc<dyn NotificationChannel>> = inner.channels.lock().unwrap().clone();
    for channel in channels {
        match channel.send(alert).await {
            Ok(()) => debug!(
                "Alert {} delivered via {} ({})",
                alert.id,
                channel.name(),
                channel.channel_type()
            ),
            Err(e) => warn!(
                "Alert {} delivery via {} failed: {e}",
                alert.id,
                channel.name()
            ),
        }
    }
}

/// Re-enqueue active alerts whose last update is older than the resend
/// interval.
async fn resend_loop(inner: Arc<ManagerInner>) {
    while inner.running.load(Ordering::Acquire) {
        tokio::select! {
            _ = inner.shutdown.notified() => break,
            _ = tokio::time::sleep(inner.config.check_interval) => {}
        }
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        let stale: Vec<Alert> = {
            let mut active = inner.active.lock().unwrap();
            let now = Utc::now();
            let resend_after =
                chrono::Duration::from_std(inner.config.resend_interval).unwrap_or_default();
            active
                .values_mut()
                .filter(|alert| now - alert.update_time > resend_after)
                .map(|alert| {
                    alert.update_time = now;
                    alert.clone()
                })
                .collect()
        };

        if !stale.is_empty() {
            debug!("Re-enqueueing {} stale alerts for notification", stale.len());
            let mut pending = inner.pending.lock().unwrap();
            for alert in stale {
                pending.push_back(alert);
            }
        }
    }
}
