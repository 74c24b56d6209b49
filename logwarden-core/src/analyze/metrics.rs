use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Live counters for the analyzer. Scalars are atomic; the per-rule map sits
/// under one mutex taken only on rule completion and snapshot.
#[derive(Debug, Default)]
pub struct AnalyzerMetrics {
    total_records: AtomicU64,
    pending_records: AtomicU64,
    error_records: AtomicU64,
    total_process_time_us: AtomicU64,
    peak_memory_usage: AtomicU64,
    rules: Mutex<HashMap<String, RuleCounters>>,
}

#[derive(Debug, Default, Clone)]
struct RuleCounters {
    match_count: u64,
    process_time_us: u64,
    error_count: u64,
    last_match_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMetricsSnapshot {
    pub match_count: u64,
    pub process_time_us: u64,
    pub error_count: u64,
    pub last_match_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_records: u64,
    pub pending_records: u64,
    pub error_records: u64,
    pub total_process_time_us: u64,
    pub peak_memory_usage: u64,
    pub rules: HashMap<String, RuleMetricsSnapshot>,
}

impl AnalyzerMetrics {
    pub fn record_submitted(&self, pending: usize, resident_bytes: u64) {
        self.pending_records.store(pending as u64, Ordering::Relaxed);
        self.peak_memory_usage.fetch_max(resident_bytes, Ordering::Relaxed);
    }

    pub fn record_drained(&self, pending: usize) {
        self.pending_records.store(pending as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self, elapsed_us: u64, had_error: bool) {
        self.total_records.fetch_add(1, Ordering::Relaxed);
        self.total_process_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        if had_error {
            self.error_records.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rule(&self, rule: &str, elapsed_us: u64, had_error: bool) {
        let mut rules = self.rules.lock().unwrap();
        let counters = rules.entry(rule.to_string()).or_default();
        counters.match_count += 1;
        counters.process_time_us += elapsed_us;
        if had_error {
            counters.error_count += 1;
        }
        counters.last_match_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let rules = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    RuleMetricsSnapshot {
                        match_count: c.match_count,
                        process_time_us: c.process_time_us,
                        error_count: c.error_count,
                        last_match_time: c.last_match_time,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_records: self.total_records.load(Ordering::Relaxed),
            pending_records: self.pending_records.load(Ordering::Relaxed),
            error_records: self.error_records.load(Ordering::Relaxed),
            total_process_time_us: self.total_process_time_us.load(Ordering::Relaxed),
            peak_memory_usage: self.peak_memory_usage.load(Ordering::Relaxed),
            rules,
        }
    }

    pub fn reset(&self) {
        self.total_records.store(0, Ordering::Relaxed);
        self.pending_records.store(0, Ordering::Relaxed);
        self.error_records.store(0, Ordering::Relaxed);
        self.total_process_time_us.store(0, Ordering::Relaxed);
        self.peak_memory_usage.store(0, Ordering::Relaxed);
        self.rules.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_rule_and_totals() {
        let metrics = AnalyzerMetrics::default();
        metrics.record_rule("r1", 120, false);
        metrics.record_rule("r1", 80, true);
        metrics.record_rule("r2", 10, false);
        metrics.record_completed(250, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_records, 1);
        assert_eq!(snap.error_records, 1);
        assert_eq!(snap.total_process_time_us, 250);
        assert_eq!(snap.rules["r1"].match_count, 2);
        assert_eq!(snap.rules["r1"].process_time_us, 200);
        assert_eq!(snap.rules["r1"].error_count, 1);
        assert!(snap.rules["r1"].last_match_time.is_some());
        assert_eq!(snap.rules["r2"].error_count, 0);
    }

    #[test]
    fn peak_memory_is_a_high_water_mark() {
        let metrics = AnalyzerMetrics::default();
        metrics.record_submitted(1, 1000);
        metrics.record_submitted(2, 5000);
        metrics.record_submitted(1, 200);
        assert_eq!(metrics.snapshot().peak_memory_usage, 5000);
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = AnalyzerMetrics::default();
        metrics.record_rule("r1", 10, false);
        metrics.record_completed(10, false);
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_records, 0);
        assert!(snap.rules.is_empty());
    }
}
