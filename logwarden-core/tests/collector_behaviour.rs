use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use logwarden_config::CollectorConfig;
use logwarden_core::collect::{KeywordFilter, LogCollector, LogSink, Submission};
use logwarden_core::compress;
use logwarden_core::error::{PipelineError, Result};
use logwarden_model::{Level, LogEntry};

/// Sink capturing every delivered batch, optionally failing the first
/// `fail_first` sends.
#[derive(Default)]
struct CapturingSink {
    batches: Mutex<Vec<Vec<LogEntry>>>,
    fail_first: AtomicUsize,
    attempts: AtomicUsize,
}

impl CapturingSink {
    fn failing(times: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<Vec<LogEntry>> {
        self.batches.lock().unwrap().clone()
    }

    fn delivered_lines(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .flatten()
            .map(|entry| String::from_utf8_lossy(&entry.content).into_owned())
            .collect()
    }
}

#[async_trait]
impl LogSink for CapturingSink {
    async fn send_batch(&self, batch: Vec<LogEntry>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "sink down",
            )));
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

fn test_config() -> CollectorConfig {
    CollectorConfig {
        flush_interval: Duration::from_secs(60), // flushed explicitly in tests
        retry_interval: Duration::from_millis(10),
        min_level: Level::Trace,
        ..CollectorConfig::default()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn submits_filter_batch_and_flush_in_order() {
    let sink = Arc::new(CapturingSink::default());
    let collector = LogCollector::new(test_config(), sink.clone());
    collector.add_filter(Arc::new(KeywordFilter::new(vec!["noisy".into()], true)));

    assert_eq!(collector.submit("first", Level::Info), Submission::Accepted);
    assert_eq!(
        collector.submit("noisy heartbeat", Level::Info),
        Submission::Filtered
    );
    assert_eq!(collector.submit("second", Level::Info), Submission::Accepted);
    assert_eq!(collector.pending_count(), 2);

    collector.flush().await;
    assert_eq!(sink.delivered_lines(), vec!["first", "second"]);
    assert_eq!(collector.pending_count(), 0);
}

#[tokio::test]
async fn level_filter_applies_from_config() {
    let sink = Arc::new(CapturingSink::default());
    let config = CollectorConfig {
        min_level: Level::Warning,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    assert_eq!(collector.submit("debugging", Level::Debug), Submission::Filtered);
    assert_eq!(collector.submit("bad", Level::Error), Submission::Accepted);
    assert_eq!(collector.pending_count(), 1);
}

#[tokio::test]
async fn submit_batch_counts_accepted_entries() {
    let sink = Arc::new(CapturingSink::default());
    let collector = LogCollector::new(test_config(), sink.clone());
    collector.add_filter(Arc::new(KeywordFilter::new(vec!["skip".into()], true)));

    let accepted = collector.submit_batch(["a", "skip me", "b", "c"], Level::Info);
    assert_eq!(accepted, 3);
    assert_eq!(collector.pending_count(), 3);
}

#[tokio::test]
async fn compression_replaces_content_and_sets_flag() {
    let sink = Arc::new(CapturingSink::default());
    let config = CollectorConfig {
        compress_logs: true,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    let original = "a log line that should round-trip through zlib".repeat(4);
    collector.submit(&original, Level::Info);
    collector.flush().await;

    let batches = sink.delivered();
    let entry = &batches[0][0];
    assert!(entry.compressed);
    assert_ne!(entry.content, original.as_bytes());
    assert_eq!(compress::decompress(&entry.content).unwrap(), original.as_bytes());
}

#[tokio::test]
async fn retries_deliver_after_transient_failure() {
    let sink = Arc::new(CapturingSink::failing(2));
    let config = CollectorConfig {
        max_retry_count: 5,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    let sent = Arc::new(AtomicUsize::new(0));
    {
        let sent = Arc::clone(&sent);
        collector.set_send_callback(Arc::new(move |count| {
            sent.fetch_add(count, Ordering::SeqCst);
        }));
    }

    collector.submit("persistent line", Level::Info);
    collector.flush().await;

    wait_until(|| !sink.delivered().is_empty(), "retried delivery").await;
    assert_eq!(sink.delivered_lines(), vec!["persistent line"]);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
    wait_until(|| sent.load(Ordering::SeqCst) == 1, "send callback").await;
}

#[tokio::test]
async fn exhausted_retries_invoke_the_error_callback() {
    let sink = Arc::new(CapturingSink::failing(usize::MAX));
    let config = CollectorConfig {
        max_retry_count: 2,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        collector.set_error_callback(Arc::new(move |message| {
            errors.lock().unwrap().push(message.to_string());
        }));
    }

    collector.submit("doomed", Level::Info);
    collector.flush().await;

    wait_until(|| !errors.lock().unwrap().is_empty(), "terminal error").await;
    let errors = errors.lock().unwrap();
    assert!(errors[0].contains("maximum retry attempts"), "got: {errors:?}");
}

#[tokio::test]
async fn queue_overflow_schedules_a_background_flush() {
    let sink = Arc::new(CapturingSink::default());
    let config = CollectorConfig {
        max_queue_size: 4,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    // The bound is soft: everything is accepted, overflow only flushes.
    for i in 0..6 {
        assert_eq!(
            collector.submit(format!("line-{i}"), Level::Info),
            Submission::Accepted
        );
    }

    wait_until(|| !sink.delivered().is_empty(), "overflow flush").await;
}

#[tokio::test]
async fn shutdown_flushes_everything_and_rejects_new_submissions() {
    let sink = Arc::new(CapturingSink::default());
    let config = CollectorConfig {
        batch_size: 2,
        ..test_config()
    };
    let collector = LogCollector::new(config, sink.clone());

    for i in 0..5 {
        collector.submit(format!("line-{i}"), Level::Info);
    }
    collector.shutdown().await;

    assert_eq!(collector.pending_count(), 0);
    assert_eq!(
        sink.delivered_lines(),
        vec!["line-0", "line-1", "line-2", "line-3", "line-4"]
    );
    assert_eq!(collector.submit("late", Level::Info), Submission::Rejected);
}

#[tokio::test]
async fn periodic_flusher_drains_without_explicit_flush() {
    let sink = Arc::new(CapturingSink::default());
    let config = CollectorConfig {
        flush_interval: Duration::from_millis(20),
        min_level: Level::Trace,
        ..CollectorConfig::default()
    };
    let collector = LogCollector::new(config, sink.clone());

    collector.submit("periodic", Level::Info);
    wait_until(|| !sink.delivered().is_empty(), "periodic flush").await;
    assert_eq!(sink.delivered_lines(), vec!["periodic"]);
    collector.shutdown().await;
}
