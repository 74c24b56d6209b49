//! File tailer with truncate-after-consume.
//!
//! The tailed file is rewritten after every round that consumed bytes so it
//! only ever holds the untailed suffix; a producer appending continuously
//! therefore never grows the file past one round of output. Optional
//! sidecar backups preserve the consumed prefix before it is cut off.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Local;
use logwarden_model::Level;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collect::collector::CollectorInner;

pub(crate) fn spawn(
    inner: Arc<CollectorInner>,
    path: PathBuf,
    level: Level,
    interval: Duration,
    max_lines_per_round: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !path.is_file() {
            inner.report_error(&format!("cannot open log file: {}", path.display()));
            return;
        }

        let mut state = TailState {
            last_pos: 0,
            last_backup: tokio::time::Instant::now(),
        };

        loop {
            tokio::select! {
                _ = inner.shutdown.notified() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if !inner.active.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = run_round(&inner, &path, level, max_lines_per_round, &mut state).await {
                inner.report_error(&format!("tail round failed for {}: {e}", path.display()));
            }
        }
    })
}

struct TailState {
    last_pos: u64,
    last_backup: tokio::time::Instant,
}

async fn run_round(
    inner: &Arc<CollectorInner>,
    path: &Path,
    level: Level,
    max_lines_per_round: usize,
    state: &mut TailState,
) -> std::io::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let end = bytes.len() as u64;
    if end <= state.last_pos {
        return Ok(());
    }

    let fresh = &bytes[state.last_pos as usize..];
    let (lines, consumed) = split_round(fresh, max_lines_per_round);
    for line in &lines {
        let text = trim_line(line);
        if !text.is_empty() {
            inner.submit(text, level);
        }
    }

    let last_read_pos = state.last_pos + consumed as u64;

    if consumed > 0 {
        debug!(
            "Tailed {} lines from {} ({} bytes), truncating consumed prefix",
            lines.len(),
            path.display(),
            consumed
        );
        truncate_consumed(inner, path, &bytes, last_read_pos as usize, state).await?;
        state.last_pos = 0;
    } else {
        state.last_pos = last_read_pos;
    }

    Ok(())
}

/// Consume up to `max_lines` complete lines from `fresh`; a trailing
/// partial line stays in the file for the next round. Returns the lines and
/// how many bytes they covered, terminators included.
fn split_round(fresh: &[u8], max_lines: usize) -> (Vec<&[u8]>, usize) {
    let mut lines = Vec::new();
    let mut consumed = 0usize;
    for line in fresh.split_inclusive(|b| *b == b'\n') {
        if !line.ends_with(b"\n") {
            break;
        }
        consumed += line.len();
        lines.push(line);
        if lines.len() >= max_lines {
            break;
        }
    }
    (lines, consumed)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let Some((last, rest)) = line.split_last() {
        if *last == b'\n' || *last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Rewrite the file to hold only the untailed suffix. Serialized with the
/// backup writer through the collector's truncate lock.
async fn truncate_consumed(
    inner: &Arc<CollectorInner>,
    path: &Path,
    bytes: &[u8],
    last_read_pos: usize,
    state: &mut TailState,
) -> std::io::Result<()> {
    let _guard = inner.truncate_lock.lock().await;

    if inner.config.enable_backup && state.last_backup.elapsed() >= inner.config.clean_interval {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup_path = PathBuf::from(format!("{}.bak.{stamp}", path.display()));
        if let Err(e) = tokio::fs::write(&backup_path, &bytes[..last_read_pos]).await {
            warn!("Failed to write tail backup {}: {e}", backup_path.display());
        } else {
            state.last_backup = tokio::time::Instant::now();
        }
    }

    tokio::fs::write(path, &bytes[last_read_pos..]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_up_to_the_cap() {
        let data = b"L1\nL2\nL3\nL4\nL5\n";
        let (lines, consumed) = split_round(data, 3);
        assert_eq!(lines, vec![b"L1\n" as &[u8], b"L2\n", b"L3\n"]);
        assert_eq!(consumed, 9);
        assert_eq!(&data[consumed..], b"L4\nL5\n");
    }

    #[test]
    fn leaves_a_partial_trailing_line() {
        let (lines, consumed) = split_round(b"done\nhalf", 10);
        assert_eq!(lines.len(), 1);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn trims_crlf_terminators() {
        assert_eq!(trim_line(b"payload\r\n"), b"payload");
        assert_eq!(trim_line(b"payload\n"), b"payload");
        assert_eq!(trim_line(b"payload"), b"payload");
    }
}
