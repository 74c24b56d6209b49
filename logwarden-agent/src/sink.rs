//! TCP delivery for collected batches.

use std::time::Duration;

use async_trait::async_trait;
use logwarden_core::collect::LogSink;
use logwarden_core::compress;
use logwarden_core::error::{PipelineError, Result};
use logwarden_model::{LogEntry, format_timestamp};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Reconnecting TCP sink writing one JSON frame per entry, CRLF-terminated.
///
/// A send failure drops the connection and surfaces the error; the
/// collector's retry loop drives the reconnect on the next attempt.
pub struct TcpSink {
    addr: String,
    source: String,
    connect_timeout: Duration,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl std::fmt::Debug for TcpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSink").field("addr", &self.addr).finish()
    }
}

impl TcpSink {
    pub fn new(addr: impl Into<String>, source: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            source: source.into(),
            connect_timeout,
            stream: tokio::sync::Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let attempt = TcpStream::connect(&self.addr);
        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| {
                PipelineError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.addr),
                ))
            })??;
        info!("Connected to server at {}", self.addr);
        Ok(stream)
    }

    /// One frame per entry. Compressed queue entries are expanded back to
    /// text; the wire format stays line-oriented.
    fn frame(&self, entry: &LogEntry) -> Result<Vec<u8>> {
        let message = compress::payload_text(&entry.content, entry.compressed)?;
        let frame = json!({
            "timestamp": format_timestamp(entry.timestamp),
            "level": entry.level.as_str(),
            "source": self.source,
            "message": message,
        });
        let mut bytes = serde_json::to_vec(&frame)?;
        bytes.extend_from_slice(b"\r\n");
        Ok(bytes)
    }
}

#[async_trait]
impl LogSink for TcpSink {
    async fn send_batch(&self, batch: Vec<LogEntry>) -> Result<()> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(PipelineError::Internal("connection slot is empty".into()));
        };

        let outcome = async {
            for entry in &batch {
                let frame = self.frame(entry)?;
                stream.write_all(&frame).await?;
            }
            stream.flush().await?;
            Ok::<_, PipelineError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                debug!("Delivered {} entries to {}", batch.len(), self.addr);
                Ok(())
            }
            Err(e) => {
                warn!("Send to {} failed, dropping connection: {e}", self.addr);
                *guard = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_model::Level;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn entry(content: &str, level: Level) -> LogEntry {
        LogEntry::new(content.as_bytes().to_vec(), level)
    }

    #[tokio::test]
    async fn frames_arrive_as_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut received = Vec::new();
            while received.len() < 2 {
                received.push(lines.next_line().await.unwrap().unwrap());
            }
            received
        });

        let sink = TcpSink::new(addr.to_string(), "test-agent", Duration::from_secs(1));
        sink.send_batch(vec![
            entry("first line", Level::Info),
            entry("second line", Level::Error),
        ])
        .await
        .unwrap();

        let received = reader.await.unwrap();
        let first: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
        assert_eq!(first["message"], "first line");
        assert_eq!(first["level"], "INFO");
        assert_eq!(first["source"], "test-agent");
        assert_eq!(first["timestamp"].as_str().unwrap().len(), 19);

        let second: serde_json::Value = serde_json::from_str(&received[1]).unwrap();
        assert_eq!(second["level"], "ERROR");
    }

    #[tokio::test]
    async fn compressed_entries_are_expanded_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let (compressed, flag) = compress::compress(b"squeezed");
        let mut entry = LogEntry::new(compressed, Level::Info);
        entry.compressed = flag;

        let sink = TcpSink::new(addr.to_string(), "test-agent", Duration::from_secs(1));
        sink.send_batch(vec![entry]).await.unwrap();

        let line: serde_json::Value = serde_json::from_str(&reader.await.unwrap()).unwrap();
        assert_eq!(line["message"], "squeezed");
    }

    #[tokio::test]
    async fn failed_sends_reconnect_on_the_next_attempt() {
        // Nothing is listening yet: the first send fails.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = TcpSink::new(addr.to_string(), "test-agent", Duration::from_millis(500));
        assert!(sink.send_batch(vec![entry("lost", Level::Info)]).await.is_err());

        // The server comes back on the same port; the sink reconnects.
        let listener = TcpListener::bind(addr).await.unwrap();
        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        sink.send_batch(vec![entry("recovered", Level::Info)])
            .await
            .unwrap();
        let line: serde_json::Value = serde_json::from_str(&reader.await.unwrap()).unwrap();
        assert_eq!(line["message"], "recovered");
    }
}
