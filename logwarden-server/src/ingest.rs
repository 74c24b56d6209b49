//! TCP ingest: accepts long-lived producer connections and turns CRLF
//! frames into processor submissions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use logwarden_core::process::LogProcessor;
use logwarden_model::LogData;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::codec::LineCodec;

/// Live connections, id → peer address. Entries are removed on disconnect;
/// the id feeds the `tcp-<connId>-<seq>` payload ids.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, SocketAddr>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn register(&self, addr: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().unwrap().insert(id, addr);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.connections.lock().unwrap().remove(&id);
    }

    pub fn peer_addr(&self, id: u64) -> Option<SocketAddr> {
        self.connections.lock().unwrap().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accept loop. Runs until `shutdown` fires; each connection gets its own
/// task reading frames until EOF or a framing error.
pub async fn serve(
    listener: TcpListener,
    processor: Arc<LogProcessor>,
    registry: Arc<ConnectionRegistry>,
    max_frame_len: usize,
    shutdown: Arc<Notify>,
) {
    info!(
        "Ingest listener accepting connections on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into())
    );

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Ingest listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let conn_id = registry.register(addr);
                        debug!("Connection {conn_id} established from {addr}");

                        let processor = Arc::clone(&processor);
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move {
                            handle_connection(stream, addr, conn_id, processor, max_frame_len).await;
                            registry.unregister(conn_id);
                            debug!("Connection {conn_id} from {addr} closed");
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    processor: Arc<LogProcessor>,
    max_frame_len: usize,
) {
    let mut frames = FramedRead::new(stream, LineCodec::new(max_frame_len));
    let mut seq: u64 = 0;

    while let Some(frame) = frames.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Connection {conn_id}: framing error, dropping connection: {e}");
                break;
            }
        };
        if payload.is_empty() {
            continue;
        }

        let data = LogData::new(format!("tcp-{conn_id}-{seq}"), payload, addr.to_string());
        seq += 1;

        if let Err(e) = processor.submit_log_data(data) {
            debug!("Connection {conn_id}: submission rejected: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assigns_unique_ids_and_cleans_up() {
        let registry = ConnectionRegistry::default();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let a = registry.register(addr);
        let b = registry.register(addr);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.peer_addr(a), Some(addr));

        registry.unregister(a);
        assert_eq!(registry.peer_addr(a), None);
        assert_eq!(registry.len(), 1);
    }
}
