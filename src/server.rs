//! Relay server
//!
//! Accepts TCP clients, tracks their declared audio format and readiness,
//! and fans every `AudioData` frame out to all other ready clients. Each
//! connection gets a reader thread and a writer thread; the writer drains a
//! bounded per-recipient queue so one slow socket can never stall another
//! recipient — its frames are dropped and counted instead.

use std::collections::HashMap;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::config::AudioConfig;
use crate::constants::OUTGOING_QUEUE_CAPACITY;
use crate::error::{Error, NetworkError, ProtocolError};
use crate::logger::SessionLogger;
use crate::protocol::{read_message, Message, MessageType};

/// Server-side record of one connected client.
struct ClientRecord {
    id: String,
    ready: bool,
    config: AudioConfig,
    /// Bounded queue drained by this client's writer thread.
    outgoing: Sender<Bytes>,
    /// Frames dropped because the queue was full.
    dropped: Arc<AtomicU64>,
    /// Clone kept for shutdown; unblocks the reader thread.
    socket: TcpStream,
}

/// Status snapshot of one client for the REPL.
#[derive(Debug, Clone)]
pub struct ClientSummary {
    pub id: String,
    pub ready: bool,
    pub config: AudioConfig,
    pub dropped: u64,
}

type ClientTable = Arc<Mutex<HashMap<u64, ClientRecord>>>;

/// The broadcast relay.
pub struct AudioServer {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    accept_thread: Option<JoinHandle<()>>,
    clients: ClientTable,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    logger: Arc<SessionLogger>,
}

impl AudioServer {
    /// Bind and start accepting. Port 0 binds an ephemeral port; the bound
    /// address is available through [`local_addr`](Self::local_addr).
    pub fn start(port: u16, logger: Arc<SessionLogger>) -> Result<Self, Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let clients: ClientTable = Arc::new(Mutex::new(HashMap::new()));
        let handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_running = running.clone();
        let accept_clients = clients.clone();
        let accept_handles = handles.clone();
        let accept_logger = logger.clone();

        let accept_thread = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || {
                accept_loop(
                    listener,
                    accept_running,
                    accept_clients,
                    accept_handles,
                    accept_logger,
                );
            })
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::info!(%local_addr, "server started");

        Ok(Self {
            running,
            local_addr,
            accept_thread: Some(accept_thread),
            clients,
            handles,
            logger,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn client_summaries(&self) -> Vec<ClientSummary> {
        self.clients
            .lock()
            .unwrap()
            .values()
            .map(|record| ClientSummary {
                id: record.id.clone(),
                ready: record.ready,
                config: record.config,
                dropped: record.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn logger(&self) -> Arc<SessionLogger> {
        self.logger.clone()
    }

    /// Stop accepting, disconnect every client, and join all threads.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut clients = self.clients.lock().unwrap();
            for (_, record) in clients.drain() {
                let _ = record.socket.shutdown(Shutdown::Both);
                // Dropping `outgoing` lets the writer thread run dry and exit.
            }
        }

        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        tracing::info!("server stopped");
    }
}

impl Drop for AudioServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    clients: ClientTable,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    logger: Arc<SessionLogger>,
) {
    let mut next_id: u64 = 0;
    let mut status_ticks: u32 = 0;

    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                next_id += 1;
                let client_id = next_id;
                if let Err(e) = register_client(
                    client_id, stream, peer, &running, &clients, &handles, &logger,
                ) {
                    tracing::warn!(%peer, "failed to register client: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
                status_ticks += 1;
                // One status line roughly every 30 seconds.
                if status_ticks >= 600 {
                    status_ticks = 0;
                    let connected = clients.lock().unwrap().len();
                    tracing::info!(connected, "server status");
                }
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    tracing::warn!("accept failed: {e}");
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn register_client(
    client_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    running: &Arc<AtomicBool>,
    clients: &ClientTable,
    handles: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    logger: &Arc<SessionLogger>,
) -> std::io::Result<()> {
    // The listener is nonblocking; accepted sockets must not inherit that.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let reader_stream = stream.try_clone()?;
    let writer_stream = stream.try_clone()?;

    let (outgoing_tx, outgoing_rx) = bounded::<Bytes>(OUTGOING_QUEUE_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));

    let record = ClientRecord {
        id: format!("client_{client_id}"),
        ready: false,
        config: AudioConfig::default(),
        outgoing: outgoing_tx,
        dropped: dropped.clone(),
        socket: stream,
    };
    clients.lock().unwrap().insert(client_id, record);

    let total = clients.lock().unwrap().len();
    tracing::info!(client = client_id, %peer, total, "client connected");

    let writer = thread::Builder::new()
        .name(format!("writer-{client_id}"))
        .spawn(move || writer_loop(writer_stream, outgoing_rx))?;

    let reader_running = running.clone();
    let reader_clients = clients.clone();
    let reader_logger = logger.clone();
    let reader = thread::Builder::new()
        .name(format!("reader-{client_id}"))
        .spawn(move || {
            reader_loop(
                client_id,
                reader_stream,
                reader_running,
                reader_clients,
                reader_logger,
            );
        })?;

    let mut handles = handles.lock().unwrap();
    handles.push(writer);
    handles.push(reader);
    Ok(())
}

/// Drains the bounded per-recipient queue onto the socket.
fn writer_loop(mut stream: TcpStream, outgoing: Receiver<Bytes>) {
    for bytes in outgoing.iter() {
        if stream.write_all(&bytes).is_err() {
            // Unblock the reader so the record gets removed.
            let _ = stream.shutdown(Shutdown::Both);
            break;
        }
    }
}

fn reader_loop(
    client_id: u64,
    mut stream: TcpStream,
    running: Arc<AtomicBool>,
    clients: ClientTable,
    logger: Arc<SessionLogger>,
) {
    while running.load(Ordering::Relaxed) {
        let message = match read_message(&mut stream) {
            Ok(message) => message,
            Err(ProtocolError::Disconnected) => {
                tracing::debug!(client = client_id, "client closed connection");
                break;
            }
            Err(e) => {
                tracing::warn!(client = client_id, "closing connection: {e}");
                break;
            }
        };

        match message.kind {
            MessageType::Connect => {
                tracing::debug!(client = client_id, "connect announced");
            }
            MessageType::ClientConfig => match message.audio_config() {
                Some(config) if config.validate().is_ok() => {
                    if let Some(record) = clients.lock().unwrap().get_mut(&client_id) {
                        record.config = config;
                    }
                    tracing::info!(
                        client = client_id,
                        sample_rate = config.sample_rate,
                        channels = config.channels,
                        frames = config.frames_per_buffer,
                        "client config"
                    );
                }
                _ => {
                    tracing::warn!(client = client_id, "rejected malformed config");
                }
            },
            MessageType::ClientReady => {
                if let Some(record) = clients.lock().unwrap().get_mut(&client_id) {
                    record.ready = true;
                }
                tracing::info!(client = client_id, "client ready for audio");
            }
            MessageType::AudioData => {
                logger.log_packet(message.timestamp, message.payload.len());
                broadcast(client_id, &message, &clients);
            }
            MessageType::Heartbeat => {
                // Echo to the sender only.
                let clients = clients.lock().unwrap();
                if let Some(record) = clients.get(&client_id) {
                    let _ = record.outgoing.try_send(message.encode());
                }
            }
            MessageType::Disconnect => {
                tracing::info!(client = client_id, "client disconnecting");
                break;
            }
        }
    }

    remove_client(client_id, &clients);
}

/// Forward the original framed bytes to every other ready client.
///
/// The recipient list is snapshotted under the lock; the sends happen after
/// it is released. `try_send` keeps one full queue from blocking the rest.
fn broadcast(sender_id: u64, message: &Message, clients: &ClientTable) {
    let bytes = message.encode();

    let recipients: Vec<(Sender<Bytes>, Arc<AtomicU64>)> = {
        let clients = clients.lock().unwrap();
        clients
            .iter()
            .filter(|(&id, record)| id != sender_id && record.ready)
            .map(|(_, record)| (record.outgoing.clone(), record.dropped.clone()))
            .collect()
    };

    for (outgoing, dropped) in recipients {
        match outgoing.try_send(bytes.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

fn remove_client(client_id: u64, clients: &ClientTable) {
    let removed = clients.lock().unwrap().remove(&client_id);
    if let Some(record) = removed {
        let _ = record.socket.shutdown(Shutdown::Both);
        let total = clients.lock().unwrap().len();
        tracing::info!(client = client_id, total, "client removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_stop_on_ephemeral_port() {
        let logger = Arc::new(SessionLogger::new());
        let mut server = AudioServer::start(0, logger).unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connected_clients(), 0);
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_full_queue_drops_are_counted() {
        // The broadcast path drops on a full bounded queue.
        let (tx, _rx) = bounded::<Bytes>(1);
        let dropped = Arc::new(AtomicU64::new(0));

        tx.try_send(Bytes::from_static(b"one")).unwrap();
        match tx.try_send(Bytes::from_static(b"two")) {
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            other => panic!("expected full queue, got {other:?}"),
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }
}
