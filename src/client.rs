//! Client supervisor
//!
//! Owns the connection to the relay and every session thread: network
//! receive, network transmit, jitter drain, plus the two device streams.
//! State machine: Idle → Connecting → Connected → Active → Stopping → Idle.
//! Fatal I/O on any thread marks the link down; the supervisor tears the
//! session back to Idle on the next `poll`.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, tick, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::audio::buffer::{sample_ring, RingProducer, RingStats};
use crate::audio::capture::{CaptureStats, CaptureStream, CapturedBlock};
use crate::audio::dsp::DspChain;
use crate::audio::render::RenderStream;
use crate::config::ClientConfig;
use crate::constants::{CAPTURE_CHANNEL_CAPACITY, HEARTBEAT_INTERVAL_SECS, RING_CAPACITY_PACKETS};
use crate::error::{Error, NetworkError, ProtocolError};
use crate::jitter::{AudioPacket, JitterBuffer, JitterStats};
use crate::logger::SessionLogger;
use crate::protocol::{read_message, write_message, Message, MessageType};
use crate::recorder::WavRecorder;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Active,
    Stopping,
}

/// Transmit-side counters.
#[derive(Debug, Default)]
pub struct TransmitStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
}

impl TransmitStats {
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }
}

/// Point-in-time snapshot for the REPL `status` command.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: ClientState,
    pub jitter: JitterStats,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub heartbeats_sent: u64,
    pub blocks_captured: u64,
    pub blocks_dropped: u64,
    pub ring_overflow: u64,
    pub ring_underflow: u64,
    pub warnings: u64,
}

/// One end of the full-duplex session.
pub struct AudioClient {
    config: ClientConfig,
    state: ClientState,

    running: Arc<AtomicBool>,
    link_down: Arc<AtomicBool>,
    audio_active: Arc<AtomicBool>,
    warnings: Arc<AtomicU64>,

    socket: Option<TcpStream>,
    control_tx: Option<Sender<Message>>,
    blocks_tx: Option<Sender<CapturedBlock>>,
    blocks_rx: Option<Receiver<CapturedBlock>>,
    sequence: Arc<AtomicU32>,

    jitter: Arc<Mutex<JitterBuffer>>,
    capture: Option<CaptureStream>,
    render: Option<RenderStream>,

    recv_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
    drain_running: Arc<AtomicBool>,
    drain_thread: Option<JoinHandle<()>>,

    tx_stats: Arc<TransmitStats>,
    capture_stats: Option<Arc<CaptureStats>>,
    ring_stats: Option<Arc<RingStats>>,

    recorder: Arc<WavRecorder>,
    logger: Arc<SessionLogger>,
}

impl AudioClient {
    pub fn new(
        config: ClientConfig,
        logger: Arc<SessionLogger>,
        recorder: Arc<WavRecorder>,
    ) -> Result<Self, Error> {
        config.audio.validate()?;
        let jitter = JitterBuffer::new(&config.audio, config.jitter);
        Ok(Self {
            config,
            state: ClientState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            link_down: Arc::new(AtomicBool::new(false)),
            audio_active: Arc::new(AtomicBool::new(false)),
            warnings: Arc::new(AtomicU64::new(0)),
            socket: None,
            control_tx: None,
            blocks_tx: None,
            blocks_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
            jitter: Arc::new(Mutex::new(jitter)),
            capture: None,
            render: None,
            recv_thread: None,
            tx_thread: None,
            drain_running: Arc::new(AtomicBool::new(false)),
            drain_thread: None,
            tx_stats: Arc::new(TransmitStats::default()),
            capture_stats: None,
            ring_stats: None,
            recorder,
            logger,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Connected | ClientState::Active)
    }

    pub fn is_audio_active(&self) -> bool {
        self.state == ClientState::Active
    }

    /// Open the TCP session and announce our audio format.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.state != ClientState::Idle {
            return Err(Error::Config(format!(
                "connect called in state {:?}",
                self.state
            )));
        }
        self.state = ClientState::Connecting;

        let stream = match self.dial() {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ClientState::Idle;
                return Err(e);
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        self.link_down.store(false, Ordering::SeqCst);
        self.sequence.store(0, Ordering::SeqCst);

        let (control_tx, control_rx) = bounded::<Message>(16);
        let (blocks_tx, blocks_rx) = bounded::<CapturedBlock>(CAPTURE_CHANNEL_CAPACITY);

        self.spawn_transmit(&stream, control_rx, blocks_rx.clone())?;
        if let Err(e) = self.spawn_receive(&stream, control_tx.clone()) {
            // Dropping control_tx lets the transmit thread run dry and exit.
            self.running.store(false, Ordering::SeqCst);
            drop(control_tx);
            if let Some(handle) = self.tx_thread.take() {
                let _ = handle.join();
            }
            self.state = ClientState::Idle;
            return Err(e);
        }

        // Announce ourselves, then the audio format we will send.
        let _ = control_tx.send(Message::connect());
        let _ = control_tx.send(Message::client_config(&self.config.audio));

        self.socket = Some(stream);
        self.control_tx = Some(control_tx);
        self.blocks_tx = Some(blocks_tx);
        self.blocks_rx = Some(blocks_rx);
        self.state = ClientState::Connected;

        tracing::info!(
            host = %self.config.network.host,
            port = self.config.network.port,
            "connected to server"
        );
        Ok(())
    }

    fn dial(&self) -> Result<TcpStream, Error> {
        let address = format!("{}:{}", self.config.network.host, self.config.network.port);
        let targets: Vec<SocketAddr> = address
            .to_socket_addrs()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?
            .collect();
        let target = targets
            .first()
            .ok_or_else(|| NetworkError::ConnectionFailed(format!("no address for {address}")))?;

        let mut last_error = NetworkError::Timeout;
        for attempt in 1..=self.config.network.connect_attempts.max(1) {
            match TcpStream::connect_timeout(target, self.config.network.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::warn!(attempt, "connect failed: {e}");
                    last_error = if e.kind() == std::io::ErrorKind::TimedOut {
                        NetworkError::Timeout
                    } else {
                        NetworkError::ConnectionFailed(e.to_string())
                    };
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
        Err(last_error.into())
    }

    fn spawn_transmit(
        &mut self,
        stream: &TcpStream,
        control_rx: Receiver<Message>,
        blocks_rx: Receiver<CapturedBlock>,
    ) -> Result<(), Error> {
        let mut socket = stream
            .try_clone()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        let link_down = self.link_down.clone();
        let stats = self.tx_stats.clone();
        let recorder = self.recorder.clone();
        let logger = self.logger.clone();
        let audio = self.config.audio;
        let endpoint = format!("{}:{}", self.config.network.host, self.config.network.port);

        let handle = thread::Builder::new()
            .name("net-tx".to_string())
            .spawn(move || {
                let heartbeat = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
                let poll = Duration::from_millis(20);
                let mut last_send = Instant::now();

                'outer: loop {
                    // Control messages take priority over queued audio.
                    loop {
                        match control_rx.try_recv() {
                            Ok(message) => {
                                if write_frame(&mut socket, &message, &link_down).is_err() {
                                    break 'outer;
                                }
                                if message.kind == MessageType::Heartbeat {
                                    stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                                }
                                last_send = Instant::now();
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => break 'outer,
                        }
                    }

                    match blocks_rx.recv_timeout(poll) {
                        Ok(block) => {
                            let message =
                                Message::audio(block.sequence, block.timestamp, &block.samples);
                            let size = message.wire_length() as u64;
                            if write_frame(&mut socket, &message, &link_down).is_err() {
                                break;
                            }
                            stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                            stats.bytes_sent.fetch_add(size, Ordering::Relaxed);
                            last_send = Instant::now();

                            // Mirror outgoing audio to the recorder and the
                            // session log, off the capture callback.
                            recorder.write_samples(&block.samples);
                            logger.log_audio_stats(
                                size as usize,
                                audio.sample_rate as u32,
                                audio.channels as u16,
                                &endpoint,
                            );
                            logger.log_packet(block.timestamp, size as usize);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            // Keep the connection warm while audio is idle.
                            if last_send.elapsed() >= heartbeat {
                                if write_frame(&mut socket, &Message::heartbeat(), &link_down)
                                    .is_err()
                                {
                                    break;
                                }
                                stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                                last_send = Instant::now();
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // Session closing: flush remaining control
                            // traffic (the goodbye) and exit.
                            while let Ok(message) = control_rx.recv() {
                                if write_frame(&mut socket, &message, &link_down).is_err() {
                                    break;
                                }
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        self.tx_thread = Some(handle);
        Ok(())
    }

    fn spawn_receive(
        &mut self,
        stream: &TcpStream,
        control_tx: Sender<Message>,
    ) -> Result<(), Error> {
        let mut socket = stream
            .try_clone()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        let running = self.running.clone();
        let link_down = self.link_down.clone();
        let audio_active = self.audio_active.clone();
        let warnings = self.warnings.clone();
        let jitter = self.jitter.clone();
        let audio = self.config.audio;

        let handle = thread::Builder::new()
            .name("net-rx".to_string())
            .spawn(move || {
                let heartbeat = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
                let mut last_heartbeat_reply = Instant::now() - heartbeat;

                while running.load(Ordering::Relaxed) {
                    let message = match read_message(&mut socket) {
                        Ok(message) => message,
                        Err(ProtocolError::Disconnected) => {
                            if running.load(Ordering::Relaxed) {
                                tracing::info!("server closed the connection");
                                link_down.store(true, Ordering::SeqCst);
                            }
                            break;
                        }
                        Err(e) => {
                            // On a byte stream there is no safe resync point.
                            if running.load(Ordering::Relaxed) {
                                tracing::warn!("receive failed: {e}");
                                link_down.store(true, Ordering::SeqCst);
                            }
                            break;
                        }
                    };

                    match message.kind {
                        MessageType::AudioData => {
                            if !audio_active.load(Ordering::Relaxed) {
                                continue;
                            }
                            match message.samples() {
                                Ok(samples) => {
                                    let packet = AudioPacket {
                                        sequence: message.sequence,
                                        timestamp: message.timestamp,
                                        arrival: Instant::now(),
                                        samples,
                                        sample_rate: audio.sample_rate as u32,
                                        channels: audio.channels as u16,
                                        valid: true,
                                    };
                                    jitter.lock().unwrap().insert(packet);
                                }
                                Err(e) => {
                                    tracing::warn!("bad audio payload: {e}");
                                    warnings.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        MessageType::Heartbeat => {
                            // Reply, rate-limited so the relay echo cannot
                            // turn into a ping-pong storm.
                            if last_heartbeat_reply.elapsed() >= heartbeat {
                                last_heartbeat_reply = Instant::now();
                                let _ = control_tx.try_send(Message::heartbeat());
                            }
                        }
                        MessageType::Disconnect => {
                            tracing::info!("server requested disconnect");
                            link_down.store(true, Ordering::SeqCst);
                            break;
                        }
                        _ => {
                            warnings.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        self.recv_thread = Some(handle);
        Ok(())
    }

    /// Open both device streams, reset the jitter buffer, and tell the
    /// server we are ready to receive audio.
    pub fn start_audio(&mut self) -> Result<(), Error> {
        if self.state != ClientState::Connected {
            return Err(Error::Config(format!(
                "start_audio called in state {:?}",
                self.state
            )));
        }

        self.jitter.lock().unwrap().clear();

        let ring_capacity = self.config.audio.samples_per_packet() * RING_CAPACITY_PACKETS;
        let (producer, consumer) = sample_ring(ring_capacity);
        let ring_stats = producer.stats();

        let render = RenderStream::start(self.config.output_device, &self.config.audio, consumer)?;

        let (blocks_tx, blocks_rx) = match (self.blocks_tx.clone(), self.blocks_rx.clone()) {
            (Some(tx), Some(rx)) => (tx, rx),
            _ => return Err(Error::Config("no active connection".to_string())),
        };
        let capture = match CaptureStream::start(
            self.config.input_device,
            &self.config.audio,
            self.sequence.clone(),
            blocks_tx,
            blocks_rx,
        ) {
            Ok(capture) => capture,
            Err(e) => {
                let mut render = render;
                render.stop();
                return Err(e.into());
            }
        };

        self.spawn_drain(producer)?;

        if let Some(control_tx) = &self.control_tx {
            let _ = control_tx.send(Message::client_ready());
        }

        self.ring_stats = Some(ring_stats);
        self.capture_stats = Some(capture.stats());
        self.capture = Some(capture);
        self.render = Some(render);
        self.audio_active.store(true, Ordering::SeqCst);
        self.state = ClientState::Active;

        tracing::info!("audio started");
        Ok(())
    }

    fn spawn_drain(&mut self, mut producer: RingProducer) -> Result<(), Error> {
        self.drain_running.store(true, Ordering::SeqCst);
        let running = self.drain_running.clone();
        let jitter = self.jitter.clone();
        let interval = self.config.audio.packet_interval();
        let dsp_enabled = self.config.dsp.enabled;
        let sample_rate = self.config.audio.sample_rate as u32;

        let handle = thread::Builder::new()
            .name("jitter-drain".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut dsp = DspChain::new(sample_rate);
                let adapt_every = (1000.0 / (interval.as_secs_f64() * 1000.0)).max(1.0) as u64;
                let mut ticks: u64 = 0;

                while running.load(Ordering::Relaxed) {
                    if ticker.recv().is_err() {
                        break;
                    }
                    ticks += 1;

                    let packet = jitter.lock().unwrap().drain();
                    if let Some(mut packet) = packet {
                        if dsp_enabled && packet.valid {
                            dsp.process(&mut packet.samples);
                        }
                        producer.push_slice(&packet.samples);
                    }

                    if ticks % adapt_every == 0 {
                        jitter.lock().unwrap().adapt();
                    }
                }
            })
            .map_err(|e| Error::Config(e.to_string()))?;

        self.drain_thread = Some(handle);
        Ok(())
    }

    /// Stop both streams and fall back to Connected.
    pub fn stop_audio(&mut self) {
        if self.state != ClientState::Active {
            return;
        }
        self.audio_active.store(false, Ordering::SeqCst);

        self.drain_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.drain_thread.take() {
            let _ = handle.join();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut render) = self.render.take() {
            render.stop();
        }
        self.jitter.lock().unwrap().clear();
        self.ring_stats = None;

        self.state = ClientState::Connected;
        tracing::info!("audio stopped");
    }

    /// Best-effort goodbye, then tear down every thread.
    pub fn disconnect(&mut self) {
        if self.state == ClientState::Idle {
            return;
        }
        self.stop_audio_if_active();
        self.state = ClientState::Stopping;

        if let Some(control_tx) = &self.control_tx {
            let _ = control_tx.send(Message::disconnect());
        }
        // Dropping the senders lets the transmit thread flush the goodbye
        // and exit on channel close.
        self.control_tx = None;
        self.blocks_tx = None;
        self.blocks_rx = None;
        if let Some(handle) = self.tx_thread.take() {
            let _ = handle.join();
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }

        self.state = ClientState::Idle;
        tracing::info!("disconnected");
    }

    fn stop_audio_if_active(&mut self) {
        if self.state == ClientState::Active {
            self.stop_audio();
        } else if self.capture.is_some() || self.render.is_some() {
            // Defensive path for teardown after a fault.
            self.audio_active.store(false, Ordering::SeqCst);
            self.drain_running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.drain_thread.take() {
                let _ = handle.join();
            }
            if let Some(mut capture) = self.capture.take() {
                capture.stop();
            }
            if let Some(mut render) = self.render.take() {
                render.stop();
            }
        }
    }

    /// Reconcile with the session threads: if any of them marked the link
    /// down, tear the session back to Idle. Returns the current state.
    pub fn poll(&mut self) -> ClientState {
        if self.link_down.load(Ordering::SeqCst) && self.state != ClientState::Idle {
            tracing::warn!("connection lost, shutting session down");
            self.disconnect();
        }
        // Surface any device-stream fault without killing the connection.
        if let Some(capture) = &self.capture {
            if let Some(e) = capture.take_error() {
                tracing::warn!("capture fault: {e}");
            }
        }
        if let Some(render) = &self.render {
            if let Some(e) = render.take_error() {
                tracing::warn!("render fault: {e}");
            }
        }
        self.state
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(render) = &self.render {
            render.set_volume(volume);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        if let Some(render) = &self.render {
            render.set_muted(muted);
        }
    }

    pub fn status(&self) -> ClientStatus {
        let jitter = self.jitter.lock().unwrap().stats();
        ClientStatus {
            state: self.state,
            jitter,
            packets_sent: self.tx_stats.packets_sent(),
            bytes_sent: self.tx_stats.bytes_sent(),
            heartbeats_sent: self.tx_stats.heartbeats_sent(),
            blocks_captured: self
                .capture_stats
                .as_ref()
                .map(|s| s.blocks_captured())
                .unwrap_or(0),
            blocks_dropped: self
                .capture_stats
                .as_ref()
                .map(|s| s.blocks_dropped())
                .unwrap_or(0),
            ring_overflow: self
                .ring_stats
                .as_ref()
                .map(|s| s.overflow_samples())
                .unwrap_or(0),
            ring_underflow: self
                .ring_stats
                .as_ref()
                .map(|s| s.underflow_samples())
                .unwrap_or(0),
            warnings: self.warnings.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn write_frame(
    socket: &mut TcpStream,
    message: &Message,
    link_down: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    let result = write_message(socket, message);
    if let Err(e) = &result {
        tracing::warn!("send failed: {e}");
        link_down.store(true, Ordering::SeqCst);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use std::io::Write;
    use std::net::TcpListener;

    fn test_client(port: u16) -> AudioClient {
        let config = ClientConfig {
            network: NetworkConfig {
                host: "127.0.0.1".to_string(),
                port,
                connect_timeout: Duration::from_millis(500),
                connect_attempts: 1,
            },
            ..ClientConfig::default()
        };
        AudioClient::new(
            config,
            Arc::new(SessionLogger::new()),
            Arc::new(WavRecorder::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_connect_sends_announce_and_config() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = test_client(port);
        client.connect().unwrap();
        assert_eq!(client.state(), ClientState::Connected);

        let (mut peer, _) = listener.accept().unwrap();
        let first = read_message(&mut peer).unwrap();
        assert_eq!(first.kind, MessageType::Connect);
        let second = read_message(&mut peer).unwrap();
        assert_eq!(second.kind, MessageType::ClientConfig);
        assert_eq!(second.audio_config(), Some(client.config.audio));

        client.disconnect();
        assert_eq!(client.state(), ClientState::Idle);

        // The goodbye is best-effort but should normally arrive.
        let third = read_message(&mut peer).unwrap();
        assert_eq!(third.kind, MessageType::Disconnect);
    }

    #[test]
    fn test_connect_failure_returns_to_idle() {
        // A port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = test_client(port);
        assert!(client.connect().is_err());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn test_start_audio_requires_connected() {
        let mut client = test_client(1);
        assert!(client.start_audio().is_err());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn test_poll_reaps_dead_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = test_client(port);
        client.connect().unwrap();

        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        // The receive thread notices EOF; poll tears the session down.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if client.poll() == ClientState::Idle {
                break;
            }
            assert!(Instant::now() < deadline, "link loss never detected");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_heartbeat_reply_is_rate_limited() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = test_client(port);
        client.connect().unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        let _ = read_message(&mut peer).unwrap(); // Connect
        let _ = read_message(&mut peer).unwrap(); // ClientConfig

        // Shower the client with heartbeats; replies must stay bounded.
        for _ in 0..20 {
            peer.write_all(&Message::heartbeat().encode()).unwrap();
        }

        peer.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        let mut replies = 0;
        while let Ok(message) = read_message(&mut peer) {
            if message.kind == MessageType::Heartbeat {
                replies += 1;
            }
        }
        assert!(replies <= 1, "got {replies} heartbeat replies");

        client.disconnect();
    }
}
