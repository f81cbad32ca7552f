//! # AudSync
//!
//! Low-latency full-duplex audio streaming over TCP with a central relay.
//!
//! Each client captures microphone audio, frames it into sequenced packets,
//! and sends them to the relay server. The server fans every audio packet out
//! to all other ready clients. On the receiving side a jitter buffer reorders
//! the bursty network stream, conceals small losses with silence, and feeds a
//! lock-free ring buffer drained by the output device callback.
//!
//! ```text
//! ┌──────────────────────────── CLIENT ────────────────────────────┐
//! │  input device                                   output device  │
//! │       │ capture callback                 output callback ▲     │
//! │       ▼                                                  │     │
//! │  bounded channel                                    SampleRing │
//! │       │                                                  ▲     │
//! │       ▼ transmit thread                     drain thread │     │
//! │   framing ──▶ TCP send          TCP recv ──▶ JitterBuffer      │
//! └───────────────────│─────────────────▲─────────────────────────┘
//!                     ▼                 │
//!               ┌─────────────────────────────┐
//!               │   relay server (fan-out to  │
//!               │    every other ready client)│
//!               └─────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod jitter;
pub mod logger;
pub mod protocol;
pub mod recorder;
pub mod server;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default TCP port for the relay server
    pub const DEFAULT_PORT: u16 = 8080;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frames per capture/render buffer
    pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 256;

    /// Largest accepted wire message, header included
    pub const MAX_MESSAGE: usize = 65_536;

    /// Capture-to-transmit channel depth, in captured blocks
    pub const CAPTURE_CHANNEL_CAPACITY: usize = 64;

    /// Per-recipient outgoing queue depth on the server, in frames
    pub const OUTGOING_QUEUE_CAPACITY: usize = 256;

    /// Output ring capacity, in packet intervals
    pub const RING_CAPACITY_PACKETS: usize = 8;

    /// Connect timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Connect retry attempts
    pub const CONNECT_ATTEMPTS: u32 = 3;

    /// Idle interval after which the client transmit thread emits a heartbeat
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;
}
