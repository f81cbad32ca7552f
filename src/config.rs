//! Configuration types and validation

use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Sample rates accepted on the wire
pub const SUPPORTED_SAMPLE_RATES: [i32; 7] =
    [8000, 16000, 22050, 44100, 48000, 88200, 96000];

/// Buffer sizes accepted on the wire
pub const SUPPORTED_BUFFER_SIZES: [i32; 6] = [32, 64, 128, 256, 512, 1024];

/// Audio stream parameters exchanged in the `ClientConfig` handshake.
///
/// Serialized as 12 little-endian bytes: sample rate, channels, frames per
/// buffer, each as `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: i32,
    pub channels: i32,
    pub frames_per_buffer: i32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE as i32,
            channels: DEFAULT_CHANNELS as i32,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER as i32,
        }
    }
}

impl AudioConfig {
    pub const WIRE_SIZE: usize = 12;

    pub fn new(sample_rate: i32, channels: i32, frames_per_buffer: i32) -> Self {
        Self {
            sample_rate,
            channels,
            frames_per_buffer,
        }
    }

    /// Reject parameters outside the supported envelope.
    pub fn validate(&self) -> Result<(), Error> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "unsupported sample rate {}",
                self.sample_rate
            )));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(Error::Config(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if !SUPPORTED_BUFFER_SIZES.contains(&self.frames_per_buffer) {
            return Err(Error::Config(format!(
                "unsupported buffer size {}",
                self.frames_per_buffer
            )));
        }
        Ok(())
    }

    /// Nominal time between two capture frames.
    pub fn packet_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_buffer as f64 / self.sample_rate as f64)
    }

    /// Packet interval in milliseconds.
    pub fn packet_interval_ms(&self) -> f64 {
        self.frames_per_buffer as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Interleaved samples per packet.
    pub fn samples_per_packet(&self) -> usize {
        self.frames_per_buffer as usize * self.channels as usize
    }

    pub fn to_payload(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[4..8].copy_from_slice(&self.channels.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frames_per_buffer.to_le_bytes());
        buf
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            sample_rate: i32::from_le_bytes(payload[0..4].try_into().ok()?),
            channels: i32::from_le_bytes(payload[4..8].try_into().ok()?),
            frames_per_buffer: i32::from_le_bytes(payload[8..12].try_into().ok()?),
        })
    }
}

/// Jitter buffer tuning
#[derive(Debug, Clone, Copy)]
pub struct JitterConfig {
    /// Floor for the adaptive playout target, in ms.
    pub min_ms: u32,
    /// Initial playout target, in ms.
    pub target_ms: u32,
    /// Hard cap on buffered audio, in ms. Oldest packets are evicted beyond it.
    pub max_ms: u32,
    /// Average jitter above this raises the target, in ms.
    pub jitter_threshold_ms: f64,
    /// Underrun longer than this forces a new pre-roll, in ms.
    pub underrun_ms: u64,
    /// Pre-roll gives up waiting after this and starts with what it has, in ms.
    pub preroll_timeout_ms: u64,
    /// Insert silence packets for sequences deemed lost.
    pub conceal_loss: bool,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            min_ms: 20,
            target_ms: 60,
            max_ms: 200,
            jitter_threshold_ms: 20.0,
            underrun_ms: 50,
            preroll_timeout_ms: 100,
            conceal_loss: true,
        }
    }
}

/// Client connection parameters
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_attempts: CONNECT_ATTEMPTS,
        }
    }
}

/// Render-side voice processing toggles
#[derive(Debug, Clone, Copy, Default)]
pub struct DspConfig {
    pub enabled: bool,
}

/// Everything the client supervisor needs to run a session.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub jitter: JitterConfig,
    pub dsp: DspConfig,
    /// Input device index from `audio::device::list_devices`, or None for default.
    pub input_device: Option<usize>,
    /// Output device index, or None for default.
    pub output_device: Option<usize>,
}
