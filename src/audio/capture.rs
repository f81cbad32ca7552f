//! Audio capture from the input device
//!
//! The cpal input callback runs on a real-time thread. It copies each block
//! of samples, stamps it with a sequence number and timestamp, and hands it
//! to the transmit thread through a bounded channel. When the channel is
//! full the oldest queued block is discarded so the callback never waits on
//! the network.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::input_device;
use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::protocol::timestamp_ms;

/// One block of captured audio on its way to the transmit thread.
#[derive(Debug, Clone)]
pub struct CapturedBlock {
    pub sequence: u32,
    pub timestamp: u64,
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
}

/// Capture-side counters.
#[derive(Debug, Default)]
pub struct CaptureStats {
    blocks_captured: AtomicU64,
    samples_captured: AtomicU64,
    blocks_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn blocks_captured(&self) -> u64 {
        self.blocks_captured.load(Ordering::Relaxed)
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn blocks_dropped(&self) -> u64 {
        self.blocks_dropped.load(Ordering::Relaxed)
    }
}

/// Microphone capture bound to one input device.
///
/// The cpal stream lives on a dedicated thread because streams are not
/// movable across threads on every host API.
pub struct CaptureStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<CaptureStats>,
    error_rx: Receiver<AudioError>,
}

impl CaptureStream {
    /// Open the device and start capturing into `block_tx`.
    ///
    /// `sequence` lives with the session, not the stream, so packet numbers
    /// keep increasing across audio stop/start cycles on one connection.
    pub fn start(
        device_index: Option<usize>,
        config: &AudioConfig,
        sequence: Arc<AtomicU32>,
        block_tx: Sender<CapturedBlock>,
        block_rx: Receiver<CapturedBlock>,
    ) -> Result<Self, AudioError> {
        let device = input_device(device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let stream_config = cpal::StreamConfig {
            channels: config.channels as u16,
            sample_rate: cpal::SampleRate(config.sample_rate as u32),
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer as u32),
        };

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(CaptureStats::default());
        let (error_tx, error_rx) = crossbeam_channel::bounded::<AudioError>(16);

        let running_cb = running.clone();
        let running_thread = running.clone();
        let stats_cb = stats.clone();
        let error_tx_cb = error_tx.clone();

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }

                        let block = CapturedBlock {
                            sequence: sequence.fetch_add(1, Ordering::Relaxed),
                            timestamp: timestamp_ms(),
                            samples: data.to_vec(),
                        };

                        stats_cb.blocks_captured.fetch_add(1, Ordering::Relaxed);
                        stats_cb
                            .samples_captured
                            .fetch_add(data.len() as u64, Ordering::Relaxed);

                        match block_tx.try_send(block) {
                            Ok(()) => {}
                            Err(TrySendError::Full(block)) => {
                                // Shed the oldest queued block, keep the new one.
                                let _ = block_rx.try_recv();
                                stats_cb.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                                let _ = block_tx.try_send(block);
                            }
                            Err(TrySendError::Disconnected(_)) => {}
                        }
                    },
                    move |err| {
                        let _ = error_tx_cb.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }
                        while running_thread.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Dropping the stream stops capture.
                    }
                    Err(e) => {
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(device = %device_name, "capture stream started");

        Ok(Self {
            running,
            thread: Some(handle),
            stats,
            error_rx,
        })
    }

    /// Stop the stream and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// A stream build/start failure reported from the capture thread.
    pub fn take_error(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}
