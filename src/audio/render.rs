//! Audio render to the output device
//!
//! The output callback does a wait-free read of the sample ring, scales by
//! volume (zero when muted), and soft-clips. Underflow comes out as exact
//! silence; the ring counts it.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::RingConsumer;
use crate::audio::device::output_device;
use crate::audio::dsp::soft_clip;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Speaker playback bound to one output device.
///
/// Owns the cpal stream on a dedicated thread, mirroring the capture side.
/// Volume and mute are atomics so the supervisor can flip them without
/// touching the callback.
pub struct RenderStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    volume_bits: Arc<AtomicU32>,
    muted: Arc<AtomicBool>,
    error_rx: Receiver<AudioError>,
}

impl RenderStream {
    /// Open the device and start draining `consumer` from the callback.
    pub fn start(
        device_index: Option<usize>,
        config: &AudioConfig,
        mut consumer: RingConsumer,
    ) -> Result<Self, AudioError> {
        let device = output_device(device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let stream_config = cpal::StreamConfig {
            channels: config.channels as u16,
            sample_rate: cpal::SampleRate(config.sample_rate as u32),
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer as u32),
        };

        let running = Arc::new(AtomicBool::new(true));
        let volume_bits = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let muted = Arc::new(AtomicBool::new(false));
        let (error_tx, error_rx) = crossbeam_channel::bounded::<AudioError>(16);

        let running_cb = running.clone();
        let running_thread = running.clone();
        let volume_cb = volume_bits.clone();
        let muted_cb = muted.clone();
        let error_tx_cb = error_tx.clone();

        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }

                        consumer.pop_slice(data);

                        let gain = if muted_cb.load(Ordering::Relaxed) {
                            0.0
                        } else {
                            f32::from_bits(volume_cb.load(Ordering::Relaxed))
                        };
                        for sample in data.iter_mut() {
                            *sample = soft_clip(*sample * gain);
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
                    }
                    Err(e) => {
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(device = %device_name, "render stream started");

        Ok(Self {
            running,
            thread: Some(handle),
            volume_bits,
            muted,
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

    /// Set playback volume, clamped to [0, 2].
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 2.0);
        self.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// A stream build/start failure reported from the render thread.
    pub fn take_error(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for RenderStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::sample_ring;

    #[test]
    fn test_render_start_on_missing_device() {
        let (_producer, consumer) = sample_ring(1024);
        let result = RenderStream::start(Some(9999), &AudioConfig::default(), consumer);
        assert!(result.is_err());
    }
}
