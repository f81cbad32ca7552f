//! WAV session recorder
//!
//! Captured audio can be mirrored to disk as canonical 16-bit PCM WAV.
//! Float samples get soft saturation above full scale and triangular dither
//! of half an LSB before quantization.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::Error;

struct ActiveRecording {
    writer: hound::WavWriter<BufWriter<File>>,
    rng: SmallRng,
    samples_written: u64,
}

/// Thread-safe WAV recorder; one file at a time.
pub struct WavRecorder {
    inner: Mutex<Option<ActiveRecording>>,
}

impl Default for WavRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl WavRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Open `path` for writing, creating parent directories as needed.
    pub fn start(
        &self,
        path: impl AsRef<Path>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), Error> {
        let path = path.as_ref();

        // Reject a double start before touching the filesystem.
        let mut guard = self.inner.lock().unwrap();
        if guard.is_some() {
            return Err(Error::Config("recording already in progress".to_string()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| Error::Config(format!("failed to open recording: {e}")))?;

        *guard = Some(ActiveRecording {
            writer,
            rng: SmallRng::from_entropy(),
            samples_written: 0,
        });
        tracing::info!(path = %path.display(), "recording started");
        Ok(())
    }

    /// Finalize the WAV header and close the file.
    pub fn stop(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(active) = guard.take() {
            let samples = active.samples_written;
            if let Err(e) = active.writer.finalize() {
                tracing::warn!("failed to finalize recording: {e}");
            } else {
                tracing::info!(samples, "recording stopped");
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Append interleaved float samples. A no-op unless recording.
    pub fn write_samples(&self, samples: &[f32]) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(active) = guard.as_mut() {
            for &sample in samples {
                let mut value = sample;
                // Soft saturation keeps out-of-range peaks from wrapping.
                if value.abs() > 1.0 {
                    value = value.tanh();
                }
                let dither: f32 =
                    (active.rng.gen::<f32>() - active.rng.gen::<f32>()) * (0.5 / 32768.0);
                value += dither;
                let quantized = (value * 32767.0).round().clamp(-32768.0, 32767.0) as i16;
                if active.writer.write_sample(quantized).is_err() {
                    tracing::warn!("recording write failed, stopping");
                    *guard = None;
                    return;
                }
                active.samples_written += 1;
            }
        }
    }
}

/// `recordings/<prefix>_<YYYYmmdd_HHMMSS>.wav`
pub fn recording_path(prefix: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from("recordings").join(format!("{prefix}_{stamp}.wav"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_file_has_canonical_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let recorder = WavRecorder::new();
        recorder.start(&path, 48000, 2).unwrap();
        assert!(recorder.is_recording());
        recorder.write_samples(&vec![0.25f32; 960]);
        recorder.stop();
        assert!(!recorder.is_recording());

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // PCM format code 1, 2 channels, 48 kHz, 16-bit.
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(bytes[22..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 48000);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 16);
        // 960 samples of 16-bit PCM follow the 44-byte header.
        assert_eq!(bytes.len(), 44 + 960 * 2);
    }

    #[test]
    fn test_saturation_and_dither_stay_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hot.wav");

        let recorder = WavRecorder::new();
        recorder.start(&path, 44100, 1).unwrap();
        recorder.write_samples(&[2.0, -3.0, 0.0, 1.0, -1.0]);
        recorder.stop();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 5);
        // tanh(2.0) ≈ 0.964: saturated well below full scale.
        assert!(samples[0] > 30000 && samples[0] < 32200);
        assert!(samples[1] < -30000 && samples[1] > -32700);
        assert!(samples[2].abs() <= 1);
    }

    #[test]
    fn test_double_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = WavRecorder::new();
        recorder.start(dir.path().join("a.wav"), 48000, 1).unwrap();
        let second = dir.path().join("b.wav");
        assert!(recorder.start(&second, 48000, 1).is_err());
        // A rejected start leaves no file behind.
        assert!(!second.exists());
        recorder.stop();
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/take.wav");
        let recorder = WavRecorder::new();
        recorder.start(&path, 48000, 1).unwrap();
        recorder.stop();
        assert!(path.exists());
    }

    #[test]
    fn test_recording_path_shape() {
        let path = recording_path("client_audio");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("client_audio_"));
        assert!(name.ends_with(".wav"));
        assert_eq!(path.parent().unwrap(), Path::new("recordings"));
    }
}
