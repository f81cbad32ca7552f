//! Adaptive jitter buffer
//!
//! Converts the bursty, possibly reordered network stream into a steady
//! sequence of audio packets. Packets are keyed by sequence number; missing
//! sequences are concealed with silence, late arrivals are dropped, and the
//! playout target adapts to the measured network jitter.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::{AudioConfig, JitterConfig};

/// A received (or synthesized) block of audio inside the jitter buffer.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub sequence: u32,
    /// Sender-side timestamp in milliseconds.
    pub timestamp: u64,
    /// Local arrival time.
    pub arrival: Instant,
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// False for synthetic silence inserted to conceal a loss.
    pub valid: bool,
}

/// Counters exposed through [`JitterBuffer::stats`].
#[derive(Debug, Clone, Default)]
pub struct JitterStats {
    pub buffered: usize,
    pub ready: bool,
    pub target_ms: f64,
    pub avg_jitter_ms: f64,
    pub avg_latency_ms: f64,
    pub received: u64,
    pub played: u64,
    pub lost: u64,
    pub dropped: u64,
    pub duplicates: u64,
    pub silence_inserted: u64,
}

/// Sequence-indexed reordering store with adaptive pre-roll.
///
/// Not internally synchronized; the client wraps it in a mutex shared by the
/// receive thread (insert) and the drain thread (drain/adapt). Every
/// operation is a handful of map lookups, so the critical sections stay
/// short.
pub struct JitterBuffer {
    store: BTreeMap<u32, AudioPacket>,
    expected: u32,
    highest: u32,
    ready: bool,
    started: bool,

    config: JitterConfig,
    target_ms: f64,
    packet_interval_ms: f64,
    silence_samples: usize,
    sample_rate: u32,
    channels: u16,

    avg_jitter_ms: f64,
    avg_latency_ms: f64,
    first_insert: Option<Instant>,
    last_arrival: Option<(Instant, u64)>,
    underrun_since: Option<Instant>,

    received: u64,
    played: u64,
    lost: u64,
    dropped: u64,
    duplicates: u64,
    silence_inserted: u64,
}

impl JitterBuffer {
    pub fn new(audio: &AudioConfig, config: JitterConfig) -> Self {
        Self {
            store: BTreeMap::new(),
            expected: 0,
            highest: 0,
            ready: false,
            started: false,
            target_ms: config.target_ms as f64,
            packet_interval_ms: audio.packet_interval_ms(),
            silence_samples: audio.samples_per_packet(),
            sample_rate: audio.sample_rate as u32,
            channels: audio.channels as u16,
            config,
            avg_jitter_ms: 0.0,
            avg_latency_ms: 0.0,
            first_insert: None,
            last_arrival: None,
            underrun_since: None,
            received: 0,
            played: 0,
            lost: 0,
            dropped: 0,
            duplicates: 0,
            silence_inserted: 0,
        }
    }

    /// Number of buffered packets that satisfies the pre-roll target.
    fn preroll_packets(&self) -> usize {
        (self.target_ms / self.packet_interval_ms).ceil().max(1.0) as usize
    }

    /// Hard cap on resident packets derived from `max_ms`.
    fn max_packets(&self) -> usize {
        (self.config.max_ms as f64 / self.packet_interval_ms)
            .ceil()
            .max(1.0) as usize
    }

    /// Insert a packet received from the network.
    pub fn insert(&mut self, packet: AudioPacket) {
        self.received += 1;

        if self.started && packet.sequence < self.expected {
            // Already drained past this sequence.
            self.dropped += 1;
            tracing::trace!(sequence = packet.sequence, "late packet dropped");
            return;
        }
        if self.store.contains_key(&packet.sequence) {
            self.duplicates += 1;
            return;
        }

        self.update_jitter(&packet);
        self.highest = self.highest.max(packet.sequence);
        if self.first_insert.is_none() {
            self.first_insert = Some(packet.arrival);
        }
        self.store.insert(packet.sequence, packet);

        while self.store.len() > self.max_packets() {
            // Oldest in playout order goes first.
            if let Some((seq, _)) = self.store.pop_first() {
                self.dropped += 1;
                tracing::trace!(sequence = seq, "evicted, buffer over max");
            }
        }

        if !self.ready && self.store.len() >= self.preroll_packets() {
            self.become_ready("pre-roll filled");
        }
    }

    fn update_jitter(&mut self, packet: &AudioPacket) {
        if let Some((prev_arrival, prev_timestamp)) = self.last_arrival {
            let arrival_delta = packet
                .arrival
                .saturating_duration_since(prev_arrival)
                .as_secs_f64()
                * 1000.0;
            let send_delta = packet.timestamp as f64 - prev_timestamp as f64;
            let jitter = (arrival_delta - send_delta).abs();
            self.avg_jitter_ms = 0.9 * self.avg_jitter_ms + 0.1 * jitter;
        }
        self.last_arrival = Some((packet.arrival, packet.timestamp));
    }

    fn become_ready(&mut self, reason: &str) {
        self.ready = true;
        self.underrun_since = None;
        self.started = true;
        // Resync to the oldest packet actually held: a mid-stream join or a
        // long outage should not be concealed as one silence per sequence.
        // Stored keys are never below `expected`, so this only moves forward.
        if !self.store.contains_key(&self.expected) {
            if let Some(first) = self.store.keys().next().copied() {
                self.expected = first;
            }
        }
        tracing::debug!(
            buffered = self.store.len(),
            target_ms = self.target_ms,
            "jitter buffer ready ({reason})"
        );
    }

    /// Take the next packet in playout order.
    ///
    /// Returns `None` while pre-rolling and on underrun. A missing sequence
    /// below the highest received one is concealed with a silence packet.
    pub fn drain(&mut self) -> Option<AudioPacket> {
        if !self.ready {
            // Timeout fallback: start with whatever arrived.
            match self.first_insert {
                Some(first)
                    if !self.store.is_empty()
                        && first.elapsed().as_millis() as u64
                            >= self.config.preroll_timeout_ms =>
                {
                    self.become_ready("pre-roll timeout")
                }
                _ => return None,
            }
        }

        if let Some(packet) = self.store.remove(&self.expected) {
            self.expected = self.expected.wrapping_add(1);
            self.played += 1;
            self.underrun_since = None;
            let latency = packet.arrival.elapsed().as_secs_f64() * 1000.0;
            self.avg_latency_ms = 0.9 * self.avg_latency_ms + 0.1 * latency;
            return Some(packet);
        }

        if self.expected < self.highest {
            // Gap below the highest received sequence: the packet is lost.
            let sequence = self.expected;
            self.expected = self.expected.wrapping_add(1);
            self.lost += 1;
            if !self.config.conceal_loss {
                return None;
            }
            self.silence_inserted += 1;
            tracing::trace!(sequence, "concealing lost packet with silence");
            return Some(AudioPacket {
                sequence,
                timestamp: 0,
                arrival: Instant::now(),
                samples: vec![0.0; self.silence_samples],
                sample_rate: self.sample_rate,
                channels: self.channels,
                valid: false,
            });
        }

        // Nothing to play: underrun. Persisting past the threshold forces a
        // fresh pre-roll.
        let since = *self.underrun_since.get_or_insert_with(Instant::now);
        if since.elapsed().as_millis() as u64 > self.config.underrun_ms {
            self.ready = false;
            self.first_insert = None;
            self.underrun_since = None;
            tracing::debug!("buffer underrun, re-entering pre-roll");
        }
        None
    }

    /// Periodic adaptation: raise the playout target under jitter, creep it
    /// back down when the network is calm. Steps are asymmetric to avoid
    /// oscillation.
    pub fn adapt(&mut self) {
        if self.avg_jitter_ms > self.config.jitter_threshold_ms {
            self.target_ms = (self.target_ms + 10.0).min(self.config.max_ms as f64);
        } else if self.avg_jitter_ms < self.config.jitter_threshold_ms / 2.0 {
            self.target_ms = (self.target_ms - 5.0).max(self.config.min_ms as f64);
        }
    }

    /// Drop all buffered audio and return to the pre-roll state.
    pub fn clear(&mut self) {
        self.store.clear();
        self.expected = 0;
        self.highest = 0;
        self.ready = false;
        self.started = false;
        self.first_insert = None;
        self.last_arrival = None;
        self.underrun_since = None;
        self.avg_jitter_ms = 0.0;
        self.avg_latency_ms = 0.0;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            buffered: self.store.len(),
            ready: self.ready,
            target_ms: self.target_ms,
            avg_jitter_ms: self.avg_jitter_ms,
            avg_latency_ms: self.avg_latency_ms,
            received: self.received,
            played: self.played,
            lost: self.lost,
            dropped: self.dropped,
            duplicates: self.duplicates,
            silence_inserted: self.silence_inserted,
        }
    }

    #[cfg(test)]
    fn set_avg_jitter(&mut self, value: f64) {
        self.avg_jitter_ms = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn test_audio_config() -> AudioConfig {
        // 256 frames at 48 kHz: 5.33 ms packets.
        AudioConfig::new(48000, 2, 256)
    }

    fn quick_preroll() -> JitterConfig {
        JitterConfig {
            target_ms: 10,
            min_ms: 5,
            max_ms: 200,
            ..JitterConfig::default()
        }
    }

    fn packet(sequence: u32) -> AudioPacket {
        AudioPacket {
            sequence,
            timestamp: sequence as u64 * 5,
            arrival: Instant::now(),
            samples: vec![0.25; 512],
            sample_rate: 48000,
            channels: 2,
            valid: true,
        }
    }

    fn buffer() -> JitterBuffer {
        JitterBuffer::new(&test_audio_config(), quick_preroll())
    }

    #[test]
    fn test_not_ready_before_preroll() {
        let mut jitter = buffer();
        jitter.insert(packet(0));
        assert!(!jitter.is_ready());
        assert!(jitter.drain().is_none());
    }

    #[test]
    fn test_in_order_drain() {
        let mut jitter = buffer();
        for seq in 0..8 {
            jitter.insert(packet(seq));
        }
        assert!(jitter.is_ready());
        for seq in 0..8 {
            let out = jitter.drain().expect("packet missing");
            assert_eq!(out.sequence, seq);
            assert!(out.valid);
        }
        assert_eq!(jitter.stats().played, 8);
        assert_eq!(jitter.stats().lost, 0);
    }

    #[test]
    fn test_reordered_insert_drains_in_order() {
        let mut jitter = buffer();
        for seq in [0u32, 2, 1, 3, 5, 4, 6, 7] {
            jitter.insert(packet(seq));
        }
        let drained: Vec<u32> = (0..8).map(|_| jitter.drain().unwrap().sequence).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
        assert_eq!(jitter.stats().silence_inserted, 0);
    }

    #[test]
    fn test_loss_concealed_with_single_silence() {
        let mut jitter = buffer();
        for seq in (0..8).filter(|&s| s != 4) {
            jitter.insert(packet(seq));
        }
        let mut sequences = Vec::new();
        for _ in 0..8 {
            let out = jitter.drain().unwrap();
            if !out.valid {
                assert_eq!(out.sequence, 4);
                assert!(out.samples.iter().all(|&s| s == 0.0));
                assert_eq!(out.samples.len(), 512);
            }
            sequences.push(out.sequence);
        }
        assert_eq!(sequences, (0..8).collect::<Vec<_>>());
        assert_eq!(jitter.stats().lost, 1);
        assert_eq!(jitter.stats().silence_inserted, 1);
    }

    #[test]
    fn test_duplicate_drained_once() {
        let mut jitter = buffer();
        for seq in 0..6 {
            jitter.insert(packet(seq));
        }
        jitter.insert(packet(3));
        assert_eq!(jitter.stats().duplicates, 1);

        let drained: Vec<u32> = (0..6).map(|_| jitter.drain().unwrap().sequence).collect();
        assert_eq!(drained, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_late_packet_dropped() {
        let mut jitter = buffer();
        for seq in 0..6 {
            jitter.insert(packet(seq));
        }
        for _ in 0..4 {
            jitter.drain().unwrap();
        }
        jitter.insert(packet(1));
        assert_eq!(jitter.stats().dropped, 1);

        // Remaining packets come out in order; 1 never reappears.
        assert_eq!(jitter.drain().unwrap().sequence, 4);
        assert_eq!(jitter.drain().unwrap().sequence, 5);
    }

    #[test]
    fn test_resident_size_bounded() {
        let mut jitter = buffer();
        let cap = jitter.max_packets();
        for seq in 0..200 {
            jitter.insert(packet(seq));
            assert!(jitter.len() <= cap);
        }
        assert!(jitter.stats().dropped > 0);
    }

    #[test]
    fn test_preroll_timeout_starts_with_partial_buffer() {
        let mut jitter = buffer();
        jitter.insert(packet(0));
        assert!(jitter.drain().is_none());
        sleep(Duration::from_millis(110));
        let out = jitter.drain().expect("timeout fallback did not fire");
        assert_eq!(out.sequence, 0);
    }

    #[test]
    fn test_underrun_forces_repreroll() {
        let mut jitter = buffer();
        for seq in 0..4 {
            jitter.insert(packet(seq));
        }
        for _ in 0..4 {
            jitter.drain().unwrap();
        }
        // Empty store, nothing newer: underrun begins.
        assert!(jitter.drain().is_none());
        sleep(Duration::from_millis(60));
        assert!(jitter.drain().is_none());
        assert!(!jitter.is_ready());
    }

    #[test]
    fn test_mid_stream_join_snaps_expected() {
        let mut jitter = buffer();
        for seq in 100..108 {
            jitter.insert(packet(seq));
        }
        assert_eq!(jitter.drain().unwrap().sequence, 100);
        assert_eq!(jitter.stats().silence_inserted, 0);
    }

    #[test]
    fn test_adaptation_raises_and_caps_target() {
        let mut jitter = buffer();
        jitter.set_avg_jitter(50.0);
        let mut previous = jitter.stats().target_ms;
        for _ in 0..40 {
            jitter.adapt();
            let current = jitter.stats().target_ms;
            assert!(current >= previous);
            assert!(current <= jitter.config.max_ms as f64);
            previous = current;
        }
        assert_eq!(previous, jitter.config.max_ms as f64);

        jitter.set_avg_jitter(0.0);
        for _ in 0..80 {
            jitter.adapt();
        }
        assert_eq!(jitter.stats().target_ms, jitter.config.min_ms as f64);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut jitter = buffer();
        for seq in 0..6 {
            jitter.insert(packet(seq));
        }
        jitter.drain().unwrap();
        jitter.clear();
        assert!(jitter.is_empty());
        assert!(!jitter.is_ready());
        assert!(jitter.drain().is_none());
    }
}
