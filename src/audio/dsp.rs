//! Optional voice-processing chain for the render path
//!
//! Stages run in a fixed order: noise gate, presence EQ, compressor,
//! de-esser. Each stage keeps at most one sample of state and every IIR
//! coefficient stays inside the unit circle. The chain sits between the
//! jitter drain and the sample ring, never inside the device callback.

/// Final limiter applied in the output callback after volume scaling.
///
/// Transparent below 0.95, then a tanh knee that never reaches 1.0.
pub fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= 0.95 {
        x
    } else {
        let knee = 0.95 + 0.05 * ((magnitude - 0.95) / 0.05).tanh();
        knee.copysign(x)
    }
}

/// Attenuates samples below the threshold to suppress idle noise.
struct NoiseGate {
    threshold: f32,
    ratio: f32,
}

impl NoiseGate {
    fn process(&self, samples: &mut [f32]) {
        for sample in samples {
            if sample.abs() < self.threshold {
                *sample *= self.ratio;
            }
        }
    }
}

/// First-order high-pass, mild mid boost, first-order low-pass.
struct PresenceEq {
    hp_coeff: f32,
    lp_coeff: f32,
    boost: f32,
    hp_x1: f32,
    hp_y1: f32,
    lp_y1: f32,
}

impl PresenceEq {
    fn new(sample_rate: u32) -> Self {
        let rate = sample_rate.max(8000) as f32;
        // One-pole coefficients for ~200 Hz and ~4 kHz corners.
        let hp_coeff = (-2.0 * std::f32::consts::PI * 200.0 / rate).exp();
        let lp_coeff = (-2.0 * std::f32::consts::PI * 4000.0 / rate).exp();
        Self {
            hp_coeff,
            lp_coeff,
            boost: 1.2,
            hp_x1: 0.0,
            hp_y1: 0.0,
            lp_y1: 0.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let x = *sample;
            let hp = self.hp_coeff * (self.hp_y1 + x - self.hp_x1);
            self.hp_x1 = x;
            self.hp_y1 = hp;

            let boosted = hp * self.boost;
            self.lp_y1 = self.lp_coeff * self.lp_y1 + (1.0 - self.lp_coeff) * boosted;
            *sample = self.lp_y1;
        }
    }
}

/// Hard-knee compressor above the threshold.
struct Compressor {
    threshold: f32,
    /// Gain applied to the excess; 0.25 is a 4:1 ratio.
    ratio: f32,
}

impl Compressor {
    fn process(&self, samples: &mut [f32]) {
        for sample in samples {
            let magnitude = sample.abs();
            if magnitude > self.threshold {
                let compressed = self.threshold + (magnitude - self.threshold) * self.ratio;
                *sample = compressed.copysign(*sample);
            }
        }
    }
}

/// Tames sharp sibilant transients by watching the sample derivative.
struct DeEsser {
    last: f32,
}

impl DeEsser {
    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let derivative = *sample - self.last;
            if derivative.abs() > 0.1 && sample.abs() > 0.2 {
                *sample *= 0.7;
            }
            self.last = *sample;
        }
    }
}

/// The full voice chain. Construct once per stream; stateful.
pub struct DspChain {
    gate: NoiseGate,
    eq: PresenceEq,
    compressor: Compressor,
    de_esser: DeEsser,
}

impl DspChain {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            gate: NoiseGate {
                threshold: 0.005,
                ratio: 0.05,
            },
            eq: PresenceEq::new(sample_rate),
            compressor: Compressor {
                threshold: 0.3,
                ratio: 0.25,
            },
            de_esser: DeEsser { last: 0.0 },
        }
    }

    /// Process one block in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        self.gate.process(samples);
        self.eq.process(samples);
        self.compressor.process(samples);
        self.de_esser.process(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_soft_clip_transparent_below_knee() {
        for x in [-0.9, -0.5, 0.0, 0.3, 0.95] {
            assert_eq!(soft_clip(x), x);
        }
    }

    #[test]
    fn test_soft_clip_bounded() {
        for x in [0.96, 1.0, 2.0, 10.0, -3.0] {
            let y = soft_clip(x);
            assert!(y.abs() < 1.0, "{x} clipped to {y}");
            assert_eq!(y.signum(), x.signum());
        }
        // Monotonic through the knee.
        assert!(soft_clip(1.5) > soft_clip(1.0));
    }

    #[test]
    fn test_gate_suppresses_idle_noise() {
        let mut chain = DspChain::new(48000);
        let mut noise = vec![0.002f32; 2048];
        chain.process(&mut noise);
        assert!(rms(&noise) < 0.001);
    }

    #[test]
    fn test_near_unity_gain_at_speech_level() {
        let mut chain = DspChain::new(48000);
        let input = sine(1000.0, 0.15, 48000.0, 9600);
        let mut output = input.clone();
        chain.process(&mut output);

        // Settle past the filter transient before measuring.
        let input_rms = rms(&input[960..]);
        let output_rms = rms(&output[960..]);
        let gain = output_rms / input_rms;
        assert!((0.5..=2.0).contains(&gain), "gain {gain}");
    }

    #[test]
    fn test_compressor_tames_peaks() {
        let mut chain = DspChain::new(48000);
        let mut loud = sine(440.0, 0.9, 48000.0, 4800);
        chain.process(&mut loud);
        let peak = loud.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak < 0.9);
    }

    #[test]
    fn test_chain_is_stable() {
        let mut chain = DspChain::new(48000);
        // An impulse followed by silence must decay, not ring up.
        let mut samples = vec![0.0f32; 48000];
        samples[0] = 1.0;
        chain.process(&mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
        let tail = rms(&samples[40000..]);
        assert!(tail < 1e-3, "tail rms {tail}");
    }
}
