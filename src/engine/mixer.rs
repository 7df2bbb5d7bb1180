//! Master bus
//!
//! The Mixer takes the summed bus frames of every source and:
//! - runs the send buses through the shared effects
//! - adds the wet return to the dry sum
//! - applies the smoothed master gain
//! - passes the result through the safety limiter

use super::effects::EffectsBus;
use crate::synth::{BusFrame, Smoothed};

const MASTER_GLIDE: f64 = 0.05;

/// Converts linear amplitude to decibels
fn amp_to_db(amp: f64) -> f64 {
    20.0 * amp.abs().max(1e-10).log10()
}

/// Converts decibels to linear amplitude
fn db_to_amp(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Hard-knee peak limiter
pub struct Limiter {
    threshold_db: f64,
    ratio: f64,
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
}

impl Limiter {
    /// Threshold -1 dBFS, ratio 20:1, 3 ms attack, 100 ms release
    pub fn new(sample_rate: f64) -> Self {
        Self::with_params(-1.0, 20.0, 3.0, 100.0, sample_rate)
    }

    pub fn with_params(
        threshold_db: f64,
        ratio: f64,
        attack_ms: f64,
        release_ms: f64,
        sample_rate: f64,
    ) -> Self {
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            attack_coeff: (-1.0 / (attack_ms * 0.001 * sample_rate)).exp(),
            release_coeff: (-1.0 / (release_ms * 0.001 * sample_rate)).exp(),
            envelope: 0.0,
        }
    }

    /// Current gain reduction in dB (0 or negative)
    pub fn gain_db(&self) -> f64 {
        let envelope_db = amp_to_db(self.envelope);
        if envelope_db > self.threshold_db {
            -(envelope_db - self.threshold_db) * (1.0 - 1.0 / self.ratio)
        } else {
            0.0
        }
    }

    pub fn process(&mut self, frame: [f64; 2]) -> [f64; 2] {
        let level = frame[0].abs().max(frame[1].abs());
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

        let gain = db_to_amp(self.gain_db());
        [frame[0] * gain, frame[1] * gain]
    }
}

/// The master bus
pub struct Mixer {
    sample_rate: f64,
    effects: EffectsBus,
    master_volume: f64,
    master: Smoothed,
    limiter: Limiter,
}

impl Mixer {
    pub fn new(sample_rate: f64, master_volume: f64, seed: u64) -> Self {
        let volume = clamp_volume(master_volume);
        Self {
            sample_rate,
            effects: EffectsBus::new(sample_rate, seed),
            master_volume,
            master: Smoothed::new(volume, MASTER_GLIDE, sample_rate),
            limiter: Limiter::new(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Master volume as last set
    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = volume;
        self.master.set_target(clamp_volume(volume));
    }

    pub fn effects(&self) -> &EffectsBus {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectsBus {
        &mut self.effects
    }

    /// Mix one frame of summed source output down to the final stereo frame
    pub fn mix(&mut self, bus: &BusFrame) -> [f64; 2] {
        let wet = self.effects.process(bus.delay, bus.reverb);
        let gain = self.master.next();
        self.limiter.process([
            (bus.dry[0] + wet[0]) * gain,
            (bus.dry[1] + wet[1]) * gain,
        ])
    }
}

fn clamp_volume(volume: f64) -> f64 {
    if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((amp_to_db(1.0)).abs() < 1e-12);
        assert!((db_to_amp(-6.0) - 0.501).abs() < 0.001);
    }

    #[test]
    fn test_limiter_passes_quiet_signal() {
        let mut limiter = Limiter::new(44100.0);
        for i in 0..4410 {
            let x = 0.5 * (i as f64 * 0.05).sin();
            let out = limiter.process([x, -x]);
            assert_eq!(out, [x, -x]);
        }
    }

    #[test]
    fn test_limiter_reduces_loud_signal() {
        let mut limiter = Limiter::new(44100.0);
        let mut last = [0.0; 2];
        for _ in 0..44100 {
            last = limiter.process([4.0, 4.0]);
        }
        // 12 dB over threshold at 20:1 leaves about 0.6 dB above it
        let threshold = db_to_amp(-1.0);
        assert!(last[0] < threshold * 1.1, "{}", last[0]);
        assert!(last[0] > threshold);
        assert!(limiter.gain_db() < -11.0);
    }

    #[test]
    fn test_limiter_releases() {
        let mut limiter = Limiter::new(1000.0);
        for _ in 0..1000 {
            limiter.process([2.0, 0.0]);
        }
        for _ in 0..2000 {
            limiter.process([0.0, 0.0]);
        }
        assert_eq!(limiter.gain_db(), 0.0);
    }

    #[test]
    fn test_mixer_applies_master_gain() {
        let mut mixer = Mixer::new(1000.0, 0.5, 1);
        let bus = BusFrame {
            dry: [0.4, -0.2],
            ..BusFrame::default()
        };
        let out = mixer.mix(&bus);
        assert!((out[0] - 0.2).abs() < 1e-12);
        assert!((out[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_master_volume_glides() {
        let mut mixer = Mixer::new(1000.0, 1.0, 1);
        mixer.set_master_volume(0.0);
        assert_eq!(mixer.master_volume(), 0.0);

        let bus = BusFrame {
            dry: [0.5, 0.5],
            ..BusFrame::default()
        };
        let first = mixer.mix(&bus);
        assert!(first[0] > 0.4);
        for _ in 0..1000 {
            mixer.mix(&bus);
        }
        assert!(mixer.mix(&bus)[0] < 1e-6);
    }

    #[test]
    fn test_master_volume_is_clamped_at_use() {
        let mut mixer = Mixer::new(1000.0, 3.0, 1);
        assert_eq!(mixer.master_volume(), 3.0);
        let out = mixer.mix(&BusFrame {
            dry: [0.1, 0.1],
            ..BusFrame::default()
        });
        assert!((out[0] - 0.1).abs() < 1e-12);
        mixer.set_master_volume(f64::NAN);
        assert!(mixer.master.target() == 0.0);
    }
}
