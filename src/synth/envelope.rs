//! ADSR envelope
//!
//! Attack-Decay-Sustain-Release shapes are not stepped sample by sample; they
//! are written onto an `Automation` timeline as times and targets, and the
//! renderer evaluates that timeline against the audio clock.

use super::automation::Automation;

/// Level that exponential fades aim for (an exponential curve never reaches 0)
pub const SILENCE: f64 = 0.001;

/// Envelope stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    // Time parameters (in seconds)
    attack: f64,
    decay: f64,
    sustain: f64, // Level (0.0-1.0)
    release: f64,
}

impl Adsr {
    /// Build an envelope shape, clamping times to at least 1ms
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack: finite_or(attack, 0.01).max(0.001),
            decay: finite_or(decay, 0.1).max(0.001),
            sustain: finite_or(sustain, 0.8).clamp(0.0, 1.0),
            release: finite_or(release, 0.4).max(0.001),
        }
    }

    pub fn attack(&self) -> f64 {
        self.attack
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn sustain(&self) -> f64 {
        self.sustain
    }

    pub fn release(&self) -> f64 {
        self.release
    }

    /// Schedule 0 -> peak over attack, then peak -> sustain * peak over decay
    ///
    /// Returns the time the sustain level is reached.
    pub fn schedule_onset(&self, param: &mut Automation, start: f64, peak: f64) -> f64 {
        let attack_end = start + self.attack;
        let decay_end = attack_end + self.decay;

        param.set_value_at_time(0.0, start);
        param.linear_ramp_to_value_at_time(peak, attack_end);
        param.linear_ramp_to_value_at_time(self.sustain * peak, decay_end);
        decay_end
    }

    /// Schedule the release tail: jump to `from` at `at`, then fade out over
    /// the release time. Returns the time the tail ends.
    pub fn schedule_release(&self, param: &mut Automation, at: f64, from: f64) -> f64 {
        let end = at + self.release;
        param.set_value_at_time(from, at);
        param.exponential_ramp_to_value_at_time(SILENCE, end);
        end
    }

    /// Stage reached at `time` for a note started at `started`
    pub fn stage_at(&self, started: f64, released: Option<f64>, time: f64) -> EnvelopeStage {
        if time < started {
            return EnvelopeStage::Idle;
        }
        if released.is_some_and(|r| time >= r) {
            return EnvelopeStage::Release;
        }

        let elapsed = time - started;
        if elapsed < self.attack {
            EnvelopeStage::Attack
        } else if elapsed < self.attack + self.decay {
            EnvelopeStage::Decay
        } else {
            EnvelopeStage::Sustain
        }
    }
}

/// Cancel pending automation and fade out from the instantaneous level
///
/// Returns the time the fade ends.
pub fn schedule_fade_out(param: &mut Automation, now: f64, duration: f64) -> f64 {
    let current = param.value_at(now);
    param.cancel_scheduled_values(now);
    param.set_value_at_time(current, now);
    param.exponential_ramp_to_value_at_time(SILENCE, now + duration);
    now + duration
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
