//! Sound sources and their building blocks
//!
//! Contains the LFO bank, parameter automation, envelopes, filters, decoded
//! sample buffers, the sampler voice and the additive synth.

mod additive;
mod automation;
mod envelope;
mod filter;
mod lfo;
mod sample;
mod voice;

pub use additive::{AdditiveState, AdditiveSynth, FrequencyPreset, PitchPreset, PARTIAL_COUNT};
pub use automation::{Automation, Smoothed};
pub use envelope::{schedule_fade_out, Adsr, EnvelopeStage, SILENCE};
pub use filter::{Filter, FilterType};
pub use lfo::{Lfo, LfoBank, LfoId, LfoShape, LfoState, ModulationSource, LFO_COUNT};
pub use sample::{BufferId, SampleBuffer, SampleLibrary};
pub use voice::{
    CleanupHandle, InstanceId, LoopWindow, ModTarget, ModTargets, ModulatedParams, Region,
    SlotState, Voice, VoiceSettings, VoiceSettingsPatch,
};

/// One output frame of a sound source, split across the mixer's buses
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BusFrame {
    /// Straight to the master bus
    pub dry: [f64; 2],
    /// Into the shared delay
    pub delay: [f64; 2],
    /// Into the shared reverb
    pub reverb: [f64; 2],
}

impl BusFrame {
    /// Sum another source's frame into this one
    pub fn add(&mut self, other: &BusFrame) {
        for ch in 0..2 {
            self.dry[ch] += other.dry[ch];
            self.delay[ch] += other.delay[ch];
            self.reverb[ch] += other.reverb[ch];
        }
    }

    pub fn is_silent(&self) -> bool {
        self.dry == [0.0; 2] && self.delay == [0.0; 2] && self.reverb == [0.0; 2]
    }
}
