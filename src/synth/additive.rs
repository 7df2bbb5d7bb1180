//! Additive synthesizer
//!
//! Sixteen sine partials that run continuously once the synth exists. Notes
//! are never retriggered: `play` and `stop` only fade the bus gain, and the
//! partials keep following their frequency and level targets underneath.

use super::automation::Smoothed;
use super::lfo::{LfoId, ModulationSource};
use super::BusFrame;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

/// Number of sine partials
pub const PARTIAL_COUNT: usize = 16;

const FREQUENCY_GLIDE: f64 = 0.01;
const GAIN_GLIDE: f64 = 0.02;
const BUS_GLIDE: f64 = 0.05;

/// Named frequency-ratio tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrequencyPreset {
    #[default]
    Harmonic,
    Odd,
    Organ,
    JustMajor,
    JustMinor,
    Fifths,
    Bell,
    Subharmonic,
}

impl FrequencyPreset {
    pub const ALL: [FrequencyPreset; 8] = [
        FrequencyPreset::Harmonic,
        FrequencyPreset::Odd,
        FrequencyPreset::Organ,
        FrequencyPreset::JustMajor,
        FrequencyPreset::JustMinor,
        FrequencyPreset::Fifths,
        FrequencyPreset::Bell,
        FrequencyPreset::Subharmonic,
    ];

    /// Partial frequency ratios relative to the base frequency
    pub fn ratios(self) -> [f64; PARTIAL_COUNT] {
        match self {
            FrequencyPreset::Harmonic => std::array::from_fn(|i| (i + 1) as f64),
            FrequencyPreset::Odd => std::array::from_fn(|i| (2 * i + 1) as f64),
            FrequencyPreset::Organ => [
                0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 12.0, 16.0, 20.0, 24.0, 32.0,
                64.0,
            ],
            FrequencyPreset::JustMajor => [
                1.0, 1.25, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 12.0, 16.0, 20.0, 24.0,
                32.0,
            ],
            FrequencyPreset::JustMinor => [
                1.0, 1.2, 1.5, 2.0, 2.4, 3.0, 4.0, 4.8, 6.0, 8.0, 9.6, 12.0, 16.0, 19.2, 24.0, 32.0,
            ],
            FrequencyPreset::Fifths => [
                1.0, 1.5, 2.25, 3.0, 3.375, 4.5, 6.0, 6.75, 9.0, 12.0, 13.5, 18.0, 24.0, 27.0,
                36.0, 48.0,
            ],
            FrequencyPreset::Bell => [
                1.0, 1.414, 2.0, 2.236, 2.828, 3.162, 3.606, 4.0, 4.472, 5.0, 5.657, 6.325, 7.07,
                8.0, 9.0, 10.0,
            ],
            FrequencyPreset::Subharmonic => [
                0.25, 0.333, 0.5, 0.667, 0.75, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 16.0,
                24.0, 32.0,
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrequencyPreset::Harmonic => "harmonic",
            FrequencyPreset::Odd => "odd",
            FrequencyPreset::Organ => "organ",
            FrequencyPreset::JustMajor => "just-major",
            FrequencyPreset::JustMinor => "just-minor",
            FrequencyPreset::Fifths => "fifths",
            FrequencyPreset::Bell => "bell",
            FrequencyPreset::Subharmonic => "subharmonic",
        }
    }
}

impl fmt::Display for FrequencyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrequencyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown frequency preset: {}", s))
    }
}

/// Named base pitches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchPreset {
    C1,
    C2,
    A2,
    C3,
    A3,
    C4,
    A4,
}

impl PitchPreset {
    pub const ALL: [PitchPreset; 7] = [
        PitchPreset::C1,
        PitchPreset::C2,
        PitchPreset::A2,
        PitchPreset::C3,
        PitchPreset::A3,
        PitchPreset::C4,
        PitchPreset::A4,
    ];

    pub fn frequency(self) -> f64 {
        match self {
            PitchPreset::C1 => 32.70,
            PitchPreset::C2 => 65.41,
            PitchPreset::A2 => 110.0,
            PitchPreset::C3 => 130.81,
            PitchPreset::A3 => 220.0,
            PitchPreset::C4 => 261.63,
            PitchPreset::A4 => 440.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchPreset::C1 => "C1",
            PitchPreset::C2 => "C2",
            PitchPreset::A2 => "A2",
            PitchPreset::C3 => "C3",
            PitchPreset::A3 => "A3",
            PitchPreset::C4 => "C4",
            PitchPreset::A4 => "A4",
        }
    }
}

impl FromStr for PitchPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown pitch preset: {}", s))
    }
}

/// Serializable synth state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditiveState {
    pub base_frequency: f64,
    pub frequency_preset: FrequencyPreset,
    pub harmonic_levels: Vec<f64>,
    pub mod_assignments: Vec<Option<LfoId>>,
    pub master_volume: f64,
    pub is_playing: bool,
    #[serde(default)]
    pub delay_send: f64,
    #[serde(default)]
    pub reverb_send: f64,
}

impl Default for AdditiveState {
    fn default() -> Self {
        AdditiveSynth::new(44100.0).state()
    }
}

struct Partial {
    /// Cycles, kept in [0, 1)
    phase: f64,
    frequency: Smoothed,
    gain: Smoothed,
}

/// 16-partial additive oscillator bank
pub struct AdditiveSynth {
    sample_rate: f64,
    base_frequency: f64,
    preset: FrequencyPreset,
    levels: [f64; PARTIAL_COUNT],
    mod_assignments: [Option<LfoId>; PARTIAL_COUNT],
    master_volume: f64,
    delay_send: f64,
    reverb_send: f64,
    playing: bool,
    bus: Smoothed,
    partials: [Partial; PARTIAL_COUNT],
}

impl AdditiveSynth {
    pub fn new(sample_rate: f64) -> Self {
        let base_frequency = PitchPreset::A2.frequency();
        let ratios = FrequencyPreset::Harmonic.ratios();
        let partials = std::array::from_fn(|i| Partial {
            phase: 0.0,
            frequency: Smoothed::new(base_frequency * ratios[i], FREQUENCY_GLIDE, sample_rate),
            gain: Smoothed::new(0.0, GAIN_GLIDE, sample_rate),
        });

        Self {
            sample_rate,
            base_frequency,
            preset: FrequencyPreset::Harmonic,
            levels: [0.0; PARTIAL_COUNT],
            mod_assignments: [None; PARTIAL_COUNT],
            master_volume: 0.5,
            delay_send: 0.3,
            reverb_send: 0.2,
            playing: false,
            bus: Smoothed::new(0.0, BUS_GLIDE, sample_rate),
            partials,
        }
    }

    fn update_frequencies(&mut self) {
        let ratios = self.preset.ratios();
        for (partial, ratio) in self.partials.iter_mut().zip(ratios) {
            partial.frequency.set_target(self.base_frequency * ratio);
        }
    }

    fn update_gain(&mut self, index: usize) {
        let target = self.levels[index] * self.master_volume;
        self.partials[index].gain.set_target(target);
    }

    pub fn set_base_frequency(&mut self, hz: f64) {
        if !(hz.is_finite() && hz > 0.0) {
            log::warn!("ignoring base frequency {}", hz);
            return;
        }
        self.base_frequency = hz;
        self.update_frequencies();
    }

    pub fn base_frequency(&self) -> f64 {
        self.base_frequency
    }

    pub fn set_pitch_preset(&mut self, preset: PitchPreset) {
        self.set_base_frequency(preset.frequency());
    }

    pub fn set_frequency_preset(&mut self, preset: FrequencyPreset) {
        self.preset = preset;
        self.update_frequencies();
    }

    pub fn frequency_preset(&self) -> FrequencyPreset {
        self.preset
    }

    /// Target frequency of partial `index`
    pub fn partial_frequency(&self, index: usize) -> Option<f64> {
        self.partials.get(index).map(|p| p.frequency.target())
    }

    /// Set one partial's level; out-of-range indices are ignored
    pub fn set_harmonic_level(&mut self, index: usize, level: f64) {
        if index >= PARTIAL_COUNT {
            return;
        }
        self.levels[index] = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.update_gain(index);
    }

    pub fn harmonic_level(&self, index: usize) -> Option<f64> {
        self.levels.get(index).copied()
    }

    /// Route an LFO to one partial's amplitude
    pub fn set_mod_assignment(&mut self, index: usize, lfo: Option<LfoId>) {
        if index >= PARTIAL_COUNT {
            return;
        }
        self.mod_assignments[index] = lfo;
        if lfo.is_none() {
            self.update_gain(index);
        }
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = if volume.is_finite() {
            volume.max(0.0)
        } else {
            0.0
        };
        for i in 0..PARTIAL_COUNT {
            self.update_gain(i);
        }
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    pub fn set_delay_send(&mut self, level: f64) {
        self.delay_send = clamp_unit(level);
    }

    pub fn set_reverb_send(&mut self, level: f64) {
        self.reverb_send = clamp_unit(level);
    }

    /// Descending 1/n spectrum, a sawtooth-like tone
    pub fn all_on(&mut self) {
        for i in 0..PARTIAL_COUNT {
            self.set_harmonic_level(i, 1.0 / (i + 1) as f64);
        }
    }

    pub fn all_off(&mut self) {
        for i in 0..PARTIAL_COUNT {
            self.set_harmonic_level(i, 0.0);
        }
    }

    /// Push modulated levels for partials with an LFO assigned
    pub fn apply_modulation(&mut self, lfos: &impl ModulationSource) {
        for i in 0..PARTIAL_COUNT {
            if let Some(value) = lfos.modulation(self.mod_assignments[i]) {
                let level = (self.levels[i] * (1.0 + value)).max(0.0);
                self.partials[i].gain.set_target(level * self.master_volume);
            }
        }
    }

    /// Fade the bus in
    pub fn play(&mut self) {
        self.playing = true;
        self.bus.set_target(1.0);
    }

    /// Fade the bus out; partials keep running
    pub fn stop(&mut self) {
        self.playing = false;
        self.bus.set_target(0.0);
    }

    /// Flip between playing and stopped, returning the new state
    pub fn toggle(&mut self) -> bool {
        if self.playing {
            self.stop();
        } else {
            self.play();
        }
        self.playing
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Render one frame
    pub fn render(&mut self) -> BusFrame {
        let nyquist = self.sample_rate * 0.5;
        let mut sum = 0.0;
        for partial in &mut self.partials {
            let frequency = partial.frequency.next();
            let gain = partial.gain.next();
            if frequency >= nyquist {
                continue;
            }
            sum += (partial.phase * TAU).sin() * gain;
            partial.phase = (partial.phase + frequency / self.sample_rate).fract();
        }

        let out = sum * self.bus.next();
        let delay = out * self.delay_send;
        let reverb = out * self.reverb_send;
        BusFrame {
            dry: [out, out],
            delay: [delay, delay],
            reverb: [reverb, reverb],
        }
    }

    pub fn state(&self) -> AdditiveState {
        AdditiveState {
            base_frequency: self.base_frequency,
            frequency_preset: self.preset,
            harmonic_levels: self.levels.to_vec(),
            mod_assignments: self.mod_assignments.to_vec(),
            master_volume: self.master_volume,
            is_playing: self.playing,
            delay_send: self.delay_send,
            reverb_send: self.reverb_send,
        }
    }

    pub fn set_state(&mut self, state: &AdditiveState) {
        self.base_frequency = if state.base_frequency.is_finite() && state.base_frequency > 0.0 {
            state.base_frequency
        } else {
            self.base_frequency
        };
        self.preset = state.frequency_preset;
        self.master_volume = state.master_volume.max(0.0);
        self.delay_send = clamp_unit(state.delay_send);
        self.reverb_send = clamp_unit(state.reverb_send);

        // Partials missing from the snapshot are silent and unmodulated
        self.levels = [0.0; PARTIAL_COUNT];
        self.mod_assignments = [None; PARTIAL_COUNT];
        for (i, &level) in state.harmonic_levels.iter().enumerate() {
            self.set_harmonic_level(i, level);
        }
        for (i, &lfo) in state.mod_assignments.iter().take(PARTIAL_COUNT).enumerate() {
            self.mod_assignments[i] = lfo;
        }
        for i in 0..PARTIAL_COUNT {
            self.update_gain(i);
        }
        self.update_frequencies();

        if state.is_playing {
            self.play();
        } else {
            self.stop();
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
