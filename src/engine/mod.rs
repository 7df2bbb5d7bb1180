//! Audio engine for polyslot
//!
//! Owns every sound source, the LFO bank, the master bus and the recorder.
//! Control ticks are interleaved with audio rendering by the `ControlClock`,
//! so all state changes happen on the thread that renders.

mod clock;
pub mod effects;
mod mixer;
mod player;
mod recorder;

pub use clock::ControlClock;
pub use effects::{EffectTarget, EffectsBus, EffectsParams};
pub use mixer::{Limiter, Mixer};
pub use player::{default_device_name, list_output_devices, Player};
pub use recorder::{encode_wav, Recorder, RecordingTap, DEFAULT_BLOCK_SIZE};

use crate::config::{EngineConfig, ProjectState};
use crate::error::{EngineError, EngineResult};
use crate::synth::{
    AdditiveSynth, LfoBank, LfoId, LfoShape, ModTarget, SampleLibrary, Voice,
    VoiceSettingsPatch,
};

/// Most sampler slots an engine will hold
pub const MAX_SLOTS: usize = 16;

/// Longest control step the LFOs will integrate at fast control rates
const MAX_TICK: f64 = 0.1;

/// Keeps the reverb's noise stream apart from the LFOs'
const REVERB_SEED_SALT: u64 = 0x5EED_0F_EC40;

/// The main audio engine
pub struct Engine {
    config: EngineConfig,
    sample_rate: f64,
    initialized: bool,
    clock: ControlClock,
    lfos: LfoBank,
    voices: Vec<Voice>,
    synth: AdditiveSynth,
    mixer: Mixer,
    recorder: Recorder,
    tap: RecordingTap,
    library: SampleLibrary,
    next_slot_id: usize,
}

impl Engine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        let sample_rate = config.audio.sample_rate as f64;
        let slots = config.slots.min(MAX_SLOTS);
        let voices = (1..=slots).map(|id| Voice::new(id, sample_rate)).collect();

        Self {
            clock: ControlClock::new(sample_rate, config.audio.control_rate),
            lfos: LfoBank::new(config.seed),
            voices,
            synth: AdditiveSynth::new(sample_rate),
            mixer: Mixer::new(
                sample_rate,
                config.master.volume,
                config.seed ^ REVERB_SEED_SALT,
            ),
            recorder: Recorder::new(),
            tap: RecordingTap::new(config.recorder.block_size),
            library: SampleLibrary::new(),
            next_slot_id: slots + 1,
            sample_rate,
            initialized: false,
            config,
        }
    }

    /// Bring up the audio pipeline; until then triggers are ignored and
    /// rendering produces silence
    pub fn init(&mut self) {
        if !self.initialized {
            self.initialized = true;
            log::info!(
                "engine initialized at {} Hz with {} slots",
                self.sample_rate,
                self.voices.len()
            );
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the sample rate
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Current audio time in seconds
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn lfos(&self) -> &LfoBank {
        &self.lfos
    }

    pub fn lfos_mut(&mut self) -> &mut LfoBank {
        &mut self.lfos
    }

    pub fn set_lfo_params(&mut self, id: LfoId, frequency: Option<f64>, shape: Option<LfoShape>) {
        self.lfos.set_params(id, frequency, shape);
    }

    pub fn synth(&self) -> &AdditiveSynth {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut AdditiveSynth {
        &mut self.synth
    }

    pub fn effects(&self) -> &EffectsBus {
        self.mixer.effects()
    }

    pub fn effects_mut(&mut self) -> &mut EffectsBus {
        self.mixer.effects_mut()
    }

    pub fn master_volume(&self) -> f64 {
        self.mixer.master_volume()
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        self.mixer.set_master_volume(volume);
    }

    pub fn library(&self) -> &SampleLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut SampleLibrary {
        &mut self.library
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice(&self, slot_id: usize) -> Option<&Voice> {
        self.voices.iter().find(|v| v.slot_id() == slot_id)
    }

    pub fn voice_mut(&mut self, slot_id: usize) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|v| v.slot_id() == slot_id)
    }

    fn slot_mut(&mut self, slot_id: usize) -> EngineResult<&mut Voice> {
        self.voice_mut(slot_id)
            .ok_or(EngineError::UnknownSlot(slot_id))
    }

    /// Add an empty slot; returns its id, or None when every slot is taken
    pub fn add_slot(&mut self) -> Option<usize> {
        if self.voices.len() >= MAX_SLOTS {
            log::warn!("cannot add slot: all {} slots in use", MAX_SLOTS);
            return None;
        }
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        self.voices.push(Voice::new(id, self.sample_rate));
        log::debug!("added slot {}", id);
        Some(id)
    }

    pub fn remove_slot(&mut self, slot_id: usize) -> EngineResult<()> {
        let index = self
            .voices
            .iter()
            .position(|v| v.slot_id() == slot_id)
            .ok_or(EngineError::UnknownSlot(slot_id))?;
        self.voices.remove(index);
        log::debug!("removed slot {}", slot_id);
        Ok(())
    }

    /// Point a slot at a sample already in the library
    pub fn load_sample(&mut self, slot_id: usize, key: &str) -> EngineResult<()> {
        let buffer = self
            .library
            .get(key)
            .ok_or_else(|| EngineError::InvalidSample(format!("{:?} is not loaded", key)))?;
        self.slot_mut(slot_id)?.set_sample(key, buffer);
        Ok(())
    }

    /// Start playback on a slot; Ok(false) if nothing could be played
    pub fn trigger(&mut self, slot_id: usize) -> EngineResult<bool> {
        let now = self.now();
        let initialized = self.initialized;
        let voice = self.slot_mut(slot_id)?;
        if !initialized {
            log::debug!("slot {}: trigger before init ignored", slot_id);
            return Ok(false);
        }
        Ok(voice.trigger(now))
    }

    pub fn stop(&mut self, slot_id: usize) -> EngineResult<()> {
        let now = self.now();
        self.slot_mut(slot_id)?.stop(now);
        Ok(())
    }

    pub fn stop_all(&mut self) {
        let now = self.now();
        for voice in &mut self.voices {
            voice.stop(now);
        }
        self.synth.stop();
    }

    pub fn update_settings(&mut self, slot_id: usize, patch: &VoiceSettingsPatch) -> EngineResult<()> {
        let voice = self
            .voices
            .iter_mut()
            .find(|v| v.slot_id() == slot_id)
            .ok_or(EngineError::UnknownSlot(slot_id))?;
        voice.update_settings(patch, &self.lfos);
        Ok(())
    }

    pub fn set_modulation(
        &mut self,
        slot_id: usize,
        target: ModTarget,
        lfo: Option<LfoId>,
        depth: Option<f64>,
    ) -> EngineResult<()> {
        let voice = self
            .voices
            .iter_mut()
            .find(|v| v.slot_id() == slot_id)
            .ok_or(EngineError::UnknownSlot(slot_id))?;
        voice.set_modulation(target, lfo, depth, &self.lfos);
        Ok(())
    }

    pub fn set_mute(&mut self, slot_id: usize, muted: bool) -> EngineResult<()> {
        self.slot_mut(slot_id)?.set_mute(muted);
        Ok(())
    }

    /// One control tick: LFOs, then voices, then the synth, then effects,
    /// then due cleanups
    ///
    /// Steps longer than two tick intervals (or 0.1s, whichever is larger)
    /// are treated as stalls and do not advance the LFOs.
    pub fn tick(&mut self, dt: f64) {
        let interval = self.clock.tick_interval() as f64 / self.sample_rate;
        let max_step = MAX_TICK.max(2.0 * interval);
        if dt > 0.0 && dt < max_step {
            self.lfos.update(dt);
        } else {
            log::trace!("skipping LFO step of {:.4}s", dt);
        }

        for voice in &mut self.voices {
            if voice.has_modulation() {
                voice.apply_realtime_params(&self.lfos);
            }
        }
        self.synth.apply_modulation(&self.lfos);
        self.mixer.effects_mut().apply_modulation(&self.lfos);

        let now = self.clock.now();
        for voice in &mut self.voices {
            voice.poll(now);
        }
    }

    /// Render one stereo frame and advance audio time
    pub fn render_frame(&mut self) -> [f64; 2] {
        let now = self.clock.now();
        let mut bus = self.synth.render();
        for voice in &mut self.voices {
            bus.add(&voice.render(now));
        }
        let frame = self.mixer.mix(&bus);

        if self.recorder.is_recording() && self.tap.push(frame) {
            self.tap.flush_into(&mut self.recorder);
        }
        self.clock.advance(1);
        frame
    }

    /// Fill an interleaved output buffer, running control ticks as they fall due
    pub fn process_interleaved(&mut self, output: &mut [f32], channels: usize) {
        if !self.initialized || channels == 0 {
            output.fill(0.0);
            return;
        }

        for frame in output.chunks_mut(channels) {
            if let Some(dt) = self.clock.poll_tick() {
                self.tick(dt);
            }
            let [left, right] = self.render_frame();
            match frame {
                [mono] => *mono = ((left + right) * 0.5) as f32,
                [l, r, rest @ ..] => {
                    *l = left as f32;
                    *r = right as f32;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
    }

    pub fn start_recording(&mut self) -> EngineResult<()> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.tap.clear();
        self.recorder.start(self.sample_rate as u32)
    }

    /// Finish recording; the pending partial block is included
    pub fn stop_recording(&mut self) -> EngineResult<&[u8]> {
        self.tap.flush_into(&mut self.recorder);
        self.recorder.stop()
    }

    pub fn recording_bytes(&self) -> Option<&[u8]> {
        self.recorder.bytes()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Snapshot everything a project file persists
    pub fn export_project(&self) -> ProjectState {
        ProjectState {
            master_volume: self.mixer.master_volume(),
            lfos: self.lfos.states(),
            effects: self.mixer.effects().params(),
            additive_synth: self.synth.state(),
            slots: self.voices.iter().map(Voice::snapshot).collect(),
        }
    }

    /// Replace engine state with a project snapshot
    ///
    /// Slots are rebuilt from the snapshot; sample keys resolve against the
    /// current library.
    pub fn import_project(&mut self, project: &ProjectState) -> EngineResult<()> {
        let now = self.now();
        self.mixer.set_master_volume(project.master_volume);
        self.lfos.apply_states(&project.lfos);
        self.mixer.effects_mut().set_params(project.effects);
        self.synth.set_state(&project.additive_synth);

        if project.slots.len() > MAX_SLOTS {
            log::warn!(
                "project has {} slots, keeping the first {}",
                project.slots.len(),
                MAX_SLOTS
            );
        }
        let voices: Vec<Voice> = project
            .slots
            .iter()
            .take(MAX_SLOTS)
            .map(|state| {
                let mut voice = Voice::new(state.slot_id, self.sample_rate);
                voice.restore(state, &self.library, now);
                voice
            })
            .collect();
        self.voices = voices;
        self.next_slot_id = self
            .voices
            .iter()
            .map(|v| v.slot_id() + 1)
            .max()
            .unwrap_or(1);

        log::info!("imported project with {} slots", self.voices.len());
        Ok(())
    }

    /// Sum of every source for one frame without touching the master bus
    #[cfg(test)]
    fn source_frame(&mut self) -> crate::synth::BusFrame {
        let now = self.clock.now();
        let mut bus = self.synth.render();
        for voice in &mut self.voices {
            bus.add(&voice.render(now));
        }
        bus
    }
}
