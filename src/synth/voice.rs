//! Sampler voice
//!
//! A `Voice` is one slot of the rack. It owns a decoded buffer, the slot's
//! settings and at most one live `PlaybackInstance`. Each instance carries its
//! whole signal chain (source, filter, panner, sends, envelope, level, mute),
//! so replacing the instance replaces every node at once.
//!
//! Cleanups are deferred: stopping or finishing a one-shot schedules a
//! `CleanupHandle` that tears the instance down later. A voice holds at most
//! one pending handle, and a handle only ever tears down the instance it was
//! issued for.

use super::automation::{Automation, Smoothed};
use super::envelope::{schedule_fade_out, Adsr, EnvelopeStage};
use super::filter::{Filter, FilterType};
use super::lfo::{LfoId, ModulationSource};
use super::sample::{BufferId, SampleBuffer, SampleLibrary};
use super::BusFrame;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

/// Time constant for modulated parameter glides (seconds)
const PARAM_GLIDE: f64 = 0.05;
/// Longest fade a manual stop may take
const MAX_STOP_RELEASE: f64 = 0.5;
/// Delay between the end of a one-shot tail and its cleanup
const ONE_SHOT_CLEANUP_DELAY: f64 = 0.2;
/// Delay between the end of a stop fade and its cleanup
const STOP_CLEANUP_DELAY: f64 = 0.1;
/// Shortest region a trigger will play (seconds)
const MIN_REGION: f64 = 0.01;
/// Octaves of cutoff sweep at full modulation
const CUTOFF_OCTAVES: f64 = 8.0;
/// Frames between filter coefficient updates
const FILTER_UPDATE_INTERVAL: u32 = 16;
const PITCH_MIN: f64 = 0.01;
const PITCH_MAX: f64 = 16.0;
const CUTOFF_MIN: f64 = 20.0;
const CUTOFF_MAX: f64 = 20000.0;

/// A parameter that can be driven by an LFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModTarget {
    Pitch,
    Cutoff,
    Volume,
    Pan,
    LoopStart,
    DelaySend,
    ReverbSend,
}

impl ModTarget {
    pub const ALL: [ModTarget; 7] = [
        ModTarget::Pitch,
        ModTarget::Cutoff,
        ModTarget::Volume,
        ModTarget::Pan,
        ModTarget::LoopStart,
        ModTarget::DelaySend,
        ModTarget::ReverbSend,
    ];
}

/// One value per modulation target
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModTargets<T> {
    pub pitch: T,
    pub cutoff: T,
    pub volume: T,
    pub pan: T,
    pub loop_start: T,
    pub delay_send: T,
    pub reverb_send: T,
}

impl<T: Copy> ModTargets<T> {
    /// Same value for every target
    pub fn splat(value: T) -> Self {
        Self {
            pitch: value,
            cutoff: value,
            volume: value,
            pan: value,
            loop_start: value,
            delay_send: value,
            reverb_send: value,
        }
    }
}

impl<T> ModTargets<T> {
    pub fn get(&self, target: ModTarget) -> &T {
        match target {
            ModTarget::Pitch => &self.pitch,
            ModTarget::Cutoff => &self.cutoff,
            ModTarget::Volume => &self.volume,
            ModTarget::Pan => &self.pan,
            ModTarget::LoopStart => &self.loop_start,
            ModTarget::DelaySend => &self.delay_send,
            ModTarget::ReverbSend => &self.reverb_send,
        }
    }

    pub fn get_mut(&mut self, target: ModTarget) -> &mut T {
        match target {
            ModTarget::Pitch => &mut self.pitch,
            ModTarget::Cutoff => &mut self.cutoff,
            ModTarget::Volume => &mut self.volume,
            ModTarget::Pan => &mut self.pan,
            ModTarget::LoopStart => &mut self.loop_start,
            ModTarget::DelaySend => &mut self.delay_send,
            ModTarget::ReverbSend => &mut self.reverb_send,
        }
    }
}

impl ModTargets<Option<LfoId>> {
    /// True if any target has an LFO assigned
    pub fn any(&self) -> bool {
        ModTarget::ALL.iter().any(|&t| self.get(t).is_some())
    }
}

/// Per-slot settings, stored as given and clamped where they are used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceSettings {
    /// Playback-rate multiplier
    pub pitch: f64,
    /// Filter cutoff in Hz
    pub cutoff: f64,
    /// Filter Q
    pub res: f64,
    pub filter_type: FilterType,
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    pub reverse: bool,
    pub pan: f64,
    pub volume: f64,
    pub delay_send: f64,
    pub reverb_send: f64,
    /// Loop bounds as fractions of the buffer duration
    pub loop_start: f64,
    pub loop_end: f64,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub mod_assignments: ModTargets<Option<LfoId>>,
    pub modulation_depths: ModTargets<f64>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            cutoff: 20000.0,
            res: 1.0,
            filter_type: FilterType::LowPass,
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.4,
            reverse: false,
            pan: 0.0,
            volume: 0.8,
            delay_send: 0.0,
            reverb_send: 0.0,
            loop_start: 0.0,
            loop_end: 1.0,
            looping: true,
            mod_assignments: ModTargets::default(),
            modulation_depths: ModTargets::splat(0.5),
        }
    }
}

/// Partial settings update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceSettingsPatch {
    pub pitch: Option<f64>,
    pub cutoff: Option<f64>,
    pub res: Option<f64>,
    pub filter_type: Option<FilterType>,
    pub attack: Option<f64>,
    pub decay: Option<f64>,
    pub sustain: Option<f64>,
    pub release: Option<f64>,
    pub reverse: Option<bool>,
    pub pan: Option<f64>,
    pub volume: Option<f64>,
    pub delay_send: Option<f64>,
    pub reverb_send: Option<f64>,
    pub loop_start: Option<f64>,
    pub loop_end: Option<f64>,
    #[serde(rename = "loop")]
    pub looping: Option<bool>,
    pub mod_assignments: Option<ModTargets<Option<LfoId>>>,
    pub modulation_depths: Option<ModTargets<f64>>,
}

macro_rules! merge_fields {
    ($dst:expr, $src:expr, $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $src.$field {
                $dst.$field = value;
            }
        )*
    };
}

/// Parameter values after modulation, ready for the signal chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulatedParams {
    pub pitch: f64,
    pub cutoff: f64,
    pub volume: f64,
    pub pan: f64,
    pub delay_send: f64,
    pub reverb_send: f64,
    /// Loop window offset as a fraction of the buffer duration
    pub loop_shift: f64,
}

impl VoiceSettings {
    /// Merge a partial update
    pub fn apply(&mut self, patch: &VoiceSettingsPatch) {
        merge_fields!(
            self,
            patch,
            pitch,
            cutoff,
            res,
            filter_type,
            attack,
            decay,
            sustain,
            release,
            reverse,
            pan,
            volume,
            delay_send,
            reverb_send,
            loop_start,
            loop_end,
            looping,
            mod_assignments,
            modulation_depths,
        );
    }

    pub fn adsr(&self) -> Adsr {
        Adsr::new(self.attack, self.decay, self.sustain, self.release)
    }

    /// Unmodulated pitch, clamped to the playable range
    pub fn base_pitch(&self) -> f64 {
        clamp_finite(self.pitch, PITCH_MIN, PITCH_MAX, 1.0)
    }

    /// Current values with each assigned LFO applied at its depth
    pub fn modulated(&self, lfos: &impl ModulationSource) -> ModulatedParams {
        let amount = |target: ModTarget| {
            let depth = clamp_finite(*self.modulation_depths.get(target), 0.0, 1.0, 0.0);
            lfos.modulation(*self.mod_assignments.get(target))
                .map(|value| value * depth)
        };

        let mut pitch = self.base_pitch();
        if let Some(m) = amount(ModTarget::Pitch) {
            pitch *= 1.0 + m;
        }

        let mut cutoff = clamp_finite(self.cutoff, CUTOFF_MIN, CUTOFF_MAX, CUTOFF_MAX);
        if let Some(m) = amount(ModTarget::Cutoff) {
            cutoff *= 2f64.powf(m * CUTOFF_OCTAVES);
        }

        let mut volume = clamp_finite(self.volume, 0.0, f64::MAX, 0.0);
        if let Some(m) = amount(ModTarget::Volume) {
            volume *= (1.0 + m).max(0.0);
        }

        let offset = |target: ModTarget, base: f64| base + amount(target).unwrap_or(0.0);

        ModulatedParams {
            pitch: pitch.clamp(PITCH_MIN, PITCH_MAX),
            cutoff: cutoff.clamp(CUTOFF_MIN, CUTOFF_MAX),
            volume,
            pan: clamp_finite(offset(ModTarget::Pan, self.pan), -1.0, 1.0, 0.0),
            delay_send: clamp_finite(offset(ModTarget::DelaySend, self.delay_send), 0.0, 1.0, 0.0),
            reverb_send: clamp_finite(
                offset(ModTarget::ReverbSend, self.reverb_send),
                0.0,
                1.0,
                0.0,
            ),
            loop_shift: amount(ModTarget::LoopStart).unwrap_or(0.0),
        }
    }
}

fn clamp_finite(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Loop bounds in seconds of buffer time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopWindow {
    pub start: f64,
    pub end: f64,
}

impl LoopWindow {
    /// Build from fractional bounds, repairing inverted, degenerate or
    /// out-of-range values
    pub fn from_fractions(start: f64, end: f64, duration: f64) -> Self {
        let duration = duration.max(0.0);
        let mut a = clamp_finite(start, 0.0, 1.0, 0.0);
        let mut b = clamp_finite(end, 0.0, 1.0, 1.0);
        if b < a {
            std::mem::swap(&mut a, &mut b);
        }

        let length = ((b - a) * duration).max(MIN_REGION.min(duration));
        let start = (a * duration).min(duration - length);
        Self {
            start,
            end: (start + length).min(duration),
        }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Slide by `offset` seconds, keeping the length and staying inside the buffer
    pub fn shifted(self, offset: f64, duration: f64) -> Self {
        let length = self.length();
        let start = clamp_finite(
            self.start + offset,
            0.0,
            (duration - length).max(0.0),
            self.start,
        );
        Self {
            start,
            end: (start + length).min(duration),
        }
    }
}

/// Waveform region selected in the slot's editor, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start: f64,
    pub end: f64,
}

/// Serializable snapshot of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotState {
    pub slot_id: usize,
    #[serde(default)]
    pub sample_key: Option<String>,
    #[serde(default)]
    pub settings: VoiceSettings,
    #[serde(default)]
    pub region: Option<Region>,
}

/// Identity of one playback instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

/// A pending deferred cleanup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanupHandle {
    task: u64,
    instance: InstanceId,
    due: f64,
}

impl CleanupHandle {
    /// Time the cleanup fires
    pub fn due(&self) -> f64 {
        self.due
    }

    /// Instance the cleanup is aimed at
    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Nodes between the source and the mixer
struct SignalChain {
    filter: Filter,
    cutoff: Smoothed,
    resonance: Smoothed,
    pan: Smoothed,
    delay_send: Smoothed,
    reverb_send: Smoothed,
    /// Normalized ADSR, peak 1.0
    envelope: Automation,
    /// Volume, possibly modulated
    level: Smoothed,
    mute: Smoothed,
    filter_countdown: u32,
}

struct PlaybackInstance {
    id: InstanceId,
    buffer: Arc<SampleBuffer>,
    mono: bool,
    started: f64,
    /// Read position in buffer frames
    position: f64,
    rate: Smoothed,
    looping: bool,
    window: LoopWindow,
    /// One-shot end, seconds of buffer time
    play_until: Option<f64>,
    release_at: Option<f64>,
    stop_at: Option<f64>,
    source_ended: bool,
    chain: SignalChain,
}

impl PlaybackInstance {
    fn render(&mut self, now: f64, out_rate: f64) -> BusFrame {
        let rate = self.rate.next();
        let (left, right) = self.next_source_frame(now, rate, out_rate);

        let chain = &mut self.chain;
        let cutoff = chain.cutoff.next();
        let q = chain.resonance.next();
        if chain.filter_countdown == 0 {
            chain.filter.set_cutoff(cutoff);
            chain.filter.set_resonance(q);
            chain.filter_countdown = FILTER_UPDATE_INTERVAL;
        }
        chain.filter_countdown -= 1;

        let (left, right) = chain.filter.process_stereo(left, right);
        let (left, right) = equal_power_pan(left, right, chain.pan.next(), self.mono);

        // Sends tap after the panner and before the gain stages
        let delay = chain.delay_send.next();
        let reverb = chain.reverb_send.next();
        let gain = chain.envelope.value_at(now) * chain.level.next() * chain.mute.next();

        BusFrame {
            dry: [left * gain, right * gain],
            delay: [left * delay, right * delay],
            reverb: [left * reverb, right * reverb],
        }
    }

    fn next_source_frame(&mut self, now: f64, rate: f64, out_rate: f64) -> (f64, f64) {
        if self.source_ended || self.stop_at.is_some_and(|t| now >= t) {
            self.source_ended = true;
            return (0.0, 0.0);
        }

        let frame = self.buffer.frame_at(self.position);
        let buffer_rate = self.buffer.sample_rate() as f64;
        self.position += rate * buffer_rate / out_rate;

        if self.looping {
            let start = self.window.start * buffer_rate;
            let end = self.window.end * buffer_rate;
            let span = end - start;
            if span > 0.0 && self.position >= end {
                self.position = start + (self.position - end) % span;
            }
        } else if self
            .play_until
            .is_some_and(|t| self.position >= t * buffer_rate)
            || self.position >= self.buffer.frames() as f64
        {
            self.source_ended = true;
        }

        frame
    }
}

/// Equal-power stereo panner
///
/// Mono input is spread across both sides; stereo input keeps its image and
/// folds the far side into the near one as the pan moves away from centre.
fn equal_power_pan(left: f64, right: f64, pan: f64, mono: bool) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    if mono {
        let x = (pan + 1.0) * 0.5 * FRAC_PI_2;
        (left * x.cos(), left * x.sin())
    } else if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

/// One sampler slot
pub struct Voice {
    slot_id: usize,
    sample_rate: f64,
    settings: VoiceSettings,
    buffer: Option<Arc<SampleBuffer>>,
    /// Reversed copy, keyed by the buffer it was made from
    reversed: Option<(BufferId, Arc<SampleBuffer>)>,
    sample_key: Option<String>,
    region: Option<Region>,
    muted: bool,
    instance: Option<PlaybackInstance>,
    cleanup: Option<CleanupHandle>,
    next_instance: u64,
    next_task: u64,
}

impl Voice {
    pub fn new(slot_id: usize, sample_rate: f64) -> Self {
        Self {
            slot_id,
            sample_rate,
            settings: VoiceSettings::default(),
            buffer: None,
            reversed: None,
            sample_key: None,
            region: None,
            muted: false,
            instance: None,
            cleanup: None,
            next_instance: 1,
            next_task: 1,
        }
    }

    pub fn slot_id(&self) -> usize {
        self.slot_id
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn buffer(&self) -> Option<&Arc<SampleBuffer>> {
        self.buffer.as_ref()
    }

    pub fn sample_key(&self) -> Option<&str> {
        self.sample_key.as_deref()
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn set_region(&mut self, region: Option<Region>) {
        self.region = region;
    }

    /// Install a buffer without a library key
    pub fn set_buffer(&mut self, buffer: Arc<SampleBuffer>) {
        self.buffer = Some(buffer);
        self.reversed = None;
        self.sample_key = None;
    }

    /// Install a buffer loaded from the sample library
    pub fn set_sample(&mut self, key: &str, buffer: Arc<SampleBuffer>) {
        self.set_buffer(buffer);
        self.sample_key = Some(key.to_string());
    }

    pub fn clear_buffer(&mut self) {
        self.buffer = None;
        self.reversed = None;
        self.sample_key = None;
    }

    /// Buffer that a trigger would play, honouring `reverse`
    ///
    /// The reversed copy is built once per source buffer.
    pub fn playback_buffer(&mut self) -> Option<Arc<SampleBuffer>> {
        let buffer = self.buffer.as_ref()?;
        if !self.settings.reverse {
            return Some(Arc::clone(buffer));
        }

        match &self.reversed {
            Some((source, reversed)) if *source == buffer.id() => Some(Arc::clone(reversed)),
            _ => {
                let reversed = Arc::new(buffer.reversed());
                self.reversed = Some((buffer.id(), Arc::clone(&reversed)));
                Some(reversed)
            }
        }
    }

    /// Start a new playback instance at `now`, replacing any current one
    ///
    /// Returns false if there is no buffer to play.
    pub fn trigger(&mut self, now: f64) -> bool {
        let Some(buffer) = self.playback_buffer() else {
            log::debug!("slot {}: trigger ignored, no sample loaded", self.slot_id);
            return false;
        };

        if self.instance.is_some() {
            self.stop(now);
            // The stop above queued a cleanup for the outgoing instance
            self.cancel_cleanup();
        }

        let id = InstanceId(self.next_instance);
        self.next_instance += 1;

        let settings = &self.settings;
        let adsr = settings.adsr();
        let pitch = settings.base_pitch();
        let window = LoopWindow::from_fractions(
            settings.loop_start,
            settings.loop_end,
            buffer.duration(),
        );
        let params = settings.modulated(&[0.0; super::lfo::LFO_COUNT]);
        let sr = self.sample_rate;

        let mut filter = Filter::new(sr);
        filter.configure(settings.filter_type, params.cutoff, settings.res);

        let mut envelope = Automation::new(0.0);
        adsr.schedule_onset(&mut envelope, now, 1.0);

        let mut instance = PlaybackInstance {
            id,
            mono: buffer.is_mono(),
            position: window.start * buffer.sample_rate() as f64,
            buffer,
            started: now,
            rate: Smoothed::new(pitch, PARAM_GLIDE, sr),
            looping: settings.looping,
            window,
            play_until: None,
            release_at: None,
            stop_at: None,
            source_ended: false,
            chain: SignalChain {
                filter,
                cutoff: Smoothed::new(params.cutoff, PARAM_GLIDE, sr),
                resonance: Smoothed::new(settings.res, PARAM_GLIDE, sr),
                pan: Smoothed::new(params.pan, PARAM_GLIDE, sr),
                delay_send: Smoothed::new(params.delay_send, PARAM_GLIDE, sr),
                reverb_send: Smoothed::new(params.reverb_send, PARAM_GLIDE, sr),
                envelope,
                level: Smoothed::new(params.volume, PARAM_GLIDE, sr),
                mute: Smoothed::new(if self.muted { 0.0 } else { 1.0 }, PARAM_GLIDE, sr),
                filter_countdown: FILTER_UPDATE_INTERVAL,
            },
        };

        if settings.looping {
            log::debug!("slot {}: looping {:?}", self.slot_id, window);
        } else {
            let release_at = now + window.length() / pitch;
            let tail_end = adsr.schedule_release(&mut instance.chain.envelope, release_at, adsr.sustain());
            instance.play_until = Some(window.end);
            instance.release_at = Some(release_at);
            instance.stop_at = Some(tail_end);
            self.schedule_cleanup(id, tail_end + ONE_SHOT_CLEANUP_DELAY);
            log::debug!(
                "slot {}: one-shot {:.3}s, release at {:.3}",
                self.slot_id,
                window.length(),
                release_at
            );
        }

        self.instance = Some(instance);
        true
    }

    /// Fade the current instance out from its instantaneous level
    pub fn stop(&mut self, now: f64) {
        let release = self.settings.adsr().release().min(MAX_STOP_RELEASE);
        let Some(instance) = self.instance.as_mut() else {
            return;
        };

        let end = schedule_fade_out(&mut instance.chain.envelope, now, release);
        instance.release_at = Some(instance.release_at.map_or(now, |t| t.min(now)));
        instance.stop_at = Some(instance.stop_at.map_or(end, |t| t.min(end)));
        let id = instance.id;
        self.schedule_cleanup(id, end + STOP_CLEANUP_DELAY);
    }

    fn schedule_cleanup(&mut self, instance: InstanceId, due: f64) {
        if let Some(old) = self.cleanup.take() {
            log::trace!("slot {}: replacing cleanup task {}", self.slot_id, old.task);
        }
        self.cleanup = Some(CleanupHandle {
            task: self.next_task,
            instance,
            due,
        });
        self.next_task += 1;
    }

    /// Cancel the pending cleanup, if any
    pub fn cancel_cleanup(&mut self) -> Option<CleanupHandle> {
        self.cleanup.take()
    }

    pub fn pending_cleanup(&self) -> Option<CleanupHandle> {
        self.cleanup
    }

    /// Run a due cleanup; returns true if an instance was torn down
    pub fn poll(&mut self, now: f64) -> bool {
        if let Some(instance) = self.instance.as_mut() {
            instance.chain.envelope.prune(now);
        }

        let Some(handle) = self.cleanup else {
            return false;
        };
        if handle.due > now {
            return false;
        }
        self.cleanup = None;

        match &self.instance {
            Some(instance) if instance.id == handle.instance => {
                log::debug!("slot {}: playback finished", self.slot_id);
                self.instance = None;
                true
            }
            _ => false,
        }
    }

    /// Push current settings and LFO values into the live signal chain
    pub fn apply_realtime_params(&mut self, lfos: &impl ModulationSource) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        let settings = &self.settings;
        let params = settings.modulated(lfos);
        let duration = instance.buffer.duration();

        instance.rate.set_target(params.pitch);
        instance.window =
            LoopWindow::from_fractions(settings.loop_start, settings.loop_end, duration)
                .shifted(params.loop_shift * duration, duration);
        if instance.looping && !settings.looping && instance.play_until.is_none() {
            // Play out to the end of the window; render stops the instance there
            instance.play_until = Some(instance.window.end);
        }
        instance.looping = settings.looping;

        let chain = &mut instance.chain;
        chain.filter.set_type(settings.filter_type);
        chain.cutoff.set_target(params.cutoff);
        chain.resonance.set_target(settings.res);
        chain.pan.set_target(params.pan);
        chain.delay_send.set_target(params.delay_send);
        chain.reverb_send.set_target(params.reverb_send);
        chain.level.set_target(params.volume);
    }

    /// Merge a settings update and push it to the live chain
    pub fn update_settings(&mut self, patch: &VoiceSettingsPatch, lfos: &impl ModulationSource) {
        self.settings.apply(patch);
        self.apply_realtime_params(lfos);
    }

    /// Route (or unroute) an LFO to one target, optionally changing its depth
    ///
    /// The live chain is updated at once, so unrouting returns the target to
    /// its base value.
    pub fn set_modulation(
        &mut self,
        target: ModTarget,
        lfo: Option<LfoId>,
        depth: Option<f64>,
        lfos: &impl ModulationSource,
    ) {
        *self.settings.mod_assignments.get_mut(target) = lfo;
        if let Some(depth) = depth {
            *self.settings.modulation_depths.get_mut(target) = depth;
        }
        self.apply_realtime_params(lfos);
    }

    pub fn has_modulation(&self) -> bool {
        self.settings.mod_assignments.any()
    }

    /// Silence output without touching the envelope
    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(instance) = self.instance.as_mut() {
            instance.chain.mute.set_target(if muted { 0.0 } else { 1.0 });
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_playing(&self) -> bool {
        self.instance.is_some()
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance.as_ref().map(|i| i.id)
    }

    /// Envelope stage of the current instance
    pub fn phase(&self, now: f64) -> EnvelopeStage {
        match &self.instance {
            Some(instance) if !instance.stop_at.is_some_and(|t| now >= t) => self
                .settings
                .adsr()
                .stage_at(instance.started, instance.release_at, now),
            _ => EnvelopeStage::Idle,
        }
    }

    /// Envelope level of the current instance, before volume and mute
    pub fn envelope_level(&self, now: f64) -> Option<f64> {
        self.instance
            .as_ref()
            .map(|i| i.chain.envelope.value_at(now))
    }

    /// Live loop window of the current instance
    pub fn loop_window(&self) -> Option<LoopWindow> {
        self.instance.as_ref().map(|i| i.window)
    }

    /// Render one output frame at audio time `now`
    ///
    /// An instance whose source ran out with no stop scheduled (a loop
    /// switched to one-shot while playing) is faded out and cleaned up.
    pub fn render(&mut self, now: f64) -> BusFrame {
        let sample_rate = self.sample_rate;
        let Some(instance) = self.instance.as_mut() else {
            return BusFrame::default();
        };
        let frame = instance.render(now, sample_rate);
        if instance.source_ended && instance.stop_at.is_none() {
            self.stop(now);
        }
        frame
    }

    pub fn snapshot(&self) -> SlotState {
        SlotState {
            slot_id: self.slot_id,
            sample_key: self.sample_key.clone(),
            settings: self.settings.clone(),
            region: self.region,
        }
    }

    /// Replace settings, region and sample from a snapshot
    pub fn restore(&mut self, state: &SlotState, library: &SampleLibrary, now: f64) {
        self.stop(now);
        self.slot_id = state.slot_id;
        self.settings = state.settings.clone();
        self.region = state.region;

        match state.sample_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => match library.get(key) {
                Some(buffer) => self.set_sample(key, buffer),
                None => {
                    log::warn!("slot {}: sample {:?} not in library", self.slot_id, key);
                    self.clear_buffer();
                    self.sample_key = Some(key.to_string());
                }
            },
            None => self.clear_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::lfo::LFO_COUNT;

    const SR: f64 = 8000.0;
    const STILL: [f64; LFO_COUNT] = [0.0; LFO_COUNT];

    fn lfo(n: u8) -> Option<LfoId> {
        LfoId::new(n)
    }

    /// One second of DC at the engine rate
    fn dc_buffer(channels: usize) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::new(SR as u32, vec![vec![1.0; SR as usize]; channels]).unwrap())
    }

    fn voice_with(settings: VoiceSettings) -> Voice {
        let mut voice = Voice::new(1, SR);
        voice.set_buffer(dc_buffer(1));
        voice.settings = settings;
        voice
    }

    fn one_shot() -> VoiceSettings {
        VoiceSettings {
            looping: false,
            ..VoiceSettings::default()
        }
    }

    /// Render from `from` for `seconds`, returning the last frame
    fn run(voice: &mut Voice, from: f64, seconds: f64) -> BusFrame {
        let frames = (seconds * SR) as usize;
        let mut last = BusFrame::default();
        for i in 0..frames {
            last = voice.render(from + i as f64 / SR);
        }
        last
    }

    #[test]
    fn test_trigger_without_buffer_is_noop() {
        let mut voice = Voice::new(1, SR);
        assert!(!voice.trigger(0.0));
        assert!(!voice.is_playing());
        assert!(voice.pending_cleanup().is_none());
        assert_eq!(voice.phase(0.0), EnvelopeStage::Idle);
        assert!(voice.render(0.0).is_silent());
    }

    #[test]
    fn test_one_shot_schedules_cleanup() {
        let mut voice = voice_with(VoiceSettings {
            pitch: 2.0,
            release: 0.3,
            ..one_shot()
        });
        assert!(voice.trigger(1.0));

        // 1s buffer at double speed, then the release tail, then the grace period
        let handle = voice.pending_cleanup().unwrap();
        assert!((handle.due() - (1.0 + 0.5 + 0.3 + 0.2)).abs() < 1e-9);
        assert_eq!(Some(handle.instance()), voice.instance_id());
    }

    #[test]
    fn test_one_shot_plays_out_and_cleans_up() {
        let mut voice = voice_with(one_shot());
        voice.trigger(0.0);
        assert_eq!(voice.phase(0.5), EnvelopeStage::Sustain);
        assert_eq!(voice.phase(1.1), EnvelopeStage::Release);

        run(&mut voice, 0.0, 1.5);
        assert!(!voice.poll(1.5));
        assert!(voice.is_playing());

        let last = run(&mut voice, 1.5, 0.2);
        assert!(last.dry[0].abs() < 1e-9);
        assert!(voice.poll(1.7));
        assert!(!voice.is_playing());
        assert!(voice.pending_cleanup().is_none());
    }

    #[test]
    fn test_retrigger_keeps_one_instance_and_one_cleanup() {
        let mut voice = voice_with(one_shot());
        voice.trigger(0.0);
        let first = voice.instance_id().unwrap();
        let first_cleanup = voice.pending_cleanup().unwrap();

        voice.trigger(0.1);
        let second = voice.instance_id().unwrap();
        assert_ne!(first, second);

        let handle = voice.pending_cleanup().unwrap();
        assert_eq!(handle.instance(), second);
        assert_ne!(handle, first_cleanup);

        // The stop issued for the first instance would have fired here
        let stale_due = 0.1 + 0.4 + STOP_CLEANUP_DELAY;
        assert!(!voice.poll(stale_due + 0.01));
        assert_eq!(voice.instance_id(), Some(second));
        assert_eq!(voice.pending_cleanup(), Some(handle));
    }

    #[test]
    fn test_looping_trigger_has_no_cleanup() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        assert!(voice.pending_cleanup().is_none());

        let last = run(&mut voice, 0.0, 2.5);
        assert!(last.dry[0] > 0.1);
        assert_eq!(voice.phase(2.5), EnvelopeStage::Sustain);
    }

    #[test]
    fn test_mono_dc_level_at_centre() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        let frame = run(&mut voice, 0.0, 0.5);

        // Equal-power centre, volume 0.8, sustain 0.8
        let expected = std::f64::consts::FRAC_1_SQRT_2 * 0.8 * 0.8;
        assert!((frame.dry[0] - expected).abs() < 0.01, "{:?}", frame);
        assert!((frame.dry[1] - expected).abs() < 0.01);
        assert_eq!(frame.delay, [0.0, 0.0]);
    }

    #[test]
    fn test_sends_are_post_pan_pre_gain() {
        let mut voice = voice_with(VoiceSettings {
            pan: 1.0,
            volume: 0.2,
            delay_send: 0.5,
            reverb_send: 0.25,
            ..VoiceSettings::default()
        });
        voice.trigger(0.0);
        let frame = run(&mut voice, 0.0, 0.5);

        assert!(frame.delay[0].abs() < 1e-6);
        assert!((frame.delay[1] - 0.5).abs() < 0.01);
        assert!((frame.reverb[1] - 0.25).abs() < 0.01);
        assert!((frame.dry[1] - 0.2 * 0.8).abs() < 0.01);
    }

    #[test]
    fn test_stereo_pan_folds_image() {
        let (l, r) = equal_power_pan(1.0, 0.5, -1.0, false);
        assert!((l - 1.5).abs() < 1e-12);
        assert!(r.abs() < 1e-12);

        let (l, r) = equal_power_pan(1.0, 0.5, 0.0, false);
        assert!((l - 1.0).abs() < 1e-12);
        assert!((r - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_stop_fades_from_current_level() {
        let mut voice = voice_with(VoiceSettings {
            attack: 1.0,
            release: 2.0,
            ..VoiceSettings::default()
        });
        voice.trigger(0.0);
        voice.stop(0.5);

        assert!((voice.envelope_level(0.5).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(voice.phase(0.6), EnvelopeStage::Release);

        // Release is capped for manual stops
        let handle = voice.pending_cleanup().unwrap();
        assert!((handle.due() - (0.5 + MAX_STOP_RELEASE + STOP_CLEANUP_DELAY)).abs() < 1e-9);
        assert!(voice.poll(handle.due()));
        assert!(!voice.is_playing());
    }

    #[test]
    fn test_stop_without_instance_is_noop() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.stop(0.0);
        assert!(voice.pending_cleanup().is_none());
    }

    #[test]
    fn test_mute_leaves_envelope_alone() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        voice.set_mute(true);
        let muted = run(&mut voice, 0.0, 0.5);
        assert!(muted.dry[0].abs() < 1e-3);
        assert!((voice.envelope_level(0.5).unwrap() - 0.8).abs() < 1e-9);

        voice.set_mute(false);
        let live = run(&mut voice, 0.5, 0.5);
        assert!(live.dry[0] > 0.4);
    }

    #[test]
    fn test_trigger_while_muted_starts_silent() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.set_mute(true);
        voice.trigger(0.0);
        assert!(run(&mut voice, 0.0, 0.2).dry[0].abs() < 1e-9);
    }

    #[test]
    fn test_reversed_buffer_is_memoized() {
        let mut voice = voice_with(VoiceSettings {
            reverse: true,
            ..VoiceSettings::default()
        });
        let a = voice.playback_buffer().unwrap();
        let b = voice.playback_buffer().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_ne!(a.id(), voice.buffer().unwrap().id());

        voice.set_buffer(dc_buffer(2));
        let c = voice.playback_buffer().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_modulated_params() {
        let settings = VoiceSettings {
            mod_assignments: ModTargets {
                pitch: lfo(1),
                cutoff: lfo(2),
                volume: lfo(3),
                pan: lfo(4),
                delay_send: lfo(4),
                ..ModTargets::default()
            },
            modulation_depths: ModTargets::splat(1.0),
            cutoff: 1000.0,
            ..VoiceSettings::default()
        };
        let params = settings.modulated(&[0.5, -0.25, -1.0, 1.0]);

        assert!((params.pitch - 1.5).abs() < 1e-12);
        assert!((params.cutoff - 1000.0 * 2f64.powf(-2.0)).abs() < 1e-9);
        assert_eq!(params.volume, 0.0);
        assert_eq!(params.pan, 1.0);
        assert_eq!(params.delay_send, 1.0);
        assert_eq!(params.reverb_send, 0.0);
        assert_eq!(params.loop_shift, 0.0);
    }

    #[test]
    fn test_unassigned_targets_ignore_lfos() {
        let settings = VoiceSettings::default();
        let params = settings.modulated(&[1.0; LFO_COUNT]);
        assert_eq!(params.pitch, 1.0);
        assert_eq!(params.cutoff, 20000.0);
        assert_eq!(params.volume, 0.8);
    }

    #[test]
    fn test_loop_window_repairs_bounds() {
        let w = LoopWindow::from_fractions(0.8, 0.2, 10.0);
        assert!((w.start - 2.0).abs() < 1e-12 && (w.end - 8.0).abs() < 1e-12);

        let w = LoopWindow::from_fractions(1.0, 1.0, 10.0);
        assert!((w.length() - MIN_REGION).abs() < 1e-12);
        assert!(w.end <= 10.0);

        let w = LoopWindow::from_fractions(f64::NAN, 2.0, 4.0);
        assert_eq!((w.start, w.end), (0.0, 4.0));
    }

    #[test]
    fn test_loop_window_stays_inside_buffer() {
        let grid = [-0.5, 0.0, 0.1, 0.45, 0.5, 0.9, 0.999, 1.0, 1.5];
        let lfo_values = [-1.0, -0.3, 0.0, 0.7, 1.0];
        for &duration in &[0.005, 0.5, 3.0] {
            for &start in &grid {
                for &end in &grid {
                    for &value in &lfo_values {
                        let base = LoopWindow::from_fractions(start, end, duration);
                        let w = base.shifted(value * duration, duration);
                        assert!(w.start >= 0.0, "{:?}", w);
                        assert!(w.end <= duration, "{:?}", w);
                        assert!(w.start <= w.end, "{:?}", w);
                        assert!((w.length() - base.length()).abs() < 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_loop_start_modulation_moves_live_window() {
        let mut voice = voice_with(VoiceSettings {
            loop_start: 0.2,
            loop_end: 0.4,
            mod_assignments: ModTargets {
                loop_start: lfo(1),
                ..ModTargets::default()
            },
            modulation_depths: ModTargets::splat(1.0),
            ..VoiceSettings::default()
        });
        voice.trigger(0.0);
        voice.apply_realtime_params(&[1.0, 0.0, 0.0, 0.0]);

        let w = voice.loop_window().unwrap();
        assert!((w.end - 1.0).abs() < 1e-9);
        assert!((w.start - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_update_settings_merges_patch() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        let patch: VoiceSettingsPatch =
            serde_json::from_str(r#"{"cutoff": 500, "loop": false}"#).unwrap();
        voice.update_settings(&patch, &STILL);

        assert_eq!(voice.settings().cutoff, 500.0);
        assert!(!voice.settings().looping);
        assert_eq!(voice.settings().volume, 0.8);
    }

    #[test]
    fn test_set_modulation() {
        let mut voice = Voice::new(3, SR);
        assert!(!voice.has_modulation());
        voice.set_modulation(ModTarget::ReverbSend, lfo(2), Some(0.9), &STILL);
        assert!(voice.has_modulation());
        assert_eq!(voice.settings().mod_assignments.reverb_send, lfo(2));
        assert_eq!(voice.settings().modulation_depths.reverb_send, 0.9);
        assert_eq!(voice.settings().modulation_depths.pitch, 0.5);
    }

    #[test]
    fn test_unassigning_modulation_restores_base_value() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        let mut lfos = STILL;
        lfos[0] = 1.0;
        voice.set_modulation(ModTarget::Pan, lfo(1), Some(1.0), &lfos);
        let right = run(&mut voice, 0.0, 1.0);
        assert!(right.dry[1] > right.dry[0] * 10.0, "{:?}", right.dry);

        // Nothing else is assigned, so no control tick would touch this voice
        voice.set_modulation(ModTarget::Pan, None, None, &lfos);
        assert!(!voice.has_modulation());
        let centre = run(&mut voice, 1.0, 1.0);
        assert!((centre.dry[0] - centre.dry[1]).abs() < 1e-6, "{:?}", centre.dry);
    }

    #[test]
    fn test_loop_switched_to_one_shot_finishes() {
        let mut voice = voice_with(VoiceSettings::default());
        voice.trigger(0.0);
        run(&mut voice, 0.0, 0.3);

        let patch = VoiceSettingsPatch {
            looping: Some(false),
            ..VoiceSettingsPatch::default()
        };
        voice.update_settings(&patch, &STILL);
        assert_eq!(voice.loop_window().map(|w| w.end), Some(1.0));

        // Source runs out at 1.0s, then a 0.4s fade and the stop cleanup delay
        run(&mut voice, 0.3, 0.8);
        let handle = voice.pending_cleanup().unwrap();
        assert!(handle.due() < 1.6);
        run(&mut voice, 1.1, 0.5);
        assert!(voice.poll(1.6));
        assert!(!voice.is_playing());
    }

    #[test]
    fn test_settings_json_shape() {
        let json = serde_json::to_value(VoiceSettings::default()).unwrap();
        assert_eq!(json["loop"], true);
        assert_eq!(json["filterType"], "lowpass");
        assert_eq!(json["modAssignments"]["loopStart"], serde_json::Value::Null);
        assert_eq!(json["modulationDepths"]["reverbSend"], 0.5);

        let parsed: VoiceSettings =
            serde_json::from_str(r#"{"pitch": 2, "modAssignments": {"pitch": "lfo3", "cutoff": null, "volume": null, "pan": null, "loopStart": null, "delaySend": null, "reverbSend": null}}"#)
                .unwrap();
        assert_eq!(parsed.pitch, 2.0);
        assert_eq!(parsed.mod_assignments.pitch, lfo(3));
        assert_eq!(parsed.attack, 0.01);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut library = SampleLibrary::new();
        library.insert("kick.wav", SampleBuffer::new(SR as u32, vec![vec![0.5; 100]]).unwrap());

        let mut source = Voice::new(2, SR);
        source.set_sample("kick.wav", library.get("kick.wav").unwrap());
        source.settings.pan = -0.4;
        source.set_region(Some(Region { start: 0.1, end: 0.2 }));
        let state = source.snapshot();

        let mut target = Voice::new(9, SR);
        target.restore(&state, &library, 0.0);
        assert_eq!(target.snapshot(), state);
        assert_eq!(target.buffer().unwrap().id(), source.buffer().unwrap().id());
    }

    #[test]
    fn test_restore_with_missing_sample_keeps_key() {
        let library = SampleLibrary::new();
        let mut voice = voice_with(VoiceSettings::default());
        let state = SlotState {
            slot_id: 1,
            sample_key: Some("gone.wav".into()),
            settings: VoiceSettings::default(),
            region: None,
        };
        voice.restore(&state, &library, 0.0);
        assert!(voice.buffer().is_none());
        assert_eq!(voice.snapshot(), state);
    }
}
