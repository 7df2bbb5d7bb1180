//! Shared effects bus
//!
//! One stereo feedback delay and one convolution reverb, fed by the per-voice
//! sends. The reverb impulse is synthesized (decaying noise) and regenerated
//! whenever the decay changes.

use crate::synth::{LfoId, ModulationSource, Smoothed};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DELAY_TIME_MIN: f64 = 0.01;
pub const DELAY_TIME_MAX: f64 = 2.0;
pub const FEEDBACK_MAX: f64 = 0.95;
pub const DECAY_MIN: f64 = 0.1;
pub const DECAY_MAX: f64 = 10.0;

/// Convolution partition size in frames
const PARTITION: usize = 512;
const PARAM_GLIDE: f64 = 0.05;

/// Ring buffer delay line with fractional reads
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f64>,
    write_pos: usize,
}

impl DelayLine {
    /// Create a delay line holding up to `max_samples`
    pub fn new(max_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_samples.max(4)],
            write_pos: 0,
        }
    }

    pub fn write(&mut self, sample: f64) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Sample written `delay` writes ago (1 = most recent)
    pub fn read(&self, delay: usize) -> f64 {
        let len = self.buffer.len();
        let delay = delay.min(len);
        self.buffer[(self.write_pos + len - delay) % len]
    }

    /// Linear interpolation between neighbouring delays
    pub fn read_interpolated(&self, delay: f64) -> f64 {
        let delay = delay.max(1.0);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f64;
        self.read(whole) * (1.0 - frac) + self.read(whole + 1) * frac
    }

    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Stereo feedback delay
pub struct StereoDelay {
    sample_rate: f64,
    lines: [DelayLine; 2],
    time: Smoothed,
    feedback: Smoothed,
}

impl StereoDelay {
    pub fn new(sample_rate: f64, time: f64, feedback: f64) -> Self {
        let capacity = (DELAY_TIME_MAX * sample_rate).ceil() as usize + 2;
        Self {
            sample_rate,
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
            time: Smoothed::new(clamp_time(time), PARAM_GLIDE, sample_rate),
            feedback: Smoothed::new(clamp_feedback(feedback), PARAM_GLIDE, sample_rate),
        }
    }

    pub fn set_time(&mut self, seconds: f64) {
        self.time.set_target(clamp_time(seconds));
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback.set_target(clamp_feedback(feedback));
    }

    /// Feed one frame, returning the delayed (wet) frame
    pub fn process(&mut self, input: [f64; 2]) -> [f64; 2] {
        let delay = self.time.next() * self.sample_rate;
        let feedback = self.feedback.next();
        let mut out = [0.0; 2];
        for (ch, line) in self.lines.iter_mut().enumerate() {
            let delayed = line.read_interpolated(delay);
            line.write(input[ch] + delayed * feedback);
            out[ch] = delayed;
        }
        out
    }

    pub fn clear(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::clear);
    }
}

fn clamp_time(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.clamp(DELAY_TIME_MIN, DELAY_TIME_MAX)
    } else {
        0.3
    }
}

fn clamp_feedback(feedback: f64) -> f64 {
    if feedback.is_finite() {
        feedback.clamp(0.0, FEEDBACK_MAX)
    } else {
        0.0
    }
}

fn clamp_mix(mix: f64) -> f64 {
    if mix.is_finite() {
        mix.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_decay(decay: f64) -> f64 {
    if decay.is_finite() {
        decay.clamp(DECAY_MIN, DECAY_MAX)
    } else {
        2.0
    }
}

/// Shared forward/inverse FFT plans for one partition size
#[derive(Clone)]
struct FftPair {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftPair {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }
}

/// Uniformly partitioned overlap-save convolver (one channel)
///
/// Latency is one partition.
pub struct Convolver {
    block: usize,
    ffts: FftPair,
    /// Spectra of the impulse partitions
    partitions: Vec<Vec<Complex<f64>>>,
    /// Spectra of recent input blocks, newest at `fdl_head`
    fdl: Vec<Vec<Complex<f64>>>,
    fdl_head: usize,
    /// Previous and current input block, time domain
    window: Vec<f64>,
    input: Vec<f64>,
    output: Vec<f64>,
    pos: usize,
    scratch: Vec<Complex<f64>>,
    accum: Vec<Complex<f64>>,
}

impl Convolver {
    pub fn new(impulse: &[f64], block: usize) -> Self {
        Self::with_ffts(impulse, block, FftPair::new(block * 2))
    }

    fn with_ffts(impulse: &[f64], block: usize, ffts: FftPair) -> Self {
        let size = block * 2;
        let partitions: Vec<Vec<Complex<f64>>> = impulse
            .chunks(block)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); size];
                for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                    bin.re = s;
                }
                ffts.forward.process(&mut spectrum);
                spectrum
            })
            .collect();
        let count = partitions.len().max(1);

        Self {
            block,
            ffts,
            partitions,
            fdl: vec![vec![Complex::new(0.0, 0.0); size]; count],
            fdl_head: 0,
            window: vec![0.0; size],
            input: vec![0.0; block],
            output: vec![0.0; block],
            pos: 0,
            scratch: vec![Complex::new(0.0, 0.0); size],
            accum: vec![Complex::new(0.0, 0.0); size],
        }
    }

    /// Feed one sample, returning one convolved sample
    pub fn process(&mut self, sample: f64) -> f64 {
        let out = self.output[self.pos];
        self.input[self.pos] = sample;
        self.pos += 1;
        if self.pos == self.block {
            self.process_block();
            self.pos = 0;
        }
        out
    }

    fn process_block(&mut self) {
        let block = self.block;
        let size = block * 2;

        // Slide: [previous block | current block]
        self.window.copy_within(block.., 0);
        self.window[block..].copy_from_slice(&self.input);

        self.fdl_head = (self.fdl_head + 1) % self.fdl.len();
        let head = &mut self.fdl[self.fdl_head];
        for (bin, &s) in head.iter_mut().zip(&self.window) {
            *bin = Complex::new(s, 0.0);
        }
        self.ffts.forward.process(head);

        self.accum.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        let count = self.fdl.len();
        for (p, spectrum) in self.partitions.iter().enumerate() {
            let x = &self.fdl[(self.fdl_head + count - p) % count];
            for ((acc, &a), &b) in self.accum.iter_mut().zip(x).zip(spectrum) {
                *acc += a * b;
            }
        }

        self.scratch.copy_from_slice(&self.accum);
        self.ffts.inverse.process(&mut self.scratch);

        // Keep the alias-free second half; rustfft does not normalize
        let scale = 1.0 / size as f64;
        for (out, c) in self.output.iter_mut().zip(&self.scratch[block..]) {
            *out = c.re * scale;
        }
    }
}

/// Decaying-noise stereo impulse response
///
/// Each channel holds `decay` seconds of uniform noise shaped by
/// `(1 - n/len)^decay`, scaled to unit energy.
pub fn synth_impulse(decay: f64, sample_rate: f64, rng: &mut Pcg32) -> [Vec<f64>; 2] {
    let decay = clamp_decay(decay);
    let len = ((decay * sample_rate) as usize).max(1);
    std::array::from_fn(|_| {
        let mut channel: Vec<f64> = (0..len)
            .map(|n| {
                let env = (1.0 - n as f64 / len as f64).powf(decay);
                rng.gen_range(-1.0..=1.0) * env
            })
            .collect();
        let energy = channel.iter().map(|s| s * s).sum::<f64>().sqrt();
        if energy > 0.0 {
            channel.iter_mut().for_each(|s| *s /= energy);
        }
        channel
    })
}

/// Stereo convolution reverb with a synthesized impulse
pub struct Reverb {
    sample_rate: f64,
    decay: f64,
    rng: Pcg32,
    ffts: FftPair,
    channels: [Convolver; 2],
}

impl Reverb {
    pub fn new(sample_rate: f64, decay: f64, seed: u64) -> Self {
        let decay = clamp_decay(decay);
        let mut rng = Pcg32::seed_from_u64(seed);
        let ffts = FftPair::new(PARTITION * 2);
        let [left, right] = synth_impulse(decay, sample_rate, &mut rng);

        Self {
            sample_rate,
            decay,
            channels: [
                Convolver::with_ffts(&left, PARTITION, ffts.clone()),
                Convolver::with_ffts(&right, PARTITION, ffts.clone()),
            ],
            rng,
            ffts,
        }
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Change the decay, regenerating the impulse if it differs
    pub fn set_decay(&mut self, decay: f64) {
        let decay = clamp_decay(decay);
        if decay == self.decay {
            return;
        }
        self.decay = decay;
        let [left, right] = synth_impulse(decay, self.sample_rate, &mut self.rng);
        self.channels = [
            Convolver::with_ffts(&left, PARTITION, self.ffts.clone()),
            Convolver::with_ffts(&right, PARTITION, self.ffts.clone()),
        ];
        log::debug!("reverb impulse regenerated: {:.2}s", decay);
    }

    pub fn process(&mut self, input: [f64; 2]) -> [f64; 2] {
        [
            self.channels[0].process(input[0]),
            self.channels[1].process(input[1]),
        ]
    }
}

/// Persisted effects parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsParams {
    pub delay_time: f64,
    pub delay_feedback: f64,
    pub delay_mix: f64,
    pub reverb_decay: f64,
    pub reverb_mix: f64,
}

impl Default for EffectsParams {
    fn default() -> Self {
        Self {
            delay_time: 0.3,
            delay_feedback: 0.4,
            delay_mix: 0.3,
            reverb_decay: 2.0,
            reverb_mix: 0.3,
        }
    }
}

/// Effects parameters that accept an LFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectTarget {
    DelayTime,
    DelayFeedback,
    DelayMix,
    ReverbMix,
}

impl EffectTarget {
    fn index(self) -> usize {
        match self {
            EffectTarget::DelayTime => 0,
            EffectTarget::DelayFeedback => 1,
            EffectTarget::DelayMix => 2,
            EffectTarget::ReverbMix => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Assignment {
    lfo: LfoId,
    depth: f64,
}

/// Delay and reverb with their wet mixes
pub struct EffectsBus {
    params: EffectsParams,
    delay: StereoDelay,
    reverb: Reverb,
    delay_mix: Smoothed,
    reverb_mix: Smoothed,
    modulation: [Option<Assignment>; 4],
}

impl EffectsBus {
    pub fn new(sample_rate: f64, seed: u64) -> Self {
        let params = EffectsParams::default();
        Self {
            delay: StereoDelay::new(sample_rate, params.delay_time, params.delay_feedback),
            reverb: Reverb::new(sample_rate, params.reverb_decay, seed),
            delay_mix: Smoothed::new(params.delay_mix, PARAM_GLIDE, sample_rate),
            reverb_mix: Smoothed::new(params.reverb_mix, PARAM_GLIDE, sample_rate),
            params,
            modulation: [None; 4],
        }
    }

    pub fn params(&self) -> EffectsParams {
        self.params
    }

    pub fn set_params(&mut self, params: EffectsParams) {
        self.set_delay_time(params.delay_time);
        self.set_delay_feedback(params.delay_feedback);
        self.set_delay_mix(params.delay_mix);
        self.set_reverb_decay(params.reverb_decay);
        self.set_reverb_mix(params.reverb_mix);
        self.params = params;
    }

    pub fn set_delay_time(&mut self, seconds: f64) {
        self.params.delay_time = seconds;
        self.delay.set_time(seconds);
    }

    pub fn set_delay_feedback(&mut self, feedback: f64) {
        self.params.delay_feedback = feedback;
        self.delay.set_feedback(feedback);
    }

    pub fn set_delay_mix(&mut self, mix: f64) {
        self.params.delay_mix = mix;
        self.delay_mix.set_target(clamp_mix(mix));
    }

    pub fn set_reverb_decay(&mut self, decay: f64) {
        self.params.reverb_decay = decay;
        self.reverb.set_decay(decay);
    }

    pub fn set_reverb_mix(&mut self, mix: f64) {
        self.params.reverb_mix = mix;
        self.reverb_mix.set_target(clamp_mix(mix));
    }

    /// Assign (or clear) an LFO for one effect parameter
    pub fn set_modulation(&mut self, target: EffectTarget, lfo: Option<LfoId>, depth: f64) {
        self.modulation[target.index()] = lfo.map(|lfo| Assignment {
            lfo,
            depth: clamp_mix(depth),
        });
        if lfo.is_none() {
            // Fall back to the unmodulated value
            self.set_params(self.params);
        }
    }

    fn amount(&self, target: EffectTarget, lfos: &impl ModulationSource) -> Option<f64> {
        self.modulation[target.index()].map(|a| lfos.value(a.lfo) * a.depth)
    }

    /// Push modulated values for every assigned parameter
    pub fn apply_modulation(&mut self, lfos: &impl ModulationSource) {
        let p = self.params;
        if let Some(m) = self.amount(EffectTarget::DelayTime, lfos) {
            self.delay.set_time(p.delay_time * (1.0 + m));
        }
        if let Some(m) = self.amount(EffectTarget::DelayFeedback, lfos) {
            self.delay.set_feedback(p.delay_feedback + m);
        }
        if let Some(m) = self.amount(EffectTarget::DelayMix, lfos) {
            self.delay_mix.set_target(clamp_mix(p.delay_mix + m));
        }
        if let Some(m) = self.amount(EffectTarget::ReverbMix, lfos) {
            self.reverb_mix.set_target(clamp_mix(p.reverb_mix + m));
        }
    }

    /// Run one frame of send input through both effects; returns the wet sum
    pub fn process(&mut self, delay_in: [f64; 2], reverb_in: [f64; 2]) -> [f64; 2] {
        let delayed = self.delay.process(delay_in);
        let reverbed = self.reverb.process(reverb_in);
        let dm = self.delay_mix.next();
        let rm = self.reverb_mix.next();
        [
            delayed[0] * dm + reverbed[0] * rm,
            delayed[1] * dm + reverbed[1] * rm,
        ]
    }
}
