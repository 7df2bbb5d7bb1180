//! Low Frequency Oscillators for modulation
//!
//! Four independent control-rate generators. They are parameter-automation
//! sources, ticked at control rate, never rendered as audio.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

/// Number of LFOs in the bank
pub const LFO_COUNT: usize = 4;

/// Identifier of one of the bank's LFOs (`lfo1`..`lfo4`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LfoId(u8);

impl LfoId {
    /// Create an id from its 1-based number
    pub fn new(number: u8) -> Option<Self> {
        (1..=LFO_COUNT as u8).contains(&number).then_some(Self(number))
    }

    /// Zero-based index into the bank
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// All ids in bank order
    pub fn all() -> impl Iterator<Item = LfoId> {
        (1..=LFO_COUNT as u8).map(LfoId)
    }
}

impl fmt::Display for LfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lfo{}", self.0)
    }
}

impl FromStr for LfoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("lfo")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(LfoId::new)
            .ok_or_else(|| format!("unknown LFO id '{}'", s))
    }
}

impl TryFrom<String> for LfoId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LfoId> for String {
    fn from(id: LfoId) -> Self {
        id.to_string()
    }
}

/// LFO waveform shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LfoShape {
    #[default]
    #[serde(rename = "sine")]
    Sine,
    /// New uniform value at every cycle boundary, held for the cycle
    #[serde(rename = "random-square")]
    SampleHold,
    /// Cosine-eased glide between per-cycle random endpoints
    #[serde(rename = "smooth-random")]
    SmoothRandom,
}

/// Persisted parameters of one LFO
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoState {
    pub id: LfoId,
    pub frequency: f64,
    #[serde(rename = "type")]
    pub shape: LfoShape,
}

/// Anything that can answer "what is LFO `id` outputting right now"
pub trait ModulationSource {
    /// Current output of the given LFO in [-1, 1]
    fn value(&self, id: LfoId) -> f64;

    /// Resolve an optional assignment to a value
    fn modulation(&self, assignment: Option<LfoId>) -> Option<f64> {
        assignment.map(|id| self.value(id))
    }
}

/// A frozen set of LFO outputs, indexed by bank position
impl ModulationSource for [f64; LFO_COUNT] {
    fn value(&self, id: LfoId) -> f64 {
        self[id.index()].clamp(-1.0, 1.0)
    }
}

/// Low Frequency Oscillator
pub struct Lfo {
    id: LfoId,
    shape: LfoShape,
    frequency: f64,
    /// Radians, monotonically increasing
    phase: f64,
    value: f64,
    last_random: f64,
    next_random: f64,
    last_cycle: Option<i64>,
    rng: Pcg32,
}

impl Lfo {
    /// Create a new LFO with a deterministic random stream
    pub fn new(id: LfoId, seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);
        let last_random = rng.gen_range(-1.0..=1.0);
        let next_random = rng.gen_range(-1.0..=1.0);

        Self {
            id,
            shape: LfoShape::Sine,
            frequency: 1.0,
            phase: 0.0,
            value: 0.0,
            last_random,
            next_random,
            last_cycle: None,
            rng,
        }
    }

    pub fn id(&self) -> LfoId {
        self.id
    }

    /// Set LFO frequency in Hz
    pub fn set_frequency(&mut self, hz: f64) {
        if !hz.is_finite() {
            log::warn!("{}: ignoring non-finite frequency", self.id);
            return;
        }
        self.frequency = hz.clamp(0.01, 100.0);
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_shape(&mut self, shape: LfoShape) {
        self.shape = shape;
    }

    pub fn shape(&self) -> LfoShape {
        self.shape
    }

    /// Accumulated phase in radians
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Current output (-1.0 to 1.0)
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advance by `dt` seconds and recompute the output
    pub fn update(&mut self, dt: f64) {
        if !(dt > 0.0) {
            return;
        }

        self.phase += TAU * self.frequency * dt;
        let cycle = self.phase / TAU;
        let index = cycle.floor() as i64;
        let new_cycle = self.last_cycle != Some(index);

        self.value = match self.shape {
            LfoShape::Sine => self.phase.sin(),
            LfoShape::SampleHold => {
                if new_cycle {
                    self.last_cycle = Some(index);
                    self.rng.gen_range(-1.0..=1.0)
                } else {
                    self.value
                }
            }
            LfoShape::SmoothRandom => {
                if new_cycle {
                    self.last_cycle = Some(index);
                    self.last_random = self.next_random;
                    self.next_random = self.rng.gen_range(-1.0..=1.0);
                }
                let progress = cycle - index as f64;
                let f = (1.0 - (progress * PI).cos()) * 0.5;
                self.last_random * (1.0 - f) + self.next_random * f
            }
        };
    }

    pub fn state(&self) -> LfoState {
        LfoState {
            id: self.id,
            frequency: self.frequency,
            shape: self.shape,
        }
    }
}

/// The four global LFOs
pub struct LfoBank {
    lfos: [Lfo; LFO_COUNT],
}

impl LfoBank {
    /// Create a bank; each LFO gets its own stream derived from `seed`
    pub fn new(seed: u64) -> Self {
        let lfos = std::array::from_fn(|i| {
            let id = LfoId(i as u8 + 1);
            Lfo::new(id, seed ^ (0x9E37_79B9_7F4A_7C15u64.wrapping_mul(i as u64 + 1)))
        });
        Self { lfos }
    }

    /// Advance every LFO by `dt` seconds
    pub fn update(&mut self, dt: f64) {
        for lfo in &mut self.lfos {
            lfo.update(dt);
        }
    }

    pub fn get(&self, id: LfoId) -> &Lfo {
        &self.lfos[id.index()]
    }

    pub fn get_mut(&mut self, id: LfoId) -> &mut Lfo {
        &mut self.lfos[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lfo> {
        self.lfos.iter()
    }

    /// Change frequency and/or shape of one LFO
    pub fn set_params(&mut self, id: LfoId, frequency: Option<f64>, shape: Option<LfoShape>) {
        let lfo = self.get_mut(id);
        if let Some(hz) = frequency {
            lfo.set_frequency(hz);
        }
        if let Some(shape) = shape {
            lfo.set_shape(shape);
        }
    }

    pub fn states(&self) -> Vec<LfoState> {
        self.lfos.iter().map(Lfo::state).collect()
    }

    pub fn apply_states(&mut self, states: &[LfoState]) {
        for state in states {
            self.set_params(state.id, Some(state.frequency), Some(state.shape));
        }
    }
}

impl ModulationSource for LfoBank {
    fn value(&self, id: LfoId) -> f64 {
        self.get(id).value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lfo(shape: LfoShape, hz: f64) -> Lfo {
        let mut lfo = Lfo::new(LfoId::new(1).unwrap(), 7);
        lfo.set_shape(shape);
        lfo.set_frequency(hz);
        lfo
    }

    #[test]
    fn test_lfo_id_parsing() {
        assert_eq!("lfo3".parse::<LfoId>().unwrap().index(), 2);
        assert!("lfo0".parse::<LfoId>().is_err());
        assert!("lfo5".parse::<LfoId>().is_err());
        assert!("osc1".parse::<LfoId>().is_err());
        assert_eq!(LfoId::new(4).unwrap().to_string(), "lfo4");
    }

    #[test]
    fn test_lfo_id_serde() {
        let id: LfoId = serde_json::from_str("\"lfo2\"").unwrap();
        assert_eq!(id, LfoId::new(2).unwrap());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lfo2\"");
        assert!(serde_json::from_str::<LfoId>("\"lfo9\"").is_err());
    }

    #[test]
    fn test_shape_serde_names() {
        assert_eq!(serde_json::to_string(&LfoShape::SampleHold).unwrap(), "\"random-square\"");
        assert_eq!(
            serde_json::from_str::<LfoShape>("\"smooth-random\"").unwrap(),
            LfoShape::SmoothRandom
        );
    }

    #[test]
    fn test_sine_follows_phase() {
        let mut lfo = lfo(LfoShape::Sine, 1.0);
        lfo.update(0.25);
        assert!((lfo.value() - 1.0).abs() < 1e-9);
        assert!((lfo.phase() - PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sine_range_for_varied_rates() {
        for hz in [0.01, 0.3, 1.0, 7.5, 20.0, 100.0] {
            let mut lfo = lfo(LfoShape::Sine, hz);
            for step in 0..2000 {
                let dt = 1.0 / 60.0 + (step % 7) as f64 * 0.001;
                lfo.update(dt);
                assert!((-1.0..=1.0).contains(&lfo.value()));
            }
        }
    }

    #[test]
    fn test_phase_is_monotonic() {
        let mut lfo = lfo(LfoShape::Sine, 3.0);
        let mut last = lfo.phase();
        for _ in 0..500 {
            lfo.update(1.0 / 60.0);
            assert!(lfo.phase() > last);
            last = lfo.phase();
        }
    }

    #[test]
    fn test_sample_hold_changes_only_on_cycle_boundary() {
        let mut lfo = lfo(LfoShape::SampleHold, 1.0);
        let dt = 1.0 / 100.0;
        lfo.update(dt);
        let mut held = lfo.value();
        let mut changes = 0;

        for _ in 0..1000 {
            let cycle_before = (lfo.phase() / TAU).floor();
            lfo.update(dt);
            let cycle_after = (lfo.phase() / TAU).floor();
            assert!((-1.0..=1.0).contains(&lfo.value()));
            if cycle_before == cycle_after {
                assert_eq!(lfo.value(), held);
            } else if lfo.value() != held {
                changes += 1;
            }
            held = lfo.value();
        }

        // 10 seconds at 1 Hz
        assert!(changes >= 8, "expected new values per cycle, got {}", changes);
    }

    #[test]
    fn test_smooth_random_is_continuous() {
        let hz = 2.0;
        let dt = 1.0 / 600.0;
        let mut lfo = lfo(LfoShape::SmoothRandom, hz);
        lfo.update(dt);
        let mut previous = lfo.value();

        // Half-cosine ease has slope at most pi/2 per unit progress over a span of at most 2
        let max_step = PI * hz * dt + 1e-9;
        for _ in 0..6000 {
            lfo.update(dt);
            let value = lfo.value();
            assert!((-1.0..=1.0).contains(&value));
            assert!(
                (value - previous).abs() <= max_step,
                "jump of {} exceeds {}",
                (value - previous).abs(),
                max_step
            );
            previous = value;
        }
    }

    #[test]
    fn test_smooth_random_hands_off_endpoint() {
        let mut lfo = lfo(LfoShape::SmoothRandom, 1.0);
        lfo.update(0.5);
        let target = lfo.next_random;
        lfo.update(0.4999999);
        assert!((lfo.value() - target).abs() < 1e-6);

        lfo.update(0.0000002);
        assert_eq!(lfo.last_random, target);
        assert!((lfo.value() - target).abs() < 1e-6);
    }

    #[test]
    fn test_ignores_non_positive_dt() {
        let mut lfo = lfo(LfoShape::Sine, 1.0);
        lfo.update(0.0);
        lfo.update(-1.0);
        assert_eq!(lfo.phase(), 0.0);
    }

    #[test]
    fn test_lfo_frequency_clamping() {
        let mut lfo = lfo(LfoShape::Sine, 1.0);

        lfo.set_frequency(0.001);
        assert_eq!(lfo.frequency(), 0.01);

        lfo.set_frequency(200.0);
        assert_eq!(lfo.frequency(), 100.0);

        lfo.set_frequency(f64::NAN);
        assert_eq!(lfo.frequency(), 100.0);
    }

    #[test]
    fn test_bank_is_deterministic_and_independent() {
        let mut a = LfoBank::new(42);
        let mut b = LfoBank::new(42);
        for id in LfoId::all() {
            a.set_params(id, Some(1.0 + id.index() as f64), Some(LfoShape::SampleHold));
            b.set_params(id, Some(1.0 + id.index() as f64), Some(LfoShape::SampleHold));
        }
        a.update(0.01);
        b.update(0.01);

        let values: Vec<f64> = LfoId::all().map(|id| a.value(id)).collect();
        assert_eq!(values, LfoId::all().map(|id| b.value(id)).collect::<Vec<_>>());
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_bank_state_roundtrip() {
        let mut bank = LfoBank::new(1);
        bank.set_params(LfoId::new(3).unwrap(), Some(4.5), Some(LfoShape::SmoothRandom));
        let states = bank.states();

        let mut other = LfoBank::new(99);
        other.apply_states(&states);
        assert_eq!(other.states(), states);
    }

    #[test]
    fn test_frozen_modulation_source() {
        let frozen = [0.5, -0.25, 2.0, 0.0];
        assert_eq!(frozen.value(LfoId::new(1).unwrap()), 0.5);
        assert_eq!(frozen.value(LfoId::new(3).unwrap()), 1.0);
        assert_eq!(frozen.modulation(None), None);
        assert_eq!(frozen.modulation(LfoId::new(2)), Some(-0.25));
    }
}
