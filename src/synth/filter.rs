//! Biquad filter implementation
//!
//! Stereo RBJ-cookbook biquad used in each voice's signal chain.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Filter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

/// Biquad filter coefficients
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Per-channel history (Direct Form II transposed)
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    z1: f64,
    z2: f64,
}

impl ChannelState {
    fn process(&mut self, c: &Coefficients, input: f64) -> f64 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

/// Stereo biquad filter
#[derive(Debug, Clone)]
pub struct Filter {
    filter_type: FilterType,
    sample_rate: f64,
    cutoff: f64,
    resonance: f64, // Q factor

    coeffs: Coefficients,
    channels: [ChannelState; 2],
}

impl Filter {
    /// Create a new low-pass filter
    pub fn new(sample_rate: f64) -> Self {
        Self::with_type(sample_rate, FilterType::LowPass)
    }

    /// Create a filter with specific type
    pub fn with_type(sample_rate: f64, filter_type: FilterType) -> Self {
        let mut filter = Self {
            filter_type,
            sample_rate,
            cutoff: 1000.0,
            resonance: 0.707,
            coeffs: Coefficients::default(),
            channels: [ChannelState::default(); 2],
        };
        filter.calculate_coefficients();
        filter
    }

    /// Set type, cutoff and Q together, recomputing coefficients once
    pub fn configure(&mut self, filter_type: FilterType, cutoff: f64, q: f64) {
        self.filter_type = filter_type;
        self.cutoff = self.clamp_cutoff(cutoff);
        self.resonance = clamp_q(q);
        self.calculate_coefficients();
    }

    fn clamp_cutoff(&self, hz: f64) -> f64 {
        // Stay clear of Nyquist for stability
        let ceiling = (self.sample_rate * 0.49).min(20000.0);
        if hz.is_finite() {
            hz.clamp(20.0, ceiling)
        } else {
            ceiling
        }
    }

    /// Set cutoff frequency in Hz
    pub fn set_cutoff(&mut self, hz: f64) {
        let cutoff = self.clamp_cutoff(hz);
        if cutoff != self.cutoff {
            self.cutoff = cutoff;
            self.calculate_coefficients();
        }
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Set resonance (Q factor)
    pub fn set_resonance(&mut self, q: f64) {
        let q = clamp_q(q);
        if q != self.resonance {
            self.resonance = q;
            self.calculate_coefficients();
        }
    }

    pub fn resonance(&self) -> f64 {
        self.resonance
    }

    pub fn set_type(&mut self, filter_type: FilterType) {
        if filter_type != self.filter_type {
            self.filter_type = filter_type;
            self.calculate_coefficients();
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Reset filter state (clear history)
    pub fn reset(&mut self) {
        self.channels = [ChannelState::default(); 2];
    }

    /// Calculate biquad coefficients based on current parameters
    fn calculate_coefficients(&mut self) {
        let omega = 2.0 * PI * self.cutoff / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * self.resonance);

        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        let (b0, b1, b2) = match self.filter_type {
            FilterType::LowPass => {
                let b = (1.0 - cos_omega) / 2.0;
                (b, 1.0 - cos_omega, b)
            }
            FilterType::HighPass => {
                let b = (1.0 + cos_omega) / 2.0;
                (b, -(1.0 + cos_omega), b)
            }
            FilterType::BandPass => (alpha, 0.0, -alpha),
            FilterType::Notch => (1.0, -2.0 * cos_omega, 1.0),
        };

        // Normalize by a0
        self.coeffs = Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
    }

    /// Process one mono sample (left channel history)
    pub fn process(&mut self, input: f64) -> f64 {
        self.channels[0].process(&self.coeffs, input)
    }

    /// Process one stereo frame
    pub fn process_stereo(&mut self, left: f64, right: f64) -> (f64, f64) {
        let c = self.coeffs;
        (
            self.channels[0].process(&c, left),
            self.channels[1].process(&c, right),
        )
    }
}

fn clamp_q(q: f64) -> f64 {
    if q.is_finite() {
        q.clamp(0.1, 20.0)
    } else {
        0.707
    }
}
