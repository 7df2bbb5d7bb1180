//! Configuration schema definitions

use crate::engine::MAX_SLOTS;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Audio settings
    #[serde(default)]
    pub audio: AudioConfig,

    /// Master bus settings
    #[serde(default)]
    pub master: MasterConfig,

    /// Recorder settings
    #[serde(default)]
    pub recorder: RecorderConfig,

    /// Number of empty slots created at startup (default: 4)
    #[serde(default = "default_slots")]
    pub slots: usize,

    /// Seed for LFO random shapes and the reverb impulse
    #[serde(default)]
    pub seed: u64,

    /// Directory that sample keys are resolved against
    #[serde(default)]
    pub sample_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            master: MasterConfig::default(),
            recorder: RecorderConfig::default(),
            slots: default_slots(),
            seed: 0,
            sample_dir: None,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate < 8000 || self.audio.sample_rate > 192000 {
            bail!("Sample rate must be between 8000 and 192000");
        }
        if self.audio.block_size < 64 || self.audio.block_size > 8192 {
            bail!("Block size must be between 64 and 8192");
        }
        if !(self.audio.control_rate >= 1.0 && self.audio.control_rate <= 1000.0) {
            bail!("Control rate must be between 1 and 1000 Hz");
        }
        if !(0.0..=1.0).contains(&self.master.volume) {
            bail!("Master volume must be between 0.0 and 1.0");
        }
        if self.recorder.block_size < 64 || self.recorder.block_size > 65536 {
            bail!("Recorder block size must be between 64 and 65536");
        }
        if self.slots > MAX_SLOTS {
            bail!("At most {} slots are supported, got {}", MAX_SLOTS, self.slots);
        }

        Ok(())
    }
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames rendered per call when rendering offline (default: 512)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// LFO and modulation updates per second (default: 60)
    #[serde(default = "default_control_rate")]
    pub control_rate: f64,

    /// Output device name (None = default device)
    #[serde(default)]
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            control_rate: default_control_rate(),
            device: None,
        }
    }
}

fn default_sample_rate() -> u32 {
    44100
}
fn default_block_size() -> usize {
    512
}
fn default_control_rate() -> f64 {
    60.0
}
fn default_slots() -> usize {
    4
}

/// Master bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Master volume 0.0-1.0 (default: 0.8)
    #[serde(default = "default_volume")]
    pub volume: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
        }
    }
}

fn default_volume() -> f64 {
    0.8
}

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Frames per captured block (default: 4096)
    #[serde(default = "default_recorder_block")]
    pub block_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            block_size: default_recorder_block(),
        }
    }
}

fn default_recorder_block() -> usize {
    crate::engine::DEFAULT_BLOCK_SIZE
}
