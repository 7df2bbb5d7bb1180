//! polyslot - multi-slot sampler and additive synth engine
//!
//! Sixteen sample slots with ADSR, loop regions and filters, a 16-partial
//! additive synth, four global LFOs, a shared delay/reverb bus and a WAV
//! recorder, all driven from one `Engine`.

pub mod config;
pub mod engine;
pub mod error;
pub mod synth;

pub use config::{EngineConfig, ProjectState};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
