//! WAV recorder
//!
//! Captures the post-limiter output in fixed-size blocks and encodes the
//! session as 16-bit stereo PCM when it stops.

use crate::error::{EngineError, EngineResult};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

/// Default frames per captured block
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Fixed-size staging block between the mixer and the recorder
///
/// The storage is reused for every block; the recorder copies out of it.
pub struct RecordingTap {
    block_size: usize,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl RecordingTap {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            left: Vec::with_capacity(block_size),
            right: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Stage one frame; returns true when the block is full
    pub fn push(&mut self, frame: [f64; 2]) -> bool {
        self.left.push(frame[0] as f32);
        self.right.push(frame[1] as f32);
        self.left.len() >= self.block_size
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Hand the staged frames to the recorder and reset for the next block
    pub fn flush_into(&mut self, recorder: &mut Recorder) {
        if !self.left.is_empty() {
            recorder.capture(&self.left, &self.right);
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

/// An in-progress recording
struct Session {
    sample_rate: u32,
    left: Vec<Vec<f32>>,
    right: Vec<Vec<f32>>,
    frames: u64,
}

/// Manual session recorder
#[derive(Default)]
pub struct Recorder {
    session: Option<Session>,
    bytes: Option<Vec<u8>>,
    last_frames: u64,
    last_sample_rate: u32,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new session, discarding the previous recording's bytes
    pub fn start(&mut self, sample_rate: u32) -> EngineResult<()> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyRecording);
        }
        self.bytes = None;
        self.session = Some(Session {
            sample_rate,
            left: Vec::new(),
            right: Vec::new(),
            frames: 0,
        });
        log::info!("recording started at {} Hz", sample_rate);
        Ok(())
    }

    /// Copy one block of frames into the session
    pub fn capture(&mut self, left: &[f32], right: &[f32]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let frames = left.len().min(right.len());
        session.left.push(left[..frames].to_vec());
        session.right.push(right[..frames].to_vec());
        session.frames += frames as u64;
    }

    /// Finish the session and encode it
    pub fn stop(&mut self) -> EngineResult<&[u8]> {
        let session = self.session.take().ok_or(EngineError::NotRecording)?;
        let left = session.left.concat();
        let right = session.right.concat();
        let bytes = encode_wav(&left, &right, session.sample_rate)?;

        self.last_frames = session.frames;
        self.last_sample_rate = session.sample_rate;
        log::info!(
            "recording stopped: {} frames, {} bytes",
            session.frames,
            bytes.len()
        );
        Ok(self.bytes.insert(bytes).as_slice())
    }

    /// Encoded bytes of the last finished recording
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Frames captured in the current (or last) session
    pub fn frames_captured(&self) -> u64 {
        self.session.as_ref().map_or(self.last_frames, |s| s.frames)
    }

    pub fn duration_secs(&self) -> f64 {
        let rate = self
            .session
            .as_ref()
            .map_or(self.last_sample_rate, |s| s.sample_rate);
        if rate == 0 {
            0.0
        } else {
            self.frames_captured() as f64 / rate as f64
        }
    }

    /// Write the last recording to disk
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let bytes = self.bytes().ok_or(EngineError::NotRecording)?;
        std::fs::write(path, bytes)?;
        log::info!("wrote {} bytes to {:?}", bytes.len(), path);
        Ok(())
    }
}

/// Float to signed 16-bit: negatives scale by 32768, positives by 32767
fn quantize(sample: f32) -> i16 {
    let s = f64::from(sample).clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode interleaved 16-bit stereo PCM with a canonical 44-byte header
pub fn encode_wav(left: &[f32], right: &[f32], sample_rate: u32) -> EngineResult<Vec<u8>> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for (&l, &r) in left.iter().zip(right) {
            writer.write_sample(quantize(l))?;
            writer.write_sample(quantize(r))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
