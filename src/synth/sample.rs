//! Decoded sample buffers
//!
//! Buffers are immutable once built and shared through `Arc`. Each carries a
//! unique id so derived data (the reversed copy) can be memoized per buffer.

use crate::error::{EngineError, EngineResult};
use hound::{SampleFormat, WavReader};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a decoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Decoded PCM audio, one `Vec<f32>` per channel
#[derive(Debug)]
pub struct SampleBuffer {
    id: BufferId,
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Build from per-channel data; all channels must have the same length
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> EngineResult<Self> {
        if sample_rate == 0 {
            return Err(EngineError::InvalidSample("sample rate is zero".into()));
        }
        let Some(first) = channels.first() else {
            return Err(EngineError::InvalidSample("no channels".into()));
        };
        if first.is_empty() {
            return Err(EngineError::InvalidSample("no frames".into()));
        }
        if channels.iter().any(|c| c.len() != first.len()) {
            return Err(EngineError::InvalidSample("channel lengths differ".into()));
        }

        Ok(Self {
            id: BufferId::next(),
            sample_rate,
            channels,
        })
    }

    /// Build from interleaved frames
    pub fn from_interleaved(
        sample_rate: u32,
        channel_count: usize,
        samples: &[f32],
    ) -> EngineResult<Self> {
        if channel_count == 0 {
            return Err(EngineError::InvalidSample("no channels".into()));
        }
        let mut channels = vec![Vec::with_capacity(samples.len() / channel_count); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    /// Decode a WAV file
    pub fn from_wav_path(path: &Path) -> EngineResult<Self> {
        let buffer = decode_wav(WavReader::open(path)?)?;
        log::debug!(
            "decoded {:?}: {} ch, {} Hz, {:.2}s",
            path,
            buffer.channel_count(),
            buffer.sample_rate(),
            buffer.duration()
        );
        Ok(buffer)
    }

    /// Decode WAV data from any reader
    pub fn from_wav_reader<R: Read>(reader: R) -> EngineResult<Self> {
        decode_wav(WavReader::new(reader)?)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_mono(&self) -> bool {
        self.channels.len() == 1
    }

    /// Length in frames
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// A time-reversed copy with its own identity
    pub fn reversed(&self) -> SampleBuffer {
        let channels = self
            .channels
            .iter()
            .map(|c| c.iter().rev().copied().collect())
            .collect();

        SampleBuffer {
            id: BufferId::next(),
            sample_rate: self.sample_rate,
            channels,
        }
    }

    /// Read a stereo frame at a fractional frame position (linear interpolation)
    ///
    /// Mono buffers return the same value on both sides; positions outside the
    /// buffer read as silence.
    pub fn frame_at(&self, position: f64) -> (f64, f64) {
        if !(position >= 0.0) {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        let frames = self.frames();
        if index >= frames {
            return (0.0, 0.0);
        }
        let frac = position - index as f64;
        let read = |channel: &[f32]| {
            let a = channel[index] as f64;
            let b = channel.get(index + 1).copied().unwrap_or(0.0) as f64;
            a + (b - a) * frac
        };

        let left = read(self.channels[0].as_slice());
        let right = self.channels.get(1).map_or(left, |c| read(c.as_slice()));
        (left, right)
    }
}

fn decode_wav<R: Read>(reader: WavReader<R>) -> EngineResult<SampleBuffer> {
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };
    SampleBuffer::from_interleaved(spec.sample_rate, spec.channels as usize, &samples)
}

/// Decoded buffers addressable by sample key
#[derive(Default)]
pub struct SampleLibrary {
    buffers: HashMap<String, Arc<SampleBuffer>>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer, replacing any previous one under the same key
    pub fn insert(&mut self, key: impl Into<String>, buffer: SampleBuffer) -> Arc<SampleBuffer> {
        let buffer = Arc::new(buffer);
        self.buffers.insert(key.into(), Arc::clone(&buffer));
        buffer
    }

    pub fn get(&self, key: &str) -> Option<Arc<SampleBuffer>> {
        self.buffers.get(key).cloned()
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<SampleBuffer>> {
        self.buffers.remove(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.buffers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::NamedTempFile;

    #[test]
    fn test_rejects_malformed_buffers() {
        assert!(SampleBuffer::new(0, vec![vec![0.0]]).is_err());
        assert!(SampleBuffer::new(44100, vec![]).is_err());
        assert!(SampleBuffer::new(44100, vec![vec![]]).is_err());
        assert!(SampleBuffer::new(44100, vec![vec![0.0; 3], vec![0.0; 2]]).is_err());
    }

    #[test]
    fn test_interleaved_and_duration() {
        let buffer = SampleBuffer::from_interleaved(4, 2, &[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.duration(), 0.5);
        assert_eq!(buffer.channel(1).unwrap(), &[0.2, 0.4]);
    }

    #[test]
    fn test_reversed_has_new_identity() {
        let buffer = SampleBuffer::new(8000, vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let reversed = buffer.reversed();
        assert_ne!(buffer.id(), reversed.id());
        assert_eq!(reversed.channel(0).unwrap(), &[3.0, 2.0, 1.0]);
        assert_eq!(reversed.sample_rate(), 8000);
    }

    #[test]
    fn test_frame_at_interpolates() {
        let buffer = SampleBuffer::new(8000, vec![vec![0.0, 1.0, 0.0]]).unwrap();
        assert_eq!(buffer.frame_at(0.5), (0.5, 0.5));
        assert_eq!(buffer.frame_at(1.0), (1.0, 1.0));
        assert_eq!(buffer.frame_at(3.0), (0.0, 0.0));
        assert_eq!(buffer.frame_at(-1.0), (0.0, 0.0));
    }

    #[test]
    fn test_decodes_int_wav() {
        let file = NamedTempFile::new().unwrap();
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(file.path(), spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(-16384i16).unwrap();
        }
        writer.finalize().unwrap();

        let buffer = SampleBuffer::from_wav_path(file.path()).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 100);
        assert_eq!(buffer.sample_rate(), 22050);
        assert_eq!(buffer.frame_at(10.0), (0.5, -0.5));
    }

    #[test]
    fn test_decodes_float_wav_from_reader() {
        let mut bytes = std::io::Cursor::new(Vec::new());
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        {
            let mut writer = WavWriter::new(&mut bytes, spec).unwrap();
            for i in 0..10 {
                writer.write_sample(i as f32 / 10.0).unwrap();
            }
            writer.finalize().unwrap();
        }

        let buffer = SampleBuffer::from_wav_reader(std::io::Cursor::new(bytes.into_inner())).unwrap();
        assert!(buffer.is_mono());
        assert_eq!(buffer.frames(), 10);
        assert!((buffer.channel(0).unwrap()[3] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_library() {
        let mut library = SampleLibrary::new();
        let first = library.insert("b.wav", SampleBuffer::new(100, vec![vec![0.0]]).unwrap());
        library.insert("a.wav", SampleBuffer::new(100, vec![vec![0.0]]).unwrap());

        assert_eq!(library.keys(), vec!["a.wav".to_string(), "b.wav".to_string()]);
        assert_eq!(library.get("b.wav").unwrap().id(), first.id());
        assert!(library.get("missing").is_none());

        library.remove("a.wav");
        assert_eq!(library.len(), 1);
    }
}
