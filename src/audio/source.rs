//! Audio file input boundary.
//!
//! The engine consumes mono 11025 Hz floats in [-1,1]; this module
//! bridges audio files (WAV/MP3/OGG/FLAC) to that format by decoding and
//! resampling them with rodio.

use std::io::BufReader;

use crate::store::AudioProvider;
use crate::params;
use crate::{Error, Result};

/// Pulls the decoded, resampled samples of an audio file. Implements
/// [`AudioProvider`] so files can be fed straight to the indexer.
pub struct FileAudioProvider {
    samples: Box<dyn Iterator<Item = i16>>,
}

impl FileAudioProvider {
    /// Open an audio file and set up decoding to mono 11025 Hz.
    pub fn open(file_path: &str) -> Result<Self> {
        if !std::path::Path::new(file_path).exists() {
            return Err(Error::Audio(format!("File not found: {}", file_path)));
        }

        let file = std::fs::File::open(file_path)
            .map_err(|e| Error::Audio(format!("Failed to open file '{}': {}", file_path, e)))?;

        let decoder = rodio::Decoder::new(BufReader::new(file)).map_err(|e| {
            Error::Audio(format!("Failed to decode audio file '{}': {}", file_path, e))
        })?;

        // Resample the raw PCM samples to the engine rate, mono
        let converted = rodio::source::UniformSourceIterator::new(decoder, 1, params::FS);

        Ok(Self {
            samples: Box::new(converted),
        })
    }

    /// Decode a whole file into a normalized sample buffer.
    pub fn load(file_path: &str) -> Result<Vec<f32>> {
        let provider = Self::open(file_path)?;
        let samples: Vec<f32> = provider.samples.map(|s| f32::from(s) / 32768.0).collect();
        if samples.is_empty() {
            return Err(Error::Audio(format!(
                "No audio samples could be extracted from file '{}'",
                file_path
            )));
        }
        Ok(samples)
    }
}

impl AudioProvider for FileAudioProvider {
    fn on_audio_data(&mut self, _fid: u32, buffer: &mut [f32]) -> Result<usize> {
        let mut written = 0;
        for slot in buffer.iter_mut() {
            match self.samples.next() {
                Some(s) => {
                    *slot = f32::from(s) / 32768.0;
                    written += 1;
                }
                None => break,
            }
        }
        Ok(written)
    }
}

/// An [`AudioProvider`] over an in-memory sample buffer, mainly for tests
/// and one-shot identifications.
pub struct BufferAudioProvider {
    samples: Vec<f32>,
    position: usize,
}

impl BufferAudioProvider {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }
}

impl AudioProvider for BufferAudioProvider {
    fn on_audio_data(&mut self, _fid: u32, buffer: &mut [f32]) -> Result<usize> {
        let remaining = self.samples.len() - self.position;
        let n = remaining.min(buffer.len());
        buffer[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}
