//! Identification sessions: fingerprint the incoming audio, match it
//! against the index and classify the evidence into a final answer.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{IdType, RecognizerConfig};
use crate::fingerprinting::audio_buffer::AudioBuffer;
use crate::fingerprinting::fingerprinter::Fingerprinter;
use crate::matching::classifier::{BinaryClassifier, Decision, FuzzyClassifier};
use crate::matching::matcher::Matcher;
use crate::params;
use crate::store::DataStore;
use crate::Result;

/// Identification class label attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdClass {
    /// No clear evidence of a match.
    Unidentified,
    /// Similarities exist but the confidence is low.
    SoundsLike,
    /// Clear evidence of a match with strong confidence.
    Identified,
}

/// An identified best match.
///
/// The cue point is an estimate: the engine matches perceptual
/// similarities, and a recording may contain several perceptually
/// identical parts (refrains are the common case), so the reported time
/// point may be any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMatch {
    /// The matched fingerprint's identifier.
    pub fid: u32,
    /// Confidence of match in [0,1].
    pub confidence: f32,
    /// Accumulated match score.
    pub score: f32,
    /// Classification label.
    pub id_class: IdClass,
    /// Estimated time point of the snippet within the recording, seconds.
    pub cue_point: f32,
}

/// An identification session over one audio stream.
///
/// Feed short chunks of audio (1-2 s; anything beyond the internal buffer
/// is dropped) with [`Recognizer::identify`] and poll
/// [`Recognizer::results`]: `None` means no decision yet, an empty slice
/// means unidentified, a non-empty slice holds the best match(es) with
/// ties. Sessions are single-threaded; call [`Recognizer::reset`] before
/// reusing an instance.
pub struct Recognizer<S: DataStore> {
    matcher: Matcher<S>,
    fingerprinter: Fingerprinter,
    buffer: AudioBuffer,
    config: RecognizerConfig,
    fuzzy: FuzzyClassifier,
    binary: BinaryClassifier,
    results: Option<Vec<IdMatch>>,
    /// Duration of the audio fed to the engine so far, in seconds.
    id_time: f64,
}

impl<S: DataStore> Recognizer<S> {
    /// Create a recognizer reading from the given store.
    pub fn new(store: S, config: RecognizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            matcher: Matcher::new(store, &config)?,
            fingerprinter: Fingerprinter::new(),
            buffer: AudioBuffer::for_duration(2.0),
            fuzzy: FuzzyClassifier::new(config.id_mode),
            binary: BinaryClassifier::new(config.binary_id_threshold, config.binary_id_min_time),
            config,
            results: None,
            id_time: 0.0,
        })
    }

    /// Feed a chunk of audio (mono 11025 Hz floats in [-1,1]) to the
    /// identification. Chunks of 1-2 seconds work best; snippets shorter
    /// than 0.5 s are buffered until enough audio accumulates.
    pub fn identify(&mut self, audio: &[f32]) -> Result<()> {
        if self.results.is_some() {
            // a response was already given; reset to start a new session
            return Ok(());
        }

        let appended = self.buffer.append(audio);
        if appended < audio.len() {
            debug!(
                "audio buffer overflow: {} samples dropped",
                audio.len() - appended
            );
        }
        self.id_time += f64::from(appended as u32) / f64::from(params::FS);

        if f64::from(self.buffer.duration()) < 0.5 {
            return Ok(());
        }

        self.fingerprinter.process_buffer(&self.buffer, false)?;
        self.buffer.clear();

        let lfs = self.fingerprinter.take();
        let processed = self.matcher.process(&lfs)?;
        self.process_match_results(processed, false)
    }

    /// The current identification state: `None` while undecided, an empty
    /// slice for a negative answer, the best match(es) otherwise.
    pub fn results(&self) -> Option<&[IdMatch]> {
        self.results.as_deref()
    }

    /// Duration of the audio fed to the engine so far, in seconds.
    pub fn identification_time(&self) -> f64 {
        self.id_time
    }

    /// Force a matching step on the buffered residue. Useful on finite
    /// streams (files) when the stream ends before a decision; a session
    /// flushed without any collected evidence concludes unidentified.
    pub fn flush(&mut self) -> Result<()> {
        if self.results.is_some() {
            return Ok(());
        }
        let processed = self.matcher.flush()?;
        self.process_match_results(processed, true)
    }

    /// Reset the session state. Required between identifications reusing
    /// the same instance; idempotent.
    pub fn reset(&mut self) {
        self.matcher.reset();
        self.fingerprinter.reset();
        self.buffer.clear();
        self.results = None;
        self.id_time = 0.0;
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.matcher.store_mut()
    }

    /// Analyze the match state after a matcher step and classify.
    fn process_match_results(&mut self, processed: usize, flushed: bool) -> Result<()> {
        let elapsed = self.id_time;

        if processed == 0 && !flushed {
            return Ok(());
        }

        let top1 = self.matcher.results().top_score(1);
        if top1 == 0 {
            // no evidence at all yet
            if flushed || elapsed >= f64::from(params::MAX_ID_TIME) {
                self.results = Some(Vec::new());
            }
            return Ok(());
        }

        let top2 = self.matcher.results().top_score(2);
        let conf = (2.0 * top1 as f64) / (top1 + top2) as f64 - 1.0;

        let decision = match self.config.id_type {
            IdType::Binary => self.binary.process(conf, elapsed),
            IdType::Fuzzy => self.fuzzy.process(conf, elapsed),
        };
        debug!(
            "step {}: top1={} top2={} conf={:.3} elapsed={:.2}s -> {:?}",
            self.matcher.steps_count(),
            top1,
            top2,
            conf,
            elapsed,
            decision
        );

        match decision {
            Decision::Identified => self.fill_results(conf, IdClass::Identified),
            Decision::SoundsLike => self.fill_results(conf, IdClass::SoundsLike),
            Decision::Unidentified => self.results = Some(Vec::new()),
            Decision::Listening => {
                if elapsed >= f64::from(params::MAX_ID_TIME) {
                    self.results = Some(Vec::new());
                }
            }
        }
        Ok(())
    }

    /// Produce the result array from all candidates tied for the top
    /// score.
    fn fill_results(&mut self, conf: f64, id_class: IdClass) {
        let results = self.matcher.results();
        let score = results.top_score(1);
        let matches = results
            .top(1)
            .iter()
            .map(|&fid| IdMatch {
                fid,
                confidence: conf as f32,
                score: score as f32,
                id_class,
                cue_point: results
                    .candidates
                    .get(&fid)
                    .map(|c| c.t_match)
                    .unwrap_or(0.0),
            })
            .collect();
        self.results = Some(matches);
    }
}
