//! # Waveprint
//!
//! A Rust library for audio content identification: given a short noisy
//! audio snippet (roughly 1-20 seconds), it finds the original reference
//! recording in a database of fingerprinted audio and reports a
//! confidence-ranked match with an estimated time cue.
//!
//! The engine is made of three subsystems:
//!
//! - Fingerprint extraction: a spectro-temporal pipeline turning raw mono
//!   11025 Hz PCM into a stream of local fingerprints (LFs).
//! - Inverted index: a term -> postings-list store with delta-encoded,
//!   vbyte-compressed block payloads, streamed to a pluggable key-value
//!   backend through the [`store::DataStore`] trait.
//! - Matcher/recognizer: a two-pass search (document-at-a-time posting
//!   intersection with time-binned histogram scoring, plus an optional
//!   pair-wise geodesic hashing re-ranking) finalized by a fuzzy or binary
//!   classifier.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use waveprint::{Indexer, IndexerConfig, Recognizer, RecognizerConfig};
//! use waveprint::audio::FileAudioProvider;
//! use waveprint::store::MemoryStore;
//!
//! # fn main() -> waveprint::Result<()> {
//! let store = Rc::new(RefCell::new(MemoryStore::new()));
//!
//! // Index a reference recording.
//! let mut indexer = Indexer::new(store.clone(), IndexerConfig::default())?;
//! let mut provider = FileAudioProvider::open("reference.mp3")?;
//! indexer.start()?;
//! indexer.index(1, &mut provider)?;
//! indexer.end(true)?;
//!
//! // Identify a snippet.
//! let mut recognizer = Recognizer::new(store, RecognizerConfig::default())?;
//! let snippet = vec![0.0f32; 11025];
//! recognizer.identify(&snippet)?;
//! if let Some(matches) = recognizer.results() {
//!     for m in matches {
//!         println!("FID {} at {:.1}s ({:?})", m.fid, m.cue_point, m.id_class);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod params;
pub mod config;
pub mod store;
pub mod output;
pub mod audio;
pub mod synth;

// Fingerprint extraction subsystem
pub mod fingerprinting {
    pub mod audio_buffer;
    pub mod fft;
    pub mod fingerprinter;
    pub mod codebook;
}

// Inverted index subsystem
pub mod index {
    pub mod codec;
    pub mod indexer;
    pub mod postings;
}

// Matching and classification subsystem
pub mod matching {
    pub mod matcher;
    pub mod classifier;
    pub mod recognizer;
}

pub use config::{IdMode, IdType, IndexerConfig, MatchType, RecognizerConfig};
pub use fingerprinting::codebook::Codebook;
pub use fingerprinting::fingerprinter::{Fingerprinter, LocalFingerprint};
pub use index::indexer::Indexer;
pub use matching::recognizer::{IdClass, IdMatch, Recognizer};
pub use output::{IdOutput, OutputFormat};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug)]
pub enum Error {
    /// Bad configuration values or invalid arguments at an API boundary.
    InvalidParameter(String),
    /// Indexer method called in the wrong session state.
    InvalidIndexerState(String),
    /// Missing, zero-sized or corrupt fingerprint data. Recoverable per
    /// file during indexing, fatal to the session during identification.
    InvalidFingerprint(String),
    /// Posting data received from the store failed to decode. Always fatal
    /// to the session: the index is inconsistent.
    InvalidIndexData(String),
    /// The embedded or loaded codebook failed to deserialize.
    InvalidAudioCodes(String),
    /// The query LF stream has non-contiguous IDs.
    InvalidMatchSequence(String),
    /// Audio decoding or provider failure at the input boundary.
    Audio(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::InvalidIndexerState(msg) => write!(f, "Invalid indexer state: {}", msg),
            Error::InvalidFingerprint(msg) => write!(f, "Invalid fingerprint: {}", msg),
            Error::InvalidIndexData(msg) => write!(f, "Invalid index data: {}", msg),
            Error::InvalidAudioCodes(msg) => write!(f, "Invalid audio codes: {}", msg),
            Error::InvalidMatchSequence(msg) => write!(f, "Invalid match sequence: {}", msg),
            Error::Audio(msg) => write!(f, "Audio error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for the library
pub type Result<T> = std::result::Result<T, Error>;
