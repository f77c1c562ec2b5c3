use serde::{Deserialize, Serialize};

use crate::params;
use crate::{Error, Result};

/// Type of matching algorithm used to build and search the index.
///
/// The value set on the [`crate::Indexer`] determines the shape of the
/// index and must match the value set on the [`crate::Recognizer`] used to
/// search it. Mixing match types produces wrong recognitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// The standard single-term algorithm. High accuracy, slower at large
    /// scales.
    Mscale,
    /// A pair-term variant that trades some accuracy and a much bigger
    /// index for faster searches at large scales.
    Xscale,
}

/// Type of classification used by the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdType {
    /// Fuzzy logic classifier. More robust to noise, needs more audio.
    Fuzzy,
    /// Simple thresholded classification. Fast but more false positives,
    /// depending on the threshold.
    Binary,
}

/// Behavior of the fuzzy classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdMode {
    /// Tight requirements: robust to noise but slower to decide.
    Strict,
    /// Loose requirements: faster but more sensitive to noise.
    Easy,
}

/// Configuration for an identification session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Matching algorithm; must match the one used to build the index
    pub match_type: MatchType,

    /// Re-ranking aggressiveness in [0,1]: 0 disables the second matching
    /// level, 1 always collects the extra evidence
    pub mms: f32,

    /// Classification type
    pub id_type: IdType,

    /// Fuzzy classification mode
    pub id_mode: IdMode,

    /// Confidence threshold for binary identification, in [0.5, 1]
    pub binary_id_threshold: f32,

    /// Minimum listening time before binary results are returned, in [0, 20] seconds
    pub binary_id_min_time: f32,

    /// Maximum (or expected) duration of the indexed recordings in seconds;
    /// sizes the matcher's time histograms
    pub max_recording_duration: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            match_type: MatchType::Mscale,
            mms: 0.5,
            id_type: IdType::Fuzzy,
            id_mode: IdMode::Easy,
            binary_id_threshold: 0.6,
            binary_id_min_time: 0.0,
            max_recording_duration: params::DEFAULT_MAX_RECORDING_DURATION,
        }
    }
}

impl RecognizerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the matching algorithm
    pub fn with_match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = match_type;
        self
    }

    /// Set the re-ranking threshold (MMS)
    pub fn with_mms(mut self, mms: f32) -> Self {
        self.mms = mms;
        self
    }

    /// Set the classification type
    pub fn with_id_type(mut self, id_type: IdType) -> Self {
        self.id_type = id_type;
        self
    }

    /// Set the fuzzy classification mode
    pub fn with_id_mode(mut self, id_mode: IdMode) -> Self {
        self.id_mode = id_mode;
        self
    }

    /// Set the binary identification threshold
    pub fn with_binary_id_threshold(mut self, threshold: f32) -> Self {
        self.binary_id_threshold = threshold;
        self
    }

    /// Set the minimum binary identification time
    pub fn with_binary_id_min_time(mut self, seconds: f32) -> Self {
        self.binary_id_min_time = seconds;
        self
    }

    /// Set the maximum recording duration
    pub fn with_max_recording_duration(mut self, seconds: u32) -> Self {
        self.max_recording_duration = seconds;
        self
    }

    /// Check all values against their legal ranges. Out-of-range values
    /// are rejected, not clamped.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mms) {
            return Err(Error::InvalidParameter(format!(
                "mms must be in [0,1], got {}",
                self.mms
            )));
        }
        if !(0.5..=1.0).contains(&self.binary_id_threshold) {
            return Err(Error::InvalidParameter(format!(
                "binary_id_threshold must be in [0.5,1], got {}",
                self.binary_id_threshold
            )));
        }
        if !(0.0..=params::MAX_ID_TIME).contains(&self.binary_id_min_time) {
            return Err(Error::InvalidParameter(format!(
                "binary_id_min_time must be in [0,{}], got {}",
                params::MAX_ID_TIME,
                self.binary_id_min_time
            )));
        }
        if self.max_recording_duration == 0 {
            return Err(Error::InvalidParameter(
                "max_recording_duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: RecognizerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration for an indexing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Matching algorithm the index is built for
    pub match_type: MatchType,

    /// Memory limit of the postings cache in MB; the cache is flushed to
    /// the store when the limit is exceeded
    pub cache_limit_mb: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            match_type: MatchType::Mscale,
            cache_limit_mb: 128,
        }
    }
}

impl IndexerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the matching algorithm
    pub fn with_match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = match_type;
        self
    }

    /// Set the cache memory limit in MB
    pub fn with_cache_limit_mb(mut self, limit: usize) -> Self {
        self.cache_limit_mb = limit;
        self
    }

    /// Check all values against their legal ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cache_limit_mb == 0 {
            return Err(Error::InvalidParameter(
                "cache_limit_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = RecognizerConfig::default();
        assert_eq!(config.match_type, MatchType::Mscale);
        assert_eq!(config.mms, 0.5);
        assert_eq!(config.binary_id_threshold, 0.6);
        assert!(config.validate().is_ok());

        let config = IndexerConfig::default();
        assert_eq!(config.cache_limit_mb, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(RecognizerConfig::new().with_mms(1.2).validate().is_err());
        assert!(RecognizerConfig::new().with_mms(-0.1).validate().is_err());
        assert!(RecognizerConfig::new()
            .with_binary_id_threshold(0.3)
            .validate()
            .is_err());
        assert!(RecognizerConfig::new()
            .with_binary_id_min_time(25.0)
            .validate()
            .is_err());
        assert!(RecognizerConfig::new()
            .with_max_recording_duration(0)
            .validate()
            .is_err());
        assert!(IndexerConfig::new()
            .with_cache_limit_mb(0)
            .validate()
            .is_err());
    }
}
