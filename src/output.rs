use crate::matching::recognizer::{IdClass, IdMatch};

/// Output format for identification results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per match
    Simple,
    /// Full JSON with all fields
    Json,
    /// CSV format for logging
    Csv,
}

/// Formatted identification output
#[derive(Debug, Clone)]
pub struct IdOutput {
    pub format: OutputFormat,
    pub content: String,
}

impl IdOutput {
    /// Format an identification result set according to the specified
    /// format. An empty result set means the audio was not identified.
    pub fn format_matches(matches: &[IdMatch], format: OutputFormat) -> Self {
        let content = match format {
            OutputFormat::Simple => {
                if matches.is_empty() {
                    "no match".to_string()
                } else {
                    matches
                        .iter()
                        .map(|m| {
                            format!(
                                "FID {} {} at {:.1}s (confidence {:.2}, score {})",
                                m.fid,
                                class_name(m.id_class),
                                m.cue_point,
                                m.confidence,
                                m.score
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            OutputFormat::Json => {
                serde_json::to_string(matches).unwrap_or_else(|_| "[]".to_string())
            }
            OutputFormat::Csv => matches
                .iter()
                .map(|m| {
                    format!(
                        "{},{},{:.3},{},{:.2}",
                        m.fid,
                        class_name(m.id_class),
                        m.confidence,
                        m.score,
                        m.cue_point
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };

        IdOutput { format, content }
    }

    /// Get CSV header
    pub fn csv_header() -> &'static str {
        "fid,class,confidence,score,cue_point"
    }
}

fn class_name(class: IdClass) -> &'static str {
    match class {
        IdClass::Unidentified => "unidentified",
        IdClass::SoundsLike => "sounds like",
        IdClass::Identified => "identified",
    }
}

impl std::fmt::Display for IdOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}
