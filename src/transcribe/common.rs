use serde::{Deserialize, Serialize};

use crate::error::{Result, SubforgeError};
use crate::subtitle::SubtitleSegment;

// Structs for parsing whisper.cpp JSON output (`-oj`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    #[serde(default)]
    pub result: Option<WhisperCppResult>,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    /// Milliseconds
    pub from: i64,
    pub to: i64,
}

/// Transcribed segments plus the language the model settled on
#[derive(Debug, Clone)]
pub struct Transcript {
    pub language: Option<String>,
    pub segments: Vec<SubtitleSegment>,
}

impl WhisperCppOutput {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SubforgeError::Transcription(format!("Failed to parse whisper output: {}", e)))
    }
}

impl From<WhisperCppOutput> for Transcript {
    fn from(output: WhisperCppOutput) -> Self {
        let segments = output
            .transcription
            .into_iter()
            .map(|seg| (seg.offsets, seg.text.trim().to_string()))
            .filter(|(_, text)| !text.is_empty())
            .enumerate()
            .map(|(idx, (offsets, text))| {
                SubtitleSegment::new(
                    idx + 1,
                    offsets.from as f64 / 1000.0, // Convert ms to seconds
                    offsets.to as f64 / 1000.0,
                    text,
                )
            })
            .collect();

        Transcript {
            language: output.result.map(|r| r.language),
            segments,
        }
    }
}
