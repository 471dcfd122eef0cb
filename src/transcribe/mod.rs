// Transcription
//
// Turns the audio track of a video into timestamped subtitle segments. The
// queue only sees the `Transcriber` trait; whisper.cpp is the shipped backend.

pub mod command;
pub mod common;
pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;

pub use common::*;
use crate::config::TranscriberConfig;
use crate::error::Result;

/// Main trait for transcription operations
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio track of a video. `language` overrides the configured source language.
    async fn transcribe(&self, video_path: &Path, language: Option<&str>) -> Result<Transcript>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(config: TranscriberConfig) -> Box<dyn Transcriber> {
        Box::new(whisper_cpp::WhisperCppTranscriber::new(config))
    }
}
