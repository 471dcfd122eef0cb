use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::TranscriberConfig;
use crate::error::{Result, SubforgeError};
use super::{Transcriber, command::{self, ToolCommand}, common::{Transcript, WhisperCppOutput}};

/// Transcriber backed by the whisper.cpp `whisper-cli` binary
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    /// Apply the configured run limit to a tool call
    fn limited(&self, cmd: ToolCommand) -> ToolCommand {
        match self.config.timeout_secs {
            0 => cmd,
            secs => cmd.timeout(Duration::from_secs(secs)),
        }
    }

    fn whisper_command(&self, audio_path: &Path, output_prefix: &Path, language: Option<&str>) -> ToolCommand {
        let language = language
            .or(Some(self.config.source_language.as_str()))
            .filter(|l| !l.is_empty())
            .unwrap_or("auto");

        let mut cmd = ToolCommand::new(&self.config.binary_path, "Whisper transcription")
            .arg("-m")
            .path(&self.config.model_path)
            .arg("-f")
            .path(audio_path)
            .opt("-l", language)
            .opt("-t", self.config.threads.max(1))
            .arg("-np")
            .arg("-oj")
            .arg("-of")
            .path(output_prefix);

        if let Some(vad_model) = &self.config.vad_model_path {
            let vad = self.config.content_type.vad_parameters();
            cmd = cmd
                .arg("--vad")
                .arg("--vad-model")
                .path(vad_model)
                .opt("--vad-threshold", vad.threshold)
                .opt("--vad-min-speech-duration-ms", vad.min_speech_duration_ms)
                .opt("--vad-min-silence-duration-ms", vad.min_silence_duration_ms)
                .opt("--vad-speech-pad-ms", vad.speech_pad_ms);
        }

        self.limited(cmd)
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, video_path: &Path, language: Option<&str>) -> Result<Transcript> {
        info!("Transcribing {}", video_path.display());

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubforgeError::Transcription(format!("Failed to create temp directory: {}", e)))?;
        let audio_path = temp_dir.path().join("audio.wav");
        let output_prefix = temp_dir.path().join("transcript");

        self.limited(command::extract_audio(&self.config.ffmpeg_path, video_path, audio_path.as_path()))
            .execute()
            .await?;

        self.whisper_command(&audio_path, &output_prefix, language)
            .execute()
            .await?;

        let json_file = output_prefix.with_extension("json");
        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| SubforgeError::Transcription(format!("Failed to read whisper output: {}", e)))?;

        let transcript: Transcript = WhisperCppOutput::parse(&json_content)?.into();
        if transcript.segments.is_empty() {
            return Err(SubforgeError::Transcription("No speech recognized".to_string()));
        }

        info!(
            "Transcribed {} segments (language: {})",
            transcript.segments.len(),
            transcript.language.as_deref().unwrap_or("unknown")
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    #[test]
    fn test_whisper_arguments_without_vad() {
        let transcriber = WhisperCppTranscriber::new(Config::default().transcriber);
        let cmd = transcriber.whisper_command(Path::new("/tmp/a.wav"), Path::new("/tmp/out"), Some("ja"));
        assert_eq!(cmd.binary_path, "whisper-cli");
        assert!(cmd.args.windows(2).any(|w| w == ["-l", "ja"]));
        assert!(cmd.args.windows(2).any(|w| w == ["-of", "/tmp/out"]));
        assert!(!cmd.args.contains(&"--vad".to_string()));
        assert_eq!(cmd.timeout, Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let mut config = Config::default().transcriber;
        config.timeout_secs = 0;
        let transcriber = WhisperCppTranscriber::new(config);
        let cmd = transcriber.whisper_command(Path::new("/tmp/a.wav"), Path::new("/tmp/out"), None);
        assert!(cmd.timeout.is_none());
    }

    #[test]
    fn test_whisper_arguments_with_vad() {
        let mut config = Config::default().transcriber;
        config.vad_model_path = Some(PathBuf::from("/models/silero.bin"));
        let transcriber = WhisperCppTranscriber::new(config);
        let cmd = transcriber.whisper_command(Path::new("/tmp/a.wav"), Path::new("/tmp/out"), None);
        assert!(cmd.args.windows(2).any(|w| w == ["-l", "auto"]));
        assert!(cmd.args.windows(2).any(|w| w == ["--vad-min-silence-duration-ms", "2000"]));
    }
}
