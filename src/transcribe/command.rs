use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SubforgeError};

/// External tool invocation (ffmpeg, whisper-cli)
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            timeout: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a flag followed by its value
    pub fn opt<S1: Into<String>, S2: ToString>(self, flag: S1, value: S2) -> Self {
        self.arg(flag).arg(value.to_string())
    }

    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run to completion and return stdout. A non-zero exit is an error carrying stderr.
    pub async fn execute(&self) -> Result<String> {
        debug!("Executing {}: {} {:?}", self.description, self.binary_path, self.args);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args).kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    SubforgeError::Transcription(format!(
                        "{} timed out after {}s",
                        self.description,
                        limit.as_secs()
                    ))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            SubforgeError::Transcription(format!("Failed to execute {}: {}", self.binary_path, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubforgeError::Transcription(format!(
                "{} failed: {}",
                self.description,
                last_lines(&stderr, 5)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Build the ffmpeg call producing 16 kHz mono PCM for whisper
pub fn extract_audio<P: AsRef<Path>>(ffmpeg_path: &str, video_path: P, audio_path: P) -> ToolCommand {
    ToolCommand::new(ffmpeg_path, "Audio extraction")
        .arg("-nostdin")
        .arg("-i")
        .path(video_path)
        .arg("-vn")
        .opt("-acodec", "pcm_s16le")
        .opt("-ar", 16000)
        .opt("-ac", 1)
        .arg("-y")
        .path(audio_path)
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}
