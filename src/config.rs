use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, SubforgeError};
use crate::subtitle::EXPORT_FORMATS;

// Default values for optional translation settings
fn default_max_lines_per_batch() -> usize {
    500
}

fn default_repetition_threshold() -> usize {
    6
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_transcribe_timeout_secs() -> u64 {
    7200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root of the mounted media library
    pub root: PathBuf,
    /// Maximum directory depth explored below a chosen subdirectory
    pub scan_depth: usize,
    /// Extra subtitle formats written next to the SRT files (e.g. "vtt")
    pub export_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper.cpp command line binary
    pub binary_path: String,
    /// Path to the ffmpeg binary used for audio extraction
    pub ffmpeg_path: String,
    /// Path to the ggml whisper model
    pub model_path: PathBuf,
    /// Source language code, or "auto" for detection
    pub source_language: String,
    /// Number of decoding threads
    pub threads: usize,
    /// Content type used to pick voice activity detection parameters
    pub content_type: ContentType,
    /// Optional silero VAD model; VAD is disabled when unset
    pub vad_model_path: Option<PathBuf>,
    /// Limit for each ffmpeg and whisper run, 0 disables it
    #[serde(default = "default_transcribe_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Movies and series with clear dialogue
    Movie,
    /// Narration, news, interviews
    Documentary,
    /// Talk shows with laughter and applause
    Variety,
    /// Fast-paced animation
    Animation,
    /// Lectures and courses with long pauses
    Lecture,
    /// Music videos and concerts
    Music,
    /// User tuned
    Custom,
}

/// Voice activity detection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadParameters {
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub speech_pad_ms: u32,
}

impl ContentType {
    pub fn vad_parameters(&self) -> VadParameters {
        let (threshold, min_speech_duration_ms, min_silence_duration_ms, speech_pad_ms) = match self {
            Self::Movie | Self::Custom => (0.5, 250, 2000, 400),
            Self::Documentary => (0.45, 300, 1800, 500),
            Self::Variety => (0.6, 200, 2500, 300),
            Self::Animation => (0.4, 150, 1500, 350),
            Self::Lecture => (0.5, 400, 2500, 600),
            Self::Music => (0.7, 500, 3000, 200),
        };
        VadParameters {
            threshold,
            min_speech_duration_ms,
            min_silence_duration_ms,
            speech_pad_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Translate subtitles after transcription
    pub enabled: bool,
    /// Provider preset
    pub provider: ProviderKind,
    /// Provider base URL; empty means the preset default
    pub base_url: String,
    /// API key, unused by local Ollama
    pub api_key: String,
    /// Model name; empty means the preset default
    pub model: String,
    /// Target language code
    pub target_language: String,
    /// Language of the subtitles being translated, named in prompts unless "auto"
    pub source_language: String,
    /// Maximum subtitle lines sent in a single request
    #[serde(default = "default_max_lines_per_batch")]
    pub max_lines_per_batch: usize,
    /// Retries after the first attempt of a batch
    pub max_retries: u32,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Base delay for linear backoff between retries
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Consecutive repeats of a token or phrase tolerated in a translation
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama through its OpenAI-compatible endpoint
    Ollama,
    /// Local Ollama through the native /api/generate endpoint
    OllamaNative,
    DeepSeek,
    Gemini,
    Moonshot,
    Aliyun,
    Zhipu,
    OpenAi,
    /// Any OpenAI-compatible endpoint configured by hand
    Custom,
}

impl ProviderKind {
    /// Default (base_url, model) for the preset
    pub fn preset(&self) -> (&'static str, &'static str) {
        match self {
            Self::Ollama => ("http://localhost:11434/v1", "qwen2.5:7b"),
            Self::OllamaNative => ("http://localhost:11434", "qwen2.5:7b"),
            Self::DeepSeek => ("https://api.deepseek.com", "deepseek-chat"),
            Self::Gemini => (
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "gemini-1.5-flash",
            ),
            Self::Moonshot => ("https://api.moonshot.cn/v1", "moonshot-v1-8k"),
            Self::Aliyun => (
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
                "qwen-turbo",
            ),
            Self::Zhipu => ("https://open.bigmodel.cn/api/paas/v4", "glm-4-flash"),
            Self::OpenAi => ("https://api.openai.com/v1", "gpt-4o-mini"),
            Self::Custom => ("", ""),
        }
    }
}

impl TranslateConfig {
    pub fn effective_base_url(&self) -> String {
        let url = if self.base_url.trim().is_empty() {
            self.provider.preset().0
        } else {
            self.base_url.trim()
        };
        url.trim_end_matches('/').to_string()
    }

    pub fn effective_model(&self) -> String {
        if self.model.trim().is_empty() {
            self.provider.preset().1.to_string()
        } else {
            self.model.trim().to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite database holding jobs and settings
    pub database_path: PathBuf,
    /// Jobs processed at the same time
    pub concurrency: usize,
    /// Idle poll interval of the worker loop
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                root: PathBuf::from("/media"),
                scan_depth: 3,
                export_formats: vec!["srt".to_string()],
            },
            transcriber: TranscriberConfig {
                binary_path: "whisper-cli".to_string(),
                ffmpeg_path: "ffmpeg".to_string(),
                model_path: PathBuf::from("/data/models/ggml-base.bin"),
                source_language: "auto".to_string(),
                threads: 4,
                content_type: ContentType::Movie,
                vad_model_path: None,
                timeout_secs: default_transcribe_timeout_secs(),
            },
            translate: TranslateConfig {
                enabled: false,
                provider: ProviderKind::Ollama,
                base_url: String::new(),
                api_key: String::new(),
                model: String::new(),
                target_language: "zh".to_string(),
                source_language: "auto".to_string(),
                max_lines_per_batch: default_max_lines_per_batch(),
                max_retries: 3,
                timeout_secs: 180,
                backoff_base_ms: default_backoff_base_ms(),
                repetition_threshold: default_repetition_threshold(),
            },
            queue: QueueConfig {
                database_path: PathBuf::from("/data/subforge.db"),
                concurrency: 1,
                poll_interval_ms: 5000,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubforgeError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SubforgeError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SubforgeError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;

        std::fs::write(path, content)
            .map_err(|e| SubforgeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency == 0 {
            return Err(SubforgeError::Config("queue.concurrency must be at least 1".to_string()));
        }
        if self.translate.max_lines_per_batch == 0 {
            return Err(SubforgeError::Config(
                "translate.max_lines_per_batch must be at least 1".to_string(),
            ));
        }
        if let Some(format) = self
            .media
            .export_formats
            .iter()
            .find(|f| !EXPORT_FORMATS.contains(&f.trim().to_lowercase().as_str()))
        {
            return Err(SubforgeError::Config(format!(
                "media.export_formats: unsupported format {:?} (expected one of {})",
                format,
                EXPORT_FORMATS.join(", ")
            )));
        }
        if self.translate.enabled && self.translate.effective_base_url().is_empty() {
            return Err(SubforgeError::Config(
                "translate.base_url is required for the custom provider".to_string(),
            ));
        }
        Ok(())
    }
}
