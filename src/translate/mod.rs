// Translation
//
// Providers only turn a prompt into text. Batching, response validation and
// retries live in `SubtitleTranslator`, so every provider gets the same behavior.

pub mod provider;
pub mod response;
pub mod subtitle_translator;

use async_trait::async_trait;
use std::sync::Arc;

pub use provider::{OllamaProvider, OpenAiCompatibleProvider};
pub use subtitle_translator::SubtitleTranslator;
use crate::config::{ProviderKind, TranslateConfig};
use crate::error::Result;

/// An LLM endpoint able to answer a translation prompt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, prompt: &str) -> Result<String>;
}

/// Factory for creating provider instances
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create(config: &TranslateConfig) -> Arc<dyn TranslationProvider> {
        match config.provider {
            ProviderKind::OllamaNative => Arc::new(OllamaProvider::new(config)),
            _ => Arc::new(OpenAiCompatibleProvider::new(config)),
        }
    }

    /// Probe the configured provider without translating anything
    pub async fn health_check(config: &TranslateConfig) -> Result<()> {
        match config.provider {
            ProviderKind::OllamaNative => OllamaProvider::new(config).health_check().await,
            _ => OpenAiCompatibleProvider::new(config).health_check().await,
        }
    }
}
