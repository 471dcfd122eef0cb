use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TranslateConfig;
use crate::error::{Result, SubforgeError};
use crate::subtitle::SubtitleSegment;
use super::TranslationProvider;
use super::response::{self, ResponseError};

/// Batches above this size are halved when the model abbreviates its answer
const SPLIT_THRESHOLD: usize = 50;

enum BatchOutcome {
    Translated(Vec<String>),
    Split,
}

/// Translates subtitle segments batch by batch through a provider
pub struct SubtitleTranslator {
    provider: Arc<dyn TranslationProvider>,
    source_language: Option<String>,
    target_language: String,
    max_lines_per_batch: usize,
    max_retries: u32,
    timeout: Duration,
    backoff_base: Duration,
    repetition_threshold: usize,
}

impl SubtitleTranslator {
    pub fn new(provider: Arc<dyn TranslationProvider>, config: &TranslateConfig) -> Self {
        Self {
            provider,
            source_language: match config.source_language.trim() {
                "" | "auto" => None,
                other => Some(other.to_string()),
            },
            target_language: config.target_language.clone(),
            max_lines_per_batch: config.max_lines_per_batch.max(1),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            repetition_threshold: config.repetition_threshold,
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Fill `translated_text` on every segment.
    ///
    /// `progress` receives (translated, total) after each batch. `should_stop` is
    /// polled before every batch; a stop request ends with `SubforgeError::Cancelled`.
    pub async fn translate_segments(
        &self,
        segments: &mut [SubtitleSegment],
        progress: &(dyn Fn(usize, usize) + Send + Sync),
        should_stop: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        let total = segments.len();
        let mut pending: VecDeque<Range<usize>> = (0..total)
            .step_by(self.max_lines_per_batch)
            .map(|start| start..(start + self.max_lines_per_batch).min(total))
            .collect();

        info!(
            "Translating {} segments to {} in {} batches",
            total,
            self.target_language,
            pending.len()
        );

        let mut translated = 0;
        while let Some(range) = pending.pop_front() {
            if should_stop() {
                info!("Translation stopped with {}/{} segments done", translated, total);
                return Err(SubforgeError::Cancelled);
            }

            let lines: Vec<&str> = segments[range.clone()]
                .iter()
                .map(|s| s.source_text.as_str())
                .collect();
            let before = range.start.checked_sub(1).map(|i| segments[i].source_text.as_str());
            let after = segments.get(range.end).map(|s| s.source_text.as_str());

            match self.translate_batch(&lines, before, after).await? {
                BatchOutcome::Translated(texts) => {
                    for (segment, text) in segments[range.clone()].iter_mut().zip(texts) {
                        segment.translated_text = Some(text);
                    }
                    translated += range.len();
                    progress(translated, total);
                }
                BatchOutcome::Split => {
                    let mid = range.start + range.len() / 2;
                    info!(
                        "Splitting abbreviated batch {}-{} at {}",
                        range.start + 1,
                        range.end,
                        mid + 1
                    );
                    pending.push_front(mid..range.end);
                    pending.push_front(range.start..mid);
                }
            }
        }

        Ok(())
    }

    async fn translate_batch(
        &self,
        lines: &[&str],
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<BatchOutcome> {
        let prompt = response::build_batch_prompt(
            lines,
            self.source_language.as_deref(),
            &self.target_language,
            before,
            after,
        );
        let attempts = self.max_retries + 1;
        let mut last_error = SubforgeError::Translation("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff_base * attempt;
                warn!(
                    "Retrying batch of {} lines in {:?} (attempt {}/{}): {}",
                    lines.len(),
                    delay,
                    attempt + 1,
                    attempts,
                    last_error
                );
                tokio::time::sleep(delay).await;
            }

            let reply = match tokio::time::timeout(self.timeout, self.provider.translate(&prompt)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) if e.is_transient() => {
                    last_error = e;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = SubforgeError::ProviderTimeout(self.timeout.as_secs());
                    continue;
                }
            };

            match response::parse_translation_response(&reply, lines.len()) {
                Ok(texts) => match self.find_repetition(lines, &texts) {
                    Some(artifact) => last_error = SubforgeError::Repetition(artifact),
                    None => {
                        debug!("Batch of {} lines translated on attempt {}", lines.len(), attempt + 1);
                        return Ok(BatchOutcome::Translated(texts));
                    }
                },
                Err(ResponseError::Abbreviated) if lines.len() > SPLIT_THRESHOLD => {
                    return Ok(BatchOutcome::Split);
                }
                Err(e) => last_error = SubforgeError::Format(e.to_string()),
            }
        }

        Err(SubforgeError::Translation(format!(
            "Batch of {} lines failed after {} attempts: {}",
            lines.len(),
            attempts,
            last_error
        )))
    }

    fn find_repetition(&self, sources: &[&str], translations: &[String]) -> Option<String> {
        sources
            .iter()
            .zip(translations)
            .enumerate()
            .find_map(|(i, (source, translation))| {
                response::repetition_artifact(source, translation, self.repetition_threshold)
                    .map(|artifact| format!("line {}: {}", i + 1, artifact))
            })
    }
}
