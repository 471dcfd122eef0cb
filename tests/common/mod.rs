#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use subforge::config::Config;
use subforge::error::{Result, SubforgeError};
use subforge::queue::{JobQueue, Pipeline, Store};
use subforge::subtitle::SubtitleSegment;
use subforge::transcribe::{Transcriber, Transcript};
use subforge::translate::{SubtitleTranslator, TranslationProvider};

/// Stand-in for whisper. The video file holds the number of segments to
/// produce; the word `unreadable` makes audio extraction fail.
#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: AtomicUsize,
    /// When set, every transcription waits for a permit
    pub gate: Option<Semaphore>,
}

impl FakeTranscriber {
    pub fn gated() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, video_path: &Path, _language: Option<&str>) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|e| SubforgeError::Transcription(e.to_string()))?.forget();
        }

        let content = tokio::fs::read_to_string(video_path).await?;
        if content.trim() == "unreadable" {
            return Err(SubforgeError::Transcription(
                "Audio extraction failed: Invalid data found when processing input".to_string(),
            ));
        }

        let count: usize = content.trim().parse().unwrap_or(1);
        let segments = (0..count)
            .map(|i| SubtitleSegment::new(i + 1, i as f64 * 2.0, i as f64 * 2.0 + 1.5, format!("Line {}", i + 1)))
            .collect();
        Ok(Transcript {
            language: Some("en".to_string()),
            segments,
        })
    }
}

/// Translates by prefixing every line with `[zh]`. The first `timeouts` calls
/// fail with a provider timeout.
#[derive(Default)]
pub struct EchoProvider {
    pub calls: AtomicUsize,
    pub timeouts: usize,
    pub gate: Option<Semaphore>,
}

impl EchoProvider {
    pub fn timing_out(timeouts: usize) -> Self {
        Self {
            timeouts,
            ..Self::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl TranslationProvider for EchoProvider {
    async fn translate(&self, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|e| SubforgeError::Provider(e.to_string()))?.forget();
        }
        if call < self.timeouts {
            return Err(SubforgeError::ProviderTimeout(180));
        }
        Ok(echo_reply(prompt))
    }
}

/// Answer a batch prompt line for line
pub fn echo_reply(prompt: &str) -> String {
    let start = prompt.find("INPUT (").expect("prompt has an input block");
    let open = start + prompt[start..].find('[').expect("input array");
    let close = open + prompt[open..].find("\n\nOUTPUT FORMAT").expect("output section");
    let input: Vec<Value> = serde_json::from_str(&prompt[open..close]).expect("input is JSON");

    let output: Vec<Value> = input
        .iter()
        .map(|item| {
            json!({
                "line": item["line"],
                "translation": format!("[zh] {}", item["text"].as_str().unwrap_or_default()),
            })
        })
        .collect();
    serde_json::to_string_pretty(&output).expect("serializable")
}

pub fn test_config(translate: bool, concurrency: usize) -> Config {
    let mut config = Config::default();
    config.translate.enabled = translate;
    config.translate.target_language = "zh".to_string();
    config.translate.backoff_base_ms = 1;
    config.translate.max_lines_per_batch = 2;
    config.queue.concurrency = concurrency;
    config.queue.poll_interval_ms = 10;
    config
}

/// Worker running in the background until `stop` is called
pub struct RunningQueue {
    pub store: Store,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl RunningQueue {
    pub fn start(
        store: Store,
        config: &Config,
        transcriber: Arc<dyn Transcriber>,
        provider: Option<Arc<dyn TranslationProvider>>,
    ) -> Self {
        let translator = provider.map(|p| SubtitleTranslator::new(p, &config.translate));
        let pipeline = Pipeline::new(store.clone(), transcriber, translator).with_config(config);
        let queue = JobQueue::new(store.clone(), pipeline, &config.queue);

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { queue.run(token).await });

        Self { store, shutdown, handle }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.expect("worker task").expect("worker result");
    }
}

/// Poll until the condition holds; false after five seconds
pub async fn wait_until<F: Fn(&Store) -> bool>(store: &Store, condition: F) -> bool {
    for _ in 0..500 {
        if condition(store) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition(store)
}
