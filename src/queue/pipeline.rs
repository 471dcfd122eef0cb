use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, SubforgeError};
use crate::scanner;
use crate::subtitle::{self, SubtitleSegment, TextTrack};
use crate::transcribe::Transcriber;
use crate::translate::SubtitleTranslator;
use super::{Job, JobStatus, Store};

/// Progress once source subtitles exist; translation fills the span up to 95
const TRANSCRIBED_PROGRESS: u8 = 50;
const TRANSLATION_SPAN: usize = 45;

/// The steps run for a single job: transcribe, translate, write subtitle files
pub struct Pipeline {
    store: Store,
    transcriber: Arc<dyn Transcriber>,
    translator: Option<SubtitleTranslator>,
    source_language: Option<String>,
    export_formats: Vec<String>,
    /// Language a subtitle must have to count as translated in the media library
    library_language: String,
}

impl Pipeline {
    pub fn new(store: Store, transcriber: Arc<dyn Transcriber>, translator: Option<SubtitleTranslator>) -> Self {
        let library_language = translator
            .as_ref()
            .map(|t| t.target_language().to_string())
            .unwrap_or_default();
        Self {
            store,
            transcriber,
            translator,
            source_language: None,
            export_formats: Vec::new(),
            library_language,
        }
    }

    /// Pick up the source language hint and export formats from the configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        let language = config.transcriber.source_language.trim();
        self.source_language = match language {
            "" | "auto" => None,
            other => Some(other.to_string()),
        };
        self.export_formats = config
            .media
            .export_formats
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| f != "srt" && !f.is_empty())
            .collect();
        self.library_language = config.translate.target_language.clone();
        self
    }

    /// Process a claimed job to a final state. Failures end up on the job, never here.
    pub async fn run(&self, job: Job) {
        info!("Processing job {}: {}", job.id, job.file_path);

        let outcome = match self.process(&job).await {
            Ok(()) => {
                self.refresh_library(Path::new(&job.file_path));
                self.store.complete(job.id)
            }
            Err(SubforgeError::Cancelled) => self.store.mark_paused(job.id).map(|status| match status {
                JobStatus::Paused => info!("Job {} paused", job.id),
                _ => info!("Job {} stopped after its pause was withdrawn, re-queued", job.id),
            }),
            Err(e) => {
                warn!("Job {} failed: {}", job.id, e);
                self.store.record_failure(job.id, &e.to_string())
            }
        };

        match outcome {
            Ok(()) => info!("Job {} finished as {}", job.id, self.final_status(job.id)),
            Err(e) => error!("Failed to record outcome of job {}: {}", job.id, e),
        }
    }

    fn final_status(&self, id: i64) -> String {
        self.store
            .get(id)
            .map(|job| job.status.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    async fn process(&self, job: &Job) -> Result<()> {
        let video_path = PathBuf::from(&job.file_path);
        if !video_path.is_file() {
            return Err(SubforgeError::FileNotFound(job.file_path.clone()));
        }

        let mut segments = self.source_segments(job.id, &video_path).await?;
        self.progress(job.id, TRANSCRIBED_PROGRESS, &format!("{} segments ready", segments.len()));
        self.checkpoint(job.id)?;

        self.export(&segments, TextTrack::Source, |format| video_path.with_extension(format))
            .await;

        let Some(translator) = &self.translator else {
            return Ok(());
        };

        self.store.set_stage(
            job.id,
            JobStatus::Translating,
            TRANSCRIBED_PROGRESS,
            &format!("Translating to {}", translator.target_language()),
        )?;

        let report = |done: usize, total: usize| {
            let percent = TRANSCRIBED_PROGRESS as usize + done * TRANSLATION_SPAN / total.max(1);
            self.progress(job.id, percent as u8, &format!("Translated {}/{} segments", done, total));
        };
        let should_stop = || self.store.pause_requested(job.id).unwrap_or(false);

        translator
            .translate_segments(&mut segments, &report, &should_stop)
            .await?;

        let language = translator.target_language();
        let translated_srt = subtitle::translated_path(&video_path, language, "srt");
        subtitle::write_srt(&segments, TextTrack::Translated, &translated_srt).await?;
        self.export(&segments, TextTrack::Translated, |format| {
            subtitle::translated_path(&video_path, language, format)
        })
        .await;

        Ok(())
    }

    /// Reuse `<stem>.srt` when present, otherwise transcribe and write it
    async fn source_segments(&self, id: i64, video_path: &Path) -> Result<Vec<SubtitleSegment>> {
        let srt_path = subtitle::source_srt_path(video_path);
        if srt_path.is_file() {
            let segments = subtitle::read_srt(&srt_path).await?;
            if !segments.is_empty() {
                info!("Reusing existing subtitles {}", srt_path.display());
                self.progress(id, 15, "Using existing subtitles");
                return Ok(segments);
            }
            warn!("Existing subtitles {} are empty, transcribing again", srt_path.display());
        }

        self.progress(id, 5, "Extracting audio and transcribing");
        let transcript = self
            .transcriber
            .transcribe(video_path, self.source_language.as_deref())
            .await?;

        subtitle::write_srt(&transcript.segments, TextTrack::Source, &srt_path).await?;
        Ok(transcript.segments)
    }

    /// Extra formats are best effort; a failed export never fails the job
    async fn export<F>(&self, segments: &[SubtitleSegment], track: TextTrack, path_for: F)
    where
        F: Fn(&str) -> PathBuf,
    {
        for format in &self.export_formats {
            let path = path_for(format);
            if let Err(e) = subtitle::write_subtitles(segments, track, format, &path).await {
                warn!("Failed to export {} subtitles to {}: {}", format, path.display(), e);
            }
        }
    }

    /// Record the video's new subtitles in the media library
    fn refresh_library(&self, video_path: &Path) {
        let refreshed = scanner::rescan_video(video_path).and_then(|subtitles| {
            self.store
                .refresh_media_subtitles(video_path, &subtitles, &self.library_language)
        });
        match refreshed {
            Ok(true) => debug!("Media library updated for {}", video_path.display()),
            Ok(false) => debug!("{} is not in the media library yet", video_path.display()),
            Err(e) => warn!("Failed to rescan {}: {}", video_path.display(), e),
        }
    }

    /// Stop here if a pause was requested for this job
    fn checkpoint(&self, id: i64) -> Result<()> {
        if self.store.pause_requested(id)? {
            return Err(SubforgeError::Cancelled);
        }
        Ok(())
    }

    fn progress(&self, id: i64, progress: u8, message: &str) {
        if let Err(e) = self.store.update_progress(id, progress, message) {
            warn!("Failed to update progress of job {}: {}", id, e);
        }
    }
}
