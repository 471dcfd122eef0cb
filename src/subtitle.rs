use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{Result, SubforgeError};

/// Formats `write_subtitles` can produce
pub const EXPORT_FORMATS: [&str; 2] = ["srt", "vtt"];

/// A timestamped span of subtitle text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    pub index: usize,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub source_text: String,
    pub translated_text: Option<String>,
}

impl SubtitleSegment {
    pub fn new(index: usize, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            source_text: text.into(),
            translated_text: None,
        }
    }
}

/// Which text of a segment to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTrack {
    Source,
    Translated,
}

/// `<stem>.srt` beside the video
pub fn source_srt_path(video_path: &Path) -> PathBuf {
    video_path.with_extension("srt")
}

/// `<stem>.<lang>.<ext>` beside the video
pub fn translated_path(video_path: &Path, language: &str, extension: &str) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    video_path.with_file_name(format!("{}.{}.{}", stem, language, extension))
}

/// Render segments as SRT. Segments with no text on the chosen track are skipped
/// and the remaining ones renumbered.
pub fn render_srt(segments: &[SubtitleSegment], track: TextTrack) -> String {
    let mut srt_content = String::new();
    let mut number = 0;

    for segment in segments {
        let Some(text) = segment_text(segment, track) else {
            continue;
        };
        number += 1;
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            number,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            text
        ));
    }

    srt_content
}

/// Render segments as WebVTT
pub fn render_vtt(segments: &[SubtitleSegment], track: TextTrack) -> String {
    let mut vtt_content = String::from("WEBVTT\n\n");

    for segment in segments {
        let Some(text) = segment_text(segment, track) else {
            continue;
        };
        vtt_content.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_srt_time(segment.start).replace(',', "."),
            format_srt_time(segment.end).replace(',', "."),
            text
        ));
    }

    vtt_content
}

fn segment_text(segment: &SubtitleSegment, track: TextTrack) -> Option<&str> {
    let text = match track {
        TextTrack::Source => segment.source_text.trim(),
        TextTrack::Translated => segment.translated_text.as_deref()?.trim(),
    };
    if text.is_empty() { None } else { Some(text) }
}

/// Write SRT subtitle file
pub async fn write_srt<P: AsRef<Path>>(
    segments: &[SubtitleSegment],
    track: TextTrack,
    output_path: P,
) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Writing SRT file: {}", output_path.display());

    fs::write(output_path, render_srt(segments, track)).await?;
    Ok(())
}

/// Write a subtitle file in the given format ("srt" or "vtt")
pub async fn write_subtitles<P: AsRef<Path>>(
    segments: &[SubtitleSegment],
    track: TextTrack,
    format: &str,
    output_path: P,
) -> Result<()> {
    let content = match format.to_lowercase().as_str() {
        "srt" => render_srt(segments, track),
        "vtt" => render_vtt(segments, track),
        other => {
            return Err(SubforgeError::Config(format!("Unsupported export format: {}", other)));
        }
    };
    fs::write(output_path.as_ref(), content).await?;
    Ok(())
}

/// Parse SRT content into segments. Invalid blocks are skipped.
pub fn parse_srt(content: &str) -> Vec<SubtitleSegment> {
    let normalized = content.replace("\r\n", "\n");
    let normalized = normalized.trim_start_matches('\u{feff}');
    let mut segments = Vec::new();

    for block in normalized.trim().split("\n\n") {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 3 {
            continue;
        }

        let Some((start, end)) = parse_timecode(lines[1]) else {
            warn!("Skipping subtitle block with invalid timecode: {}", lines[1]);
            continue;
        };

        let text = lines[2..].join("\n").trim().to_string();
        segments.push(SubtitleSegment::new(segments.len() + 1, start, end, text));
    }

    segments
}

/// Read and parse an SRT file
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitleSegment>> {
    let path = path.as_ref();
    let bytes = fs::read(path).await?;
    Ok(parse_srt(&String::from_utf8_lossy(&bytes)))
}

fn parse_timecode(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_time(start.trim())?, parse_srt_time(end.trim())?))
}

/// Parse SRT time format (HH:MM:SS,mmm) into seconds
pub fn parse_srt_time(value: &str) -> Option<f64> {
    let (clock, millis) = value.split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let millis: u64 = millis.trim().parse().ok()?;
    if millis >= 1000 {
        return None;
    }

    let total_milliseconds = (hours * 3600 + minutes * 60 + secs) * 1000 + millis;
    Some(total_milliseconds as f64 / 1000.0)
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}
