// Media library scanning
//
// Lists a bounded slice of the media tree and reports which videos still lack
// a subtitle file next to them.

pub mod lang;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SubforgeError};

pub const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "mkv", "mov", "avi", "flv", "wmv", "m4v", "webm", "ts"];
pub const SUBTITLE_EXTENSIONS: [&str; 5] = ["srt", "vtt", "ass", "ssa", "sub"];
pub const DEFAULT_SCAN_DEPTH: usize = 3;

/// A subtitle file found beside a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleInfo {
    pub path: PathBuf,
    pub language: String,
    /// Subtitle named exactly after the video, without a language tag
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub path: PathBuf,
    /// Path relative to the media root
    pub relative_path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub subtitles: Vec<SubtitleInfo>,
}

impl VideoEntry {
    pub fn has_subtitle(&self) -> bool {
        !self.subtitles.is_empty()
    }

    /// Whether a subtitle in the given language already exists
    pub fn has_language(&self, language: &str) -> bool {
        has_language(&self.subtitles, language)
    }
}

/// A video as recorded in the media library table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub subtitles: Vec<SubtitleInfo>,
    /// A subtitle in the configured target language exists
    pub has_translated: bool,
    pub scanned_at: DateTime<Utc>,
}

impl MediaFile {
    pub fn has_subtitle(&self) -> bool {
        !self.subtitles.is_empty()
    }
}

/// Selection for media library listings; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct MediaFilter {
    /// Directory relative to the media root
    pub directory: Option<PathBuf>,
    pub has_subtitle: Option<bool>,
    pub has_translated: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanListing {
    /// Subdirectories relative to the media root, for navigation
    pub directories: Vec<PathBuf>,
    pub videos: Vec<VideoEntry>,
}

impl ScanListing {
    pub fn missing_subtitles(&self) -> impl Iterator<Item = &VideoEntry> {
        self.videos.iter().filter(|v| !v.has_subtitle())
    }
}

pub struct MediaScanner {
    root: PathBuf,
    max_depth: usize,
}

impl MediaScanner {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_SCAN_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List directories and videos up to `max_depth` levels below `root/subdirectory`
    pub fn list_directory(&self, subdirectory: &str) -> Result<ScanListing> {
        let base = self.resolve(subdirectory)?;
        info!("Scanning {} (depth {})", base.display(), self.max_depth);

        let mut listing = ScanListing::default();
        let mut sibling_cache: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();

        let walker = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                listing.directories.push(self.relative(path));
                continue;
            }

            if !entry.file_type().is_file() || !has_extension(path, &VIDEO_EXTENSIONS) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let parent = path.parent().unwrap_or(&base).to_path_buf();
            let siblings = sibling_cache
                .entry(parent.clone())
                .or_insert_with(|| list_files(&parent));

            listing.videos.push(VideoEntry {
                path: path.to_path_buf(),
                relative_path: self.relative(path),
                file_name: entry.file_name().to_string_lossy().to_string(),
                size,
                subtitles: subtitles_for(path, siblings),
            });
        }

        debug!(
            "Found {} directories and {} videos under {}",
            listing.directories.len(),
            listing.videos.len(),
            base.display()
        );
        Ok(listing)
    }

    /// Breadth-first listing of non-hidden subdirectories relative to the root
    pub fn discover_subdirectories(&self, max_depth: usize) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut to_scan = VecDeque::from([(self.root.clone(), 0usize)]);

        while let Some((dir, depth)) = to_scan.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Cannot list {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && !is_hidden(&entry.file_name()) {
                    found.push(self.relative(&path));
                    to_scan.push_back((path, depth + 1));
                }
            }
        }

        found.sort();
        found
    }

    fn resolve(&self, subdirectory: &str) -> Result<PathBuf> {
        let relative = Path::new(subdirectory.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SubforgeError::Scan(format!(
                "Subdirectory escapes the media root: {}",
                subdirectory
            )));
        }

        let base = self.root.join(relative);
        if !base.is_dir() {
            return Err(SubforgeError::Scan(format!("Directory does not exist: {}", base.display())));
        }
        Ok(base)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        pathdiff::diff_paths(path, &self.root).unwrap_or_else(|| path.to_path_buf())
    }
}

/// Current subtitles of a single video
pub fn rescan_video(video_path: &Path) -> Result<Vec<SubtitleInfo>> {
    if !video_path.is_file() {
        return Err(SubforgeError::FileNotFound(video_path.display().to_string()));
    }
    let parent = video_path.parent().unwrap_or(Path::new("."));
    Ok(subtitles_for(video_path, &list_files(parent)))
}

/// Whether any of the subtitles is in the given language
pub fn has_language(subtitles: &[SubtitleInfo], language: &str) -> bool {
    let wanted = normalize_language(language);
    subtitles.iter().any(|s| normalize_language(&s.language) == wanted)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false)
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

/// Subtitle siblings are `<stem>.<ext>` or `<stem>.<tag>.<ext>`
fn subtitles_for(video_path: &Path, siblings: &[PathBuf]) -> Vec<SubtitleInfo> {
    let stem = match video_path.file_stem() {
        Some(stem) => stem.to_string_lossy().to_lowercase(),
        None => return Vec::new(),
    };
    let prefix = format!("{}.", stem);

    let mut subtitles: Vec<SubtitleInfo> = siblings
        .iter()
        .filter(|p| has_extension(p, &SUBTITLE_EXTENSIONS))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().starts_with(&prefix))
                .unwrap_or(false)
        })
        .map(|p| SubtitleInfo {
            path: p.clone(),
            language: lang::detect_language(p),
            is_default: p
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase() == stem)
                .unwrap_or(false),
        })
        .collect();

    subtitles.sort_by(|a, b| a.path.cmp(&b.path));
    subtitles
}

fn normalize_language(code: &str) -> &str {
    match code {
        "chs" | "cht" | "zh" => "zh",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_lists_videos_and_subtitle_status() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("Movies/A.mkv"));
        touch(&root.path().join("Movies/A.zh.srt"));
        touch(&root.path().join("Movies/B.mp4"));
        touch(&root.path().join("Movies/B 2.srt"));
        touch(&root.path().join("Movies/notes.txt"));

        let scanner = MediaScanner::new(root.path());
        let listing = scanner.list_directory("Movies").unwrap();

        assert_eq!(listing.videos.len(), 2);
        let a = &listing.videos[0];
        assert_eq!(a.relative_path, PathBuf::from("Movies/A.mkv"));
        assert!(a.has_subtitle());
        assert_eq!(a.subtitles[0].language, "chs");
        assert!(a.has_language("zh"));
        assert!(!listing.videos[1].has_subtitle());
        assert_eq!(listing.missing_subtitles().count(), 1);
    }

    #[test]
    fn test_depth_is_bounded() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("a/one.mp4"));
        touch(&root.path().join("a/b/two.mp4"));
        touch(&root.path().join("a/b/c/three.mp4"));
        touch(&root.path().join("a/b/c/d/four.mp4"));

        let listing = MediaScanner::new(root.path()).list_directory("a").unwrap();
        let names: Vec<_> = listing.videos.iter().map(|v| v.file_name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"one.mp4"));
        assert!(names.contains(&"three.mp4"));
        assert!(!names.contains(&"four.mp4"));
        assert!(listing.directories.contains(&PathBuf::from("a/b/c/d")));
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let root = tempfile::tempdir().unwrap();
        let scanner = MediaScanner::new(root.path());
        assert!(matches!(scanner.list_directory("../etc"), Err(SubforgeError::Scan(_))));
    }

    #[test]
    fn test_rescan_video_sees_new_subtitles() {
        let root = tempfile::tempdir().unwrap();
        let video = root.path().join("Show/Ep1.mkv");
        touch(&video);
        assert!(rescan_video(&video).unwrap().is_empty());

        touch(&root.path().join("Show/Ep1.srt"));
        touch(&root.path().join("Show/Ep1.ja.srt"));
        touch(&root.path().join("Show/Ep10.srt"));
        let subtitles = rescan_video(&video).unwrap();
        assert_eq!(subtitles.len(), 2);
        assert!(subtitles.iter().any(|s| s.is_default));
        assert!(has_language(&subtitles, "ja"));

        assert!(matches!(
            rescan_video(&root.path().join("Show/gone.mkv")),
            Err(SubforgeError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_discover_skips_hidden() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("TV/Drama")).unwrap();
        fs::create_dir_all(root.path().join(".cache")).unwrap();

        let dirs = MediaScanner::new(root.path()).discover_subdirectories(2);
        assert_eq!(dirs, vec![PathBuf::from("TV"), PathBuf::from("TV/Drama")]);
    }
}
