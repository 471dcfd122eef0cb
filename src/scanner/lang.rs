use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes of subtitle content inspected for language detection
const SAMPLE_BYTES: u64 = 4096;

/// Characters that only appear in traditional Chinese
const TRADITIONAL_MARKERS: [char; 15] = [
    '臺', '灣', '繁', '體', '於', '與', '個', '們', '裡', '這', '妳', '臉', '廳', '學', '習',
];

/// Filename language tags, checked as `.tag.` or a trailing `.tag`
const FILENAME_TAGS: [(&str, &str); 9] = [
    ("chs", "chs"),
    ("cht", "cht"),
    ("eng", "en"),
    ("jpn", "ja"),
    ("kor", "ko"),
    ("zh", "chs"),
    ("en", "en"),
    ("ja", "ja"),
    ("ko", "ko"),
];

/// Detect a subtitle language from its file name, then from its content
pub fn detect_language(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match detect_from_filename(&file_name) {
        Some(lang) => lang.to_string(),
        None => match read_sample(path) {
            Some(sample) => detect_from_content(&sample).to_string(),
            None => "unknown".to_string(),
        },
    }
}

pub fn detect_from_filename(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    let without_ext = lower.rsplit_once('.').map(|(head, _)| head).unwrap_or(&lower);

    FILENAME_TAGS.iter().find_map(|(tag, lang)| {
        let dotted = format!(".{}.", tag);
        if lower.contains(&dotted) || without_ext.ends_with(&format!(".{}", tag)) {
            Some(*lang)
        } else {
            None
        }
    })
}

fn read_sample(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path)
        .map_err(|e| debug!("Cannot read {} for language detection: {}", path.display(), e))
        .ok()?;
    let mut buffer = Vec::new();
    file.take(SAMPLE_BYTES).read_to_end(&mut buffer).ok()?;
    Some(String::from_utf8_lossy(&buffer).to_string())
}

/// Classify subtitle text by script: ja, ko, chs, cht, en or unknown
pub fn detect_from_content(content: &str) -> &'static str {
    let text: String = content
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.contains("-->") && !line.chars().all(|c| c.is_ascii_digit())
        })
        .collect::<Vec<_>>()
        .join("\n");

    let total_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if total_chars < 50 {
        return "unknown";
    }

    let count = |range: std::ops::RangeInclusive<char>| text.chars().filter(|c| range.contains(c)).count();
    let chinese = count('\u{4e00}'..='\u{9fa5}');
    let hiragana = count('\u{3040}'..='\u{309f}');
    let katakana = count('\u{30a0}'..='\u{30ff}');
    let hangul = count('\u{ac00}'..='\u{d7af}');

    if hiragana >= 5 || katakana >= 5 {
        return "ja";
    }
    if hangul >= 10 {
        return "ko";
    }
    if chinese >= 10 {
        let traditional = TRADITIONAL_MARKERS.iter().filter(|c| text.contains(**c)).count();
        if traditional >= 3 && traditional as f64 / chinese as f64 >= 0.2 {
            return "cht";
        }
        return "chs";
    }

    let english_chars: usize = text
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| word.len() >= 3)
        .map(str::len)
        .sum();
    if english_chars as f64 / total_chars as f64 >= 0.5 {
        return "en";
    }

    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_tags() {
        assert_eq!(detect_from_filename("Movie.chs.srt"), Some("chs"));
        assert_eq!(detect_from_filename("Movie.EN.srt"), Some("en"));
        assert_eq!(detect_from_filename("Movie.jpn.ass"), Some("ja"));
        assert_eq!(detect_from_filename("Movie.srt"), None);
        assert_eq!(detect_from_filename("Broken.srt"), None);
    }

    #[test]
    fn test_content_english() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nWhere are we going tonight, my friend?\n\n\
                   2\n00:00:02,000 --> 00:00:03,000\nNobody knows where the road will take us.\n";
        assert_eq!(detect_from_content(srt), "en");
    }

    #[test]
    fn test_content_japanese() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nこんにちは、今日はいい天気ですね。散歩に行きましょうか。\n\
                   2\n00:00:02,000 --> 00:00:03,000\nそうですね、公園まで歩いていきましょう。楽しみです。\n\
                   3\n00:00:03,000 --> 00:00:04,000\nありがとうございます。\n";
        assert_eq!(detect_from_content(srt), "ja");
    }

    #[test]
    fn test_content_too_short() {
        assert_eq!(detect_from_content("1\n00:00:01,000 --> 00:00:02,000\nHi\n"), "unknown");
    }
}
