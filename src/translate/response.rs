use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Longest phrase, in tokens, checked for back-to-back repetition
const MAX_PHRASE_TOKENS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseError {
    /// The model shortened its answer with a bare `...`
    Abbreviated,
    Invalid(String),
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abbreviated => write!(f, "response abbreviated with '...'"),
            Self::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Serialize)]
struct PromptLine<'a> {
    line: usize,
    text: &'a str,
}

/// Build the batch translation prompt. Input lines travel as a JSON array and the
/// model must answer with exactly one `{line, translation}` object per line.
pub fn build_batch_prompt(
    lines: &[&str],
    source_language: Option<&str>,
    target_language: &str,
    context_before: Option<&str>,
    context_after: Option<&str>,
) -> String {
    let language_name = language_code_to_name(target_language);
    let direction = match source_language {
        Some(source) => format!("from {} to {}", language_code_to_name(source), language_name),
        None => format!("to {}", language_name),
    };
    let count = lines.len();
    let input: Vec<PromptLine> = lines
        .iter()
        .enumerate()
        .map(|(i, text)| PromptLine { line: i + 1, text })
        .collect();
    let input_json = serde_json::to_string_pretty(&input).unwrap_or_else(|_| "[]".to_string());

    let mut context_hint = String::new();
    if context_before.is_some() || context_after.is_some() {
        context_hint.push_str("\n\nCONTEXT (for reference only, do not translate):");
        if let Some(before) = context_before {
            context_hint.push_str(&format!("\nPrevious line: \"{}\"", before));
        }
        if let Some(after) = context_after {
            context_hint.push_str(&format!("\nNext line: \"{}\"", after));
        }
    }

    format!(
        "You are a professional subtitle translator. Translate the following dialogue {direction}.\n\
         \n\
         CRITICAL RULES:\n\
         1. Output MUST be a valid JSON array with EXACTLY {count} objects\n\
         2. Each object MUST have \"line\" (number) and \"translation\" (string) fields\n\
         3. Keep translations natural and concise, in the style of {language_name} subtitles\n\
         4. Preserve character names, proper nouns and technical terms\n\
         5. DO NOT merge, split or skip any lines\n\
         6. If a line is untranslatable (music notes, sound effects), keep it as-is\n\
         7. Output the COMPLETE array, never abbreviate with \"...\"{context_hint}\n\
         \n\
         INPUT ({count} lines):\n\
         {input_json}\n\
         \n\
         OUTPUT FORMAT (valid JSON array with ALL {count} items):\n\
         [\n  {{\"line\": 1, \"translation\": \"...\"}},\n  {{\"line\": {count}, \"translation\": \"...\"}}\n]\n\
         \n\
         Now output the COMPLETE JSON array (no extra text):"
    )
}

/// Parse a batch response into exactly `expected_count` translations
pub fn parse_translation_response(response: &str, expected_count: usize) -> Result<Vec<String>, ResponseError> {
    let cleaned = remove_markdown_code_blocks(response.trim());
    let cleaned = match cleaned.find('[') {
        Some(pos) => &cleaned[pos..],
        None => return Err(ResponseError::Invalid("no JSON array in response".to_string())),
    };

    // A bare `...` only counts once the array itself fails to parse, so prose
    // after a complete array is harmless
    let items = match parse_lenient_array(cleaned) {
        Some(items) => items,
        None if has_bare_ellipsis(cleaned) => return Err(ResponseError::Abbreviated),
        None => {
            let preview: String = cleaned.chars().take(200).collect();
            return Err(ResponseError::Invalid(format!("invalid JSON array: {}", preview)));
        }
    };

    if items.len() != expected_count {
        return Err(ResponseError::Invalid(format!(
            "expected {} translations, got {}",
            expected_count,
            items.len()
        )));
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let object = item
                .as_object()
                .ok_or_else(|| ResponseError::Invalid(format!("item {} is not an object", i + 1)))?;

            if let Some(line) = object.get("line") {
                if line.as_u64() != Some(i as u64 + 1) {
                    return Err(ResponseError::Invalid(format!(
                        "item {} has line number {}",
                        i + 1,
                        line
                    )));
                }
            }

            match object.get("translation") {
                Some(Value::String(text)) => Ok(text.trim().to_string()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(ResponseError::Invalid(format!("item {} lacks a translation", i + 1))),
            }
        })
        .collect()
}

fn parse_lenient_array(text: &str) -> Option<Vec<Value>> {
    if let Ok(items) = serde_json::from_str::<Vec<Value>>(text) {
        return Some(items);
    }

    // Trailing prose after the array
    if let Some(end) = text.rfind(']') {
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(&text[..=end]) {
            return Some(items);
        }
    }

    let trimmed = text.trim_end();
    let repaired = if let Some(head) = trimmed.strip_suffix(",]") {
        format!("{}]", head)
    } else if !trimmed.ends_with(']') {
        format!("{}]", trimmed.trim_end_matches(','))
    } else {
        return None;
    };
    debug!("Retrying parse with repaired array");
    serde_json::from_str::<Vec<Value>>(&repaired).ok()
}

fn remove_markdown_code_blocks(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// `...` appearing outside of any JSON string
fn has_bare_ellipsis(text: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    let mut dots = 0;

    for c in text.chars() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                dots = 0;
            }
            '.' => {
                dots += 1;
                if dots >= 3 {
                    return true;
                }
            }
            c if c.is_whitespace() => {}
            _ => dots = 0,
        }
    }
    false
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}'
        | '\u{f900}'..='\u{faff}')
}

/// Words for alphabetic scripts, single characters for CJK
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() || c == '\'' {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

/// Longest back-to-back run of a phrase of up to `MAX_PHRASE_TOKENS` tokens
pub fn longest_repetition(text: &str) -> (usize, String) {
    let tokens = tokenize(text);
    let mut best = (if tokens.is_empty() { 0 } else { 1 }, String::new());

    for n in 1..=MAX_PHRASE_TOKENS {
        if tokens.len() < n * 2 {
            break;
        }
        for start in 0..=tokens.len() - n {
            let phrase = &tokens[start..start + n];
            let mut count = 1;
            let mut next = start + n;
            while next + n <= tokens.len() && &tokens[next..next + n] == phrase {
                count += 1;
                next += n;
            }
            if count > best.0 {
                best = (count, phrase.join(" "));
            }
        }
    }
    best
}

/// A phrase repeated more than `threshold` times in a row in the translation,
/// when the source shows no such run itself
pub fn repetition_artifact(source: &str, translation: &str, threshold: usize) -> Option<String> {
    let (count, phrase) = longest_repetition(translation);
    if count <= threshold {
        return None;
    }
    let (source_count, _) = longest_repetition(source);
    if source_count > threshold {
        return None;
    }
    Some(format!("'{}' repeated {} times", phrase, count))
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "zh" | "chs" | "zh-cn" => "Simplified Chinese".to_string(),
        "cht" | "zh-tw" => "Traditional Chinese".to_string(),
        "en" => "English".to_string(),
        "ja" => "Japanese".to_string(),
        "ko" => "Korean".to_string(),
        "fr" => "French".to_string(),
        "de" => "German".to_string(),
        "es" => "Spanish".to_string(),
        "ru" => "Russian".to_string(),
        "it" => "Italian".to_string(),
        "pt" => "Portuguese".to_string(),
        "nl" => "Dutch".to_string(),
        "pl" => "Polish".to_string(),
        "tr" => "Turkish".to_string(),
        "ar" => "Arabic".to_string(),
        "hi" => "Hindi".to_string(),
        "th" => "Thai".to_string(),
        "vi" => "Vietnamese".to_string(),
        "id" => "Indonesian".to_string(),
        "uk" => "Ukrainian".to_string(),
        _ => code.to_string(), // Fallback to the code itself if not found
    }
}
