//! Post-processing: deterministic cleanup of decoded transcriptions.
//!
//! The tokenizer drops registered special tokens when decoding, but
//! Donut-style models also emit task and field tags (`<s_ocr>`,
//! `<s_text>`, `</s_text>`) that some tokenizer exports do not mark as
//! special. Those leak into the decoded string and are removed here.
//!
//! Rules (applied in order):
//! 1. Strip residual `<s_…>` / `</s_…>` task tags
//! 2. Normalise line endings (CRLF → LF)
//! 3. Trim trailing whitespace per line
//! 4. Trim the whole text
//!
//! Interior spacing is left alone; the transcription is the model's output
//! and nothing beyond tag removal should alter it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of characters shown in progress previews.
pub const PREVIEW_CHARS: usize = 100;

/// Apply all cleanup rules to a decoded transcription.
pub fn clean_transcript(input: &str) -> String {
    let s = strip_task_tags(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip task tags ──────────────────────────────────────────────────

static RE_TASK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?s_[A-Za-z0-9_\-]*>").unwrap());

fn strip_task_tags(input: &str) -> String {
    RE_TASK_TAG.replace_all(input, "").into_owned()
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first [`PREVIEW_CHARS`] characters of `text`, cut on a char boundary.
pub fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leaked_task_tags() {
        assert_eq!(
            clean_transcript("<s_ocr> Amoxicillin 500mg</s_ocr>"),
            "Amoxicillin 500mg"
        );
        assert_eq!(
            clean_transcript("<s_text>Take twice daily</s_text>\n<s_notes>with food"),
            "Take twice daily\nwith food"
        );
    }

    #[test]
    fn leaves_other_angle_brackets_alone() {
        assert_eq!(clean_transcript("BP <140/90>"), "BP <140/90>");
        assert_eq!(clean_transcript("<s>kept</s>"), "<s>kept</s>");
    }

    #[test]
    fn normalises_line_endings_and_trims() {
        assert_eq!(clean_transcript("  line one  \r\nline two\t\r\n\n"), "line one\nline two");
    }

    #[test]
    fn empty_output_stays_empty() {
        assert_eq!(clean_transcript(""), "");
        assert_eq!(clean_transcript("<s_ocr></s_ocr>"), "");
    }

    #[test]
    fn preview_truncates_at_one_hundred_chars() {
        let long = "a".repeat(250);
        assert_eq!(preview(&long).len(), 100);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn preview_respects_multibyte_boundaries() {
        let text = "µ".repeat(120);
        let p = preview(&text);
        assert_eq!(p.chars().count(), 100);
        assert_eq!(p.len(), 200);
    }
}
