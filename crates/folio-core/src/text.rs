//! Narration text cleaning and segmentation.
//!
//! Pure functions, no I/O. Length budgets are measured on the cleaned text
//! because the limits must reflect what will actually be spoken.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::TextChunk;

/// Chunk budget for live narration playback.
pub const LIVE_CHUNK_LEN: usize = 1000;
/// Chunk budget for background chapter jobs.
pub const JOB_CHUNK_LEN: usize = 2000;
/// How far back from the budget boundary we look for a natural break.
pub const BREAK_WINDOW: usize = 200;

// Compiled once, reused across calls.
static RE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static RE_HR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*_]{3,}[ \t]*$").unwrap());
static RE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static RE_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^_]+)_\b").unwrap());
static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]*").unwrap());
static RE_BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:>[ \t]*)+").unwrap());
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:[ \t]*[-*+][ \t]+)+").unwrap());
static RE_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:[ \t]*\d+[.)][ \t]+)+").unwrap());
static RE_MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static RE_MULTI_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip structural markup so length budgets measure what will be spoken.
///
/// Handles: headings, bold/italic/underscore emphasis, bullets and numbered
/// lists, block quotes, horizontal rules, links and images collapsed to their
/// visible label. Paragraph breaks (`\n\n`) survive — [`segment`] prefers
/// them as split points.
pub fn clean_narration(text: &str) -> String {
    let mut c = text.to_string();

    // Images before links — image syntax embeds link syntax.
    c = RE_IMAGE.replace_all(&c, "$1").into_owned();
    c = RE_LINK.replace_all(&c, "$1").into_owned();
    c = RE_HR.replace_all(&c, "").into_owned();
    c = RE_BOLD.replace_all(&c, "$1").into_owned();
    c = RE_ITALIC.replace_all(&c, "$1").into_owned();
    c = RE_UNDERSCORE.replace_all(&c, "$1").into_owned();
    c = RE_HEADING.replace_all(&c, "").into_owned();
    c = RE_BLOCKQUOTE.replace_all(&c, "").into_owned();
    c = RE_BULLET.replace_all(&c, "").into_owned();
    c = RE_NUMBERED.replace_all(&c, "").into_owned();
    c = RE_MULTI_SPACE.replace_all(&c, " ").into_owned();
    c = RE_MULTI_NEWLINE.replace_all(&c, "\n\n").into_owned();

    c.trim().to_string()
}

/// Split narration into chunks of at most `max_len` bytes of cleaned text.
///
/// Greedy fill; when a chunk would exceed the budget, backtracks within the
/// last [`BREAK_WINDOW`] bytes to the latest paragraph break, else line
/// break, else space. A run with no break at all is hard-cut at the limit.
/// Empty chunks are dropped.
///
/// Each chunk's `offset` is its start position in the cleaned text plus
/// `start_offset`, so playback of a later paragraph resolves to an absolute
/// position in the source.
///
/// Idempotent: segmenting any returned chunk again (with the same budget)
/// yields that chunk unchanged.
pub fn segment(text: &str, start_offset: usize, max_len: usize) -> Vec<TextChunk> {
    let cleaned = clean_narration(text);
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < cleaned.len() {
        let remaining = &cleaned[pos..];
        if remaining.len() <= max_len {
            push_chunk(&mut chunks, remaining, start_offset + pos);
            break;
        }

        let window_end = floor_char_boundary(remaining, max_len);
        let window = &remaining[..window_end];
        let split = find_split(window);

        push_chunk(&mut chunks, &window[..split], start_offset + pos);
        pos += split;

        // Consume the break itself plus any following whitespace.
        pos += cleaned[pos..]
            .char_indices()
            .find(|(_, ch)| !ch.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(cleaned.len() - pos);
    }

    chunks
}

/// Where to cut `window`: latest paragraph break, else line break, else
/// space — each only if it falls inside the backtrack window — else the
/// hard limit.
fn find_split(window: &str) -> usize {
    let earliest = window.len().saturating_sub(BREAK_WINDOW);

    if let Some(idx) = window.rfind("\n\n") {
        if idx >= earliest {
            return idx;
        }
    }
    if let Some(idx) = window.rfind('\n') {
        if idx >= earliest {
            return idx;
        }
    }
    if let Some(idx) = window.rfind(' ') {
        if idx >= earliest {
            return idx;
        }
    }
    window.len()
}

fn push_chunk(chunks: &mut Vec<TextChunk>, text: &str, offset: usize) {
    let trimmed = text.trim_end();
    if !trimmed.is_empty() {
        chunks.push(TextChunk {
            text: trimmed.to_string(),
            offset,
        });
    }
}

/// Largest index `<= at` that lands on a char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut i = at;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── clean_narration ─────────────────────────────────────────────

    #[test]
    fn strips_headings() {
        assert_eq!(clean_narration("## Chapter One"), "Chapter One");
        assert_eq!(clean_narration("# A\n## B"), "A\nB");
    }

    #[test]
    fn strips_emphasis() {
        assert_eq!(clean_narration("a **bold** and *quiet* word"), "a bold and quiet word");
        assert_eq!(clean_narration("an _aside_ here"), "an aside here");
    }

    #[test]
    fn collapses_links_to_label() {
        assert_eq!(
            clean_narration("see [the appendix](https://example.com/a) now"),
            "see the appendix now"
        );
    }

    #[test]
    fn collapses_images_to_alt_text() {
        assert_eq!(clean_narration("![a woodcut](fig1.png) follows"), "a woodcut follows");
    }

    #[test]
    fn strips_bullets_and_numbering() {
        let out = clean_narration("- first\n- second\n1. third");
        assert_eq!(out, "first\nsecond\nthird");
    }

    #[test]
    fn strips_block_quotes() {
        assert_eq!(clean_narration("> He said so.\n> Twice."), "He said so.\nTwice.");
    }

    #[test]
    fn strips_horizontal_rules() {
        let out = clean_narration("above\n\n---\n\nbelow");
        assert!(!out.contains("---"));
        assert!(out.contains("above") && out.contains("below"));
    }

    #[test]
    fn preserves_paragraph_breaks() {
        assert_eq!(clean_narration("one.\n\ntwo."), "one.\n\ntwo.");
        assert_eq!(clean_narration("one.\n\n\n\ntwo."), "one.\n\ntwo.");
    }

    #[test]
    fn collapses_runs_of_spaces() {
        assert_eq!(clean_narration("hello    world"), "hello world");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(clean_narration("Call me Ishmael."), "Call me Ishmael.");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let input = "# Title\n\nSome **bold** text.\n\n- a list\n- [item](x)\n\n> quoted";
        let once = clean_narration(input);
        assert_eq!(clean_narration(&once), once);
    }

    // ── segment ─────────────────────────────────────────────────────

    #[test]
    fn short_text_is_one_chunk_at_offset_zero() {
        let chunks = segment("Call me Ishmael.", 0, LIVE_CHUNK_LEN);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Call me Ishmael.");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(segment("", 0, LIVE_CHUNK_LEN).is_empty());
        assert!(segment("   \n\n  ", 0, LIVE_CHUNK_LEN).is_empty());
    }

    #[test]
    fn start_offset_shifts_all_offsets() {
        let chunks = segment("Call me Ishmael.", 740, LIVE_CHUNK_LEN);
        assert_eq!(chunks[0].offset, 740);
    }

    #[test]
    fn prefers_paragraph_break() {
        let first = "a".repeat(950);
        let text = format!("{first}\n\n{}", "b".repeat(300));
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, first);
        assert!(chunks[1].text.starts_with('b'));
        assert_eq!(chunks[1].offset, 952);
    }

    #[test]
    fn falls_back_to_line_break_then_space() {
        let text = format!("{}\n{}", "a".repeat(950), "b".repeat(300));
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks[0].text, "a".repeat(950));

        let text = format!("{} {}", "a".repeat(950), "b".repeat(300));
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks[0].text, "a".repeat(950));
    }

    #[test]
    fn break_outside_window_is_ignored() {
        // Only break is 400 bytes before the boundary — outside BREAK_WINDOW,
        // so the chunk is hard-cut at the limit instead.
        let text = format!("{} {}", "a".repeat(600), "b".repeat(900));
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks[0].text.len(), 1000);
    }

    #[test]
    fn hard_cuts_unbroken_runs() {
        let text = "a".repeat(2500);
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 1000);
        assert_eq!(chunks[1].offset, 1000);
        assert_eq!(chunks[2].text.len(), 500);
    }

    #[test]
    fn hard_cut_respects_char_boundaries() {
        let text = "é".repeat(800); // 2 bytes each
        let chunks = segment(&text, 0, 1001);
        // 1001 is mid-char; the cut floors to 1000.
        assert_eq!(chunks[0].text.len(), 1000);
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| ch == 'é')));
    }

    #[test]
    fn offsets_index_into_cleaned_text() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(900), "b".repeat(900), "c".repeat(900));
        let cleaned = clean_narration(&text);
        for chunk in segment(&text, 0, 1000) {
            assert_eq!(&cleaned[chunk.offset..chunk.offset + chunk.text.len()], chunk.text);
        }
    }

    #[test]
    fn budget_measures_cleaned_length() {
        // 1200 bytes of markup around 900 bytes of spoken text: one chunk.
        let text = format!("**{}**", "a".repeat(900));
        let chunks = segment(&text, 0, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.len(), 900);
    }

    #[test]
    fn segmentation_is_idempotent() {
        let text = format!(
            "{}\n\n{} {}\n{}",
            "a".repeat(800),
            "b".repeat(600),
            "c".repeat(700),
            "d".repeat(1500),
        );
        for chunk in segment(&text, 0, 1000) {
            let again = segment(&chunk.text, chunk.offset, 1000);
            assert_eq!(again.len(), 1, "chunk split further: {:?}", chunk.offset);
            assert_eq!(again[0].text, chunk.text);
            assert_eq!(again[0].offset, chunk.offset);
        }
    }

    #[test]
    fn job_budget_makes_fewer_chunks() {
        let text = format!("{}\n\n{}", "a".repeat(1500), "b".repeat(1500));
        assert!(segment(&text, 0, JOB_CHUNK_LEN).len() < segment(&text, 0, LIVE_CHUNK_LEN).len());
    }
}
