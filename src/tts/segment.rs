//! Sentence-aware text segmentation for long-form synthesis.
//!
//! Polly caps the size of a single synthesis task, so long documents are cut
//! into word-limited segments. Cuts land on sentence boundaries; a sentence is
//! never split, even when it alone is longer than the limit.

/// Default per-segment word limit.
pub const DEFAULT_MAX_WORDS: usize = 20_000;

/// An ordered slice of the input text, ready to submit as one synthesis task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub content: String,
    pub sequence_index: usize,
}

impl TextSegment {
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Split `text` into segments of at most `max_words` words, cutting only
/// after sentence-terminal tokens.
///
/// Short input comes back as a single segment equal to the trimmed text.
/// Longer input is re-joined with single spaces inside each segment.
pub fn segment(text: &str, max_words: usize) -> Vec<TextSegment> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return vec![];
    }

    let max_words = max_words.max(1);
    let words: Vec<&str> = trimmed.split_whitespace().collect();

    if words.len() <= max_words {
        return vec![TextSegment {
            content: trimmed.to_string(),
            sequence_index: 0,
        }];
    }

    let mut segments = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let remaining = words.len() - start;
        let end = if remaining <= max_words {
            words.len()
        } else {
            find_cut(&words, start, max_words)
        };

        segments.push(TextSegment {
            content: words[start..end].join(" "),
            sequence_index: segments.len(),
        });
        start = end;
    }

    segments
}

/// Exclusive end index of the segment starting at `start`.
///
/// Prefers the last sentence end inside the window; falls back to the first
/// sentence end after it, then to the end of the input.
fn find_cut(words: &[&str], start: usize, max_words: usize) -> usize {
    let window_end = start + max_words;

    if let Some(i) = (start..window_end).rev().find(|&i| ends_sentence(words[i])) {
        return i + 1;
    }

    (window_end..words.len())
        .find(|&i| ends_sentence(words[i]))
        .map(|i| i + 1)
        .unwrap_or(words.len())
}

/// Whether a token closes a sentence: `.`, `!` or `?`, optionally followed
/// by closing quotes or brackets (`end."` or `(see above.)`).
fn ends_sentence(token: &str) -> bool {
    let stripped = token.trim_end_matches(['"', '\'', ')', ']', '\u{201D}', '\u{2019}']);
    stripped.ends_with(['.', '!', '?'])
}
