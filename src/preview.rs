use std::sync::OnceLock;

use regex::Regex;

/// Sentences kept in the synchronous preview.
pub const PREVIEW_SENTENCES: usize = 3;
/// Upper bound for pages whose "sentences" never terminate.
pub const PREVIEW_MAX_CHARS: usize = 600;

/// Naive sentence split on runs of `.`, `!` and `?`.
pub fn split_sentences(text: &str) -> Vec<&str> {
    static SENTENCE: OnceLock<Regex> = OnceLock::new();
    let re = SENTENCE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]*").expect("static regex"));
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// The first `n` sentences of `text`, verbatim, capped at [`PREVIEW_MAX_CHARS`].
pub fn extractive_preview(text: &str, n: usize) -> String {
    let preview = split_sentences(text)
        .into_iter()
        .take(n)
        .collect::<Vec<_>>()
        .join(" ");

    if preview.chars().count() <= PREVIEW_MAX_CHARS {
        return preview;
    }
    let mut truncated: String = preview.chars().take(PREVIEW_MAX_CHARS).collect();
    truncated.push('…');
    truncated
}
