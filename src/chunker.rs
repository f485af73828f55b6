//! Deterministic transcript segmentation.
//!
//! Segments are accumulated into `[MM:SS] text` lines and cut into chunks
//! under dual length/punctuation constraints. The same line builder feeds
//! the transcript blob, so chunk byte offsets agree with the blob
//! byte-for-byte.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::transcript::TranscriptSegment;

/// Prefer a cut at a sentence boundary once the buffer reaches this size.
const SOFT_LIMIT: usize = 1000;

/// Force a cut at this size regardless of punctuation.
const HARD_LIMIT: usize = 2000;

/// Maximum keywords kept per chunk or query.
const MAX_KEYWORDS: usize = 10;

/// Maximum preview length in characters.
const PREVIEW_CHARS: usize = 200;

/// Stop words applied to chunk keyword extraction. Tokens of length <= 3
/// are dropped before this set is consulted.
const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "cannot", "could", "does",
    "doing", "each", "from", "have", "having", "here", "into", "just", "like", "more", "most",
    "only", "other", "over", "really", "some", "such", "than", "their", "them", "then", "there",
    "these", "they", "those", "through", "very", "were", "will", "with", "would", "your",
];

/// Additional stop words applied on the query side. Interrogatives carry no
/// retrieval signal but dominate chat questions.
const QUERY_STOP_WORDS: &[&str] = &[
    "what", "when", "where", "who", "why", "how", "which", "that", "this",
];

fn chunk_stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

fn query_stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        STOP_WORDS
            .iter()
            .chain(QUERY_STOP_WORDS.iter())
            .copied()
            .collect()
    })
}

/// A chunk produced by segmentation, before embedding and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    pub start_time: i64,
    pub end_time: i64,
    pub byte_offset: i64,
    pub byte_length: i64,
    pub keywords: Vec<String>,
}

impl ChunkDraft {
    /// Short preview for keyword boosts without a blob read.
    pub fn preview(&self) -> String {
        truncate_chars(&self.text, PREVIEW_CHARS)
    }
}

/// Format whole seconds as `MM:SS`. Minutes exceed two digits for videos
/// of 100+ minutes; seconds are always zero-padded.
pub fn format_timestamp(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Build one transcript line: `[MM:SS] <text>\n`.
///
/// This is the only producer of blob text; the blob writer serializes
/// chunk buffers built from these lines verbatim.
pub fn transcript_line(start_seconds: i64, text: &str) -> String {
    format!("[{}] {}\n", format_timestamp(start_seconds), text)
}

/// Parse the `[MM:SS]` or `[HH:MM:SS]` prefix of a transcript line back to
/// seconds. Used when hydrating chunk text from the blob.
pub fn parse_line_timestamp(line: &str) -> Option<i64> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let stamp = &rest[..end];
    let parts: Vec<&str> = stamp.split(':').collect();
    match parts.as_slice() {
        [m, s] => Some(m.parse::<i64>().ok()? * 60 + s.parse::<i64>().ok()?),
        [h, m, s] => Some(
            h.parse::<i64>().ok()? * 3600 + m.parse::<i64>().ok()? * 60 + s.parse::<i64>().ok()?,
        ),
        _ => None,
    }
}

/// Cut ordered segments into chunks.
///
/// After appending each segment the buffer is cut when it ends at a
/// sentence boundary past the soft limit, unconditionally past the hard
/// limit, and always at the final segment.
pub fn chunk_segments(segments: &[TranscriptSegment]) -> Vec<ChunkDraft> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut start_time = 0i64;
    let mut end_time = 0i64;
    let mut cumulative_bytes = 0i64;

    for (i, segment) in segments.iter().enumerate() {
        if buffer.is_empty() {
            start_time = segment.start_seconds;
        }
        buffer.push_str(&transcript_line(segment.start_seconds, &segment.text));
        end_time = segment.end_seconds;

        let natural = ends_with_sentence_terminator(&segment.text);
        let long = buffer.len() >= SOFT_LIMIT;
        let too_long = buffer.len() >= HARD_LIMIT;
        let last = i == segments.len() - 1;

        if (natural && long) || too_long || last {
            let byte_length = buffer.len() as i64;
            chunks.push(ChunkDraft {
                keywords: extract_keywords(&buffer),
                text: std::mem::take(&mut buffer),
                start_time,
                end_time,
                byte_offset: cumulative_bytes,
                byte_length,
            });
            cumulative_bytes += byte_length;
        }
    }

    chunks
}

/// Reassemble the transcript blob from chunk texts. By construction this
/// equals the concatenation of all transcript lines.
pub fn assemble_blob(chunks: &[ChunkDraft]) -> String {
    chunks.iter().map(|c| c.text.as_str()).collect()
}

/// Whether the last non-space character terminates a sentence.
fn ends_with_sentence_terminator(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('.') | Some('!') | Some('?'))
}

/// Extract up to 10 deduplicated keyword tokens from chunk text.
pub fn extract_keywords(text: &str) -> Vec<String> {
    tokenize(text, chunk_stop_words())
}

/// Extract query keywords with the extended stop set. The token policy is
/// identical to the chunk side so matching stays symmetric.
pub fn extract_query_keywords(query: &str) -> Vec<String> {
    tokenize(query, query_stop_words())
}

fn tokenize(text: &str, stop: &HashSet<&'static str>) -> Vec<String> {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for token in lowered.split_whitespace() {
        if token.len() <= 3 || stop.contains(token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
