//! System prompt composition for chat streams.

use std::collections::BTreeMap;

use crate::search::SearchHit;
use crate::chunker::format_timestamp;

const PERSONA: &str = "You are TubeSage, an assistant that answers questions about YouTube \
videos using only the transcript excerpts provided below. If the excerpts do not contain \
the answer, say so instead of guessing.";

const CITATION_RULES: &str = "When you reference a specific moment, cite its timestamp in \
square brackets exactly as it appears in the excerpts, e.g. [12:34]. Do not invent \
timestamps that are not present in the excerpts.";

/// System prompt for single-video chat.
pub fn video_system_prompt(video_title: &str, context: &str) -> String {
    format!(
        "{PERSONA}\n\n{CITATION_RULES}\n\nVideo: {video_title}\n\nTranscript excerpts:\n{context}"
    )
}

/// System prompt for channel-wide chat.
pub fn channel_system_prompt(channel_title: &str, context: &str) -> String {
    format!(
        "{PERSONA}\n\n{CITATION_RULES}\n\nChannel: {channel_title}\n\n\
         Transcript excerpts from multiple videos:\n{context}"
    )
}

/// Timestamp-annotated context body for one video.
pub fn build_video_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[{} - {}]\n{}",
                format_timestamp(hit.start_time),
                format_timestamp(hit.end_time),
                hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Context body grouped by video for channel chat.
pub fn build_channel_context(hits: &[SearchHit]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&SearchHit>> = BTreeMap::new();
    for hit in hits {
        grouped.entry(hit.video_title.as_str()).or_default().push(hit);
    }

    grouped
        .into_iter()
        .map(|(title, hits)| {
            let body = hits
                .iter()
                .map(|hit| {
                    format!(
                        "[{} - {}]\n{}",
                        format_timestamp(hit.start_time),
                        format_timestamp(hit.end_time),
                        hit.text
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            format!("Video: {title}\n{body}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fallback context when a target has no retrievable chunks.
pub fn degenerate_context(title: &str, description: &str) -> String {
    if description.is_empty() {
        format!("Title: {title}\n(No transcript excerpts are available.)")
    } else {
        format!("Title: {title}\nDescription: {description}\n(No transcript excerpts are available.)")
    }
}
