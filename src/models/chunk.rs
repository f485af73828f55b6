//! Transcript chunk model, the unit of retrieval.

use serde::{Deserialize, Serialize};

/// A contiguous slice of a video transcript.
///
/// For a given video, `chunk_index` is dense from 0 and consecutive chunks
/// tile the transcript blob: `byte_offset[k] + byte_length[k] =
/// byte_offset[k+1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// Database row ID.
    pub id: i64,
    /// Owning video row.
    pub video_id: i64,
    /// Dense position within the video, 0-based.
    pub chunk_index: i64,
    /// Start of the covered range, whole seconds.
    pub start_time: i64,
    /// End of the covered range, whole seconds.
    pub end_time: i64,
    /// Offset of this chunk's text within the transcript blob.
    pub byte_offset: i64,
    /// UTF-8 byte length of this chunk's text.
    pub byte_length: i64,
    /// Short text preview used for keyword boosts without blob reads.
    pub preview: String,
    /// Up to 10 keyword tokens extracted from the chunk text.
    pub keywords: Vec<String>,
    /// Embedding vector; None when the provider failed for this chunk.
    pub embedding: Option<Vec<f32>>,
}

impl TranscriptChunk {
    /// Serialize an embedding as little-endian f32 bytes for blob storage.
    pub fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(vector.len() * 4);
        for v in vector {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Deserialize an embedding blob written by `embedding_to_blob`.
    pub fn embedding_from_blob(blob: &[u8]) -> Option<Vec<f32>> {
        if blob.is_empty() || blob.len() % 4 != 0 {
            return None;
        }
        Some(
            blob.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob_round_trip() {
        let vector = vec![0.25_f32, -1.5, 3.0, 0.0];
        let blob = TranscriptChunk::embedding_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(TranscriptChunk::embedding_from_blob(&blob), Some(vector));
    }

    #[test]
    fn test_embedding_blob_rejects_ragged_input() {
        assert_eq!(TranscriptChunk::embedding_from_blob(&[1, 2, 3]), None);
        assert_eq!(TranscriptChunk::embedding_from_blob(&[]), None);
    }
}
