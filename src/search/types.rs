use serde::Serialize;

/// One retrieval hit. For chunk hits the byte range points into the file;
/// for whole-file fallback hits the range covers the entire content.
#[derive(Serialize, Debug, Clone)]
pub struct SearchChunk {
    pub file_path: String,
    pub start_byte: i64,
    pub end_byte: i64,
    pub content: String,
    pub score: f32,
}

#[derive(Serialize, Debug, Clone)]
pub struct SearchResponse {
    pub chunks: Vec<SearchChunk>,
    /// True when the entries are whole files served by the pre-index
    /// fallback rather than indexed chunks.
    pub is_full_file: bool,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            is_full_file: false,
        }
    }
}

/// A scored chunk candidate out of either engine, before fusion.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub chunk_id: i64,
    pub file_path: String,
    pub start_byte: i64,
    pub end_byte: i64,
    pub content: String,
    pub score: f32,
}
