//! Byte-range chunking for stored file content. Chunks are the atomic unit
//! of retrieval: the worker embeds them, the lexical index counts their
//! tokens, and search returns them with their byte offsets so callers can
//! map a hit back into the file.

/// One contiguous byte range of a document. `content` is always exactly
/// `document[start_byte..end_byte]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    max_bytes: usize,
}

pub const DEFAULT_CHUNK_BYTES: usize = 500;

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

impl TextChunker {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }

    /// Split `content` into ordered chunks of at most `max_bytes` bytes,
    /// pulling the cut point back to a UTF-8 boundary. Concatenating the
    /// chunk contents reproduces the input exactly; empty input produces
    /// no chunks.
    pub fn split(&self, content: &str) -> Vec<Chunk> {
        let total = content.len();
        let mut chunks = Vec::with_capacity(total / self.max_bytes + 1);
        let mut start = 0;
        while start < total {
            let mut end = (start + self.max_bytes).min(total);
            while end > start && !content.is_char_boundary(end) {
                end -= 1;
            }
            if end == start {
                // a single code point wider than the budget; emit it whole
                end = (start + 1..=total)
                    .find(|&i| content.is_char_boundary(i))
                    .unwrap_or(total);
            }
            chunks.push(Chunk {
                index: chunks.len(),
                start_byte: start,
                end_byte: end,
                content: content[start..end].to_owned(),
            });
            start = end;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(TextChunker::new(16).split("").is_empty());
    }

    #[test]
    fn short_content_is_one_chunk() {
        let chunks = TextChunker::new(16).split("hello");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_byte, 0);
        assert_eq!(chunks[0].end_byte, 5);
        assert_eq!(chunks[0].content, "hello");
    }

    #[test]
    fn chunks_cover_the_input_in_order() {
        let content = "abcdefghij".repeat(13);
        let chunker = TextChunker::new(32);
        let chunks = chunker.split(&content);
        assert_eq!(concat(&chunks), content);
        let mut cursor = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.start_byte, cursor);
            assert!(chunk.end_byte - chunk.start_byte <= 32);
            cursor = chunk.end_byte;
        }
        assert_eq!(cursor, content.len());
    }

    #[test]
    fn cuts_pull_back_to_utf8_boundaries() {
        // "é" is two bytes; an odd budget would otherwise land mid-sequence
        let content = "é".repeat(10);
        let chunks = TextChunker::new(3).split(&content);
        assert_eq!(concat(&chunks), content);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 3);
            assert!(std::str::from_utf8(chunk.content.as_bytes()).is_ok());
        }
    }

    #[test]
    fn oversized_code_point_is_emitted_whole() {
        let content = "🚀x";
        let chunks = TextChunker::new(1).split(content);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "🚀");
        assert_eq!(chunks[1].content, "x");
        assert_eq!(concat(&chunks), content);
    }

    #[test]
    fn splitting_is_deterministic() {
        let content = "some text that will be split into several chunks".repeat(4);
        let chunker = TextChunker::new(24);
        assert_eq!(chunker.split(&content), chunker.split(&content));
    }
}
