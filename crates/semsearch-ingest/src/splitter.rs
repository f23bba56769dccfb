//! Character-based document chunking backed by `text-splitter`.

use semsearch_core::config::ChunkingConfig;
use semsearch_core::{Chunk, Document, Result, SearchError};
use text_splitter::{ChunkConfig, TextSplitter};

/// Splits documents into overlapping chunks of at most `chunk_size`
/// characters, preferring paragraph, sentence and word boundaries.
pub struct DocumentSplitter {
    splitter: TextSplitter<text_splitter::Characters>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl std::fmt::Debug for DocumentSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}

impl DocumentSplitter {
    /// Fails if `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(SearchError::Chunking(format!(
                "overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        let config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .map_err(|e| SearchError::Chunking(e.to_string()))?;
        Ok(Self {
            splitter: TextSplitter::new(config),
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split every document in order. Whitespace-only documents yield nothing.
    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| self.split_document(doc))
            .collect()
    }

    /// Chunks of one document, each carrying the document's metadata and its
    /// start offset in characters.
    pub fn split_document(&self, doc: &Document) -> Vec<Chunk> {
        let text = doc.content.as_str();
        let mut chunks = Vec::new();
        let mut last_byte = 0;
        let mut char_offset = 0;

        for (byte_offset, piece) in self.splitter.chunk_indices(text) {
            if byte_offset >= last_byte {
                char_offset += text[last_byte..byte_offset].chars().count();
            } else {
                char_offset = text[..byte_offset].chars().count();
            }
            last_byte = byte_offset;

            if piece.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk {
                text: piece.to_string(),
                source: doc.source.clone(),
                start_offset: char_offset,
                metadata: doc.metadata.clone(),
            });
        }
        chunks
    }
}
