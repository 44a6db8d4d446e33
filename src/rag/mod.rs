//! Retrieval-augmented question answering over one uploaded document.
//!
//! Ingestion: chunk → embed → index. Questions: embed → nearest chunks →
//! prompt → completion.

pub mod chunker;
pub mod embeddings;
pub mod pipeline;
pub mod prompt;
pub mod vector_store;

pub use chunker::{chunk_text, TextChunk};
pub use embeddings::{Embedder, FastEmbedder};
pub use pipeline::{IngestReport, RagAnswer, RagConfig, RetrievalPipeline, RetrievedChunk, RetrievedContext};
pub use vector_store::{Neighbor, VectorIndex};
