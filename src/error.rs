use std::fmt;

use thiserror::Error;

/// Which external step of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Indexing,
    Completion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Completion => "completion",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector index is empty")]
    EmptyIndex,

    #[error("please upload and process a document first")]
    NotIndexed,

    #[error("document ingestion failed at {stage} stage: {source}")]
    IngestionFailed {
        stage: Stage,
        #[source]
        source: Box<RagError>,
    },

    #[error("{stage} service error: {message}")]
    ExternalService { stage: Stage, message: String },
}

impl RagError {
    pub fn external(stage: Stage, err: impl fmt::Display) -> Self {
        RagError::ExternalService {
            stage,
            message: err.to_string(),
        }
    }

    pub(crate) fn ingestion(stage: Stage, source: RagError) -> Self {
        RagError::IngestionFailed {
            stage,
            source: Box::new(source),
        }
    }
}

pub type RagResult<T> = Result<T, RagError>;
