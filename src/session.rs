use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::Message;
use crate::rag::chunker::TextChunk;
use crate::rag::vector_store::VectorIndex;

/// Chunks of the processed document and their embeddings, aligned by
/// position: `index` holds exactly one vector per entry of `chunks`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    chunks: Vec<TextChunk>,
    index: VectorIndex,
    fingerprint: String,
}

impl IndexedDocument {
    pub(crate) fn new(chunks: Vec<TextChunk>, index: VectorIndex, fingerprint: String) -> Self {
        debug_assert_eq!(chunks.len(), index.len());
        Self { chunks, index, fingerprint }
    }

    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Short SHA-256 digest of the source text.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// State of one interactive session. Owned by the caller and handed to the
/// pipeline and mode handlers explicitly.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    account: Option<String>,
    document: Option<IndexedDocument>,
    /// Transcript of the client-facing chat modes
    pub messages: Vec<Message>,
    /// Separate transcript for the raw playground
    pub playground_messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            account: None,
            document: None,
            messages: Vec::new(),
            playground_messages: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// Mark the session as used now.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// True once nothing has touched the session for longer than `ttl`.
    pub fn is_idle(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active > ttl
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn set_account(&mut self, account: Option<String>) {
        self.account = account;
    }

    pub fn is_indexed(&self) -> bool {
        self.document.is_some()
    }

    pub fn document(&self) -> Option<&IndexedDocument> {
        self.document.as_ref()
    }

    /// Replace the indexed document wholesale. Previous chunks and vectors
    /// are dropped, never merged.
    pub(crate) fn replace_document(&mut self, document: IndexedDocument) {
        self.document = Some(document);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
