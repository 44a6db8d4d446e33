use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::chunker::{chunk_text, TextChunk};
use super::embeddings::Embedder;
use super::prompt::{build_answer_prompt, build_context, RAG_SYSTEM_PROMPT};
use super::vector_store::VectorIndex;
use crate::error::{RagError, RagResult, Stage};
use crate::models::Message;
use crate::proxy::CompletionClient;
use crate::session::{IndexedDocument, Session};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    /// Chunk length in characters
    pub chunk_size: usize,
    /// Number of chunks retrieved per question
    pub top_k: usize,
    pub embed_timeout: Option<Duration>,
    pub completion_timeout: Option<Duration>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            top_k: DEFAULT_TOP_K,
            embed_timeout: None,
            completion_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    pub distance: f32,
}

/// Retrieved chunks, nearest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.chunk.text.as_str()).collect()
    }

    /// Newline-joined chunk texts in retrieval order.
    pub fn render(&self) -> String {
        build_context(&self.texts())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    pub prompt: String,
    pub context: RetrievedContext,
}

pub struct RetrievalPipeline {
    embedder: Arc<dyn Embedder>,
    completion: Arc<dyn CompletionClient>,
    config: RagConfig,
}

fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

async fn call_external<T, F>(stage: Stage, limit: Option<Duration>, call: F) -> RagResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RagError::external(stage, format!("timed out after {:?}", limit)))?,
        None => call.await,
    };
    result.map_err(|e| RagError::external(stage, format!("{:#}", e)))
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionClient>,
        config: RagConfig,
    ) -> Self {
        Self { embedder, completion, config }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    async fn embed(&self, texts: Vec<String>) -> RagResult<Vec<Vec<f32>>> {
        let expected = texts.len();
        // Embedders may block inside `embed`; driving the call from the
        // blocking pool lets the timeout fire regardless.
        let embedder = Arc::clone(&self.embedder);
        let handle = tokio::runtime::Handle::current();
        let call = async move {
            tokio::task::spawn_blocking(move || handle.block_on(embedder.embed(texts)))
                .await
                .map_err(|e| anyhow::anyhow!("Embedding task failed: {}", e))?
        };
        let vectors = call_external(Stage::Embedding, self.config.embed_timeout, call).await?;
        if vectors.len() != expected {
            return Err(RagError::external(
                Stage::Embedding,
                format!("expected {} vectors, got {}", expected, vectors.len()),
            ));
        }
        Ok(vectors)
    }

    /// Chunk, embed and index `text`, then swap the result into `session`.
    /// On error the session keeps whatever it held before.
    pub async fn ingest(&self, session: &mut Session, text: &str) -> RagResult<IngestReport> {
        let chunks = chunk_text(text, self.config.chunk_size);
        tracing::info!("Ingesting document: {} chars, {} chunks", text.chars().count(), chunks.len());

        let mut index = VectorIndex::new();
        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embed(texts)
                .await
                .map_err(|e| RagError::ingestion(Stage::Embedding, e))?;
            index
                .add(vectors)
                .map_err(|e| RagError::ingestion(Stage::Indexing, e))?;
        }

        let report = IngestReport {
            chunks: chunks.len(),
            dimension: index.dimension(),
            fingerprint: fingerprint(text),
        };
        session.replace_document(IndexedDocument::new(chunks, index, report.fingerprint.clone()));

        tracing::info!("Document {} indexed ({} chunks)", report.fingerprint, report.chunks);
        Ok(report)
    }

    /// Nearest chunks for `question`. An indexed but empty document yields
    /// an empty context.
    pub async fn retrieve(&self, session: &Session, question: &str) -> RagResult<RetrievedContext> {
        let document = session.document().ok_or(RagError::NotIndexed)?;
        if self.config.top_k == 0 || document.index().is_empty() {
            return Ok(RetrievedContext::default());
        }

        let query = self
            .embed(vec![question.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::external(Stage::Embedding, "no vector for question"))?;

        let hits = match document.index().search(&query, self.config.top_k) {
            Ok(hits) => hits,
            Err(RagError::EmptyIndex) => Vec::new(),
            Err(e) => return Err(e),
        };

        let chunks = hits
            .into_iter()
            .filter_map(|hit| {
                document.chunks().get(hit.position).map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    distance: hit.distance,
                })
            })
            .collect();

        Ok(RetrievedContext { chunks })
    }

    pub async fn answer_with_context(&self, session: &Session, question: &str) -> RagResult<RagAnswer> {
        let context = self.retrieve(session, question).await?;
        tracing::debug!("Retrieved {} chunks for question", context.chunks.len());

        let prompt = build_answer_prompt(&context.render(), question);
        let messages = vec![Message::system(RAG_SYSTEM_PROMPT), Message::user(prompt.clone())];

        let answer = call_external(
            Stage::Completion,
            self.config.completion_timeout,
            self.completion.complete(messages),
        )
        .await?;

        Ok(RagAnswer { answer, prompt, context })
    }

    /// Answer `question` from the session's document. The completion text is
    /// returned unchanged.
    pub async fn answer(&self, session: &Session, question: &str) -> RagResult<String> {
        Ok(self.answer_with_context(session, question).await?.answer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    /// Looks texts up in a table; unknown texts get a vector derived from
    /// their characters.
    pub struct StubEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl StubEmbedder {
        pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    self.table.get(t).cloned().unwrap_or_else(|| {
                        vec![t.chars().count() as f32, t.chars().map(|c| c as u32 as f32).sum()]
                    })
                })
                .collect())
        }
    }

    struct RaggedEmbedder;

    #[async_trait]
    impl Embedder for RaggedEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().enumerate().map(|(i, _)| vec![1.0; i + 1]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("model unavailable")
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    /// Blocks its thread instead of yielding.
    struct BlockingEmbedder;

    #[async_trait]
    impl Embedder for BlockingEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
    }

    /// Returns a fixed reply and records every message list it receives.
    pub struct RecordingCompletion {
        reply: String,
        pub calls: Mutex<Vec<Vec<Message>>>,
    }

    impl RecordingCompletion {
        pub fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn last_call(&self) -> Vec<Message> {
            self.calls.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionClient for RecordingCompletion {
        async fn complete(&self, messages: Vec<Message>) -> Result<String> {
            self.calls.lock().unwrap().push(messages);
            Ok(self.reply.clone())
        }
    }

    pub struct FailingCompletion;

    #[async_trait]
    impl CompletionClient for FailingCompletion {
        async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
            anyhow::bail!("503 Service Unavailable")
        }
    }

    fn pipeline_with(
        embedder: impl Embedder + 'static,
        completion: Arc<dyn CompletionClient>,
        chunk_size: usize,
        top_k: usize,
    ) -> RetrievalPipeline {
        let config = RagConfig { chunk_size, top_k, ..RagConfig::default() };
        RetrievalPipeline::new(Arc::new(embedder), completion, config)
    }

    #[tokio::test]
    async fn test_ingest_splits_and_indexes() {
        let pipeline = pipeline_with(StubEmbedder::new(&[]), Arc::new(RecordingCompletion::new("")), 5, 3);
        let mut session = Session::new();
        let report = pipeline.ingest(&mut session, "ABCDEFGHIJ").await.unwrap();

        assert_eq!(report.chunks, 2);
        assert_eq!(report.dimension, Some(2));
        let doc = session.document().unwrap();
        let texts: Vec<&str> = doc.chunks().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ABCDE", "FGHIJ"]);
        assert_eq!(doc.index().len(), 2);
    }

    #[tokio::test]
    async fn test_answer_before_ingest_is_not_indexed() {
        let completion = Arc::new(RecordingCompletion::new("unused"));
        let pipeline = pipeline_with(StubEmbedder::new(&[]), completion.clone(), 500, 3);
        let session = Session::new();

        let err = pipeline.answer(&session, "anything?").await.unwrap_err();
        assert!(matches!(err, RagError::NotIndexed));
        assert!(completion.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nearest_chunk_first() {
        let embedder = StubEmbedder::new(&[
            ("cat", vec![1.0, 0.0]),
            ("dog", vec![0.0, 1.0]),
            ("query", vec![0.9, 0.1]),
        ]);
        let pipeline = pipeline_with(embedder, Arc::new(RecordingCompletion::new("")), 3, 2);
        let mut session = Session::new();
        pipeline.ingest(&mut session, "catdog").await.unwrap();

        let context = pipeline.retrieve(&session, "query").await.unwrap();
        assert_eq!(context.texts(), vec!["cat", "dog"]);
        assert!((context.chunks[0].distance - 0.02).abs() < 1e-6);
        assert!((context.chunks[1].distance - 1.62).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_top_k_one_returns_only_nearest() {
        let embedder = StubEmbedder::new(&[
            ("cat", vec![1.0, 0.0]),
            ("dog", vec![0.0, 1.0]),
            ("query", vec![0.9, 0.1]),
        ]);
        let pipeline = pipeline_with(embedder, Arc::new(RecordingCompletion::new("")), 3, 1);
        let mut session = Session::new();
        pipeline.ingest(&mut session, "catdog").await.unwrap();

        let context = pipeline.retrieve(&session, "query").await.unwrap();
        assert_eq!(context.texts(), vec!["cat"]);
    }

    #[tokio::test]
    async fn test_answer_sends_composed_prompt() {
        let embedder = StubEmbedder::new(&[
            ("Refunds within 30 days.", vec![0.0, 0.0]),
            ("Contact support.", vec![1.0, 0.0]),
            ("What is the refund policy?", vec![0.1, 0.0]),
        ]);
        let completion = Arc::new(RecordingCompletion::new("Refunds are accepted for 30 days."));
        let pipeline = pipeline_with(embedder, completion.clone(), 23, 3);
        let mut session = Session::new();
        pipeline
            .ingest(&mut session, "Refunds within 30 days.Contact support.")
            .await
            .unwrap();

        let answer = pipeline.answer(&session, "What is the refund policy?").await.unwrap();
        assert_eq!(answer, "Refunds are accepted for 30 days.");

        let sent = completion.last_call();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Message::system("You are an expert assistant extracting policy answers."));
        assert_eq!(
            sent[1].content,
            "Use the following information to answer the question:\nRefunds within 30 days.\nContact support.\n\nQuestion: What is the refund policy?"
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_preserves_previous_document() {
        let good = pipeline_with(StubEmbedder::new(&[]), Arc::new(RecordingCompletion::new("")), 4, 3);
        let mut session = Session::new();
        good.ingest(&mut session, "first document").await.unwrap();
        let before = session.document().cloned();

        let ragged = pipeline_with(RaggedEmbedder, Arc::new(RecordingCompletion::new("")), 4, 3);
        let err = ragged.ingest(&mut session, "second document").await.unwrap_err();

        match err {
            RagError::IngestionFailed { stage, source } => {
                assert_eq!(stage, Stage::Indexing);
                assert!(matches!(*source, RagError::DimensionMismatch { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.document().cloned(), before);
    }

    #[tokio::test]
    async fn test_embedding_failure_reports_stage() {
        let pipeline = pipeline_with(FailingEmbedder, Arc::new(RecordingCompletion::new("")), 500, 3);
        let mut session = Session::new();
        let err = pipeline.ingest(&mut session, "some text").await.unwrap_err();

        match err {
            RagError::IngestionFailed { stage, source } => {
                assert_eq!(stage, Stage::Embedding);
                assert!(source.to_string().contains("model unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!session.is_indexed());
    }

    #[tokio::test]
    async fn test_completion_failure_is_external_error() {
        let pipeline = pipeline_with(StubEmbedder::new(&[]), Arc::new(FailingCompletion), 500, 3);
        let mut session = Session::new();
        pipeline.ingest(&mut session, "policy text").await.unwrap();

        let err = pipeline.answer(&session, "question").await.unwrap_err();
        assert!(matches!(err, RagError::ExternalService { stage: Stage::Completion, .. }));
    }

    #[tokio::test]
    async fn test_embed_timeout() {
        let config = RagConfig {
            embed_timeout: Some(Duration::from_millis(20)),
            ..RagConfig::default()
        };
        let pipeline = RetrievalPipeline::new(
            Arc::new(SlowEmbedder),
            Arc::new(RecordingCompletion::new("")),
            config,
        );
        let mut session = Session::new();
        let err = pipeline.ingest(&mut session, "text").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_embed_timeout_fires_for_blocking_embedder() {
        let config = RagConfig {
            embed_timeout: Some(Duration::from_millis(20)),
            ..RagConfig::default()
        };
        let pipeline = RetrievalPipeline::new(
            Arc::new(BlockingEmbedder),
            Arc::new(RecordingCompletion::new("")),
            config,
        );
        let mut session = Session::new();

        let started = std::time::Instant::now();
        let err = pipeline.ingest(&mut session, "text").await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(300), "timeout fired after {:?}", elapsed);
        match err {
            RagError::IngestionFailed { stage, source } => {
                assert_eq!(stage, Stage::Embedding);
                assert!(source.to_string().contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!session.is_indexed());
    }

    #[tokio::test]
    async fn test_reingest_replaces_instead_of_appending() {
        let pipeline = pipeline_with(StubEmbedder::new(&[]), Arc::new(RecordingCompletion::new("")), 4, 3);
        let mut session = Session::new();
        let text = "identical document text";

        pipeline.ingest(&mut session, text).await.unwrap();
        let first = session.document().cloned().unwrap();
        pipeline.ingest(&mut session, text).await.unwrap();
        let second = session.document().cloned().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.index().len(), second.chunks().len());
    }

    #[tokio::test]
    async fn test_empty_document_answers_without_context() {
        let completion = Arc::new(RecordingCompletion::new("I don't know."));
        let pipeline = pipeline_with(StubEmbedder::new(&[]), completion.clone(), 500, 3);
        let mut session = Session::new();
        let report = pipeline.ingest(&mut session, "").await.unwrap();
        assert_eq!(report.chunks, 0);
        assert!(session.is_indexed());

        let result = pipeline.answer_with_context(&session, "Q?").await.unwrap();
        assert!(result.context.is_empty());
        assert_eq!(result.answer, "I don't know.");
    }

    #[test]
    fn test_ingest_blocking_on_runtime() {
        let pipeline = pipeline_with(StubEmbedder::new(&[]), Arc::new(RecordingCompletion::new("")), 500, 3);
        let mut session = Session::new();
        let report = tokio_test::block_on(pipeline.ingest(&mut session, "short text")).unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(report.fingerprint.len(), 16);
    }
}
