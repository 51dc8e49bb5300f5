use crate::chunking::{build_embedding_context, split_text};
use crate::error::{IndexError, PipelineError};
use crate::extractor::extract_text;
use crate::models::{
    Claim, Document, DocumentChunk, DocumentStatus, FileType, GeneratedMetadata, IndexRecord,
    NewDocument, PipelineOptions, ProcessOutcome, UploadRequest,
};
use crate::readiness::wait_ready;
use crate::traits::{DocumentStore, Embedder, MetadataGenerator, SearchIndex};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

/// Report of a bulk re-index pass over completed documents.
#[derive(Debug, Default)]
pub struct ReindexReport {
    pub indexed: usize,
    pub failed: Vec<(Uuid, String)>,
}

/// Sequences extraction, metadata generation, persistence and indexing for
/// one document at a time.
///
/// Documents are independent units of work: any number of `process` calls
/// may run concurrently, the store's atomic claim guarantees at most one
/// active run per document id.
pub struct IngestionPipeline<S, G, X>
where
    S: DocumentStore,
    G: MetadataGenerator + Embedder,
    X: SearchIndex,
{
    store: S,
    generator: G,
    index: X,
    options: PipelineOptions,
    index_gate: OnceCell<bool>,
}

impl<S, G, X> IngestionPipeline<S, G, X>
where
    S: DocumentStore,
    G: MetadataGenerator + Embedder,
    X: SearchIndex,
{
    pub fn new(store: S, generator: G, index: X, options: PipelineOptions) -> Self {
        Self {
            store,
            generator,
            index,
            options,
            index_gate: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn search_index(&self) -> &X {
        &self.index
    }

    /// Validate and persist an upload as a `pending` document. Rejections
    /// (type, size, duplicate name) happen before any record is created.
    pub async fn upload(&self, request: UploadRequest) -> Result<Document, PipelineError> {
        let file_type = FileType::from_filename(&request.original_filename).ok_or_else(|| {
            PipelineError::UnsupportedFormat(request.original_filename.clone())
        })?;

        if request.content.len() > self.options.max_file_size_bytes {
            return Err(PipelineError::TooLarge {
                size: request.content.len(),
                limit: self.options.max_file_size_bytes,
            });
        }

        let filename = storage_filename(&request.content, file_type);
        let file_size = request.content.len() as i64;

        self.store
            .insert_document(NewDocument {
                filename,
                original_filename: request.original_filename,
                file_type,
                file_size,
                content: request.content,
                language: request.language,
                category_ids: request.category_ids,
                tag_names: request.tag_names,
            })
            .await
    }

    /// Idempotent entry point: runs the full pipeline for a `pending` or
    /// `failed` document and is a no-op for `processing`/`completed` ones.
    pub async fn process(&self, document_id: Uuid) -> Result<ProcessOutcome, PipelineError> {
        let document = match self.store.claim_for_processing(document_id).await? {
            Claim::Acquired(document) => document,
            Claim::Busy(status) => return Ok(ProcessOutcome::Skipped(status)),
        };

        // A retry that already extracted text picks up from the stored copy.
        let text = match document
            .extracted_text
            .as_deref()
            .filter(|existing| !existing.trim().is_empty())
        {
            Some(existing) => existing.to_string(),
            None => match extract_text(&document.content, document.file_type) {
                Ok(text) if !text.trim().is_empty() => {
                    self.store.save_extracted_text(document_id, &text).await?;
                    text
                }
                Ok(_) => {
                    return self
                        .fail(document_id, "no text could be extracted from the document")
                        .await;
                }
                Err(error) => return self.fail(document_id, &error.to_string()).await,
            },
        };

        let metadata = match self.generator.generate(&text, &document.language).await {
            Ok(metadata) => metadata,
            // Extracted text is already persisted; only the metadata stage
            // is lost and a retry resumes from here.
            Err(error) => return self.fail(document_id, &error.to_string()).await,
        };

        self.store.apply_metadata(document_id, &metadata).await?;

        let chunks = self.build_chunks(&document, &metadata, &text).await;
        let chunk_count = chunks.len();
        self.store.replace_chunks(document_id, &chunks).await?;

        self.store.mark_completed(document_id).await?;

        let index_error = match self.index_current(document_id).await {
            Ok(()) => None,
            Err(error) => {
                warn!(
                    document_id = %document_id,
                    error = %error,
                    "indexing failed; document stays completed, retry with reindex"
                );
                Some(error.to_string())
            }
        };

        info!(
            document_id = %document_id,
            chunks = chunk_count,
            indexed = index_error.is_none(),
            "document processed"
        );

        Ok(ProcessOutcome::Completed {
            chunk_count,
            index_error,
        })
    }

    /// Process a batch; one document's failure never aborts the others.
    pub async fn process_many(&self, document_ids: &[Uuid]) -> Vec<(Uuid, ProcessOutcome)> {
        let mut outcomes = Vec::with_capacity(document_ids.len());
        for &document_id in document_ids {
            let outcome = match self.process(document_id).await {
                Ok(outcome) => outcome,
                Err(error) => ProcessOutcome::Failed {
                    message: error.to_string(),
                },
            };
            outcomes.push((document_id, outcome));
        }
        outcomes
    }

    /// Re-run indexing alone for a completed document.
    pub async fn reindex(&self, document_id: Uuid) -> Result<(), PipelineError> {
        let document = self
            .store
            .fetch_document(document_id)
            .await?
            .ok_or(PipelineError::NotFound(document_id))?;

        if document.status != DocumentStatus::Completed {
            return Err(PipelineError::InvalidArgument(format!(
                "document {document_id} is {} and has nothing to index",
                document.status
            )));
        }

        self.push_to_index(&document).await?;
        Ok(())
    }

    /// Re-index every completed document, isolating per-document failures.
    pub async fn reindex_completed(&self) -> Result<ReindexReport, PipelineError> {
        let mut report = ReindexReport::default();
        for document_id in self.store.completed_document_ids().await? {
            match self.reindex(document_id).await {
                Ok(()) => report.indexed += 1,
                Err(error) => report.failed.push((document_id, error.to_string())),
            }
        }
        Ok(report)
    }

    /// Remove the document everywhere: store record, chunks, associations
    /// and the search-index entry.
    pub async fn delete(&self, document_id: Uuid) -> Result<bool, PipelineError> {
        let removed = self.store.delete_document(document_id).await?;

        if removed {
            if let Err(error) = self.index.remove_document(document_id).await {
                warn!(
                    document_id = %document_id,
                    error = %error,
                    "search-index entry could not be removed"
                );
            }
        }

        Ok(removed)
    }

    async fn fail(
        &self,
        document_id: Uuid,
        message: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        warn!(document_id = %document_id, error = message, "document processing failed");
        self.store.mark_failed(document_id, message).await?;
        Ok(ProcessOutcome::Failed {
            message: message.to_string(),
        })
    }

    async fn build_chunks(
        &self,
        document: &Document,
        metadata: &GeneratedMetadata,
        text: &str,
    ) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();

        for (index, piece) in split_text(text, self.options.chunk_chars)
            .into_iter()
            .enumerate()
        {
            let context = build_embedding_context(
                &document.original_filename,
                Some(metadata.topic.as_str()),
                &metadata.tags,
                &piece,
            );
            let embedding = match self.generator.embed(&context).await {
                Ok(vector) => Some(vector),
                Err(error) => {
                    warn!(
                        document_id = %document.id,
                        chunk_index = index,
                        error = %error,
                        "chunk embedding failed; storing chunk without a vector"
                    );
                    None
                }
            };

            chunks.push(DocumentChunk {
                document_id: document.id,
                chunk_index: index as i32,
                text: piece,
                embedding,
            });
        }

        chunks
    }

    /// The readiness gate is consulted once per process lifetime; after an
    /// exhausted probe the pipeline keeps ingesting without search.
    async fn index_ready(&self) -> bool {
        *self
            .index_gate
            .get_or_init(|| async {
                let ready = wait_ready(
                    || self.index.ready(),
                    self.options.index_wait_attempts,
                    self.options.index_wait_interval,
                )
                .await;
                if !ready {
                    warn!("search engine never became ready; continuing without indexing");
                }
                ready
            })
            .await
    }

    async fn index_current(&self, document_id: Uuid) -> Result<(), PipelineError> {
        let document = self
            .store
            .fetch_document(document_id)
            .await?
            .ok_or(PipelineError::NotFound(document_id))?;
        self.push_to_index(&document).await?;
        Ok(())
    }

    async fn push_to_index(&self, document: &Document) -> Result<(), IndexError> {
        if !self.index_ready().await {
            return Err(IndexError::NotReady(
                "readiness probe exhausted".to_string(),
            ));
        }

        self.index
            .index_document(&IndexRecord::from_document(document))
            .await
    }
}

/// Content-addressed storage name: hash prefix keeps equal uploads adjacent,
/// the random suffix keeps names unique.
fn storage_filename(content: &[u8], file_type: FileType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = format!("{:x}", hasher.finalize());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}.{}", &digest[..16], &suffix[..8], file_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::IngestionPipeline;
    use crate::error::{IndexError, PipelineError};
    use crate::models::{
        DocumentStatus, GeneratedMetadata, IndexRecord, PipelineOptions, ProcessOutcome, SearchHit,
        UploadRequest,
    };
    use crate::stores::MemoryStore;
    use crate::traits::{DocumentStore, Embedder, MetadataGenerator, SearchIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeGenerator {
        fail_metadata: AtomicBool,
        fail_embedding: AtomicBool,
        generate_calls: AtomicUsize,
        last_text: Mutex<Option<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl MetadataGenerator for FakeGenerator {
        async fn generate(
            &self,
            text: &str,
            _language: &str,
        ) -> Result<GeneratedMetadata, PipelineError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_text.lock().expect("lock") = Some(text.to_string());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_metadata.load(Ordering::SeqCst) {
                return Err(PipelineError::MetadataGeneration(
                    "model request failed after 3 attempts: timeout".to_string(),
                ));
            }

            Ok(GeneratedMetadata {
                topic: "Account recovery".to_string(),
                tags: vec!["accounts".to_string(), "passwords".to_string()],
                summary: "Steps to recover a locked account.".to_string(),
            })
        }
    }

    #[async_trait]
    impl Embedder for FakeGenerator {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, PipelineError> {
            if self.fail_embedding.load(Ordering::SeqCst) {
                return Err(PipelineError::MetadataGeneration(
                    "embedding endpoint unavailable".to_string(),
                ));
            }
            Ok(vec![0.25, 0.5, 0.25])
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        fail: AtomicBool,
        ready: AtomicBool,
        ready_calls: AtomicUsize,
        indexed: Mutex<Vec<IndexRecord>>,
        removed: Mutex<Vec<Uuid>>,
    }

    impl FakeIndex {
        fn available() -> Self {
            let index = Self::default();
            index.ready.store(true, Ordering::SeqCst);
            index
        }
    }

    #[async_trait]
    impl SearchIndex for FakeIndex {
        async fn index_document(&self, record: &IndexRecord) -> Result<(), IndexError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IndexError::BackendResponse {
                    backend: "elasticsearch".to_string(),
                    details: "503 Service Unavailable".to_string(),
                });
            }
            let mut indexed = self.indexed.lock().expect("lock");
            // Upsert semantics: a repeat index call replaces the entry.
            indexed.retain(|existing| existing.document_id != record.document_id);
            indexed.push(record.clone());
            Ok(())
        }

        async fn remove_document(&self, document_id: Uuid) -> Result<(), IndexError> {
            self.removed.lock().expect("lock").push(document_id);
            Ok(())
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, IndexError> {
            Ok(Vec::new())
        }

        async fn ready(&self) -> bool {
            self.ready_calls.fetch_add(1, Ordering::SeqCst);
            self.ready.load(Ordering::SeqCst)
        }
    }

    fn test_options() -> PipelineOptions {
        PipelineOptions {
            index_wait_attempts: 2,
            index_wait_interval: Duration::ZERO,
            ..PipelineOptions::default()
        }
    }

    fn pipeline() -> IngestionPipeline<MemoryStore, FakeGenerator, FakeIndex> {
        IngestionPipeline::new(
            MemoryStore::new(),
            FakeGenerator::default(),
            FakeIndex::available(),
            test_options(),
        )
    }

    fn txt_upload(name: &str, body: &str) -> UploadRequest {
        UploadRequest {
            original_filename: name.to_string(),
            language: "en".to_string(),
            content: body.as_bytes().to_vec(),
            category_ids: Vec::new(),
            tag_names: Vec::new(),
        }
    }

    #[tokio::test]
    async fn txt_upload_runs_to_completed_with_metadata_and_index_entry() {
        let pipeline = pipeline();
        let body = "How to recover a locked account.\n".repeat(300);
        let document = pipeline
            .upload(txt_upload("recovery.txt", &body))
            .await
            .expect("upload succeeds");
        assert_eq!(document.status, DocumentStatus::Pending);

        let outcome = pipeline.process(document.id).await.expect("process runs");
        assert!(
            matches!(outcome, ProcessOutcome::Completed { index_error: None, .. }),
            "unexpected outcome: {outcome:?}"
        );

        let stored = pipeline
            .store()
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert_eq!(stored.extracted_text.as_deref(), Some(body.as_str()));
        assert_eq!(stored.topic.as_deref(), Some("Account recovery"));
        assert!(stored.summary.is_some());
        assert_eq!(stored.tags.len(), 2);
        assert!(stored.processed_at.is_some());

        let chunks = pipeline
            .store()
            .chunks_for(document.id)
            .await
            .expect("chunks load");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|chunk| chunk.embedding.is_some()));

        let indexed = pipeline.search_index().indexed.lock().expect("lock");
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].document_id, document.id);
        assert!(indexed[0].content.contains("locked account"));
    }

    #[tokio::test]
    async fn unsupported_uploads_are_rejected_without_side_effects() {
        let pipeline = pipeline();

        let error = pipeline
            .upload(txt_upload("malware.exe", "MZ"))
            .await
            .expect_err("exe must be rejected");
        assert!(matches!(error, PipelineError::UnsupportedFormat(_)));

        let page = pipeline
            .store()
            .list_documents(0, 10, None)
            .await
            .expect("list succeeds");
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn oversize_uploads_are_rejected_before_insertion() {
        let mut options = test_options();
        options.max_file_size_bytes = 16;
        let pipeline = IngestionPipeline::new(
            MemoryStore::new(),
            FakeGenerator::default(),
            FakeIndex::available(),
            options,
        );

        let error = pipeline
            .upload(txt_upload("big.txt", "this body is longer than sixteen bytes"))
            .await
            .expect_err("oversize upload must be rejected");
        assert!(matches!(error, PipelineError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_with_stored_error_and_no_index_entry() {
        let pipeline = pipeline();
        let document = pipeline
            .upload(UploadRequest {
                original_filename: "broken.pdf".to_string(),
                language: "en".to_string(),
                content: b"%PDF-1.4\n%broken".to_vec(),
                category_ids: Vec::new(),
                tag_names: Vec::new(),
            })
            .await
            .expect("upload succeeds");

        let outcome = pipeline.process(document.id).await.expect("process runs");
        assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

        let stored = pipeline
            .store()
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.error_message.is_some());
        assert!(stored.extracted_text.is_none());
        assert!(pipeline.search_index().indexed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_preserves_text_and_retry_reuses_it() {
        let pipeline = pipeline();
        pipeline
            .generator
            .fail_metadata
            .store(true, Ordering::SeqCst);

        let document = pipeline
            .upload(txt_upload("faq.txt", "Frequently asked questions about billing."))
            .await
            .expect("upload succeeds");

        let outcome = pipeline.process(document.id).await.expect("process runs");
        assert!(matches!(outcome, ProcessOutcome::Failed { .. }));

        let stored = pipeline
            .store()
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.extracted_text.is_some(), "partial progress is kept");

        // Overwrite the stored text; a retry must resume from it instead of
        // re-extracting from the raw bytes.
        pipeline
            .store()
            .save_extracted_text(document.id, "cached extraction")
            .await
            .expect("text saves");
        pipeline
            .generator
            .fail_metadata
            .store(false, Ordering::SeqCst);

        let outcome = pipeline.process(document.id).await.expect("retry runs");
        assert!(outcome.is_completed());
        assert_eq!(
            pipeline
                .generator
                .last_text
                .lock()
                .expect("lock")
                .as_deref(),
            Some("cached extraction")
        );
    }

    #[tokio::test]
    async fn processing_a_completed_document_is_a_noop() {
        let pipeline = pipeline();
        let document = pipeline
            .upload(txt_upload("guide.txt", "Setup guide."))
            .await
            .expect("upload succeeds");

        pipeline.process(document.id).await.expect("first run");
        let calls_after_first = pipeline.generator.generate_calls.load(Ordering::SeqCst);

        let outcome = pipeline.process(document.id).await.expect("second run");
        assert_eq!(outcome, ProcessOutcome::Skipped(DocumentStatus::Completed));
        assert_eq!(
            pipeline.generator.generate_calls.load(Ordering::SeqCst),
            calls_after_first
        );
    }

    #[tokio::test]
    async fn concurrent_triggers_result_in_exactly_one_run() {
        let generator = FakeGenerator {
            delay: Some(Duration::from_millis(50)),
            ..FakeGenerator::default()
        };
        let pipeline = Arc::new(IngestionPipeline::new(
            MemoryStore::new(),
            generator,
            FakeIndex::available(),
            test_options(),
        ));

        let document = pipeline
            .upload(txt_upload("race.txt", "Contended document."))
            .await
            .expect("upload succeeds");

        let first = {
            let pipeline = pipeline.clone();
            let id = document.id;
            tokio::spawn(async move { pipeline.process(id).await })
        };
        let second = {
            let pipeline = pipeline.clone();
            let id = document.id;
            tokio::spawn(async move { pipeline.process(id).await })
        };

        let outcomes = [
            first.await.expect("task joins").expect("process runs"),
            second.await.expect("task joins").expect("process runs"),
        ];

        let completed = outcomes
            .iter()
            .filter(|outcome| outcome.is_completed())
            .count();
        let skipped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ProcessOutcome::Skipped(_)))
            .count();
        assert_eq!((completed, skipped), (1, 1));
        assert_eq!(pipeline.generator.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn index_failure_keeps_completed_and_reindex_recovers() {
        let pipeline = pipeline();
        pipeline.index.fail.store(true, Ordering::SeqCst);

        let document = pipeline
            .upload(txt_upload("vpn.txt", "VPN configuration steps."))
            .await
            .expect("upload succeeds");

        let outcome = pipeline.process(document.id).await.expect("process runs");
        match outcome {
            ProcessOutcome::Completed { index_error, .. } => {
                assert!(index_error.is_some(), "index failure must be surfaced")
            }
            other => panic!("expected completed outcome, got {other:?}"),
        }

        let stored = pipeline
            .store()
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Completed);

        pipeline.index.fail.store(false, Ordering::SeqCst);
        pipeline.reindex(document.id).await.expect("reindex succeeds");
        assert_eq!(pipeline.search_index().indexed.lock().expect("lock").len(), 1);

        // Indexing the same document again is an upsert, not an append.
        pipeline.reindex(document.id).await.expect("reindex succeeds");
        assert_eq!(pipeline.search_index().indexed.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn readiness_is_probed_once_per_process_lifetime() {
        let pipeline = pipeline();
        pipeline.index.ready.store(false, Ordering::SeqCst);

        for name in ["one.txt", "two.txt"] {
            let document = pipeline
                .upload(txt_upload(name, "content to ingest"))
                .await
                .expect("upload succeeds");
            let outcome = pipeline.process(document.id).await.expect("process runs");
            match outcome {
                ProcessOutcome::Completed { index_error, .. } => {
                    assert!(index_error.is_some(), "degraded mode surfaces the gate")
                }
                other => panic!("expected completed outcome, got {other:?}"),
            }
        }

        // Two documents, one gate: the probe ran only for the first call.
        assert_eq!(
            pipeline.index.ready_calls.load(Ordering::SeqCst),
            test_options().index_wait_attempts as usize
        );
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_unembedded_chunks() {
        let pipeline = pipeline();
        pipeline
            .generator
            .fail_embedding
            .store(true, Ordering::SeqCst);

        let document = pipeline
            .upload(txt_upload("notes.txt", "Plain notes."))
            .await
            .expect("upload succeeds");
        let outcome = pipeline.process(document.id).await.expect("process runs");
        assert!(outcome.is_completed());

        let chunks = pipeline
            .store()
            .chunks_for(document.id)
            .await
            .expect("chunks load");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|chunk| chunk.embedding.is_none()));
    }

    #[tokio::test]
    async fn delete_removes_store_record_and_index_entry() {
        let pipeline = pipeline();
        let document = pipeline
            .upload(txt_upload("old.txt", "Obsolete article."))
            .await
            .expect("upload succeeds");
        pipeline.process(document.id).await.expect("process runs");

        assert!(pipeline.delete(document.id).await.expect("delete runs"));
        assert!(pipeline
            .store()
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .is_none());
        assert_eq!(
            pipeline.search_index().removed.lock().expect("lock").as_slice(),
            &[document.id]
        );

        assert!(!pipeline.delete(document.id).await.expect("delete runs"));
    }
}
