use crate::error::{IndexError, PipelineError};
use crate::models::{
    Category, Claim, Document, DocumentChunk, DocumentPage, GeneratedMetadata, IndexRecord,
    NewDocument, SearchHit,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence seam for documents, associations and chunks.
///
/// Implementations serialize per-document updates through their own
/// transactional guarantees; `claim_for_processing` in particular must be an
/// atomic check-and-set so two concurrent triggers cannot both win.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, PipelineError>;

    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>, PipelineError>;

    async fn list_documents(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, PipelineError>;

    /// Atomically move a `pending` or `failed` document to `processing`.
    async fn claim_for_processing(&self, id: Uuid) -> Result<Claim, PipelineError>;

    async fn save_extracted_text(&self, id: Uuid, text: &str) -> Result<(), PipelineError>;

    /// Persist topic, summary and tag associations (creating tags as
    /// needed) together with the processed timestamp.
    async fn apply_metadata(
        &self,
        id: Uuid,
        metadata: &GeneratedMetadata,
    ) -> Result<(), PipelineError>;

    async fn replace_chunks(&self, id: Uuid, chunks: &[DocumentChunk])
        -> Result<(), PipelineError>;

    async fn chunks_for(&self, id: Uuid) -> Result<Vec<DocumentChunk>, PipelineError>;

    async fn mark_completed(&self, id: Uuid) -> Result<(), PipelineError>;

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), PipelineError>;

    /// Remove the document, its chunks and association rows. Returns false
    /// when the id is unknown.
    async fn delete_document(&self, id: Uuid) -> Result<bool, PipelineError>;

    async fn ensure_category(&self, name: &str) -> Result<Category, PipelineError>;

    async fn completed_document_ids(&self) -> Result<Vec<Uuid>, PipelineError>;

    /// Liveness probe for the readiness gate.
    async fn ping(&self) -> bool;
}

/// Derives topic, tags and summary from extracted text via an external
/// language model.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        language: &str,
    ) -> Result<GeneratedMetadata, PipelineError>;
}

/// Embeds a text into a vector for retrieval. Failures degrade to
/// un-embedded chunks and never fail the pipeline.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Search-engine seam. `index_document` must be an idempotent upsert keyed
/// by document id.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_document(&self, record: &IndexRecord) -> Result<(), IndexError>;

    async fn remove_document(&self, document_id: Uuid) -> Result<(), IndexError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError>;

    /// Health probe consulted by the readiness gate before the first index
    /// call in a process's lifetime.
    async fn ready(&self) -> bool;
}
