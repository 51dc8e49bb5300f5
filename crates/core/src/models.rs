use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Supported upload formats. Anything else is rejected before a record is
/// created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Doc,
    Docx,
    Txt,
}

impl FileType {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileType::Pdf),
            "doc" => Some(FileType::Doc),
            "docx" => Some(FileType::Docx),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        filename
            .rsplit_once('.')
            .and_then(|(_, extension)| Self::from_extension(extension))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Doc => "doc",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Processing states of a document. Transitions move forward only, except
/// the retry path (failed documents may be claimed again) and never leave
/// `Completed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// Storage name derived from the content hash; stable across renames.
    pub filename: String,
    pub original_filename: String,
    pub file_type: FileType,
    pub file_size: i64,
    #[serde(skip_serializing, default)]
    pub content: Vec<u8>,
    pub language: String,
    pub extracted_text: Option<String>,
    pub topic: Option<String>,
    pub summary: Option<String>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
}

/// One retrieval unit of a processed document. Chunks are rebuilt wholesale
/// on every successful processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// Topic, tags and summary as returned by the metadata generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedMetadata {
    pub topic: String,
    pub tags: Vec<String>,
    pub summary: String,
}

/// An upload as received from the caller, before validation.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original_filename: String,
    pub language: String,
    pub content: Vec<u8>,
    pub category_ids: Vec<Uuid>,
    pub tag_names: Vec<String>,
}

/// A validated upload ready for insertion into the store.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub content: Vec<u8>,
    pub language: String,
    pub category_ids: Vec<Uuid>,
    pub tag_names: Vec<String>,
}

/// Listing row without the raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub original_filename: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub status: DocumentStatus,
    pub topic: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
    pub documents: Vec<DocumentSummary>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// The fields handed to the search engine for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub document_id: Uuid,
    pub original_filename: String,
    pub topic: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub content: String,
    pub language: String,
    pub indexed_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn from_document(document: &Document) -> Self {
        Self {
            document_id: document.id,
            original_filename: document.original_filename.clone(),
            topic: document.topic.clone(),
            summary: document.summary.clone(),
            tags: document.tags.iter().map(|tag| tag.name.clone()).collect(),
            content: document.extracted_text.clone().unwrap_or_default(),
            language: document.language.clone(),
            indexed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub score: f64,
    pub original_filename: String,
    pub topic: Option<String>,
    pub snippet: Option<String>,
}

/// Result of an atomic claim attempt on a document.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The caller won the lease; the snapshot reflects the document with
    /// the status already advanced to `Processing`.
    Acquired(Document),
    /// Another run holds the document, or it is already completed.
    Busy(DocumentStatus),
}

/// Structured result of one `process` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Precondition not met: the document was already processing or completed.
    Skipped(DocumentStatus),
    /// A stage failed; the document is `Failed` with the message stored.
    Failed { message: String },
    /// The document is `Completed`. An index failure does not regress the
    /// status and is carried here so indexing can be retried on its own.
    Completed {
        chunk_count: usize,
        index_error: Option<String>,
    },
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Uploads above this size are rejected before a record is created.
    pub max_file_size_bytes: usize,
    pub chunk_chars: usize,
    pub index_wait_attempts: u32,
    pub index_wait_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
            chunk_chars: 500,
            index_wait_attempts: 30,
            index_wait_interval: Duration::from_secs(2),
        }
    }
}
