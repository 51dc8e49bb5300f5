pub mod chunking;
pub mod error;
pub mod extractor;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod readiness;
pub mod startup;
pub mod stores;
pub mod traits;

pub use chunking::{build_embedding_context, split_text, truncate_chars};
pub use error::{IndexError, PipelineError};
pub use extractor::extract_text;
pub use metadata::{LlmConfig, MistralClient};
pub use models::{
    Category, Claim, Document, DocumentChunk, DocumentPage, DocumentStatus, DocumentSummary,
    FileType, GeneratedMetadata, IndexRecord, NewDocument, PipelineOptions, ProcessOutcome,
    SearchHit, Tag, UploadRequest,
};
pub use pipeline::{IngestionPipeline, ReindexReport};
pub use readiness::wait_ready;
pub use startup::{
    run_startup, FailurePolicy, FnStep, StartupReport, StartupStep, StepOutcome, StepReport,
};
pub use stores::{ElasticStore, MemoryStore, PostgresStore};
pub use traits::{DocumentStore, Embedder, MetadataGenerator, SearchIndex};
