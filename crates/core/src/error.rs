use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("metadata generation failed: {0}")]
    MetadataGeneration(String),

    #[error("document not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("file is too large: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("a document named '{0}' already exists")]
    Duplicate(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("indexing error: {0}")]
    Indexing(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search engine not available yet: {0}")]
    NotReady(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(error: sqlx::Error) -> Self {
        PipelineError::Store(error.to_string())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
