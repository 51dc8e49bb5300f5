use crate::error::PipelineError;
use crate::models::{
    Category, Claim, Document, DocumentChunk, DocumentPage, DocumentStatus, DocumentSummary,
    FileType, GeneratedMetadata, NewDocument, Tag,
};
use crate::traits::DocumentStore;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id UUID PRIMARY KEY,
        filename TEXT NOT NULL,
        original_filename TEXT NOT NULL UNIQUE,
        file_type TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        content BYTEA NOT NULL,
        language TEXT NOT NULL,
        extracted_text TEXT,
        topic TEXT,
        summary TEXT,
        processing_status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        processed_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS tags (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS document_categories (
        document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        category_id UUID NOT NULL REFERENCES categories(id),
        PRIMARY KEY (document_id, category_id)
    )",
    "CREATE TABLE IF NOT EXISTS document_tags (
        document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        tag_id UUID NOT NULL REFERENCES tags(id),
        PRIMARY KEY (document_id, tag_id)
    )",
    "CREATE TABLE IF NOT EXISTS document_chunks (
        document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INT NOT NULL,
        text TEXT NOT NULL,
        embedding TEXT,
        PRIMARY KEY (document_id, chunk_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents (processing_status)",
    "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents (uploaded_at)",
];

const DOCUMENT_COLUMNS: &str = "id, filename, original_filename, file_type, file_size, content, \
     language, extracted_text, topic, summary, processing_status, error_message, uploaded_at, \
     processed_at, updated_at";

const SEARCH_PREDICATE: &str = "(original_filename ILIKE $1 OR topic ILIKE $1 \
     OR summary ILIKE $1 OR extracted_text ILIKE $1)";

/// PostgreSQL-backed document store. The `processing_status` column is the
/// per-document lease: `claim_for_processing` advances it with a predicated
/// UPDATE, so concurrent triggers resolve on the row lock and only one
/// caller sees an affected row.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a lazy pool; the first query opens the connection, which lets
    /// the readiness gate poll `ping` while the database is still starting.
    pub fn connect_lazy(database_url: &str) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Create the tables and indexes the pipeline needs. Safe to run on
    /// every startup.
    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn ensure_tag(&self, name: &str) -> Result<Tag, PipelineError> {
        let row = sqlx::query(
            "INSERT INTO tags (id, name) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Tag {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn tags_for(&self, document_id: Uuid) -> Result<Vec<Tag>, PipelineError> {
        let rows = sqlx::query(
            "SELECT t.id, t.name FROM tags t
             JOIN document_tags dt ON dt.tag_id = t.id
             WHERE dt.document_id = $1
             ORDER BY t.name",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Tag {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn categories_for(&self, document_id: Uuid) -> Result<Vec<Category>, PipelineError> {
        let rows = sqlx::query(
            "SELECT c.id, c.name FROM categories c
             JOIN document_categories dc ON dc.category_id = c.id
             WHERE dc.document_id = $1
             ORDER BY c.name",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Category {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<DocumentStatus>, PipelineError> {
        let row = sqlx::query("SELECT processing_status FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("processing_status")?;
                Ok(Some(parse_status(&raw)?))
            }
            None => Ok(None),
        }
    }
}

fn parse_status(raw: &str) -> Result<DocumentStatus, PipelineError> {
    DocumentStatus::parse(raw)
        .ok_or_else(|| PipelineError::Store(format!("unknown processing status '{raw}'")))
}

fn parse_file_type(raw: &str) -> Result<FileType, PipelineError> {
    FileType::from_extension(raw)
        .ok_or_else(|| PipelineError::Store(format!("unknown file type '{raw}'")))
}

fn row_to_document(row: &PgRow) -> Result<Document, PipelineError> {
    let file_type: String = row.try_get("file_type")?;
    let status: String = row.try_get("processing_status")?;

    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        original_filename: row.try_get("original_filename")?,
        file_type: parse_file_type(&file_type)?,
        file_size: row.try_get("file_size")?,
        content: row.try_get("content")?,
        language: row.try_get("language")?,
        extracted_text: row.try_get("extracted_text")?,
        topic: row.try_get("topic")?,
        summary: row.try_get("summary")?,
        status: parse_status(&status)?,
        error_message: row.try_get("error_message")?,
        uploaded_at: row.try_get("uploaded_at")?,
        processed_at: row.try_get("processed_at")?,
        updated_at: row.try_get("updated_at")?,
        categories: Vec::new(),
        tags: Vec::new(),
    })
}

fn row_to_summary(row: &PgRow) -> Result<DocumentSummary, PipelineError> {
    let file_type: String = row.try_get("file_type")?;
    let status: String = row.try_get("processing_status")?;

    Ok(DocumentSummary {
        id: row.try_get("id")?,
        original_filename: row.try_get("original_filename")?,
        file_type: parse_file_type(&file_type)?,
        file_size: row.try_get("file_size")?,
        status: parse_status(&status)?,
        topic: row.try_get("topic")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, PipelineError> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO documents (id, filename, original_filename, file_type, file_size,
                                    content, language, processing_status, uploaded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', now())",
        )
        .bind(id)
        .bind(&document.filename)
        .bind(&document.original_filename)
        .bind(document.file_type.as_str())
        .bind(document.file_size)
        .bind(&document.content)
        .bind(&document.language)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            let message = error.to_string();
            if message.contains("duplicate key") || message.contains("unique constraint") {
                PipelineError::Duplicate(document.original_filename.clone())
            } else {
                PipelineError::Store(message)
            }
        })?;

        for category_id in &document.category_ids {
            sqlx::query(
                "INSERT INTO document_categories (document_id, category_id)
                 SELECT $1, id FROM categories WHERE id = $2
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        }

        for tag_name in &document.tag_names {
            let tag = self.ensure_tag(tag_name).await?;
            sqlx::query(
                "INSERT INTO document_tags (document_id, tag_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(tag.id)
            .execute(&self.pool)
            .await?;
        }

        self.fetch_document(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>, PipelineError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut document = row_to_document(&row)?;
        document.tags = self.tags_for(id).await?;
        document.categories = self.categories_for(id).await?;
        Ok(Some(document))
    }

    async fn list_documents(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, PipelineError> {
        let pattern = search
            .filter(|needle| !needle.is_empty())
            .map(|needle| format!("%{needle}%"));

        let (total, rows) = match &pattern {
            Some(pattern) => {
                let total: i64 = sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM documents WHERE {SEARCH_PREDICATE}"
                ))
                .bind(pattern)
                .fetch_one(&self.pool)
                .await?;

                let rows = sqlx::query(&format!(
                    "SELECT id, original_filename, file_type, file_size, processing_status,
                            topic, uploaded_at
                     FROM documents WHERE {SEARCH_PREDICATE}
                     ORDER BY uploaded_at DESC, id
                     OFFSET $2 LIMIT $3"
                ))
                .bind(pattern)
                .bind(offset as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
                    .fetch_one(&self.pool)
                    .await?;

                let rows = sqlx::query(
                    "SELECT id, original_filename, file_type, file_size, processing_status,
                            topic, uploaded_at
                     FROM documents
                     ORDER BY uploaded_at DESC, id
                     OFFSET $1 LIMIT $2",
                )
                .bind(offset as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
        };

        let documents = rows
            .iter()
            .map(row_to_summary)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DocumentPage {
            documents,
            total: total as u64,
            offset,
            limit,
        })
    }

    async fn claim_for_processing(&self, id: Uuid) -> Result<Claim, PipelineError> {
        let result = sqlx::query(
            "UPDATE documents
             SET processing_status = 'processing', error_message = NULL, updated_at = now()
             WHERE id = $1 AND processing_status IN ('pending', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.status_of(id).await? {
                Some(status) => Ok(Claim::Busy(status)),
                None => Err(PipelineError::NotFound(id)),
            };
        }

        let document = self
            .fetch_document(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;
        Ok(Claim::Acquired(document))
    }

    async fn save_extracted_text(&self, id: Uuid, text: &str) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE documents SET extracted_text = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    async fn apply_metadata(
        &self,
        id: Uuid,
        metadata: &GeneratedMetadata,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE documents
             SET topic = $2, summary = $3, processed_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(&metadata.topic)
        .bind(&metadata.summary)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }

        if !metadata.tags.is_empty() {
            sqlx::query("DELETE FROM document_tags WHERE document_id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;

            for tag_name in &metadata.tags {
                let tag = self.ensure_tag(tag_name).await?;
                sqlx::query(
                    "INSERT INTO document_tags (document_id, tag_id) VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                )
                .bind(id)
                .bind(tag.id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn replace_chunks(
        &self,
        id: Uuid,
        chunks: &[DocumentChunk],
    ) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        for chunk in chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .map(|vector| serde_json::to_string(vector))
                .transpose()
                .map_err(|error| PipelineError::Store(error.to_string()))?;

            sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_index, text, embedding)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(embedding)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn chunks_for(&self, id: Uuid) -> Result<Vec<DocumentChunk>, PipelineError> {
        let rows = sqlx::query(
            "SELECT chunk_index, text, embedding FROM document_chunks
             WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let embedding: Option<String> = row.try_get("embedding")?;
                Ok(DocumentChunk {
                    document_id: id,
                    chunk_index: row.try_get("chunk_index")?,
                    text: row.try_get("text")?,
                    embedding: embedding
                        .as_deref()
                        .and_then(|raw| serde_json::from_str(raw).ok()),
                })
            })
            .collect()
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE documents
             SET processing_status = 'completed', error_message = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE documents
             SET processing_status = 'failed', error_message = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, PipelineError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_category(&self, name: &str) -> Result<Category, PipelineError> {
        let row = sqlx::query(
            "INSERT INTO categories (id, name) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Category {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn completed_document_ids(&self) -> Result<Vec<Uuid>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id FROM documents WHERE processing_status = 'completed' ORDER BY uploaded_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get("id")?))
            .collect()
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
