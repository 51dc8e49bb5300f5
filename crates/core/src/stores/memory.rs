use crate::error::PipelineError;
use crate::models::{
    Category, Claim, Document, DocumentChunk, DocumentPage, DocumentStatus, DocumentSummary,
    GeneratedMetadata, NewDocument, Tag,
};
use crate::traits::DocumentStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Mutex-guarded map-backed store. The production deployment uses
/// [`PostgresStore`](crate::stores::PostgresStore); this one backs tests and
/// single-process setups. The mutex makes `claim_for_processing` a true
/// check-and-set.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Vec<DocumentChunk>>,
    categories: Vec<Category>,
    tags: Vec<Tag>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn ensure_tag(&mut self, name: &str) -> Tag {
        if let Some(tag) = self.tags.iter().find(|tag| tag.name == name) {
            return tag.clone();
        }
        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.tags.push(tag.clone());
        tag
    }

    fn document_mut(&mut self, id: Uuid) -> Result<&mut Document, PipelineError> {
        self.documents
            .get_mut(&id)
            .ok_or(PipelineError::NotFound(id))
    }
}

fn matches_search(document: &Document, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    let haystacks = [
        Some(document.original_filename.as_str()),
        document.topic.as_deref(),
        document.summary.as_deref(),
        document.extracted_text.as_deref(),
    ];
    haystacks
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, document: NewDocument) -> Result<Document, PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        if inner
            .documents
            .values()
            .any(|existing| existing.original_filename == document.original_filename)
        {
            return Err(PipelineError::Duplicate(document.original_filename));
        }

        let categories = inner
            .categories
            .iter()
            .filter(|category| document.category_ids.contains(&category.id))
            .cloned()
            .collect();
        let tags = document
            .tag_names
            .iter()
            .map(|name| inner.ensure_tag(name))
            .collect();

        let record = Document {
            id: Uuid::new_v4(),
            filename: document.filename,
            original_filename: document.original_filename,
            file_type: document.file_type,
            file_size: document.file_size,
            content: document.content,
            language: document.language,
            extracted_text: None,
            topic: None,
            summary: None,
            status: DocumentStatus::Pending,
            error_message: None,
            uploaded_at: Utc::now(),
            processed_at: None,
            updated_at: None,
            categories,
            tags,
        };

        inner.documents.insert(record.id, record.clone());
        Ok(record)
    }

    async fn fetch_document(&self, id: Uuid) -> Result<Option<Document>, PipelineError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.documents.get(&id).cloned())
    }

    async fn list_documents(
        &self,
        offset: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<DocumentPage, PipelineError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");

        let mut matched: Vec<&Document> = inner
            .documents
            .values()
            .filter(|document| match search {
                Some(needle) if !needle.is_empty() => matches_search(document, needle),
                _ => true,
            })
            .collect();
        matched.sort_by(|left, right| {
            right
                .uploaded_at
                .cmp(&left.uploaded_at)
                .then(left.id.cmp(&right.id))
        });

        let total = matched.len() as u64;
        let documents = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|document| DocumentSummary {
                id: document.id,
                original_filename: document.original_filename.clone(),
                file_type: document.file_type,
                file_size: document.file_size,
                status: document.status,
                topic: document.topic.clone(),
                uploaded_at: document.uploaded_at,
            })
            .collect();

        Ok(DocumentPage {
            documents,
            total,
            offset,
            limit,
        })
    }

    async fn claim_for_processing(&self, id: Uuid) -> Result<Claim, PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let document = inner.document_mut(id)?;

        match document.status {
            DocumentStatus::Pending | DocumentStatus::Failed => {
                document.status = DocumentStatus::Processing;
                document.error_message = None;
                document.updated_at = Some(Utc::now());
                Ok(Claim::Acquired(document.clone()))
            }
            status => Ok(Claim::Busy(status)),
        }
    }

    async fn save_extracted_text(&self, id: Uuid, text: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let document = inner.document_mut(id)?;
        document.extracted_text = Some(text.to_string());
        document.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn apply_metadata(
        &self,
        id: Uuid,
        metadata: &GeneratedMetadata,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");

        let tags: Vec<Tag> = metadata
            .tags
            .iter()
            .map(|name| inner.ensure_tag(name))
            .collect();

        let document = inner.document_mut(id)?;
        document.topic = Some(metadata.topic.clone());
        document.summary = Some(metadata.summary.clone());
        if !tags.is_empty() {
            document.tags = tags;
        }
        document.processed_at = Some(Utc::now());
        document.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        id: Uuid,
        chunks: &[DocumentChunk],
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if !inner.documents.contains_key(&id) {
            return Err(PipelineError::NotFound(id));
        }
        inner.chunks.insert(id, chunks.to_vec());
        Ok(())
    }

    async fn chunks_for(&self, id: Uuid) -> Result<Vec<DocumentChunk>, PipelineError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.chunks.get(&id).cloned().unwrap_or_default())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let document = inner.document_mut(id)?;
        document.status = DocumentStatus::Completed;
        document.error_message = None;
        document.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let document = inner.document_mut(id)?;
        document.status = DocumentStatus::Failed;
        document.error_message = Some(message.to_string());
        document.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.chunks.remove(&id);
        Ok(inner.documents.remove(&id).is_some())
    }

    async fn ensure_category(&self, name: &str) -> Result<Category, PipelineError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if let Some(category) = inner.categories.iter().find(|category| category.name == name) {
            return Ok(category.clone());
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        inner.categories.push(category.clone());
        Ok(category)
    }

    async fn completed_document_ids(&self) -> Result<Vec<Uuid>, PipelineError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner
            .documents
            .values()
            .filter(|document| document.status == DocumentStatus::Completed)
            .map(|document| document.id)
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::models::{Claim, DocumentStatus, FileType, GeneratedMetadata, NewDocument};
    use crate::traits::DocumentStore;

    fn new_document(original_filename: &str) -> NewDocument {
        NewDocument {
            filename: format!("abc123_{original_filename}"),
            original_filename: original_filename.to_string(),
            file_type: FileType::Txt,
            file_size: 10,
            content: b"0123456789".to_vec(),
            language: "en".to_string(),
            category_ids: Vec::new(),
            tag_names: Vec::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_original_filenames_are_rejected() {
        let store = MemoryStore::new();
        store
            .insert_document(new_document("guide.txt"))
            .await
            .expect("first insert succeeds");

        let error = store.insert_document(new_document("guide.txt")).await;
        assert!(error.is_err());
    }

    #[tokio::test]
    async fn claim_is_a_check_and_set() {
        let store = MemoryStore::new();
        let document = store
            .insert_document(new_document("guide.txt"))
            .await
            .expect("insert succeeds");

        let first = store
            .claim_for_processing(document.id)
            .await
            .expect("claim succeeds");
        assert!(matches!(first, Claim::Acquired(_)));

        let second = store
            .claim_for_processing(document.id)
            .await
            .expect("claim succeeds");
        assert!(matches!(second, Claim::Busy(DocumentStatus::Processing)));
    }

    #[tokio::test]
    async fn failed_documents_can_be_reclaimed() {
        let store = MemoryStore::new();
        let document = store
            .insert_document(new_document("guide.txt"))
            .await
            .expect("insert succeeds");

        store.claim_for_processing(document.id).await.expect("claim");
        store
            .mark_failed(document.id, "extraction failed")
            .await
            .expect("mark failed");

        let retry = store
            .claim_for_processing(document.id)
            .await
            .expect("claim succeeds");
        assert!(matches!(retry, Claim::Acquired(_)));
    }

    #[tokio::test]
    async fn metadata_creates_tags_and_preserves_timestamps() {
        let store = MemoryStore::new();
        let document = store
            .insert_document(new_document("guide.txt"))
            .await
            .expect("insert succeeds");

        let metadata = GeneratedMetadata {
            topic: "Password resets".to_string(),
            tags: vec!["passwords".to_string(), "accounts".to_string()],
            summary: "How to reset a password.".to_string(),
        };
        store
            .apply_metadata(document.id, &metadata)
            .await
            .expect("metadata applies");

        let stored = store
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .expect("document exists");
        assert_eq!(stored.topic.as_deref(), Some("Password resets"));
        assert_eq!(stored.tags.len(), 2);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn list_supports_search_and_pagination() {
        let store = MemoryStore::new();
        for name in ["vpn-setup.txt", "billing-faq.txt", "vpn-troubleshooting.txt"] {
            store
                .insert_document(new_document(name))
                .await
                .expect("insert succeeds");
        }

        let page = store
            .list_documents(0, 10, Some("vpn"))
            .await
            .expect("list succeeds");
        assert_eq!(page.total, 2);

        let page = store.list_documents(0, 2, None).await.expect("list succeeds");
        assert_eq!(page.total, 3);
        assert_eq!(page.documents.len(), 2);

        let page = store.list_documents(2, 2, None).await.expect("list succeeds");
        assert_eq!(page.documents.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_document_and_chunks() {
        let store = MemoryStore::new();
        let document = store
            .insert_document(new_document("guide.txt"))
            .await
            .expect("insert succeeds");

        assert!(store.delete_document(document.id).await.expect("delete"));
        assert!(!store.delete_document(document.id).await.expect("delete"));
        assert!(store
            .fetch_document(document.id)
            .await
            .expect("fetch succeeds")
            .is_none());
    }
}
