use crate::error::IndexError;
use crate::models::{IndexRecord, SearchHit};
use crate::traits::SearchIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

/// Elasticsearch-backed search index. Documents are upserted under their
/// store id, so re-indexing is always safe.
pub struct ElasticStore {
    client: Client,
    endpoint: String,
    index_name: String,
}

impl ElasticStore {
    pub fn new(
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name: index_name.into(),
        })
    }

    /// Create the index with explicit mappings when it does not exist yet.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .head(format!("{}/{}", self.endpoint, self.index_name))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(IndexError::BackendResponse {
                backend: "elasticsearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/{}", self.endpoint, self.index_name))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "document_id": {"type": "keyword"},
                        "original_filename": {"type": "text"},
                        "topic": {"type": "text"},
                        "summary": {"type": "text"},
                        "tags": {"type": "keyword"},
                        "content": {"type": "text"},
                        "language": {"type": "keyword"},
                        "indexed_at": {"type": "date"}
                    }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "elasticsearch".to_string(),
                details: format!("index setup failed with {}", response.status()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticStore {
    async fn index_document(&self, record: &IndexRecord) -> Result<(), IndexError> {
        let response = self
            .client
            .put(format!(
                "{}/{}/_doc/{}",
                self.endpoint, self.index_name, record.document_id
            ))
            .json(&json!({
                "document_id": record.document_id,
                "original_filename": record.original_filename,
                "topic": record.topic,
                "summary": record.summary,
                "tags": record.tags,
                "content": record.content,
                "language": record.language,
                "indexed_at": record.indexed_at.to_rfc3339(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "elasticsearch".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), IndexError> {
        let response = self
            .client
            .delete(format!(
                "{}/{}/_doc/{}",
                self.endpoint, self.index_name, document_id
            ))
            .send()
            .await?;

        // A missing index entry is already the desired state.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }

        Err(IndexError::BackendResponse {
            backend: "elasticsearch".to_string(),
            details: response.status().to_string(),
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        let body = json!({
            "size": limit,
            "query": {
                "multi_match": {
                    "query": query,
                    "fields": ["content", "topic^2", "summary", "tags^2", "original_filename"]
                }
            },
            "highlight": {
                "fields": {
                    "content": {}
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/{}/_search", self.endpoint, self.index_name))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "elasticsearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response_json: Value = response.json().await?;
        let hits = response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for raw in hits {
            let source = raw.pointer("/_source").cloned().unwrap_or(Value::Null);

            let document_id = raw
                .pointer("/_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            let original_filename = source
                .pointer("/original_filename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let topic = source
                .pointer("/topic")
                .and_then(Value::as_str)
                .map(|value| value.to_string());
            let snippet = raw
                .pointer("/highlight/content/0")
                .and_then(Value::as_str)
                .map(|value| value.to_string());

            result.push(SearchHit {
                document_id,
                score,
                original_filename,
                topic,
                snippet,
            });
        }

        Ok(result)
    }

    async fn ready(&self) -> bool {
        match self.client.get(&self.endpoint).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ElasticStore;

    #[test]
    fn endpoint_is_validated_and_normalized() {
        assert!(ElasticStore::new("not a url", "kb_documents").is_err());

        let store = ElasticStore::new("http://localhost:9200/", "kb_documents")
            .expect("valid endpoint is accepted");
        assert_eq!(store.endpoint, "http://localhost:9200");
    }
}
