//! Azure AI Search client.
//!
//! Issues `POST {endpoint}/indexes/{index}/docs/search` with a full-text
//! query, optionally semantic ranking and a vectorized text query, and maps
//! the configured id/title/content fields into [`Passage`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Passage, SearchError, SearchIndex};
use crate::core::credential::Credential;

pub const DEFAULT_SEARCH_API_VERSION: &str = "2024-07-01";
pub const DEFAULT_SEARCH_TOP: u32 = 5;

const SEARCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Document field names holding the passage parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFields {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl Default for SearchFields {
    fn default() -> Self {
        Self {
            id: "chunk_id".to_string(),
            title: "title".to_string(),
            content: "chunk".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub endpoint: String,
    pub index: String,
    pub api_version: String,
    pub top: u32,
    pub semantic_configuration: Option<String>,
    /// Vector field queried with the index's integrated vectorizer.
    pub vector_field: Option<String>,
    pub fields: SearchFields,
}

impl SearchIndexConfig {
    pub fn new(endpoint: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            index: index.into(),
            api_version: DEFAULT_SEARCH_API_VERSION.to_string(),
            top: DEFAULT_SEARCH_TOP,
            semantic_configuration: None,
            vector_field: None,
            fields: SearchFields::default(),
        }
    }

    fn search_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.index,
            self.api_version
        )
    }

    fn request_body(&self, query: &str) -> Value {
        let select = [
            self.fields.id.as_str(),
            self.fields.title.as_str(),
            self.fields.content.as_str(),
        ]
        .join(",");

        let mut body = json!({
            "search": query,
            "top": self.top,
            "select": select,
        });

        if let Some(configuration) = &self.semantic_configuration {
            body["queryType"] = json!("semantic");
            body["semanticConfiguration"] = json!(configuration);
        }
        if let Some(field) = &self.vector_field {
            body["vectorQueries"] = json!([{
                "kind": "text",
                "text": query,
                "k": 50,
                "fields": field,
            }]);
        }

        body
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}

pub struct AzureSearchIndex {
    config: SearchIndexConfig,
    credential: Arc<dyn Credential>,
    http: reqwest::Client,
}

impl AzureSearchIndex {
    pub fn new(config: SearchIndexConfig, credential: Arc<dyn Credential>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SEARCH_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            credential,
            http,
        }
    }

    fn to_passage(&self, mut document: Map<String, Value>) -> Option<Passage> {
        let fields = &self.config.fields;
        let source_id = match document.remove(&fields.id)? {
            Value::String(id) => id,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let title = match document.remove(&fields.title) {
            Some(Value::String(title)) => Some(title),
            _ => None,
        };
        let content = match document.remove(&fields.content) {
            Some(Value::String(content)) => content,
            _ => String::new(),
        };

        Some(Passage {
            source_id,
            title,
            content,
        })
    }
}

#[async_trait]
impl SearchIndex for AzureSearchIndex {
    async fn search(&self, query: &str) -> Result<Vec<Passage>, SearchError> {
        let token = self.credential.resolve().await?;
        let (header, value) = token.header();

        let response = self
            .http
            .post(self.config.search_url())
            .header(header, value)
            .json(&self.config.request_body(query))
            .send()
            .await
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SearchError::Unavailable(format!("{status}: {detail}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        let passages: Vec<Passage> = parsed
            .value
            .into_iter()
            .filter_map(|document| self.to_passage(document))
            .collect();

        tracing::debug!(
            index = %self.config.index,
            results = passages.len(),
            "Search completed"
        );
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credential::KeyCredential;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index_for(server: &MockServer) -> AzureSearchIndex {
        let config = SearchIndexConfig::new(server.uri(), "kb");
        AzureSearchIndex::new(config, Arc::new(KeyCredential::new("search-key")))
    }

    #[test]
    fn test_request_body_semantic_and_vector() {
        let mut config = SearchIndexConfig::new("https://s.search.windows.net", "kb");
        assert!(config.request_body("q").get("queryType").is_none());

        config.semantic_configuration = Some("default".to_string());
        config.vector_field = Some("text_vector".to_string());
        let body = config.request_body("refund policy");
        assert_eq!(body["queryType"], "semantic");
        assert_eq!(body["semanticConfiguration"], "default");
        assert_eq!(body["select"], "chunk_id,title,chunk");
        assert_eq!(body["vectorQueries"][0]["fields"], "text_vector");
        assert_eq!(body["vectorQueries"][0]["text"], "refund policy");
    }

    #[test]
    fn test_search_url_trims_trailing_slash() {
        let config = SearchIndexConfig::new("https://s.search.windows.net/", "kb");
        assert_eq!(
            config.search_url(),
            "https://s.search.windows.net/indexes/kb/docs/search?api-version=2024-07-01"
        );
    }

    #[tokio::test]
    async fn test_search_maps_documents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/kb/docs/search"))
            .and(query_param("api-version", "2024-07-01"))
            .and(header("api-key", "search-key"))
            .and(body_partial_json(json!({"search": "refund policy", "top": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"chunk_id": "doc-17", "title": "Refunds", "chunk": "Refunds within 30 days.", "@search.score": 3.1},
                    {"title": "no id, skipped", "chunk": "ignored"},
                    {"chunk_id": "doc-2", "chunk": "Shipping takes a week."}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let passages = index_for(&server).search("refund policy").await.unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_id, "doc-17");
        assert_eq!(passages[0].title.as_deref(), Some("Refunds"));
        assert_eq!(passages[1].source_id, "doc-2");
        assert_eq!(passages[1].title, None);
    }

    #[tokio::test]
    async fn test_search_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = index_for(&server).search("anything").await.unwrap_err();
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_search_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = index_for(&server).search("anything").await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidResponse(_)));
    }
}
