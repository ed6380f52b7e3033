//! Knowledge base collaborator.
//!
//! The relay only queries an index; ranking and indexing happen elsewhere.

pub mod azure;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::credential::CredentialError;

pub use azure::{
    AzureSearchIndex, DEFAULT_SEARCH_API_VERSION, DEFAULT_SEARCH_TOP, SearchFields,
    SearchIndexConfig,
};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search service unavailable: {0}")]
    Unavailable(String),

    #[error("Search credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),

    #[error("Search is not configured")]
    NotConfigured,
}

/// One ranked passage returned by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub source_id: String,
    pub title: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Ordered passages for `query`, best first.
    async fn search(&self, query: &str) -> Result<Vec<Passage>, SearchError>;
}

/// Placeholder used when no index is configured.
pub struct UnconfiguredSearchIndex;

#[async_trait]
impl SearchIndex for UnconfiguredSearchIndex {
    async fn search(&self, _query: &str) -> Result<Vec<Passage>, SearchError> {
        Err(SearchError::NotConfigured)
    }
}
