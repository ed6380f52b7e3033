//! Configuration module for the VoiceRAG gateway
//!
//! Settings come from .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use voicerag_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::core::bridge::{SessionOptions, SessionPolicy};
use crate::core::realtime::{DEFAULT_AZURE_API_VERSION, RealtimeProvider, UpstreamConfig};
use crate::core::search::{DEFAULT_SEARCH_API_VERSION, DEFAULT_SEARCH_TOP, SearchFields, SearchIndexConfig};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use utils::{parse_bool, parse_list};

/// Prompt used when neither YAML nor the environment supplies one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Only answer questions based on information you searched in the knowledge base, accessible with the 'search' tool. \
The user is listening to answers with audio, so it's *super* important that answers are as short as possible, a single sentence if at all possible. \
Never read file names or source names or keys out loud. \
Always use the following step-by-step instructions to respond: \
1. Always use the 'search' tool to check the knowledge base before answering a question. \
2. Always use the 'report_grounding' tool to report the source of information from the knowledge base. \
3. Produce an answer that's as short as possible. If the answer isn't in the knowledge base, say you don't know.";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server
    pub host: String,
    pub port: u16,
    /// Directory with the browser client; served at `/` when set.
    pub static_dir: Option<PathBuf>,

    // Realtime upstream
    pub realtime_provider: RealtimeProvider,
    pub realtime_endpoint: String,
    pub realtime_deployment: String,
    /// When unset the gateway authenticates with a managed or developer identity.
    pub realtime_api_key: Option<String>,
    pub realtime_api_version: String,
    pub realtime_voice: Option<String>,
    pub realtime_turn_detection: Option<Value>,
    pub realtime_input_audio_transcription: Option<Value>,
    pub system_prompt: String,

    // Knowledge base
    pub search_endpoint: Option<String>,
    pub search_index: Option<String>,
    pub search_api_key: Option<String>,
    pub search_api_version: String,
    pub search_semantic_configuration: Option<String>,
    pub search_top: u32,
    pub search_vector_field: Option<String>,
    pub search_id_field: String,
    pub search_title_field: String,
    pub search_content_field: String,

    // Email relay
    pub email_endpoint: Option<String>,
    pub email_api_key: Option<String>,
    pub email_sender: Option<String>,

    /// Tenant for developer-login token acquisition.
    pub azure_tenant_id: Option<String>,

    // Relay behaviour
    pub tool_timeout_seconds: u64,
    pub session_field_allow_list: Vec<String>,
    pub client_tunable_fields: Vec<String>,

    // Security
    /// Comma-separated origins, or "*".
    pub cors_allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
}

/// Zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.realtime_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.search_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.email_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Configuration with every optional collaborator disabled and defaults
    /// for the rest.
    pub fn new(
        realtime_provider: RealtimeProvider,
        realtime_endpoint: impl Into<String>,
        realtime_deployment: impl Into<String>,
    ) -> Self {
        let fields = SearchFields::default();
        Self {
            host: "localhost".to_string(),
            port: 8765,
            static_dir: None,
            realtime_provider,
            realtime_endpoint: realtime_endpoint.into(),
            realtime_deployment: realtime_deployment.into(),
            realtime_api_key: None,
            realtime_api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            realtime_voice: None,
            realtime_turn_detection: None,
            realtime_input_audio_transcription: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            search_endpoint: None,
            search_index: None,
            search_api_key: None,
            search_api_version: DEFAULT_SEARCH_API_VERSION.to_string(),
            search_semantic_configuration: None,
            search_top: DEFAULT_SEARCH_TOP,
            search_vector_field: None,
            search_id_field: fields.id,
            search_title_field: fields.title,
            search_content_field: fields.content,
            email_endpoint: None,
            email_api_key: None,
            email_sender: None,
            azure_tenant_id: None,
            tool_timeout_seconds: 20,
            session_field_allow_list: crate::core::bridge::DEFAULT_SESSION_FIELD_ALLOW_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            client_tunable_fields: crate::core::bridge::DEFAULT_CLIENT_TUNABLE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed,
    /// an environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs before this runs
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            provider: self.realtime_provider,
            endpoint: self.realtime_endpoint.clone(),
            deployment: self.realtime_deployment.clone(),
            api_version: self.realtime_api_version.clone(),
        }
    }

    /// Search index settings, or `None` when the knowledge base is not configured.
    pub fn search_index_config(&self) -> Option<SearchIndexConfig> {
        let endpoint = self.search_endpoint.as_ref()?;
        let index = self.search_index.as_ref()?;

        let mut config = SearchIndexConfig::new(endpoint.clone(), index.clone());
        config.api_version = self.search_api_version.clone();
        config.top = self.search_top;
        config.semantic_configuration = self.search_semantic_configuration.clone();
        config.vector_field = self.search_vector_field.clone();
        config.fields = SearchFields {
            id: self.search_id_field.clone(),
            title: self.search_title_field.clone(),
            content: self.search_content_field.clone(),
        };
        Some(config)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            voice: self.realtime_voice.clone(),
            turn_detection: self.realtime_turn_detection.clone(),
            input_audio_transcription: self.realtime_input_audio_transcription.clone(),
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy::new(
            self.session_field_allow_list.iter().cloned(),
            self.client_tunable_fields.iter().cloned(),
        )
    }
}
