//! Upstream endpoint configuration.
//!
//! Two providers speak the same realtime event protocol and differ only in
//! how the WebSocket URL and the auth headers are formed:
//! - Azure OpenAI: `wss://{resource}/openai/realtime?api-version=..&deployment=..`
//! - OpenAI: `wss://api.openai.com/v1/realtime?model=..`

use serde::{Deserialize, Serialize};
use url::Url;

use super::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Path of the realtime endpoint on an Azure OpenAI resource.
pub const AZURE_REALTIME_PATH: &str = "/openai/realtime";

/// API version used when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-01-preview";

// =============================================================================
// Providers
// =============================================================================

/// Supported realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeProvider {
    #[default]
    Azure,
    OpenAI,
}

impl RealtimeProvider {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAI => "openai",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAI,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Upstream Config
// =============================================================================

/// Where and how to open the upstream realtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub provider: RealtimeProvider,
    /// Resource endpoint (Azure) or full WebSocket URL override (OpenAI).
    pub endpoint: String,
    /// Azure deployment name, or OpenAI model id.
    pub deployment: String,
    pub api_version: String,
}

impl UpstreamConfig {
    /// Build the WebSocket URL for this provider.
    pub fn build_ws_url(&self) -> RealtimeResult<String> {
        if self.deployment.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "realtime deployment is required".to_string(),
            ));
        }

        match self.provider {
            RealtimeProvider::Azure => self.build_azure_url(),
            RealtimeProvider::OpenAI => self.build_openai_url(),
        }
    }

    fn build_azure_url(&self) -> RealtimeResult<String> {
        let mut url = parse_endpoint(&self.endpoint)?;
        switch_to_websocket_scheme(&mut url)?;
        url.set_path(AZURE_REALTIME_PATH);
        let api_version = if self.api_version.is_empty() {
            DEFAULT_AZURE_API_VERSION
        } else {
            self.api_version.as_str()
        };
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", api_version)
            .append_pair("deployment", &self.deployment);
        Ok(url.into())
    }

    fn build_openai_url(&self) -> RealtimeResult<String> {
        let base = if self.endpoint.trim().is_empty() {
            OPENAI_REALTIME_URL
        } else {
            self.endpoint.as_str()
        };
        let mut url = parse_endpoint(base)?;
        switch_to_websocket_scheme(&mut url)?;
        url.query_pairs_mut()
            .clear()
            .append_pair("model", &self.deployment);
        Ok(url.into())
    }
}

fn parse_endpoint(endpoint: &str) -> RealtimeResult<Url> {
    if endpoint.trim().is_empty() {
        return Err(RealtimeError::InvalidConfiguration(
            "realtime endpoint is required".to_string(),
        ));
    }
    Url::parse(endpoint.trim()).map_err(|e| {
        RealtimeError::InvalidConfiguration(format!("invalid realtime endpoint {endpoint}: {e}"))
    })
}

fn switch_to_websocket_scheme(url: &mut Url) -> RealtimeResult<()> {
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "unsupported endpoint scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        RealtimeError::InvalidConfiguration(format!("cannot use {scheme} for endpoint {url}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure(endpoint: &str) -> UpstreamConfig {
        UpstreamConfig {
            provider: RealtimeProvider::Azure,
            endpoint: endpoint.to_string(),
            deployment: "gpt-4o-realtime-preview".to_string(),
            api_version: "2024-10-01-preview".to_string(),
        }
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!(
            RealtimeProvider::from_str_or_default("OpenAI"),
            RealtimeProvider::OpenAI
        );
        assert_eq!(
            RealtimeProvider::from_str_or_default("azure"),
            RealtimeProvider::Azure
        );
        assert_eq!(
            RealtimeProvider::from_str_or_default("other"),
            RealtimeProvider::Azure
        );
        assert_eq!(RealtimeProvider::OpenAI.to_string(), "openai");
    }

    #[test]
    fn test_azure_url() {
        let url = azure("https://my-resource.openai.azure.com/")
            .build_ws_url()
            .unwrap();
        assert_eq!(
            url,
            "wss://my-resource.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_azure_url_plain_http_maps_to_ws() {
        let url = azure("http://127.0.0.1:9000").build_ws_url().unwrap();
        assert!(url.starts_with("ws://127.0.0.1:9000/openai/realtime?"));
    }

    #[test]
    fn test_azure_default_api_version() {
        let mut config = azure("https://r.openai.azure.com");
        config.api_version.clear();
        let url = config.build_ws_url().unwrap();
        assert!(url.contains("api-version=2024-10-01-preview"));
    }

    #[test]
    fn test_openai_url_defaults_to_public_endpoint() {
        let config = UpstreamConfig {
            provider: RealtimeProvider::OpenAI,
            endpoint: String::new(),
            deployment: "gpt-4o-realtime-preview".to_string(),
            api_version: String::new(),
        };
        assert_eq!(
            config.build_ws_url().unwrap(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_missing_endpoint_or_deployment() {
        assert!(matches!(
            azure("").build_ws_url(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));

        let mut config = azure("https://r.openai.azure.com");
        config.deployment.clear();
        assert!(matches!(
            config.build_ws_url(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(azure("ftp://example.com").build_ws_url().is_err());
    }
}
