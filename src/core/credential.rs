//! Credential resolution for the upstream model, the search index and the
//! email relay.
//!
//! A configured API key always wins. Without one, an identity credential is
//! used: the Azure Developer CLI when a tenant id is configured (local
//! development), otherwise the managed identity of the host.
//!
//! Identity tokens are cached and refreshed five minutes before they expire.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

/// Scope used for the Azure OpenAI realtime endpoint.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Scope used for Azure AI Search.
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";

/// Instance metadata endpoint used when no `IDENTITY_ENDPOINT` is exported.
const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when a token response carries no usable expiry.
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

const IDENTITY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Identity token request failed: {0}")]
    RequestFailed(String),

    #[error("Azure Developer CLI failed: {0}")]
    CliFailed(String),

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
}

/// A resolved secret, ready to be attached to an outgoing request.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    ApiKey(String),
    Bearer(String),
}

impl AuthToken {
    /// Header name and value carrying this token.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            AuthToken::ApiKey(key) => ("api-key", key.clone()),
            AuthToken::Bearer(token) => ("authorization", format!("Bearer {token}")),
        }
    }

    /// The raw secret without any scheme prefix.
    pub fn secret(&self) -> &str {
        match self {
            AuthToken::ApiKey(key) => key,
            AuthToken::Bearer(token) => token,
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthToken::ApiKey(_) => f.write_str("AuthToken::ApiKey(<redacted>)"),
            AuthToken::Bearer(_) => f.write_str("AuthToken::Bearer(<redacted>)"),
        }
    }
}

/// Source of authentication for an outbound collaborator.
#[async_trait]
pub trait Credential: Send + Sync {
    async fn resolve(&self) -> Result<AuthToken, CredentialError>;

    /// Short label used in logs.
    fn kind(&self) -> &'static str;
}

/// Static API key credential.
pub struct KeyCredential {
    key: Zeroizing<String>,
}

impl KeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Zeroizing::new(key.into()),
        }
    }
}

#[async_trait]
impl Credential for KeyCredential {
    async fn resolve(&self) -> Result<AuthToken, CredentialError> {
        Ok(AuthToken::ApiKey(self.key.to_string()))
    }

    fn kind(&self) -> &'static str {
        "api_key"
    }
}

/// Where identity tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// `azd auth token` for the given tenant.
    DeveloperCli { tenant_id: String },
    /// App Service / Container Apps identity endpoint, or IMDS.
    ManagedIdentity,
}

impl IdentitySource {
    pub fn from_tenant(tenant_id: Option<&str>) -> Self {
        match tenant_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tenant_id) => IdentitySource::DeveloperCli {
                tenant_id: tenant_id.to_string(),
            },
            None => IdentitySource::ManagedIdentity,
        }
    }
}

struct CachedToken {
    token: Zeroizing<String>,
    refresh_at: Instant,
}

/// Bearer-token credential backed by an Azure identity.
pub struct IdentityCredential {
    source: IdentitySource,
    scope: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct CliToken {
    token: String,
    #[serde(rename = "expiresOn")]
    expires_on: Option<String>,
}

#[derive(Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<Value>,
    #[serde(default)]
    expires_in: Option<Value>,
}

impl IdentityCredential {
    pub fn new(source: IdentitySource, scope: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(IDENTITY_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            source,
            scope: scope.into(),
            http,
            cache: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Resource URI expected by managed identity endpoints.
    fn resource(&self) -> &str {
        self.scope.trim_end_matches("/.default")
    }

    async fn fetch(&self) -> Result<(String, Duration), CredentialError> {
        match &self.source {
            IdentitySource::DeveloperCli { tenant_id } => self.fetch_from_cli(tenant_id).await,
            IdentitySource::ManagedIdentity => self.fetch_from_managed_identity().await,
        }
    }

    async fn fetch_from_cli(&self, tenant_id: &str) -> Result<(String, Duration), CredentialError> {
        let output = tokio::process::Command::new("azd")
            .args([
                "auth",
                "token",
                "--output",
                "json",
                "--scope",
                &self.scope,
                "--tenant-id",
                tenant_id,
            ])
            .output()
            .await
            .map_err(|e| CredentialError::CliFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::CliFailed(stderr.trim().to_string()));
        }

        let parsed: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;
        let lifetime = parsed
            .expires_on
            .as_deref()
            .and_then(lifetime_until_rfc3339)
            .unwrap_or(FALLBACK_TOKEN_LIFETIME);

        Ok((parsed.token, lifetime))
    }

    async fn fetch_from_managed_identity(&self) -> Result<(String, Duration), CredentialError> {
        let request = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => self
                .http
                .get(endpoint)
                .query(&[("api-version", "2019-08-01"), ("resource", self.resource())])
                .header("X-IDENTITY-HEADER", header),
            _ => self
                .http
                .get(IMDS_TOKEN_ENDPOINT)
                .query(&[("api-version", "2018-02-01"), ("resource", self.resource())])
                .header("Metadata", "true"),
        };

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::RequestFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::RequestFailed(format!(
                "identity endpoint returned {status}"
            )));
        }

        let parsed: ManagedIdentityToken = response
            .json()
            .await
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;

        let lifetime = parsed
            .expires_on
            .as_ref()
            .and_then(parse_seconds)
            .map(lifetime_until_epoch)
            .or_else(|| {
                parsed
                    .expires_in
                    .as_ref()
                    .and_then(parse_seconds)
                    .map(Duration::from_secs)
            })
            .unwrap_or(FALLBACK_TOKEN_LIFETIME);

        Ok((parsed.access_token, lifetime))
    }
}

#[async_trait]
impl Credential for IdentityCredential {
    async fn resolve(&self) -> Result<AuthToken, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && Instant::now() < cached.refresh_at
        {
            return Ok(AuthToken::Bearer(cached.token.to_string()));
        }

        let (token, lifetime) = self.fetch().await?;
        tracing::debug!(
            scope = %self.scope,
            lifetime_secs = lifetime.as_secs(),
            "Acquired identity token"
        );
        *cache = Some(CachedToken {
            token: Zeroizing::new(token.clone()),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });

        Ok(AuthToken::Bearer(token))
    }

    fn kind(&self) -> &'static str {
        match self.source {
            IdentitySource::DeveloperCli { .. } => "azure_developer_cli",
            IdentitySource::ManagedIdentity => "managed_identity",
        }
    }
}

/// Pick the credential for a collaborator.
///
/// A non-empty key selects [`KeyCredential`]; otherwise an [`IdentityCredential`]
/// for `scope` is built from the tenant setting.
pub fn select_credential(
    key: Option<&str>,
    tenant_id: Option<&str>,
    scope: &str,
) -> Arc<dyn Credential> {
    if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
        return Arc::new(KeyCredential::new(key));
    }

    let source = IdentitySource::from_tenant(tenant_id);
    match &source {
        IdentitySource::DeveloperCli { tenant_id } => {
            tracing::info!(%tenant_id, scope, "Using Azure Developer CLI credential");
        }
        IdentitySource::ManagedIdentity => {
            tracing::info!(scope, "Using managed identity credential");
        }
    }
    Arc::new(IdentityCredential::new(source, scope))
}

fn parse_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lifetime_until_epoch(epoch_secs: u64) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Duration::from_secs(epoch_secs.saturating_sub(now))
}

fn lifetime_until_rfc3339(value: &str) -> Option<Duration> {
    let expires = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    Duration::try_from(expires - OffsetDateTime::now_utc()).ok()
}
