use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::bridge::{SessionPolicy, SessionSetup};
use crate::core::credential::{
    COGNITIVE_SERVICES_SCOPE, Credential, KeyCredential, SEARCH_SCOPE, select_credential,
};
use crate::core::email::{DisabledEmailSender, EmailSender, HttpEmailSender};
use crate::core::realtime::{RealtimeConnector, UpstreamConnector};
use crate::core::search::{AzureSearchIndex, SearchIndex, UnconfiguredSearchIndex};
use crate::core::tools::{ToolDependencies, ToolError, ToolRegistry, standard_registry};

mod connections;
mod sessions;

pub use connections::{ConnectionLimitError, ConnectionTracker};
pub use sessions::SessionRegistry;

/// Application state that can be shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Opens one upstream realtime session per browser connection.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Built once at startup; each session gets its own clone.
    pub tools: ToolRegistry,
    pub policy: Arc<SessionPolicy>,
    pub system_prompt: Arc<str>,
    pub sessions: SessionRegistry,
    pub connections: ConnectionTracker,
}

impl AppState {
    /// Build the state and every collaborator from configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ToolError> {
        let tenant_id = config.azure_tenant_id.as_deref();

        let realtime_credential = select_credential(
            config.realtime_api_key.as_deref(),
            tenant_id,
            COGNITIVE_SERVICES_SCOPE,
        );
        let connector: Arc<dyn UpstreamConnector> = Arc::new(RealtimeConnector::new(
            config.upstream_config(),
            realtime_credential,
        ));

        let search: Arc<dyn SearchIndex> = match config.search_index_config() {
            Some(index_config) => {
                let credential =
                    select_credential(config.search_api_key.as_deref(), tenant_id, SEARCH_SCOPE);
                info!(index = %index_config.index, "Knowledge base search enabled");
                Arc::new(AzureSearchIndex::new(index_config, credential))
            }
            None => {
                info!("Knowledge base search not configured");
                Arc::new(UnconfiguredSearchIndex)
            }
        };

        let email: Arc<dyn EmailSender> = match &config.email_endpoint {
            Some(endpoint) => {
                let credential: Option<Arc<dyn Credential>> = config
                    .email_api_key
                    .as_ref()
                    .map(|key| Arc::new(KeyCredential::new(key.clone())) as Arc<dyn Credential>);
                Arc::new(HttpEmailSender::new(
                    endpoint.clone(),
                    config.email_sender.clone(),
                    credential,
                ))
            }
            None => {
                info!("Email delivery not configured");
                Arc::new(DisabledEmailSender)
            }
        };

        let deps = ToolDependencies {
            search,
            email,
            clock: None,
        };
        Self::with_collaborators(config, connector, &deps)
    }

    /// Build the state around caller-supplied collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        deps: &ToolDependencies,
    ) -> Result<Arc<Self>, ToolError> {
        let tools = standard_registry(deps)?;
        let policy = Arc::new(config.session_policy());
        let system_prompt: Arc<str> = Arc::from(config.system_prompt.as_str());
        let connections = ConnectionTracker::new(
            config.max_websocket_connections,
            config.max_connections_per_ip as usize,
        );

        info!(
            upstream = %connector.describe(),
            tools = ?tools.names().collect::<Vec<_>>(),
            "Application state initialized"
        );

        Ok(Arc::new(Self {
            config,
            connector,
            tools,
            policy,
            system_prompt,
            sessions: SessionRegistry::new(),
            connections,
        }))
    }

    /// Per-session setup: fresh tool registry clone, shared policy and prompt.
    pub fn session_setup(
        &self,
        session_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> SessionSetup {
        let mut setup =
            SessionSetup::new(session_id, self.system_prompt.clone(), self.tools.clone());
        setup.policy = self.policy.clone();
        setup.tool_timeout = self.config.tool_timeout();
        setup.options = self.config.session_options();
        setup.cancel = cancel;
        setup
    }

    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        self.connections.try_acquire(ip)
    }

    pub fn release_connection(&self, ip: IpAddr) {
        self.connections.release(ip)
    }

    pub fn ws_connection_count(&self) -> usize {
        self.connections.total()
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.connections.for_ip(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::RealtimeProvider;
    use std::time::Duration;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::new(
            RealtimeProvider::Azure,
            "https://rt.openai.azure.com",
            "gpt-4o-realtime-preview",
        );
        config.realtime_api_key = Some("test-key".to_string());
        config.tool_timeout_seconds = 5;
        config.realtime_voice = Some("alloy".to_string());
        config.max_websocket_connections = Some(2);
        config
    }

    #[test]
    fn test_app_state_registers_standard_tools() {
        let state = AppState::new(test_config()).unwrap();

        assert_eq!(
            state.tools.names().collect::<Vec<_>>(),
            vec!["search", "report_grounding", "current_date", "send_email"]
        );
        assert!(state.connector.describe().contains("gpt-4o-realtime-preview"));
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_session_setup_uses_config() {
        let state = AppState::new(test_config()).unwrap();
        let token = state.sessions.child_token();
        let setup = state.session_setup("s-1", token.clone());

        assert_eq!(setup.session_id, "s-1");
        assert_eq!(setup.tool_timeout, Duration::from_secs(5));
        assert_eq!(setup.options.voice.as_deref(), Some("alloy"));
        assert_eq!(setup.tools.len(), 4);
        assert_eq!(&*setup.system_prompt, state.config.system_prompt.as_str());

        state.sessions.stop_all();
        assert!(setup.cancel.is_cancelled());
    }

    #[test]
    fn test_connection_limits_follow_config() {
        let state = AppState::new(test_config()).unwrap();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(state.try_acquire_connection(ip).is_ok());
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 1);
        assert_eq!(state.ip_connection_count(&ip), 1);
    }
}
