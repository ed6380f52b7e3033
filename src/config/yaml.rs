use std::path::PathBuf;

use serde::Deserialize;

/// YAML configuration structure
///
/// Mirrors [`super::ServerConfig`] grouped by concern. Every field is optional;
/// anything left out falls back to the environment and then to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub search: Option<SearchYaml>,
    pub email: Option<EmailYaml>,
    pub identity: Option<IdentityYaml>,
    pub relay: Option<RelayYaml>,
    pub security: Option<SecurityYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RealtimeYaml {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub voice: Option<String>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
    /// Passed through as the `turn_detection` session object.
    pub turn_detection: Option<serde_json::Value>,
    /// Passed through as the `input_audio_transcription` session object.
    pub input_audio_transcription: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchYaml {
    pub endpoint: Option<String>,
    pub index: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub semantic_configuration: Option<String>,
    pub top: Option<u32>,
    pub vector_field: Option<String>,
    pub id_field: Option<String>,
    pub title_field: Option<String>,
    pub content_field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailYaml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityYaml {
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayYaml {
    pub tool_timeout_seconds: Option<u64>,
    pub session_field_allow_list: Option<Vec<String>>,
    pub client_tunable_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
  static_dir: "./static"

realtime:
  provider: "azure"
  endpoint: "https://my-resource.openai.azure.com"
  deployment: "gpt-4o-realtime-preview"
  api_key: "rt-key"
  voice: "alloy"
  system_prompt: "Be brief."
  turn_detection:
    type: "server_vad"
    silence_duration_ms: 500

search:
  endpoint: "https://my-search.search.windows.net"
  index: "kb"
  top: 3
  semantic_configuration: "default"

email:
  endpoint: "https://mail.example.com/send"
  sender: "assistant@example.com"

identity:
  tenant_id: "tenant-1"

relay:
  tool_timeout_seconds: 10
  session_field_allow_list: ["id", "model"]

security:
  cors_allowed_origins: "*"
  max_connections_per_ip: 5
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(9000));

        let realtime = config.realtime.unwrap();
        assert_eq!(realtime.deployment.as_deref(), Some("gpt-4o-realtime-preview"));
        assert_eq!(
            realtime.turn_detection.unwrap()["silence_duration_ms"],
            serde_json::json!(500)
        );

        let search = config.search.unwrap();
        assert_eq!(search.top, Some(3));
        assert_eq!(search.index.as_deref(), Some("kb"));

        assert_eq!(config.identity.unwrap().tenant_id.as_deref(), Some("tenant-1"));

        let relay = config.relay.unwrap();
        assert_eq!(relay.tool_timeout_seconds, Some(10));
        assert_eq!(
            relay.session_field_allow_list,
            Some(vec!["id".to_string(), "model".to_string()])
        );
        assert_eq!(config.security.unwrap().max_connections_per_ip, Some(5));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config: YamlConfig = serde_yaml::from_str("server:\n  port: 8000\n").unwrap();
        assert_eq!(config.server.unwrap().port, Some(8000));
        assert!(config.realtime.is_none());
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_yaml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "realtime:\n  deployment: \"rt\"\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.realtime.unwrap().deployment.as_deref(), Some("rt"));
    }

    #[test]
    fn test_yaml_config_missing_file() {
        let err = YamlConfig::from_file(&PathBuf::from("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_yaml_config_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "server: [unclosed").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
