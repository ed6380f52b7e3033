use std::env;
use std::path::{Path, PathBuf};

use super::utils::{non_empty, parse_list};
use super::yaml::YamlConfig;
use super::{DEFAULT_SYSTEM_PROMPT, ServerConfig};
use crate::core::bridge::{DEFAULT_CLIENT_TUNABLE_FIELDS, DEFAULT_SESSION_FIELD_ALLOW_LIST};
use crate::core::realtime::{DEFAULT_AZURE_API_VERSION, RealtimeProvider};
use crate::core::search::{DEFAULT_SEARCH_API_VERSION, DEFAULT_SEARCH_TOP, SearchFields};

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            non_empty($yaml_value)
                .or_else(|| non_empty(env::var($env_var).ok()))
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            non_empty($yaml_value).or_else(|| non_empty(env::var($env_var).ok()))
        };
    }

    // YAML > ENV (parsed) > Default
    macro_rules! get_parsed {
        ($env_var:expr, $yaml_value:expr, $ty:ty, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => match non_empty(env::var($env_var).ok()) {
                    Some(raw) => raw
                        .trim()
                        .parse::<$ty>()
                        .map_err(|e| format!("Invalid {} environment variable: {e}", $env_var))?,
                    None => $default,
                },
            }
        };
    }

    let server = yaml.server.unwrap_or_default();
    let realtime = yaml.realtime.unwrap_or_default();
    let search = yaml.search.unwrap_or_default();
    let email = yaml.email.unwrap_or_default();
    let identity = yaml.identity.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    // Server
    let host = get_value!("HOST", server.host, "localhost");
    let port = get_parsed!("PORT", server.port, u16, 8765);
    let static_dir = server
        .static_dir
        .or_else(|| non_empty(env::var("STATIC_DIR").ok()).map(PathBuf::from));

    // Realtime upstream
    let realtime_provider = RealtimeProvider::from_str_or_default(&get_value!(
        "REALTIME_PROVIDER",
        realtime.provider,
        RealtimeProvider::default().as_str()
    ));
    let realtime_endpoint = get_value!("AZURE_OPENAI_ENDPOINT", realtime.endpoint, "");
    let realtime_deployment =
        get_value!("AZURE_OPENAI_REALTIME_DEPLOYMENT", realtime.deployment, "");
    let realtime_api_key = get_optional!("AZURE_OPENAI_API_KEY", realtime.api_key);
    let realtime_api_version = get_value!(
        "AZURE_OPENAI_API_VERSION",
        realtime.api_version,
        DEFAULT_AZURE_API_VERSION
    );
    let realtime_voice = get_optional!("AZURE_OPENAI_REALTIME_VOICE", realtime.voice);

    let system_prompt = resolve_system_prompt(realtime.system_prompt, realtime.system_prompt_file)?;

    // Search
    let default_fields = SearchFields::default();
    let search_endpoint = get_optional!("AZURE_SEARCH_ENDPOINT", search.endpoint);
    let search_index = get_optional!("AZURE_SEARCH_INDEX", search.index);
    let search_api_key = get_optional!("AZURE_SEARCH_API_KEY", search.api_key);
    let search_api_version = get_value!(
        "AZURE_SEARCH_API_VERSION",
        search.api_version,
        DEFAULT_SEARCH_API_VERSION
    );
    let search_semantic_configuration = get_optional!(
        "AZURE_SEARCH_SEMANTIC_CONFIGURATION",
        search.semantic_configuration
    );
    let search_top = get_parsed!("AZURE_SEARCH_TOP", search.top, u32, DEFAULT_SEARCH_TOP);
    let search_vector_field = get_optional!("AZURE_SEARCH_VECTOR_FIELD", search.vector_field);
    let search_id_field = get_value!(
        "AZURE_SEARCH_IDENTIFIER_FIELD",
        search.id_field,
        default_fields.id
    );
    let search_title_field = get_value!(
        "AZURE_SEARCH_TITLE_FIELD",
        search.title_field,
        default_fields.title
    );
    let search_content_field = get_value!(
        "AZURE_SEARCH_CONTENT_FIELD",
        search.content_field,
        default_fields.content
    );

    // Email
    let email_endpoint = get_optional!("EMAIL_ENDPOINT", email.endpoint);
    let email_api_key = get_optional!("EMAIL_API_KEY", email.api_key);
    let email_sender = get_optional!("EMAIL_SENDER", email.sender);

    let azure_tenant_id = get_optional!("AZURE_TENANT_ID", identity.tenant_id);

    // Relay behaviour
    let tool_timeout_seconds =
        get_parsed!("TOOL_TIMEOUT_SECONDS", relay.tool_timeout_seconds, u64, 20);
    let session_field_allow_list = resolve_list(
        "SESSION_FIELD_ALLOW_LIST",
        relay.session_field_allow_list,
        DEFAULT_SESSION_FIELD_ALLOW_LIST,
    );
    let client_tunable_fields = resolve_list(
        "CLIENT_TUNABLE_FIELDS",
        relay.client_tunable_fields,
        DEFAULT_CLIENT_TUNABLE_FIELDS,
    );

    // Security
    let cors_allowed_origins =
        get_optional!("CORS_ALLOWED_ORIGINS", security.cors_allowed_origins);
    let max_websocket_connections = match security.max_websocket_connections {
        Some(value) => Some(value),
        None => non_empty(env::var("MAX_WEBSOCKET_CONNECTIONS").ok())
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| format!("Invalid MAX_WEBSOCKET_CONNECTIONS environment variable: {e}"))
            })
            .transpose()?,
    };
    let max_connections_per_ip = get_parsed!(
        "MAX_CONNECTIONS_PER_IP",
        security.max_connections_per_ip,
        u32,
        100
    );

    Ok(ServerConfig {
        host,
        port,
        static_dir,
        realtime_provider,
        realtime_endpoint,
        realtime_deployment,
        realtime_api_key,
        realtime_api_version,
        realtime_voice,
        realtime_turn_detection: realtime.turn_detection,
        realtime_input_audio_transcription: realtime.input_audio_transcription,
        system_prompt,
        search_endpoint,
        search_index,
        search_api_key,
        search_api_version,
        search_semantic_configuration,
        search_top,
        search_vector_field,
        search_id_field,
        search_title_field,
        search_content_field,
        email_endpoint,
        email_api_key,
        email_sender,
        azure_tenant_id,
        tool_timeout_seconds,
        session_field_allow_list,
        client_tunable_fields,
        cors_allowed_origins,
        max_websocket_connections,
        max_connections_per_ip,
    })
}

/// Resolve the system prompt.
///
/// Order: YAML text, YAML file, `SYSTEM_PROMPT`, `SYSTEM_PROMPT_FILE`, built-in default.
fn resolve_system_prompt(
    yaml_prompt: Option<String>,
    yaml_prompt_file: Option<PathBuf>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(prompt) = non_empty(yaml_prompt) {
        return Ok(prompt);
    }
    if let Some(path) = yaml_prompt_file {
        return read_prompt_file(&path);
    }
    if let Some(prompt) = non_empty(env::var("SYSTEM_PROMPT").ok()) {
        return Ok(prompt);
    }
    if let Some(path) = non_empty(env::var("SYSTEM_PROMPT_FILE").ok()) {
        return read_prompt_file(Path::new(&path));
    }
    Ok(DEFAULT_SYSTEM_PROMPT.to_string())
}

fn read_prompt_file(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let prompt = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read system prompt file {}: {e}", path.display()))?;
    Ok(prompt.trim().to_string())
}

fn resolve_list(env_var: &str, yaml_value: Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    if let Some(list) = yaml_value {
        return list;
    }
    match non_empty(env::var(env_var).ok()) {
        Some(raw) => parse_list(&raw),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}
