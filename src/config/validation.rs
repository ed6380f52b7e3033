use url::Url;

use super::ServerConfig;
use crate::core::bridge::reserved_fields_in;
use crate::core::realtime::RealtimeProvider;

/// Run every check against a merged configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_realtime(
        &config.realtime_provider,
        &config.realtime_endpoint,
        &config.realtime_deployment,
    )?;
    validate_search(&config.search_endpoint, &config.search_index)?;
    validate_optional_url("EMAIL_ENDPOINT", &config.email_endpoint)?;
    validate_tool_timeout(config.tool_timeout_seconds)?;
    validate_allow_list(&config.session_field_allow_list)?;
    validate_tunable_fields(&config.client_tunable_fields)?;
    Ok(())
}

/// Validate the upstream realtime settings
///
/// Azure needs a resource endpoint. OpenAI falls back to the public URL when
/// no endpoint is given. Both need a deployment (model) name.
pub fn validate_realtime(
    provider: &RealtimeProvider,
    endpoint: &str,
    deployment: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if deployment.trim().is_empty() {
        return Err("AZURE_OPENAI_REALTIME_DEPLOYMENT is required".into());
    }

    if endpoint.trim().is_empty() {
        if *provider == RealtimeProvider::Azure {
            return Err("AZURE_OPENAI_ENDPOINT is required for the azure provider".into());
        }
        return Ok(());
    }

    parse_url("AZURE_OPENAI_ENDPOINT", endpoint)
}

/// Search endpoint and index must be configured together.
pub fn validate_search(
    endpoint: &Option<String>,
    index: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    match (endpoint, index) {
        (Some(_), None) => {
            Err("AZURE_SEARCH_INDEX is required when AZURE_SEARCH_ENDPOINT is set".into())
        }
        (None, Some(_)) => {
            Err("AZURE_SEARCH_ENDPOINT is required when AZURE_SEARCH_INDEX is set".into())
        }
        (Some(endpoint), Some(_)) => parse_url("AZURE_SEARCH_ENDPOINT", endpoint),
        (None, None) => Ok(()),
    }
}

pub fn validate_optional_url(
    name: &str,
    value: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    match value {
        Some(url) => parse_url(name, url),
        None => Ok(()),
    }
}

pub fn validate_tool_timeout(seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    if seconds == 0 {
        return Err("TOOL_TIMEOUT_SECONDS must be greater than zero".into());
    }
    Ok(())
}

/// An empty allow-list would hide the session id the browser needs.
pub fn validate_allow_list(fields: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if fields.is_empty() {
        return Err("SESSION_FIELD_ALLOW_LIST must name at least one field".into());
    }
    reject_reserved("SESSION_FIELD_ALLOW_LIST", fields)
}

pub fn validate_tunable_fields(fields: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    reject_reserved("CLIENT_TUNABLE_FIELDS", fields)
}

/// Prompt, tool and secret fields stay server-side whatever the lists say.
fn reject_reserved(name: &str, fields: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let reserved = reserved_fields_in(fields.iter().map(String::as_str));
    if !reserved.is_empty() {
        return Err(format!("{name} may not include server-only fields: {}", reserved.join(", ")).into());
    }
    Ok(())
}

fn parse_url(name: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    Url::parse(value).map_err(|e| format!("{name} is not a valid URL ({value}): {e}"))?;
    Ok(())
}
