use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionLimitsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing file is not an error: defaults apply. `${VAR}` references
    /// in the file are expanded from the environment before parsing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// CORS allowed origins.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Defaults applied when a session-create request omits a field.
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_tool_version")]
    pub tool_version: String,
    /// Pause between scripted response events, in milliseconds.
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            system_prompt: default_system_prompt(),
            model_name: default_model_name(),
            tool_version: default_tool_version(),
            response_delay_ms: default_response_delay_ms(),
        }
    }
}

/// Session limit knobs.
///
/// Parsed for compatibility with existing deployments; no eviction loop
/// consumes them yet.
#[derive(Debug, Deserialize)]
pub struct SessionLimitsConfig {
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: u32,
}

impl Default for SessionLimitsConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1024
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
        "http://localhost:8000".to_string(),
    ]
}

fn default_database_path() -> String {
    "opsession.db".to_string()
}

fn default_title() -> String {
    "New Computer Use Session".to_string()
}

fn default_system_prompt() -> String {
    "<SYSTEM_CAPABILITY>\n\
     * You are utilising an Ubuntu virtual machine with internet access.\n\
     * You can install Ubuntu applications with your bash tool. Use curl instead of wget.\n\
     * To open firefox, please just click on the firefox icon.\n\
     </SYSTEM_CAPABILITY>"
        .to_string()
}

fn default_model_name() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_tool_version() -> String {
    "computer_use_20250124".to_string()
}

fn default_response_delay_ms() -> u64 {
    1000
}

fn default_session_timeout_minutes() -> u64 {
    60
}

fn default_max_sessions_per_user() -> u32 {
    5
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` references from the environment.
///
/// `$$` escapes a literal dollar sign. A reference to an unset variable is
/// an error rather than an empty substitution.
fn expand_env_vars(contents: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(contents.len());
    let mut chars = contents.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(ConfigError::UnclosedVarReference);
                }
                let value = std::env::var(&name)
                    .map_err(|_| ConfigError::MissingEnvVar(name.clone()))?;
                out.push_str(&value);
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(config.database.path, "opsession.db");
        assert_eq!(config.agent.tool_version, "computer_use_20250124");
        assert_eq!(config.session.timeout_minutes, 60);
    }

    #[test]
    fn parse_partial_config() {
        let yaml = "server:\n  port: 9000\nagent:\n  model_name: test-model\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.agent.model_name, "test-model");
        assert_eq!(config.agent.tool_version, "computer_use_20250124");
    }

    #[test]
    fn expand_known_var() {
        // SAFETY: test-local env mutation, no concurrent readers of this key.
        unsafe { std::env::set_var("OPSESSION_TEST_VAR", "value123") };
        let expanded = expand_env_vars("path: ${OPSESSION_TEST_VAR}/db").unwrap();
        assert_eq!(expanded, "path: value123/db");
    }

    #[test]
    fn expand_missing_var_fails() {
        let err = expand_env_vars("path: ${OPSESSION_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "OPSESSION_DEFINITELY_UNSET"));
    }

    #[test]
    fn expand_escaped_dollar() {
        let expanded = expand_env_vars("cost: $$5").unwrap();
        assert_eq!(expanded, "cost: $5");
    }

    #[test]
    fn expand_unclosed_reference_fails() {
        let err = expand_env_vars("path: ${OOPS").unwrap_err();
        assert!(matches!(err, ConfigError::UnclosedVarReference));
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let config = Config::load("/nonexistent/opsession.yaml").await.unwrap();
        assert_eq!(config.server.port, 8000);
    }
}
