use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for any configured timeout (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_conversation_url")]
    pub conversation_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Whole chat exchange: connect plus full stream drain.
    #[serde(default = "default_chat_secs")]
    pub chat_secs: u64,
    #[serde(default = "default_conversation_secs")]
    pub conversation_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle age after which a tracked conversation is dropped. 0 disables expiry.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_continuous_cid")]
    pub continuous_cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub allow_dummy: bool,
    #[serde(default = "default_true")]
    pub use_env_token: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4141
}

fn default_base_url() -> String {
    "https://sider.ai/api/chat/v1/completions".to_string()
}

fn default_conversation_url() -> String {
    "https://sider.ai/api/chat/v1/conversation/messages".to_string()
}

fn default_token_env() -> String {
    "SIDER_API_TOKEN".to_string()
}

fn default_chat_secs() -> u64 {
    120
}

fn default_conversation_secs() -> u64 {
    10
}

fn default_max_age_secs() -> u64 {
    2 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    15 * 60
}

fn default_continuous_cid() -> String {
    "continuous-conversation".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            conversation_url: default_conversation_url(),
            token_env: default_token_env(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            chat_secs: default_chat_secs(),
            conversation_secs: default_conversation_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            continuous_cid: default_continuous_cid(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_dummy: true,
            use_env_token: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            provider: ProviderConfig::default(),
            timeouts: TimeoutConfig::default(),
            sessions: SessionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.base_url.trim().is_empty() {
            return Err(ProxyError::config("provider.base_url must not be empty"));
        }
        for (name, secs) in [
            ("timeouts.chat_secs", self.timeouts.chat_secs),
            ("timeouts.conversation_secs", self.timeouts.conversation_secs),
        ] {
            if !(1..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(ProxyError::config(format!(
                    "{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"
                )));
            }
        }
        if self.sessions.continuous_cid.trim().is_empty() {
            return Err(ProxyError::config("sessions.continuous_cid must not be empty"));
        }
        Ok(())
    }

    /// Token from the configured environment variable, if set and non-empty.
    pub fn env_token(&self) -> Option<String> {
        std::env::var(&self.provider.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Clamped to `1..=MAX_TIMEOUT_SECS` so deadline arithmetic cannot overflow.
    pub fn chat_timeout(&self) -> Duration {
        bounded_timeout(self.timeouts.chat_secs)
    }

    pub fn conversation_timeout(&self) -> Duration {
        bounded_timeout(self.timeouts.conversation_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.sessions.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.cleanup_interval_secs.max(1))
    }
}

fn bounded_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS))
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("sider-proxy.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("sider-proxy")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("sider-proxy").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("sider-proxy").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".sider-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[provider]
base_url = "http://127.0.0.1:9999/chat"
token_env = "MY_SIDER_TOKEN"

[timeouts]
chat_secs = 30

[sessions]
max_age_secs = 0
continuous_cid = "shared"
"#
        )
        .unwrap();

        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.provider.base_url, "http://127.0.0.1:9999/chat");
        assert_eq!(
            config.provider.conversation_url,
            "https://sider.ai/api/chat/v1/conversation/messages"
        );
        assert_eq!(config.provider.token_env, "MY_SIDER_TOKEN");
        assert_eq!(config.chat_timeout(), Duration::from_secs(30));
        assert_eq!(config.conversation_timeout(), Duration::from_secs(10));
        assert_eq!(config.session_max_age(), Duration::ZERO);
        assert_eq!(config.sessions.continuous_cid, "shared");
        assert!(config.auth.allow_dummy);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 4141);
        assert_eq!(config.sessions.continuous_cid, "continuous-conversation");
        assert_eq!(config.cleanup_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_out_of_range_timeouts_rejected() {
        for toml in [
            "[timeouts]\nconversation_secs = 0",
            "[timeouts]\nchat_secs = 9999999999",
            "[timeouts]\nconversation_secs = 86401",
        ] {
            let mut f = NamedTempFile::new().unwrap();
            writeln!(f, "{toml}").unwrap();
            assert!(
                matches!(ProxyConfig::load(f.path()), Err(ProxyError::Config { .. })),
                "accepted: {toml}"
            );
        }
    }

    #[test]
    fn test_timeout_accessors_are_clamped() {
        let mut config = ProxyConfig::default();
        config.timeouts.chat_secs = u64::MAX;
        config.timeouts.conversation_secs = 0;
        assert_eq!(config.chat_timeout(), Duration::from_secs(MAX_TIMEOUT_SECS));
        assert_eq!(config.conversation_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_chat_timeout_rejected() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[timeouts]\nchat_secs = 0").unwrap();
        assert!(matches!(
            ProxyConfig::load(f.path()),
            Err(ProxyError::Config { .. })
        ));
    }
}
