use crate::models::server::ServerConfig;
use crate::transport::http::TransportSettings;
use crate::transport::retry::RetryPolicy;
use crate::vault::crypto::DEFAULT_ITERATIONS;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ListenConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Servers written to a vault that is being initialized; ignored afterwards
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// JSON file backing the key-value store
    pub path: PathBuf,
    /// Environment variable holding the passphrase
    #[serde(default = "default_passphrase_env")]
    pub passphrase_env: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_passphrase_env() -> String {
    "SEEDHUB_PASSPHRASE".to_string()
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Transport settings handed to every adapter
    pub fn transport_settings(&self) -> TransportSettings {
        let retry = (self.max_retries > 0).then(|| RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        });

        TransportSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            retry,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("Server port must be greater than 0");
        }

        if self.server.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        if self.vault.path.as_os_str().is_empty() {
            bail!("vault.path must not be empty");
        }

        if self.vault.passphrase_env.is_empty() {
            bail!("vault.passphrase_env must not be empty");
        }

        if self.vault.kdf_iterations == 0 {
            bail!("vault.kdf_iterations must be greater than 0");
        }

        if self.poll.interval_secs == 0 {
            bail!("poll.interval_secs must be greater than 0");
        }

        if self.poll.request_timeout_secs == 0 {
            bail!("poll.request_timeout_secs must be greater than 0");
        }

        if self.poll.base_delay_ms > self.poll.max_delay_ms {
            bail!(
                "poll.base_delay_ms ({}) must not exceed poll.max_delay_ms ({})",
                self.poll.base_delay_ms,
                self.poll.max_delay_ms
            );
        }

        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                bail!("Every [[servers]] entry needs a name");
            }
            if !names.insert(server.name.as_str()) {
                bail!("Duplicate server name '{}'", server.name);
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
        [server]
        port = 8090

        [vault]
        path = "seedhub.json"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.server.num_threads > 0);
        assert_eq!(config.vault.passphrase_env, "SEEDHUB_PASSPHRASE");
        assert_eq!(config.vault.kdf_iterations, DEFAULT_ITERATIONS);
        assert_eq!(config.poll.interval_secs, 10);
        assert_eq!(config.logging.format, "json");
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_seed_servers_parse() {
        let content = format!(
            "{}\n{}",
            MINIMAL,
            r#"
            [[servers]]
            name = "home"
            type = "qbittorrent"
            url = "http://nas:8080"
            username = "admin"
            password = "adminadmin"

            [servers.options]
            rpc_path = "/custom"
            "#
        );
        let config = Config::from_toml(&content).unwrap();

        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].client_type, "qbittorrent");
        assert_eq!(config.servers[0].option_str("rpc_path"), Some("/custom"));
        assert!(config.servers[0].visible);
    }

    #[test]
    fn test_validation_failures() {
        let zero_port = MINIMAL.replace("8090", "0");
        assert!(Config::from_toml(&zero_port).is_err());

        let bad_level = format!("{}\n[logging]\nlevel = \"loud\"\n", MINIMAL);
        assert!(Config::from_toml(&bad_level).is_err());

        let bad_delays = format!("{}\n[poll]\nbase_delay_ms = 5000\nmax_delay_ms = 100\n", MINIMAL);
        assert!(Config::from_toml(&bad_delays).is_err());

        let duplicate = format!(
            "{}\n{}",
            MINIMAL,
            r#"
            [[servers]]
            name = "a"
            type = "aria2"
            url = "http://x"

            [[servers]]
            name = "a"
            type = "aria2"
            url = "http://y"
            "#
        );
        assert!(Config::from_toml(&duplicate).is_err());
    }

    #[test]
    fn test_transport_settings() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let settings = config.poll.transport_settings();
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.retry.as_ref().map(|r| r.max_retries), Some(3));

        let no_retry = format!("{}\n[poll]\nmax_retries = 0\n", MINIMAL);
        let config = Config::from_toml(&no_retry).unwrap();
        assert!(config.poll.transport_settings().retry.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.server.port, 8090);
        assert!(Config::from_file(&PathBuf::from("/nonexistent/seedhub.toml")).is_err());
    }
}
