use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Credentials for an HTTP basic-auth layer in front of the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpAuth {
    pub username: String,
    pub password: String,
}

/// One configured remote torrent backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical name, unique per vault
    pub name: String,
    /// Backend type tag, resolved by the client factory
    #[serde(rename = "type")]
    pub client_type: String,
    /// Base address, e.g. `http://127.0.0.1:8080`
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub http_auth: Option<HttpAuth>,
    /// Save directories offered when adding tasks
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub default_dir: Option<String>,
    #[serde(default)]
    pub default_label: Option<String>,
    /// Free-form per-backend options
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ServerConfig {
    pub fn new(
        name: impl Into<String>,
        client_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_type: client_type.into(),
            url: url.into(),
            username: None,
            password: None,
            http_auth: None,
            directories: Vec::new(),
            default_dir: None,
            default_label: None,
            options: BTreeMap::new(),
            visible: true,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("")
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// Base URL with any `user:pass@` part removed, for display
    pub fn redacted_url(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
                let _ = url.set_username("");
                let _ = url.set_password(None);
                url.to_string()
            }
            _ => self.url.clone(),
        }
    }

    /// String option lookup, `None` when absent or not a string
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// First name that appears more than once in `servers`
pub fn duplicate_name(servers: &[ServerConfig]) -> Option<&str> {
    let mut seen = HashSet::new();
    servers
        .iter()
        .map(|s| s.name.as_str())
        .find(|name| !seen.insert(*name))
}

/// Keep the first server of every name; returns the kept list and the dropped names
pub fn unique_by_name(servers: Vec<ServerConfig>) -> (Vec<ServerConfig>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut dropped = Vec::new();
    let kept = servers
        .into_iter()
        .filter(|s| {
            if seen.insert(s.name.clone()) {
                true
            } else {
                dropped.push(s.name.clone());
                false
            }
        })
        .collect();
    (kept, dropped)
}
