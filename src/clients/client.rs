use crate::core::error::ClientError;
use crate::models::server::ServerConfig;
use crate::models::task::Task;
use crate::transport::http::{HttpClient, TransportSettings};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

/// Backend families the factory knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    QBittorrent,
    Flood,
    Transmission,
    Aria2,
    RTorrent,
    UTorrent,
}

impl ClientKind {
    pub const ALL: [ClientKind; 6] = [
        ClientKind::QBittorrent,
        ClientKind::Flood,
        ClientKind::Transmission,
        ClientKind::Aria2,
        ClientKind::RTorrent,
        ClientKind::UTorrent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::QBittorrent => "qbittorrent",
            ClientKind::Flood => "flood",
            ClientKind::Transmission => "transmission",
            ClientKind::Aria2 => "aria2",
            ClientKind::RTorrent => "rtorrent",
            ClientKind::UTorrent => "utorrent",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = ClientError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.trim().to_ascii_lowercase();
        ClientKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ClientError::Config(format!("Unsupported client type: {:?}", tag)))
    }
}

/// Options for adding a task
///
/// `sequential` and `first_last_piece` are hints; backends without an
/// equivalent ignore them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddOptions {
    pub paused: bool,
    pub save_path: Option<String>,
    pub label: Option<String>,
    pub sequential: Option<bool>,
    pub first_last_piece: Option<bool>,
}

impl AddOptions {
    /// Fill the path and label from the server defaults when unset
    pub fn with_defaults(&self, server: &ServerConfig) -> AddOptions {
        let mut resolved = self.clone();
        if resolved.save_path.is_none() {
            resolved.save_path = server.default_dir.clone();
        }
        if resolved.label.is_none() {
            resolved.label = server.default_label.clone();
        }
        resolved
    }
}

/// Uniform capability contract over one remote torrent backend
///
/// Capabilities a backend lacks return empty collections or do nothing.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    fn kind(&self) -> ClientKind;

    fn server(&self) -> &ServerConfig;

    async fn login(&self) -> Result<(), ClientError>;

    async fn logout(&self) -> Result<(), ClientError>;

    /// Backend version string; a cheap authenticated call
    async fn version(&self) -> Result<String, ClientError>;

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError>;

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError>;

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError>;

    async fn pause(&self, id: &str) -> Result<(), ClientError>;

    async fn resume(&self, id: &str) -> Result<(), ClientError>;

    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError>;

    /// Never fails: any error reads as `false`
    async fn test_connection(&self) -> bool {
        let result = match self.login().await {
            Ok(()) => self.version().await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(server = %self.server().name, error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Wall-clock latency of `version` in milliseconds; errors propagate
    async fn ping(&self) -> Result<u64, ClientError> {
        let started = Instant::now();
        self.version().await?;
        Ok(started.elapsed().as_millis() as u64)
    }

    async fn get_categories(&self) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }

    async fn set_category(&self, _id: &str, _category: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn get_tags(&self) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }

    async fn add_tags(&self, _id: &str, _tags: &[String]) -> Result<(), ClientError> {
        Ok(())
    }

    async fn remove_tags(&self, _id: &str, _tags: &[String]) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Transport for `server`, with its HTTP basic-auth layer when configured
pub fn http_client(server: &ServerConfig, settings: &TransportSettings) -> Result<HttpClient, ClientError> {
    if server.url.trim().is_empty() {
        return Err(ClientError::Config(format!("Server {:?} has no URL", server.name)));
    }
    let http = HttpClient::new(&server.url, settings).map_err(|e| ClientError::Config(e.to_string()))?;
    Ok(match &server.http_auth {
        Some(auth) => http.with_basic_auth(&auth.username, &auth.password),
        None => http,
    })
}

/// Distinct non-empty values, sorted
pub fn unique_sorted(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("qbittorrent".parse::<ClientKind>().unwrap(), ClientKind::QBittorrent);
        assert_eq!(" rTorrent ".parse::<ClientKind>().unwrap(), ClientKind::RTorrent);
        for kind in ClientKind::ALL {
            assert_eq!(kind.as_str().parse::<ClientKind>().unwrap(), kind);
        }
        assert!(matches!("deluge".parse::<ClientKind>(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_add_options_defaults() {
        let mut server = ServerConfig::new("s", "qbittorrent", "http://x");
        server.default_dir = Some("/downloads".to_string());
        server.default_label = Some("misc".to_string());

        let resolved = AddOptions::default().with_defaults(&server);
        assert_eq!(resolved.save_path.as_deref(), Some("/downloads"));
        assert_eq!(resolved.label.as_deref(), Some("misc"));

        let explicit = AddOptions {
            save_path: Some("/tv".to_string()),
            ..AddOptions::default()
        }
        .with_defaults(&server);
        assert_eq!(explicit.save_path.as_deref(), Some("/tv"));
    }

    #[test]
    fn test_unique_sorted() {
        let values = vec!["b".to_string(), "a".to_string(), "b".to_string(), String::new()];
        assert_eq!(unique_sorted(values), vec!["a", "b"]);
    }
}
