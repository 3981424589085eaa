use crate::clients::aria2::Aria2Client;
use crate::clients::client::{ClientKind, TorrentClient};
use crate::clients::flood::FloodClient;
use crate::clients::qbittorrent::QBittorrentClient;
use crate::clients::rtorrent::RTorrentClient;
use crate::clients::transmission::TransmissionClient;
use crate::clients::utorrent::UTorrentClient;
use crate::core::error::ClientError;
use crate::models::server::ServerConfig;
use crate::transport::http::TransportSettings;

/// Build the adapter for `config` with default transport settings
pub fn create_client(config: ServerConfig) -> Result<Box<dyn TorrentClient>, ClientError> {
    create_client_with(config, &TransportSettings::default())
}

/// Build the adapter named by `config.client_type`
///
/// Unknown type tags and unusable URLs fail here, before any network I/O.
pub fn create_client_with(
    config: ServerConfig,
    settings: &TransportSettings,
) -> Result<Box<dyn TorrentClient>, ClientError> {
    let kind: ClientKind = config.client_type.parse()?;

    Ok(match kind {
        ClientKind::QBittorrent => Box::new(QBittorrentClient::new(config, settings)?),
        ClientKind::Flood => Box::new(FloodClient::new(config, settings)?),
        ClientKind::Transmission => Box::new(TransmissionClient::new(config, settings)?),
        ClientKind::Aria2 => Box::new(Aria2Client::new(config, settings)?),
        ClientKind::RTorrent => Box::new(RTorrentClient::new(config, settings)?),
        ClientKind::UTorrent => Box::new(UTorrentClient::new(config, settings)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_is_constructible() {
        for kind in ClientKind::ALL {
            let config = ServerConfig::new(format!("{}-box", kind), kind.as_str(), "http://127.0.0.1:9");
            let client = create_client(config).unwrap();
            assert_eq!(client.kind(), kind);
            assert_eq!(client.server().name, format!("{}-box", kind));
        }
    }

    #[test]
    fn test_type_tag_is_case_insensitive() {
        let config = ServerConfig::new("qb", "qBittorrent", "http://127.0.0.1:9");
        assert_eq!(create_client(config).unwrap().kind(), ClientKind::QBittorrent);
    }

    #[test]
    fn test_unknown_type_fails_immediately() {
        let config = ServerConfig::new("x", "deluge", "http://127.0.0.1:9");
        assert!(matches!(create_client(config), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_bad_url_is_config_error() {
        let empty = ServerConfig::new("x", "aria2", "");
        assert!(matches!(create_client(empty), Err(ClientError::Config(_))));

        let garbage = ServerConfig::new("x", "aria2", "::not a url::");
        assert!(matches!(create_client(garbage), Err(ClientError::Config(_))));
    }
}
