// In-process stand-ins for remote backends, used by the adapter tests

use crate::clients::client::{AddOptions, ClientKind, TorrentClient};
use crate::core::config::Config;
use crate::core::error::ClientError;
use crate::models::server::ServerConfig;
use crate::models::task::{Task, TaskStatus};
use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_mock(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock listener");
    let addr = listener.local_addr().expect("Mock listener has no address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Mock server failed");
    });

    format!("http://{}", addr)
}

/// Shared log of what a mock backend received
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// In-memory adapter whose single task gains 10% progress per poll
pub struct FakeClient {
    server: ServerConfig,
    polls: AtomicU32,
    fail: bool,
}

impl FakeClient {
    pub fn new(name: &str, fail: bool) -> Self {
        Self {
            server: ServerConfig::new(name, "qbittorrent", "http://127.0.0.1:9"),
            polls: AtomicU32::new(0),
            fail,
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.server.url = url.to_string();
        self
    }
}

#[async_trait]
impl TorrentClient for FakeClient {
    fn kind(&self) -> ClientKind {
        ClientKind::QBittorrent
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn login(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        Ok("fake".to_string())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        if self.fail {
            return Err(ClientError::Auth("nope".to_string()));
        }
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Task::new("a", "a", TaskStatus::Downloading).with_progress(n as f64 * 10.0)])
    }

    async fn add_by_url(&self, _url: &str, _options: &AddOptions) -> Result<(), ClientError> {
        Ok(())
    }

    async fn add_by_file(&self, _torrent: &[u8], _options: &AddOptions) -> Result<(), ClientError> {
        Ok(())
    }

    async fn pause(&self, _id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn resume(&self, _id: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn remove(&self, _id: &str, _delete_data: bool) -> Result<(), ClientError> {
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config::from_toml("[server]\nport = 8090\n[vault]\npath = \"store.json\"\n").unwrap()
}
