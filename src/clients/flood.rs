use crate::clients::client::{http_client, unique_sorted, AddOptions, ClientKind, TorrentClient};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{Task, TaskStatus};
use crate::transport::http::{HttpClient, HttpResponse, RequestConfig, TransportSettings};
use crate::transport::retry::Retry;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FloodTorrent {
    hash: String,
    name: String,
    status: Vec<String>,
    percent_complete: f64,
    size_bytes: u64,
    down_rate: u64,
    up_rate: u64,
    eta: i64,
    directory: String,
    date_added: i64,
    tags: Vec<String>,
}

/// Flood web UI, fronting rTorrent, Transmission or qBittorrent
pub struct FloodClient {
    server: ServerConfig,
    http: HttpClient,
    jwt: RwLock<Option<String>>,
}

impl FloodClient {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let http = http_client(&server, settings)?;
        Ok(Self {
            server,
            http,
            jwt: RwLock::new(None),
        })
    }

    async fn authorize(&self, config: RequestConfig) -> Result<RequestConfig, ClientError> {
        if self.jwt.read().await.is_none() {
            self.login().await?;
        }
        Ok(match self.jwt.read().await.as_deref() {
            Some(jwt) => config.header("Cookie", format!("jwt={}", jwt)),
            None => config,
        })
    }

    /// Authenticated call; an expired token is renewed once on 401
    async fn call(&self, method: Method, path: &str, config: RequestConfig) -> Result<HttpResponse, ClientError> {
        let request = self.authorize(config.clone()).await?;
        match self.http.request(method.clone(), path, request).await {
            Err(TransportError::Http(e)) if e.status == 401 => {
                debug!(server = %self.server.name, "Flood token rejected, logging in again");
                *self.jwt.write().await = None;
                let request = self.authorize(config).await?;
                Ok(self.http.request(method, path, request).await?)
            }
            other => Ok(other?),
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<HttpResponse, ClientError> {
        self.call(Method::POST, path, RequestConfig::new().json(body)).await
    }

    async fn list(&self) -> Result<Vec<FloodTorrent>, ClientError> {
        let response = self.call(Method::GET, "/api/torrents", RequestConfig::new()).await?;
        let value = response
            .body
            .into_json()
            .ok_or_else(|| ClientError::Validation("/api/torrents did not return JSON".to_string()))?;
        parse_torrent_list(value)
    }

    async fn set_tags(&self, id: &str, tags: Vec<String>) -> Result<(), ClientError> {
        self.call(
            Method::PATCH,
            "/api/torrents/tags",
            RequestConfig::new().json(json!({ "hashes": [id], "tags": tags })),
        )
        .await?;
        Ok(())
    }

    async fn task_tags(&self, id: &str) -> Result<Vec<String>, ClientError> {
        self.list()
            .await?
            .into_iter()
            .find(|t| t.hash == id)
            .map(|t| t.tags)
            .ok_or_else(|| ClientError::Validation(format!("Unknown torrent: {}", id)))
    }
}

/// Accept `{torrents: {hash: {...}}}`, `{torrents: [...]}` or a bare array
fn parse_torrent_list(value: Value) -> Result<Vec<FloodTorrent>, ClientError> {
    let list = match value {
        Value::Object(mut root) => root.remove("torrents").unwrap_or(Value::Null),
        other => other,
    };

    let entries: Vec<Value> = match list {
        Value::Object(map) => map
            .into_iter()
            .map(|(hash, entry)| with_hash(hash, entry))
            .collect(),
        Value::Array(items) => items,
        _ => return Err(ClientError::Validation("Expected a torrent map or array".to_string())),
    };

    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value(entry).map_err(|e| ClientError::Validation(format!("Malformed torrent: {}", e)))
        })
        .collect()
}

/// Map entries are keyed by hash and may omit it from the body
fn with_hash(hash: String, entry: Value) -> Value {
    match entry {
        Value::Object(mut fields) => {
            fields.entry("hash").or_insert(Value::String(hash));
            Value::Object(fields)
        }
        _ => {
            let mut fields = Map::new();
            fields.insert("hash".to_string(), Value::String(hash));
            Value::Object(fields)
        }
    }
}

/// Collapse Flood's state keywords to one status
pub fn map_status(states: &[String]) -> TaskStatus {
    let has = |keyword: &str| states.iter().any(|s| s == keyword);

    if has("error") {
        TaskStatus::Error
    } else if has("downloading") {
        TaskStatus::Downloading
    } else if has("seeding") {
        TaskStatus::Seeding
    } else if has("stopped") || has("paused") {
        TaskStatus::Paused
    } else if has("checking") {
        TaskStatus::Checking
    } else if has("complete") {
        TaskStatus::Completed
    } else {
        TaskStatus::Unknown
    }
}

fn to_task(raw: FloodTorrent) -> Task {
    let mut task = Task::new(raw.hash, raw.name, map_status(&raw.status)).with_progress(raw.percent_complete);
    task.size = raw.size_bytes;
    task.download_speed = raw.down_rate;
    task.upload_speed = raw.up_rate;
    task.eta = raw.eta.max(-1);
    task.save_path = raw.directory;
    task.added_date = raw.date_added.max(0) * 1000;
    task.tags = raw.tags;
    task
}

fn add_body(options: &AddOptions) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("start".to_string(), Value::Bool(!options.paused));
    if let Some(path) = &options.save_path {
        body.insert("destination".to_string(), Value::String(path.clone()));
    }
    if let Some(label) = &options.label {
        body.insert("tags".to_string(), json!([label]));
    }
    if let Some(sequential) = options.sequential {
        body.insert("isSequential".to_string(), Value::Bool(sequential));
    }
    body
}

#[async_trait]
impl TorrentClient for FloodClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Flood
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn login(&self) -> Result<(), ClientError> {
        let config = RequestConfig::new()
            .json(json!({
                "username": self.server.username(),
                "password": self.server.password(),
            }))
            .retry(Retry::Disabled);

        let response = match self.http.post("/api/auth/authenticate", config).await {
            Err(TransportError::Http(e)) if e.status == 401 || e.status == 422 => {
                return Err(ClientError::Auth("Invalid username or password".to_string()));
            }
            other => other?,
        };

        let jwt = response
            .cookie("jwt")
            .ok_or_else(|| ClientError::Auth("Flood did not issue a session token".to_string()))?;
        *self.jwt.write().await = Some(jwt);
        debug!(server = %self.server.name, "Logged in to Flood");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let Some(jwt) = self.jwt.write().await.take() else {
            return Ok(());
        };
        let config = RequestConfig::new()
            .header("Cookie", format!("jwt={}", jwt))
            .retry(Retry::Disabled);
        if let Err(e) = self.http.get("/api/auth/logout", config).await {
            debug!(server = %self.server.name, error = %e, "Flood logout failed");
        }
        Ok(())
    }

    /// Flood exposes no version endpoint; a live backend connection stands in
    async fn version(&self) -> Result<String, ClientError> {
        let response = self
            .call(Method::GET, "/api/client/connection-test", RequestConfig::new())
            .await?;
        let connected = response
            .body
            .as_json()
            .and_then(|v| v.get("isConnected"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !connected {
            return Err(ClientError::Validation("Flood is not connected to its backend".to_string()));
        }
        Ok("flood".to_string())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        Ok(self.list().await?.into_iter().map(to_task).collect())
    }

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError> {
        let mut body = add_body(&options.with_defaults(&self.server));
        body.insert("urls".to_string(), json!([url]));
        self.post_json("/api/torrents/add-urls", Value::Object(body)).await?;
        Ok(())
    }

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(torrent);
        let mut body = add_body(&options.with_defaults(&self.server));
        body.insert("files".to_string(), json!([encoded]));
        self.post_json("/api/torrents/add-files", Value::Object(body)).await?;
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.post_json("/api/torrents/stop", json!({ "hashes": [id] })).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.post_json("/api/torrents/start", json!({ "hashes": [id] })).await?;
        Ok(())
    }

    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError> {
        self.post_json(
            "/api/torrents/delete",
            json!({ "hashes": [id], "deleteData": delete_data }),
        )
        .await?;
        Ok(())
    }

    async fn get_tags(&self) -> Result<Vec<String>, ClientError> {
        let torrents = self.list().await?;
        Ok(unique_sorted(torrents.into_iter().flat_map(|t| t.tags)))
    }

    async fn add_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        let mut current = self.task_tags(id).await?;
        current.extend(tags.iter().cloned());
        self.set_tags(id, unique_sorted(current)).await
    }

    async fn remove_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        let current = self.task_tags(id).await?;
        let kept = current.into_iter().filter(|t| !tags.contains(t));
        self.set_tags(id, unique_sorted(kept)).await
    }
}
