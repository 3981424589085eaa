use crate::clients::client::{http_client, unique_sorted, AddOptions, ClientKind, TorrentClient};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{non_empty, split_tags, Task, TaskStatus};
use crate::transport::http::{FormPart, HttpClient, HttpResponse, RequestConfig, TransportSettings};
use crate::transport::retry::Retry;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// qBittorrent's "no estimate" ETA
const INFINITE_ETA: i64 = 8_640_000;

/// Logged-in state; `sid` stays empty when the WebUI bypasses auth
#[derive(Debug, Clone)]
struct Session {
    sid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QbTorrent {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    size: i64,
    dlspeed: u64,
    upspeed: u64,
    eta: i64,
    save_path: String,
    added_on: i64,
    category: String,
    tags: String,
}

/// qBittorrent WebUI API v2
pub struct QBittorrentClient {
    server: ServerConfig,
    http: HttpClient,
    session: RwLock<Option<Session>>,
}

impl QBittorrentClient {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let http = http_client(&server, settings)?;
        Ok(Self {
            server,
            http,
            session: RwLock::new(None),
        })
    }

    async fn authorize(&self, config: RequestConfig) -> Result<RequestConfig, ClientError> {
        if self.session.read().await.is_none() {
            self.login().await?;
        }

        let mut config = config.header("Referer", self.http.base_url());
        if let Some(Session { sid: Some(sid) }) = self.session.read().await.as_ref() {
            config = config.header("Cookie", format!("SID={}", sid));
        }
        Ok(config)
    }

    /// Authenticated call; a 403 means the session expired and is renewed once
    async fn call(&self, method: Method, path: &str, config: RequestConfig) -> Result<HttpResponse, ClientError> {
        let request = self.authorize(config.clone()).await?;
        match self.http.request(method.clone(), path, request).await {
            Err(TransportError::Http(e)) if e.status == 403 => {
                debug!(server = %self.server.name, "qBittorrent session rejected, logging in again");
                *self.session.write().await = None;
                let request = self.authorize(config).await?;
                Ok(self.http.request(method, path, request).await?)
            }
            other => Ok(other?),
        }
    }

    async fn post_form(&self, path: &str, form: Vec<(String, String)>) -> Result<HttpResponse, ClientError> {
        self.call(Method::POST, path, RequestConfig::new().form(form)).await
    }

    /// v5 renamed pause/resume to stop/start; older servers answer 404
    async fn post_with_fallback(&self, path: &str, legacy_path: &str, id: &str) -> Result<(), ClientError> {
        match self.post_form(path, hashes(id)).await {
            Err(e) if e.status() == Some(404) => {
                debug!(server = %self.server.name, path = legacy_path, "Falling back to v4 endpoint");
                self.post_form(legacy_path, hashes(id)).await.map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

fn hashes(id: &str) -> Vec<(String, String)> {
    vec![("hashes".to_string(), id.to_string())]
}

fn add_fields(options: &AddOptions) -> Vec<(String, String)> {
    let paused = options.paused.to_string();
    let mut fields = vec![
        ("paused".to_string(), paused.clone()),
        ("stopped".to_string(), paused),
    ];
    if let Some(path) = &options.save_path {
        fields.push(("savepath".to_string(), path.clone()));
    }
    if let Some(label) = &options.label {
        fields.push(("category".to_string(), label.clone()));
    }
    if let Some(sequential) = options.sequential {
        fields.push(("sequentialDownload".to_string(), sequential.to_string()));
    }
    if let Some(first_last) = options.first_last_piece {
        fields.push(("firstLastPiecePrio".to_string(), first_last.to_string()));
    }
    fields
}

fn check_added(response: HttpResponse) -> Result<(), ClientError> {
    if response.body.text().trim() == "Fails." {
        return Err(ClientError::Validation("qBittorrent rejected the torrent".to_string()));
    }
    Ok(())
}

pub fn map_state(state: &str) -> TaskStatus {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "stalledDL" | "allocating" => {
            TaskStatus::Downloading
        }
        "uploading" | "forcedUP" | "stalledUP" => TaskStatus::Seeding,
        "pausedDL" | "stoppedDL" => TaskStatus::Paused,
        "pausedUP" | "stoppedUP" => TaskStatus::Completed,
        "queuedDL" | "queuedUP" => TaskStatus::Queued,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => TaskStatus::Checking,
        "error" | "missingFiles" => TaskStatus::Error,
        _ => TaskStatus::Unknown,
    }
}

fn to_task(raw: QbTorrent) -> Task {
    let mut task = Task::new(raw.hash, raw.name, map_state(&raw.state)).with_fraction(raw.progress);
    task.size = raw.size.max(0) as u64;
    task.download_speed = raw.dlspeed;
    task.upload_speed = raw.upspeed;
    task.eta = if raw.eta < 0 || raw.eta >= INFINITE_ETA { -1 } else { raw.eta };
    task.save_path = raw.save_path;
    task.added_date = raw.added_on.max(0) * 1000;
    task.category = non_empty(&raw.category);
    task.tags = split_tags(&raw.tags);
    task
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn kind(&self) -> ClientKind {
        ClientKind::QBittorrent
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn login(&self) -> Result<(), ClientError> {
        let form = vec![
            ("username".to_string(), self.server.username().to_string()),
            ("password".to_string(), self.server.password().to_string()),
        ];
        let config = RequestConfig::new()
            .header("Referer", self.http.base_url())
            .form(form)
            .retry(Retry::Disabled);

        let response = match self.http.post("/api/v2/auth/login", config).await {
            Err(TransportError::Http(e)) if e.status == 403 => {
                return Err(ClientError::Auth(
                    "qBittorrent banned this address after too many failed logins".to_string(),
                ));
            }
            other => other?,
        };

        if response.body.text().trim() == "Fails." {
            return Err(ClientError::Auth("Invalid username or password".to_string()));
        }

        *self.session.write().await = Some(Session {
            sid: response.cookie("SID"),
        });
        debug!(server = %self.server.name, "Logged in to qBittorrent");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        let mut config = RequestConfig::new()
            .header("Referer", self.http.base_url())
            .retry(Retry::Disabled);
        if let Some(sid) = session.sid {
            config = config.header("Cookie", format!("SID={}", sid));
        }
        if let Err(e) = self.http.post("/api/v2/auth/logout", config).await {
            debug!(server = %self.server.name, error = %e, "qBittorrent logout failed");
        }
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let response = self.call(Method::GET, "/api/v2/app/version", RequestConfig::new()).await?;
        Ok(response.body.text().trim().to_string())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        let response = self.call(Method::GET, "/api/v2/torrents/info", RequestConfig::new()).await?;
        let value = response
            .body
            .into_json()
            .ok_or_else(|| ClientError::Validation("torrents/info did not return JSON".to_string()))?;

        let torrents: Vec<QbTorrent> = serde_json::from_value(value)
            .map_err(|e| ClientError::Validation(format!("Malformed torrent list: {}", e)))?;

        Ok(torrents.into_iter().map(to_task).collect())
    }

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError> {
        let mut form = vec![("urls".to_string(), url.to_string())];
        form.extend(add_fields(&options.with_defaults(&self.server)));

        let response = self.post_form("/api/v2/torrents/add", form).await?;
        check_added(response)
    }

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError> {
        let mut parts = vec![FormPart::File {
            name: "torrents".to_string(),
            filename: "upload.torrent".to_string(),
            mime: "application/x-bittorrent".to_string(),
            bytes: torrent.to_vec(),
        }];
        parts.extend(
            add_fields(&options.with_defaults(&self.server))
                .into_iter()
                .map(|(name, value)| FormPart::Text { name, value }),
        );

        let response = self
            .call(Method::POST, "/api/v2/torrents/add", RequestConfig::new().multipart(parts))
            .await?;
        check_added(response)
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.post_with_fallback("/api/v2/torrents/stop", "/api/v2/torrents/pause", id)
            .await
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.post_with_fallback("/api/v2/torrents/start", "/api/v2/torrents/resume", id)
            .await
    }

    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError> {
        let mut form = hashes(id);
        form.push(("deleteFiles".to_string(), delete_data.to_string()));
        self.post_form("/api/v2/torrents/delete", form).await?;
        Ok(())
    }

    async fn get_categories(&self) -> Result<Vec<String>, ClientError> {
        let response = self
            .call(Method::GET, "/api/v2/torrents/categories", RequestConfig::new())
            .await?;
        match response.body.into_json() {
            Some(Value::Object(map)) => Ok(unique_sorted(map.into_iter().map(|(name, _)| name))),
            _ => Err(ClientError::Validation("Expected a category map".to_string())),
        }
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<(), ClientError> {
        let mut form = hashes(id);
        form.push(("category".to_string(), category.to_string()));
        self.post_form("/api/v2/torrents/setCategory", form).await?;
        Ok(())
    }

    async fn get_tags(&self) -> Result<Vec<String>, ClientError> {
        let response = self.call(Method::GET, "/api/v2/torrents/tags", RequestConfig::new()).await?;
        let value = response
            .body
            .into_json()
            .ok_or_else(|| ClientError::Validation("Expected a tag list".to_string()))?;
        let tags: Vec<String> =
            serde_json::from_value(value).map_err(|e| ClientError::Validation(format!("Malformed tag list: {}", e)))?;
        Ok(unique_sorted(tags))
    }

    async fn add_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut form = hashes(id);
        form.push(("tags".to_string(), tags.join(",")));
        self.post_form("/api/v2/torrents/addTags", form).await?;
        Ok(())
    }

    async fn remove_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut form = hashes(id);
        form.push(("tags".to_string(), tags.join(",")));
        self.post_form("/api/v2/torrents/removeTags", form).await?;
        Ok(())
    }
}
