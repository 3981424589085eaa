use crate::clients::client::{http_client, unique_sorted, AddOptions, ClientKind, TorrentClient};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{non_empty, Task, TaskStatus};
use crate::transport::http::{FormPart, HttpClient, HttpResponse, RequestConfig, TransportSettings};
use crate::transport::retry::Retry;
use crate::utils::time::current_timestamp_millis;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::debug;

// Column positions in a `list=1` torrent row
const COL_HASH: usize = 0;
const COL_STATUS: usize = 1;
const COL_NAME: usize = 2;
const COL_SIZE: usize = 3;
const COL_PROGRESS: usize = 4;
const COL_UP_SPEED: usize = 8;
const COL_DOWN_SPEED: usize = 9;
const COL_ETA: usize = 10;
const COL_LABEL: usize = 11;
const COL_ADDED_ON: usize = 23;
const COL_SAVE_PATH: usize = 26;

// Status bitfield
const STARTED: i64 = 1;
const CHECKING: i64 = 2;
const ERROR: i64 = 16;
const PAUSED: i64 = 32;
const QUEUED: i64 = 64;

/// Progress is reported in per-mille
const PROGRESS_DONE: i64 = 1000;

#[derive(Debug, Clone)]
struct Session {
    token: String,
    guid: Option<String>,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<div[^>]*id=['"]token['"][^>]*>([^<]+)</div>"#).expect("token pattern is valid")
    })
}

/// Pull the CSRF token out of `token.html`
pub fn scrape_token(html: &str) -> Option<String> {
    token_pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// uTorrent / BitTorrent WebUI (`/gui/`)
pub struct UTorrentClient {
    server: ServerConfig,
    http: HttpClient,
    session: RwLock<Option<Session>>,
}

impl UTorrentClient {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let mut http = http_client(&server, settings)?;
        if server.http_auth.is_none() {
            http = http.with_basic_auth(server.username(), server.password());
        }
        Ok(Self {
            server,
            http,
            session: RwLock::new(None),
        })
    }

    async fn session(&self) -> Result<Session, ClientError> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.login().await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::Auth("uTorrent session was not established".to_string()))
    }

    fn prepare(session: &Session, params: &[(&str, &str)], upload: Option<&[FormPart]>) -> RequestConfig {
        let mut config = RequestConfig::new()
            .query("token", session.token.as_str())
            .query("t", current_timestamp_millis().to_string());
        for (name, value) in params {
            config = config.query(name, *value);
        }
        if let Some(guid) = &session.guid {
            config = config.header("Cookie", format!("GUID={}", guid));
        }
        if let Some(parts) = upload {
            config = config.multipart(parts.to_vec());
        }
        config
    }

    async fn send(
        &self,
        session: &Session,
        params: &[(&str, &str)],
        upload: Option<&[FormPart]>,
    ) -> Result<HttpResponse, TransportError> {
        let config = Self::prepare(session, params, upload);
        if upload.is_some() {
            self.http.post("/gui/", config).await
        } else {
            self.http.get("/gui/", config).await
        }
    }

    /// A 400/401 means the token went stale: log in again and retry exactly once
    async fn call(&self, params: &[(&str, &str)], upload: Option<&[FormPart]>) -> Result<Value, ClientError> {
        let session = self.session().await?;
        let response = match self.send(&session, params, upload).await {
            Err(TransportError::Http(e)) if e.status == 400 || e.status == 401 => {
                debug!(server = %self.server.name, status = e.status, "uTorrent token rejected, logging in again");
                *self.session.write().await = None;
                let session = self.session().await?;
                self.send(&session, params, upload).await?
            }
            other => other?,
        };

        let value = response
            .body
            .into_json()
            .ok_or_else(|| ClientError::Validation("uTorrent did not return JSON".to_string()))?;
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(ClientError::Fault {
                code: 0,
                message: error.to_string(),
            });
        }
        Ok(value)
    }

    async fn action(&self, action: &str, id: &str) -> Result<(), ClientError> {
        self.call(&[("action", action), ("hash", id)], None).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Value, ClientError> {
        self.call(&[("list", "1")], None).await
    }
}

pub fn map_status(status: i64, progress_per_mille: i64) -> TaskStatus {
    let done = progress_per_mille >= PROGRESS_DONE;

    if status & ERROR != 0 {
        TaskStatus::Error
    } else if status & CHECKING != 0 {
        TaskStatus::Checking
    } else if status & PAUSED != 0 {
        TaskStatus::Paused
    } else if status & STARTED != 0 {
        if done {
            TaskStatus::Seeding
        } else {
            TaskStatus::Downloading
        }
    } else if status & QUEUED != 0 {
        TaskStatus::Queued
    } else if status == 0 {
        TaskStatus::Unknown
    } else if done {
        TaskStatus::Completed
    } else {
        TaskStatus::Paused
    }
}

fn cell_i64(row: &[Value], index: usize) -> i64 {
    row.get(index).and_then(Value::as_i64).unwrap_or(0)
}

fn cell_str(row: &[Value], index: usize) -> String {
    row.get(index).and_then(Value::as_str).unwrap_or("").to_string()
}

fn to_task(row: &Value) -> Result<Task, ClientError> {
    let row = row
        .as_array()
        .ok_or_else(|| ClientError::Validation("Torrent row is not an array".to_string()))?;
    if row.len() <= COL_LABEL {
        return Err(ClientError::Validation(format!("Torrent row has only {} columns", row.len())));
    }

    let per_mille = cell_i64(row, COL_PROGRESS);
    let status = map_status(cell_i64(row, COL_STATUS), per_mille);

    let mut task =
        Task::new(cell_str(row, COL_HASH), cell_str(row, COL_NAME), status).with_progress(per_mille as f64 / 10.0);
    task.size = cell_i64(row, COL_SIZE).max(0) as u64;
    task.upload_speed = cell_i64(row, COL_UP_SPEED).max(0) as u64;
    task.download_speed = cell_i64(row, COL_DOWN_SPEED).max(0) as u64;
    task.eta = cell_i64(row, COL_ETA).max(-1);
    task.category = non_empty(&cell_str(row, COL_LABEL));
    task.added_date = cell_i64(row, COL_ADDED_ON).max(0) * 1000;
    task.save_path = cell_str(row, COL_SAVE_PATH);
    Ok(task)
}

#[async_trait]
impl TorrentClient for UTorrentClient {
    fn kind(&self) -> ClientKind {
        ClientKind::UTorrent
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn login(&self) -> Result<(), ClientError> {
        let config = RequestConfig::new()
            .query("t", current_timestamp_millis().to_string())
            .retry(Retry::Disabled);
        let response = match self.http.get("/gui/token.html", config).await {
            Err(TransportError::Http(e)) if e.status == 401 => {
                return Err(ClientError::Auth("Invalid username or password".to_string()));
            }
            other => other?,
        };

        let token = scrape_token(&response.body.text())
            .ok_or_else(|| ClientError::Validation("token.html carried no token".to_string()))?;
        *self.session.write().await = Some(Session {
            token,
            guid: response.cookie("GUID"),
        });
        debug!(server = %self.server.name, "Logged in to uTorrent");
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        *self.session.write().await = None;
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let value = self.call(&[("action", "getsettings")], None).await?;
        value
            .get("build")
            .and_then(Value::as_i64)
            .map(|build| format!("build {}", build))
            .ok_or_else(|| ClientError::Validation("getsettings returned no build".to_string()))
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        let value = self.list().await?;
        let rows = value
            .get("torrents")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Validation("list=1 returned no torrents".to_string()))?;
        rows.iter().map(to_task).collect()
    }

    /// The WebUI add call takes no path, label or paused flag
    async fn add_by_url(&self, url: &str, _options: &AddOptions) -> Result<(), ClientError> {
        self.call(&[("action", "add-url"), ("s", url)], None).await?;
        Ok(())
    }

    async fn add_by_file(&self, torrent: &[u8], _options: &AddOptions) -> Result<(), ClientError> {
        let parts = [FormPart::File {
            name: "torrent_file".to_string(),
            filename: "upload.torrent".to_string(),
            mime: "application/x-bittorrent".to_string(),
            bytes: torrent.to_vec(),
        }];
        self.call(&[("action", "add-file")], Some(&parts)).await?;
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.action("pause", id).await
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.action("start", id).await
    }

    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError> {
        self.action(if delete_data { "removedata" } else { "remove" }, id).await
    }

    async fn get_categories(&self) -> Result<Vec<String>, ClientError> {
        let value = self.list().await?;
        let labels = value
            .get("label")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get(0).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(unique_sorted(labels))
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<(), ClientError> {
        self.call(
            &[("action", "setprops"), ("hash", id), ("s", "label"), ("v", category)],
            None,
        )
        .await?;
        Ok(())
    }
}
