use crate::clients::client::{http_client, unique_sorted, AddOptions, ClientKind, TorrentClient};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{Task, TaskStatus};
use crate::transport::http::{HttpClient, RequestConfig, TransportSettings};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const DEFAULT_RPC_PATH: &str = "/transmission/rpc";

const TORRENT_FIELDS: [&str; 12] = [
    "hashString",
    "name",
    "status",
    "error",
    "percentDone",
    "totalSize",
    "rateDownload",
    "rateUpload",
    "eta",
    "downloadDir",
    "addedDate",
    "labels",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RpcTorrent {
    hash_string: String,
    name: String,
    status: i64,
    error: i64,
    percent_done: f64,
    total_size: u64,
    rate_download: u64,
    rate_upload: u64,
    eta: i64,
    download_dir: String,
    added_date: i64,
    labels: Vec<String>,
}

/// Transmission RPC; credentials travel as HTTP basic auth
pub struct TransmissionClient {
    server: ServerConfig,
    http: HttpClient,
    rpc_path: String,
    session_id: RwLock<Option<String>>,
}

impl TransmissionClient {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let mut http = http_client(&server, settings)?;
        if server.http_auth.is_none() && !server.username().is_empty() {
            http = http.with_basic_auth(server.username(), server.password());
        }
        let rpc_path = server.option_str("rpc_path").unwrap_or(DEFAULT_RPC_PATH).to_string();

        Ok(Self {
            server,
            http,
            rpc_path,
            session_id: RwLock::new(None),
        })
    }

    async fn send(&self, body: &Value) -> Result<Value, TransportError> {
        let mut config = RequestConfig::new().json(body.clone());
        if let Some(id) = self.session_id.read().await.as_deref() {
            config = config.header(SESSION_HEADER, id);
        }
        let response = self.http.post(&self.rpc_path, config).await?;
        Ok(response.body.into_json().unwrap_or(Value::Null))
    }

    /// One RPC call; a 409 hands out a fresh session id and the call is repeated once
    async fn rpc(&self, method: &str, arguments: Value) -> Result<Value, ClientError> {
        let body = json!({ "method": method, "arguments": arguments });

        let reply = match self.send(&body).await {
            Err(TransportError::Http(e)) if e.status == 409 => {
                let id = e
                    .headers
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| ClientError::Validation("409 without a session id".to_string()))?;
                debug!(server = %self.server.name, "Transmission session id refreshed");
                *self.session_id.write().await = Some(id);
                self.send(&body).await
            }
            other => other,
        };

        let reply = match reply {
            Err(TransportError::Http(e)) if e.status == 401 => {
                return Err(ClientError::Auth("Invalid username or password".to_string()));
            }
            other => other?,
        };

        if !reply.is_object() {
            return Err(ClientError::Validation("Transmission reply is not a JSON object".to_string()));
        }
        let Some(result) = reply.get("result").and_then(Value::as_str) else {
            return Err(ClientError::Validation("Transmission reply has no result".to_string()));
        };
        if result != "success" {
            return Err(ClientError::Fault {
                code: 0,
                message: result.to_string(),
            });
        }
        Ok(reply.get("arguments").cloned().unwrap_or(Value::Object(Map::new())))
    }

    async fn torrents(&self, ids: Option<&str>) -> Result<Vec<RpcTorrent>, ClientError> {
        let mut arguments = json!({ "fields": TORRENT_FIELDS });
        if let Some(id) = ids {
            arguments["ids"] = json!([id]);
        }
        let mut reply = self.rpc("torrent-get", arguments).await?;
        let list = reply.get_mut("torrents").map(Value::take).unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(list).map_err(|e| ClientError::Validation(format!("Malformed torrent list: {}", e)))
    }

    async fn set_labels(&self, id: &str, labels: Vec<String>) -> Result<(), ClientError> {
        self.rpc("torrent-set", json!({ "ids": [id], "labels": labels })).await?;
        Ok(())
    }

    async fn labels_of(&self, id: &str) -> Result<Vec<String>, ClientError> {
        self.torrents(Some(id))
            .await?
            .into_iter()
            .next()
            .map(|t| t.labels)
            .ok_or_else(|| ClientError::Validation(format!("Unknown torrent: {}", id)))
    }

    async fn add(&self, mut arguments: Map<String, Value>, options: &AddOptions) -> Result<(), ClientError> {
        let options = options.with_defaults(&self.server);
        arguments.insert("paused".to_string(), Value::Bool(options.paused));
        if let Some(path) = options.save_path {
            arguments.insert("download-dir".to_string(), Value::String(path));
        }
        if let Some(label) = options.label {
            arguments.insert("labels".to_string(), json!([label]));
        }

        let reply = self.rpc("torrent-add", Value::Object(arguments)).await?;
        if reply.get("torrent-added").is_none() && reply.get("torrent-duplicate").is_none() {
            return Err(ClientError::Validation("torrent-add returned no torrent".to_string()));
        }
        Ok(())
    }
}

/// Numeric status 0-6, with any error flag taking precedence
pub fn map_status(status: i64, error: i64, percent_done: f64) -> TaskStatus {
    if error != 0 {
        return TaskStatus::Error;
    }
    match status {
        0 if percent_done >= 1.0 => TaskStatus::Completed,
        0 => TaskStatus::Paused,
        1 | 2 => TaskStatus::Checking,
        3 | 5 => TaskStatus::Queued,
        4 => TaskStatus::Downloading,
        6 => TaskStatus::Seeding,
        _ => TaskStatus::Unknown,
    }
}

fn to_task(raw: RpcTorrent) -> Task {
    let status = map_status(raw.status, raw.error, raw.percent_done);
    let mut task = Task::new(raw.hash_string, raw.name, status).with_fraction(raw.percent_done);
    task.size = raw.total_size;
    task.download_speed = raw.rate_download;
    task.upload_speed = raw.rate_upload;
    task.eta = raw.eta.max(-1);
    task.save_path = raw.download_dir;
    task.added_date = raw.added_date.max(0) * 1000;
    task.tags = raw.labels;
    task
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn kind(&self) -> ClientKind {
        ClientKind::Transmission
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Transmission has no login call; a session handshake checks the credentials
    async fn login(&self) -> Result<(), ClientError> {
        self.rpc("session-get", json!({ "fields": ["version"] })).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        *self.session_id.write().await = None;
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let reply = self.rpc("session-get", json!({ "fields": ["version"] })).await?;
        reply
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Validation("session-get returned no version".to_string()))
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        Ok(self.torrents(None).await?.into_iter().map(to_task).collect())
    }

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError> {
        let mut arguments = Map::new();
        arguments.insert("filename".to_string(), Value::String(url.to_string()));
        self.add(arguments, options).await
    }

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError> {
        let mut arguments = Map::new();
        arguments.insert(
            "metainfo".to_string(),
            Value::String(base64::engine::general_purpose::STANDARD.encode(torrent)),
        );
        self.add(arguments, options).await
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.rpc("torrent-stop", json!({ "ids": [id] })).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.rpc("torrent-start", json!({ "ids": [id] })).await?;
        Ok(())
    }

    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError> {
        self.rpc(
            "torrent-remove",
            json!({ "ids": [id], "delete-local-data": delete_data }),
        )
        .await?;
        Ok(())
    }

    async fn get_tags(&self) -> Result<Vec<String>, ClientError> {
        let torrents = self.torrents(None).await?;
        Ok(unique_sorted(torrents.into_iter().flat_map(|t| t.labels)))
    }

    async fn add_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        let mut labels = self.labels_of(id).await?;
        labels.extend(tags.iter().cloned());
        self.set_labels(id, unique_sorted(labels)).await
    }

    async fn remove_tags(&self, id: &str, tags: &[String]) -> Result<(), ClientError> {
        let labels = self.labels_of(id).await?;
        self.set_labels(id, unique_sorted(labels.into_iter().filter(|l| !tags.contains(l))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock_server::{spawn_mock, Calls};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::time::Duration;

    fn client(base: &str) -> TransmissionClient {
        let server = ServerConfig::new("tr", "transmission", base).with_credentials("admin", "secret");
        let settings = TransportSettings {
            timeout: Duration::from_secs(5),
            retry: None,
        };
        TransmissionClient::new(server, &settings).unwrap()
    }

    /// Demands the session id handshake, then answers from `reply`
    fn rpc_router(calls: Calls, reply: fn(&Value) -> Value) -> Router {
        Router::new().route(
            "/transmission/rpc",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let calls = calls.clone();
                async move {
                    if headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) != Some("sess-1") {
                        calls.push("409");
                        return (StatusCode::CONFLICT, [(SESSION_HEADER, "sess-1")], "").into_response();
                    }
                    calls.push(body["method"].as_str().unwrap_or("").to_string());
                    Json(reply(&body)).into_response()
                }
            }),
        )
    }

    fn list_reply(body: &Value) -> Value {
        match body["method"].as_str() {
            Some("torrent-get") => json!({
                "result": "success",
                "arguments": { "torrents": [
                    { "hashString": "h1", "name": "a", "status": 4, "error": 0, "percentDone": 0.5,
                      "eta": -2, "addedDate": 1700000000, "labels": ["tv"] },
                    { "hashString": "h2", "name": "b", "status": 6, "error": 3, "percentDone": 1.0 }
                ]}
            }),
            Some("session-get") => json!({ "result": "success", "arguments": { "version": "4.0.5" } }),
            _ => json!({ "result": "no such method" }),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(0, 0, 0.3), TaskStatus::Paused);
        assert_eq!(map_status(0, 0, 1.0), TaskStatus::Completed);
        assert_eq!(map_status(2, 0, 0.3), TaskStatus::Checking);
        assert_eq!(map_status(3, 0, 0.3), TaskStatus::Queued);
        assert_eq!(map_status(4, 0, 0.3), TaskStatus::Downloading);
        assert_eq!(map_status(6, 0, 1.0), TaskStatus::Seeding);
        assert_eq!(map_status(6, 2, 1.0), TaskStatus::Error);
        assert_eq!(map_status(9, 0, 0.0), TaskStatus::Unknown);
    }

    #[tokio::test]
    async fn test_session_id_handshake() {
        let calls = Calls::new();
        let base = spawn_mock(rpc_router(calls.clone(), list_reply)).await;
        let tr = client(&base);

        let tasks = tr.get_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].status, TaskStatus::Downloading);
        assert_eq!(tasks[0].progress, 50.0);
        assert_eq!(tasks[0].eta, -1);
        assert_eq!(tasks[0].tags, vec!["tv"]);
        assert_eq!(tasks[1].status, TaskStatus::Error);

        assert_eq!(tr.version().await.unwrap(), "4.0.5");
        assert_eq!(calls.all(), vec!["409", "torrent-get", "session-get"]);
    }

    #[tokio::test]
    async fn test_non_success_result_is_fault() {
        let base = spawn_mock(rpc_router(Calls::new(), list_reply)).await;

        let err = client(&base).pause("h1").await.unwrap_err();
        assert!(matches!(err, ClientError::Fault { ref message, .. } if message == "no such method"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let base = spawn_mock(Router::new().route(
            "/transmission/rpc",
            post(|| async { StatusCode::UNAUTHORIZED }),
        ))
        .await;

        assert!(client(&base).login().await.unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn test_non_json_reply_is_validation_error() {
        let base = spawn_mock(Router::new().route(
            "/transmission/rpc",
            post(|| async { "<html>proxy login</html>" }),
        ))
        .await;

        let err = client(&base).get_tasks().await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_labels_act_as_tags() {
        let base = spawn_mock(rpc_router(Calls::new(), list_reply)).await;
        assert_eq!(client(&base).get_tags().await.unwrap(), vec!["tv"]);
    }
}
