use crate::clients::client::{http_client, AddOptions, ClientKind, TorrentClient};
use crate::codec::jsonrpc::{JsonRpcEnvelope, JsonRpcResponse};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{Task, TaskStatus};
use crate::transport::http::{HttpClient, RequestConfig, TransportSettings};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

const DEFAULT_RPC_PATH: &str = "/jsonrpc";
/// Upper bound on waiting/stopped entries fetched per poll
const PAGE_SIZE: u64 = 1000;

const STATUS_KEYS: [&str; 11] = [
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "uploadSpeed",
    "dir",
    "seeder",
    "errorCode",
    "bittorrent",
    "files",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Aria2Status {
    gid: String,
    status: String,
    total_length: String,
    completed_length: String,
    download_speed: String,
    upload_speed: String,
    dir: String,
    seeder: String,
    bittorrent: Option<Value>,
    files: Vec<Aria2File>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Aria2File {
    path: String,
}

/// aria2 JSON-RPC; the configured password is the RPC secret
pub struct Aria2Client {
    server: ServerConfig,
    http: HttpClient,
    rpc_path: String,
    envelope: JsonRpcEnvelope,
}

impl Aria2Client {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let http = http_client(&server, settings)?;
        let rpc_path = server.option_str("rpc_path").unwrap_or(DEFAULT_RPC_PATH).to_string();
        let envelope = JsonRpcEnvelope::new("seedhub").with_secret(server.password.as_deref());

        Ok(Self {
            server,
            http,
            rpc_path,
            envelope,
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let request = self.envelope.request(method, params);
        let body = serde_json::to_value(&request)
            .map_err(|e| ClientError::Validation(format!("Failed to encode {}: {}", method, e)))?;

        // aria2 reports RPC errors with a 400 and a regular error envelope
        let reply = match self.http.post(&self.rpc_path, RequestConfig::new().json(body)).await {
            Ok(response) => response.body.into_json(),
            Err(TransportError::Http(e)) if e.body.as_json().is_some_and(|b| b.get("error").is_some()) => {
                e.body.into_json()
            }
            Err(e) => return Err(e.into()),
        };

        let reply = reply.ok_or_else(|| ClientError::Validation(format!("{} did not return JSON", method)))?;
        match JsonRpcResponse::from_value(reply)?.into_result() {
            Err(ClientError::Fault { message, .. }) if message == "Unauthorized" => {
                Err(ClientError::Auth("Invalid RPC secret".to_string()))
            }
            other => other,
        }
    }

    async fn statuses(&self, method: &str, paged: bool) -> Result<Vec<Aria2Status>, ClientError> {
        let mut params = Vec::new();
        if paged {
            params.push(json!(0));
            params.push(json!(PAGE_SIZE));
        }
        params.push(json!(STATUS_KEYS));

        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| ClientError::Validation(format!("Malformed {} reply: {}", method, e)))
    }

    fn add_options(&self, options: &AddOptions) -> Value {
        let options = options.with_defaults(&self.server);
        let mut out = Map::new();
        if let Some(dir) = options.save_path {
            out.insert("dir".to_string(), Value::String(dir));
        }
        if options.paused {
            out.insert("pause".to_string(), Value::String("true".to_string()));
        }
        Value::Object(out)
    }
}

/// Decimal string to u64; aria2 sends every number as a string
fn parse_u64(field: &str, raw: &str) -> Result<u64, ClientError> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<u64>()
        .map_err(|_| ClientError::Validation(format!("Invalid {} value: {:?}", field, raw)))
}

pub fn map_status(status: &str, seeder: bool) -> TaskStatus {
    match status {
        "active" if seeder => TaskStatus::Seeding,
        "active" => TaskStatus::Downloading,
        "waiting" => TaskStatus::Queued,
        "paused" => TaskStatus::Paused,
        "complete" => TaskStatus::Completed,
        "error" => TaskStatus::Error,
        _ => TaskStatus::Unknown,
    }
}

fn display_name(raw: &Aria2Status) -> String {
    let from_torrent = raw
        .bittorrent
        .as_ref()
        .and_then(|bt| bt.get("info"))
        .and_then(|info| info.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty());
    let from_file = raw
        .files
        .first()
        .and_then(|file| file.path.rsplit('/').next())
        .filter(|name| !name.is_empty());

    from_torrent.or(from_file).unwrap_or("Unknown").to_string()
}

fn to_task(raw: Aria2Status) -> Result<Task, ClientError> {
    let total = parse_u64("totalLength", &raw.total_length)?;
    let completed = parse_u64("completedLength", &raw.completed_length)?;
    let download_speed = parse_u64("downloadSpeed", &raw.download_speed)?;
    let upload_speed = parse_u64("uploadSpeed", &raw.upload_speed)?;

    let progress = if total == 0 { 0.0 } else { completed as f64 / total as f64 * 100.0 };
    let eta = if download_speed > 0 && total > completed {
        ((total - completed) / download_speed) as i64
    } else {
        0
    };

    let status = map_status(&raw.status, raw.seeder == "true");
    let mut task = Task::new(raw.gid.clone(), display_name(&raw), status).with_progress(progress);
    task.size = total;
    task.download_speed = download_speed;
    task.upload_speed = upload_speed;
    task.eta = eta;
    task.save_path = raw.dir;
    Ok(task)
}

#[async_trait]
impl TorrentClient for Aria2Client {
    fn kind(&self) -> ClientKind {
        ClientKind::Aria2
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// aria2 has no sessions; a version call checks the secret
    async fn login(&self) -> Result<(), ClientError> {
        self.version().await.map(|_| ())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let result = self.call("aria2.getVersion", Vec::new()).await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Validation("getVersion returned no version".to_string()))
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        let (active, waiting, stopped) = tokio::try_join!(
            self.statuses("aria2.tellActive", false),
            self.statuses("aria2.tellWaiting", true),
            self.statuses("aria2.tellStopped", true),
        )?;

        active
            .into_iter()
            .chain(waiting)
            .chain(stopped)
            .map(to_task)
            .collect()
    }

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError> {
        self.call("aria2.addUri", vec![json!([url]), self.add_options(options)])
            .await?;
        Ok(())
    }

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(torrent);
        self.call(
            "aria2.addTorrent",
            vec![Value::String(encoded), json!([]), self.add_options(options)],
        )
        .await?;
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.call("aria2.pause", vec![json!(id)]).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.call("aria2.unpause", vec![json!(id)]).await?;
        Ok(())
    }

    /// aria2 never deletes files, so `delete_data` has no effect
    async fn remove(&self, id: &str, _delete_data: bool) -> Result<(), ClientError> {
        let removed = match self.call("aria2.remove", vec![json!(id)]).await {
            Err(ClientError::Fault { .. }) => self.call("aria2.forceRemove", vec![json!(id)]).await,
            other => other,
        };

        match removed {
            Ok(_) => {
                if let Err(e) = self.call("aria2.removeDownloadResult", vec![json!(id)]).await {
                    debug!(server = %self.server.name, gid = id, error = %e, "Ignoring download result cleanup failure");
                }
                Ok(())
            }
            // Already stopped: only the result entry is left to drop
            Err(e) => self
                .call("aria2.removeDownloadResult", vec![json!(id)])
                .await
                .map(|_| ())
                .map_err(|_| e),
        }
    }
}
