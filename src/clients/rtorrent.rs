use crate::clients::client::{http_client, unique_sorted, AddOptions, ClientKind, TorrentClient};
use crate::codec::xmlrpc::{method_call, parse_response, XmlRpcValue};
use crate::core::error::{ClientError, TransportError};
use crate::models::server::ServerConfig;
use crate::models::task::{non_empty, Task, TaskStatus};
use crate::transport::http::{HttpClient, RequestConfig, TransportSettings};
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_RPC_PATH: &str = "/RPC2";

/// `d.multicall2` accessors; `to_task` reads rows by these positions
const COLUMNS: [&str; 14] = [
    "d.hash=",
    "d.name=",
    "d.state=",
    "d.is_active=",
    "d.complete=",
    "d.hashing=",
    "d.size_bytes=",
    "d.completed_bytes=",
    "d.down.rate=",
    "d.up.rate=",
    "d.directory=",
    "d.custom1=",
    "d.load_date=",
    "d.message=",
];

const COL_HASH: usize = 0;
const COL_NAME: usize = 1;
const COL_STATE: usize = 2;
const COL_ACTIVE: usize = 3;
const COL_COMPLETE: usize = 4;
const COL_HASHING: usize = 5;
const COL_SIZE: usize = 6;
const COL_COMPLETED: usize = 7;
const COL_DOWN_RATE: usize = 8;
const COL_UP_RATE: usize = 9;
const COL_DIRECTORY: usize = 10;
const COL_LABEL: usize = 11;
const COL_LOAD_DATE: usize = 12;
const COL_MESSAGE: usize = 13;

/// rTorrent over XML-RPC (usually behind a web server's SCGI mount)
pub struct RTorrentClient {
    server: ServerConfig,
    http: HttpClient,
    rpc_path: String,
}

impl RTorrentClient {
    pub fn new(server: ServerConfig, settings: &TransportSettings) -> Result<Self, ClientError> {
        let mut http = http_client(&server, settings)?;
        if server.http_auth.is_none() && !server.username().is_empty() {
            http = http.with_basic_auth(server.username(), server.password());
        }
        let rpc_path = server.option_str("rpc_path").unwrap_or(DEFAULT_RPC_PATH).to_string();

        Ok(Self { server, http, rpc_path })
    }

    async fn call(&self, method: &str, params: &[XmlRpcValue]) -> Result<XmlRpcValue, ClientError> {
        let body = method_call(method, params);
        let response = match self
            .http
            .post(&self.rpc_path, RequestConfig::new().text("text/xml", body))
            .await
        {
            Err(TransportError::Http(e)) if e.status == 401 || e.status == 403 => {
                return Err(ClientError::Auth("rTorrent endpoint rejected the credentials".to_string()));
            }
            other => other?,
        };
        parse_response(&response.body.text())
    }

    async fn rows(&self) -> Result<Vec<XmlRpcValue>, ClientError> {
        let mut params: Vec<XmlRpcValue> = vec!["".into(), "main".into()];
        params.extend(COLUMNS.iter().map(|c| XmlRpcValue::from(*c)));

        match self.call("d.multicall2", &params).await? {
            XmlRpcValue::Array(rows) => Ok(rows),
            other => Err(ClientError::Validation(format!("d.multicall2 returned {:?}", other))),
        }
    }

    async fn load(&self, method: &str, payload: XmlRpcValue, options: &AddOptions) -> Result<(), ClientError> {
        let options = options.with_defaults(&self.server);
        let mut params = vec![XmlRpcValue::from(""), payload];
        if let Some(dir) = options.save_path {
            params.push(format!("d.directory.set={}", dir).into());
        }
        if let Some(label) = options.label {
            params.push(format!("d.custom1.set={}", label).into());
        }
        self.call(method, &params).await?;
        Ok(())
    }
}

fn column<'a>(row: &'a [XmlRpcValue], index: usize) -> Result<&'a XmlRpcValue, ClientError> {
    row.get(index)
        .ok_or_else(|| ClientError::Validation(format!("Row has no column {} ({})", index, COLUMNS[index])))
}

fn text(row: &[XmlRpcValue], index: usize) -> Result<String, ClientError> {
    Ok(column(row, index)?.as_str().unwrap_or("").to_string())
}

fn int(row: &[XmlRpcValue], index: usize) -> Result<i64, ClientError> {
    column(row, index)?
        .as_i64()
        .ok_or_else(|| ClientError::Validation(format!("Column {} is not an integer", COLUMNS[index])))
}

pub fn map_status(state: i64, active: bool, complete: bool, hashing: bool, message: &str) -> TaskStatus {
    if hashing {
        TaskStatus::Checking
    } else if !message.is_empty() && !active {
        TaskStatus::Error
    } else if state == 0 {
        if complete {
            TaskStatus::Completed
        } else {
            TaskStatus::Paused
        }
    } else if !active {
        TaskStatus::Paused
    } else if complete {
        TaskStatus::Seeding
    } else {
        TaskStatus::Downloading
    }
}

fn to_task(row: &XmlRpcValue) -> Result<Task, ClientError> {
    let row = row
        .as_array()
        .ok_or_else(|| ClientError::Validation("d.multicall2 row is not an array".to_string()))?;

    let size = int(row, COL_SIZE)?.max(0) as u64;
    let completed = int(row, COL_COMPLETED)?.max(0) as u64;
    let down_rate = int(row, COL_DOWN_RATE)?.max(0) as u64;
    let complete = int(row, COL_COMPLETE)? != 0;
    let message = text(row, COL_MESSAGE)?;

    let status = map_status(
        int(row, COL_STATE)?,
        int(row, COL_ACTIVE)? != 0,
        complete,
        int(row, COL_HASHING)? != 0,
        &message,
    );
    let progress = if size == 0 { 0.0 } else { completed as f64 / size as f64 * 100.0 };

    let mut task = Task::new(text(row, COL_HASH)?, text(row, COL_NAME)?, status).with_progress(progress);
    task.size = size;
    task.download_speed = down_rate;
    task.upload_speed = int(row, COL_UP_RATE)?.max(0) as u64;
    task.eta = if complete {
        0
    } else if down_rate > 0 {
        (size.saturating_sub(completed) / down_rate) as i64
    } else {
        -1
    };
    task.save_path = text(row, COL_DIRECTORY)?;
    task.added_date = int(row, COL_LOAD_DATE)?.max(0) * 1000;
    task.category = non_empty(&text(row, COL_LABEL)?);
    Ok(task)
}

#[async_trait]
impl TorrentClient for RTorrentClient {
    fn kind(&self) -> ClientKind {
        ClientKind::RTorrent
    }

    fn server(&self) -> &ServerConfig {
        &self.server
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.version().await.map(|_| ())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let value = self.call("system.client_version", &[]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Validation(format!("system.client_version returned {:?}", value)))
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        self.rows().await?.iter().map(to_task).collect()
    }

    async fn add_by_url(&self, url: &str, options: &AddOptions) -> Result<(), ClientError> {
        let method = if options.paused { "load.normal" } else { "load.start" };
        self.load(method, url.into(), options).await
    }

    async fn add_by_file(&self, torrent: &[u8], options: &AddOptions) -> Result<(), ClientError> {
        let method = if options.paused { "load.raw" } else { "load.raw_start" };
        self.load(method, XmlRpcValue::Base64(torrent.to_vec()), options).await
    }

    async fn pause(&self, id: &str) -> Result<(), ClientError> {
        self.call("d.stop", &[id.into()]).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), ClientError> {
        self.call("d.start", &[id.into()]).await?;
        Ok(())
    }

    /// Data deletion relies on an erase hook watching `d.custom5`
    async fn remove(&self, id: &str, delete_data: bool) -> Result<(), ClientError> {
        if delete_data {
            if let Err(e) = self.call("d.custom5.set", &[id.into(), "1".into()]).await {
                debug!(server = %self.server.name, hash = id, error = %e, "Ignoring erase-data flag failure");
            }
        }
        self.call("d.erase", &[id.into()]).await?;
        Ok(())
    }

    async fn get_categories(&self) -> Result<Vec<String>, ClientError> {
        let rows = self.rows().await?;
        let mut labels = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = row
                .as_array()
                .ok_or_else(|| ClientError::Validation("d.multicall2 row is not an array".to_string()))?;
            labels.push(text(row, COL_LABEL)?);
        }
        Ok(unique_sorted(labels))
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<(), ClientError> {
        self.call("d.custom1.set", &[id.into(), category.into()]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock_server::{spawn_mock, Calls};
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use std::time::Duration;

    fn client(base: &str) -> RTorrentClient {
        let settings = TransportSettings {
            timeout: Duration::from_secs(5),
            retry: None,
        };
        RTorrentClient::new(ServerConfig::new("rt", "rtorrent", base), &settings).unwrap()
    }

    fn method_name(body: &str) -> String {
        body.split("<methodName>")
            .nth(1)
            .and_then(|rest| rest.split("</methodName>").next())
            .unwrap_or("")
            .to_string()
    }

    fn xml(value: &str) -> axum::response::Response {
        let body = format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param><value>{}</value></param></params></methodResponse>",
            value
        );
        ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
    }

    fn fault(message: &str) -> axum::response::Response {
        let body = format!(
            "<?xml version=\"1.0\"?><methodResponse><fault><value><struct>\
             <member><name>faultCode</name><value><i4>-506</i4></value></member>\
             <member><name>faultString</name><value><string>{}</string></value></member>\
             </struct></value></fault></methodResponse>",
            message
        );
        ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
    }

    fn row(hash: &str, state: i64, active: i64, complete: i64, label: &str) -> String {
        format!(
            "<value><array><data>\
             <value><string>{hash}</string></value>\
             <value><string>Name {hash}</string></value>\
             <value><i8>{state}</i8></value>\
             <value><i8>{active}</i8></value>\
             <value><i8>{complete}</i8></value>\
             <value><i8>0</i8></value>\
             <value><i8>1000</i8></value>\
             <value><i8>250</i8></value>\
             <value><i8>25</i8></value>\
             <value><i8>7</i8></value>\
             <value><string>/data</string></value>\
             <value><string>{label}</string></value>\
             <value><i8>1700000000</i8></value>\
             <value><string></string></value>\
             </data></array></value>"
        )
    }

    fn router(calls: Calls) -> Router {
        Router::new().route(
            "/RPC2",
            post(move |body: String| {
                let calls = calls.clone();
                async move {
                    let method = method_name(&body);
                    calls.push(method.clone());
                    match method.as_str() {
                        "system.client_version" => xml("<string>0.9.8</string>"),
                        "d.multicall2" => xml(&format!(
                            "<array><data>{}{}</data></array>",
                            row("AAA", 1, 1, 0, "tv"),
                            row("BBB", 0, 0, 1, "")
                        )),
                        "d.custom5.set" => fault("Method 'd.custom5.set' not defined"),
                        "d.erase" => xml("<i4>0</i4>"),
                        _ => fault("Unsupported"),
                    }
                }
            }),
        )
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(1, true, false, false, ""), TaskStatus::Downloading);
        assert_eq!(map_status(1, true, true, false, ""), TaskStatus::Seeding);
        assert_eq!(map_status(1, false, false, false, ""), TaskStatus::Paused);
        assert_eq!(map_status(0, false, true, false, ""), TaskStatus::Completed);
        assert_eq!(map_status(0, false, false, false, ""), TaskStatus::Paused);
        assert_eq!(map_status(1, true, false, true, ""), TaskStatus::Checking);
        assert_eq!(map_status(0, false, false, false, "Tracker: timed out"), TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_multicall_rows_map_positionally() {
        let base = spawn_mock(router(Calls::new())).await;

        let tasks = client(&base).get_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);

        assert_eq!(tasks[0].id, "AAA");
        assert_eq!(tasks[0].status, TaskStatus::Downloading);
        assert_eq!(tasks[0].progress, 25.0);
        assert_eq!(tasks[0].eta, 30);
        assert_eq!(tasks[0].category.as_deref(), Some("tv"));
        assert_eq!(tasks[0].added_date, 1_700_000_000_000);

        assert_eq!(tasks[1].status, TaskStatus::Completed);
        assert_eq!(tasks[1].category, None);
        assert_eq!(tasks[1].eta, 0);
    }

    #[tokio::test]
    async fn test_remove_with_data_swallows_hook_fault() {
        let calls = Calls::new();
        let base = spawn_mock(router(calls.clone())).await;

        client(&base).remove("AAA", true).await.unwrap();
        assert_eq!(calls.all(), vec!["d.custom5.set", "d.erase"]);
    }

    #[tokio::test]
    async fn test_fault_propagates() {
        let base = spawn_mock(router(Calls::new())).await;

        let err = client(&base).pause("AAA").await.unwrap_err();
        assert!(matches!(err, ClientError::Fault { code: -506, .. }));
    }

    #[tokio::test]
    async fn test_version_and_categories() {
        let base = spawn_mock(router(Calls::new())).await;
        let rt = client(&base);

        assert_eq!(rt.version().await.unwrap(), "0.9.8");
        assert!(rt.test_connection().await);
        assert_eq!(rt.get_categories().await.unwrap(), vec!["tv"]);
    }
}
