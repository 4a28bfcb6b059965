use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::SyncError;

const USER_AGENT: &str = concat!("alistsync/", env!("CARGO_PKG_VERSION"));

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct DirEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub modified: String,
}

/// Size and modification time of a single remote path
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct FileStat {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub modified: String,
}

/// Server address plus whatever credentials the caller has
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    pub fn has_password(&self) -> bool {
        non_empty(&self.username).is_some() && non_empty(&self.password).is_some()
    }

    pub fn has_token(&self) -> bool {
        non_empty(&self.token).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Which credential path produced the live token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// The configured token was accepted by the server
    Token,
    /// A fresh token was obtained with username and password
    Password,
}

/// The narrow file-operation surface the engine needs from a storage server.
///
/// Query methods collapse failures into sentinel values (empty list, `false`,
/// `None`) after logging them; the caller decides whether that matters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn authenticate(&self) -> Result<AuthMethod, SyncError>;

    async fn list(&self, path: &str) -> Vec<DirEntry>;

    async fn exists(&self, path: &str) -> bool;

    async fn stat(&self, path: &str) -> Option<FileStat>;

    async fn mkdir(&self, path: &str) -> bool;

    async fn remove_empty_dir(&self, path: &str) -> bool;

    async fn remove(&self, dir: &str, names: &[String]) -> bool;

    async fn copy(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool;

    async fn move_item(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool;

    async fn list_storages(&self) -> Vec<String>;

    async fn list_pending_copy_tasks(&self) -> Vec<String>;

    async fn retry_failed_copy_tasks(&self) -> bool;

    async fn close(&self);
}

/// JSON envelope wrapping every server response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    content: Option<Vec<DirEntry>>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SettingItem {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct Storage {
    mount_path: String,
}

#[derive(Debug, Deserialize)]
struct StorageList {
    #[serde(default)]
    content: Option<Vec<Storage>>,
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    #[serde(default)]
    name: String,
}

/// HTTP client for an AList/OpenList server
pub struct AlistClient {
    http: Mutex<Option<Client>>,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    token: Mutex<Option<String>>,
}

impl AlistClient {
    /// Create a client; no network traffic happens until the first call
    pub fn new(credentials: &Credentials) -> Result<Self, SyncError> {
        let base_url = parse_base_url(&credentials.base_url)?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::Connectivity(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Created connection to {}:{}",
            base_url.host_str().unwrap_or_default(),
            base_url.port_or_known_default().unwrap_or_default()
        );

        Ok(Self {
            http: Mutex::new(Some(http)),
            base_url,
            username: non_empty(&credentials.username).map(str::to_string),
            password: non_empty(&credentials.password).map(str::to_string),
            token: Mutex::new(non_empty(&credentials.token).map(str::to_string)),
        })
    }

    /// The token currently held by the client, if any
    pub fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_token(&self, token: String) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token);
        }
    }

    fn http(&self) -> Result<Client, SyncError> {
        self.http
            .lock()
            .map_err(|_| SyncError::Connectivity("connection state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| SyncError::Connectivity("connection is closed".to_string()))
    }

    /// Return the live token, logging in first if none is held yet
    async fn live_token(&self) -> Result<String, SyncError> {
        if let Some(token) = self.token() {
            return Ok(token);
        }
        self.login().await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<Envelope<T>, SyncError> {
        let url = self.base_url.join(path)?;
        debug!("Sending request - method: {}, path: {}", method, path);

        let mut request = self
            .http()?
            .request(method, url)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            request = request.header("Authorization", token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::remote(path, format!("HTTP {}", status)));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SyncError::remote(path, format!("unparsable response: {}", e)))?;

        match envelope.code {
            Some(code) if code != 200 => Err(SyncError::remote(
                path,
                format!("code {}: {}", code, envelope.message),
            )),
            _ => Ok(envelope),
        }
    }

    /// Authenticated request; lazily logs in when no token is held
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Envelope<T>, SyncError> {
        let token = self.live_token().await?;
        self.send(method, path, body, Some(&token)).await
    }

    /// Mutating call whose response carries no useful data
    async fn mutate(&self, path: &str, body: Value) -> Result<(), SyncError> {
        self.call::<Value>(Method::POST, path, Some(body)).await.map(|_| ())
    }

    /// Check the held token against the server's settings list
    pub async fn validate_token(&self) -> bool {
        let Some(token) = self.token() else {
            return false;
        };

        let result = self
            .send::<Vec<SettingItem>>(Method::GET, "/api/admin/setting/list", None, Some(&token))
            .await;

        match result {
            Ok(envelope) => {
                let valid = envelope
                    .data
                    .unwrap_or_default()
                    .iter()
                    .find(|item| item.key == "token")
                    .is_some_and(|item| item.value.as_str() == Some(token.as_str()));
                if valid {
                    info!("Token verified");
                } else {
                    info!("Token verification failed");
                }
                valid
            }
            Err(e) => {
                info!("Token verification failed: {}", e);
                false
            }
        }
    }

    /// Exchange username and password for a token
    pub async fn login(&self) -> Result<String, SyncError> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            error!("Neither a valid token nor username and password are available");
            return Err(SyncError::Auth(
                "no valid token and no username/password configured".to_string(),
            ));
        };

        let body = json!({ "username": username, "password": password });
        let envelope = self
            .send::<TokenData>(Method::POST, "/api/auth/login", Some(body), None)
            .await
            .map_err(|e| SyncError::Auth(format!("login failed: {}", e)))?;

        match envelope.data.map(|d| d.token).filter(|t| !t.is_empty()) {
            Some(token) => {
                info!("Obtained token for user {}", username);
                self.set_token(token.clone());
                Ok(token)
            }
            None => {
                error!("Login response did not contain a token");
                Err(SyncError::Auth("login response did not contain a token".to_string()))
            }
        }
    }

    /// Completed copy tasks, normalized the same way as pending ones
    pub async fn list_done_copy_tasks(&self) -> Vec<String> {
        self.task_names("/api/admin/task/copy/done").await
    }

    async fn task_names(&self, path: &str) -> Vec<String> {
        match self.call::<Vec<TaskInfo>>(Method::GET, path, None).await {
            Ok(envelope) => envelope
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|task| task.name.replace("](", ""))
                .collect(),
            Err(e) => {
                error!("Failed to query copy tasks: {}", e);
                Vec::new()
            }
        }
    }

    async fn get_info(&self, path: &str) -> Result<Envelope<FileStat>, SyncError> {
        self.call(Method::POST, "/api/fs/get", Some(json!({ "path": path })))
            .await
    }
}

#[async_trait]
impl RemoteFs for AlistClient {
    async fn authenticate(&self) -> Result<AuthMethod, SyncError> {
        if self.token().is_some() && self.validate_token().await {
            return Ok(AuthMethod::Token);
        }
        self.login().await.map(|_| AuthMethod::Password)
    }

    async fn list(&self, path: &str) -> Vec<DirEntry> {
        let result = self
            .call::<Listing>(Method::POST, "/api/fs/list", Some(json!({ "path": path })))
            .await;
        match result {
            Ok(envelope) => envelope.data.and_then(|l| l.content).unwrap_or_default(),
            Err(e) => {
                debug!("Listing {} returned nothing: {}", path, e);
                Vec::new()
            }
        }
    }

    async fn exists(&self, path: &str) -> bool {
        match self.get_info(path).await {
            Ok(envelope) => envelope.message == "success",
            Err(e) => {
                debug!("Path {} not found: {}", path, e);
                false
            }
        }
    }

    async fn stat(&self, path: &str) -> Option<FileStat> {
        match self.get_info(path).await {
            Ok(envelope) if envelope.message == "success" => Some(envelope.data.unwrap_or_default()),
            Ok(envelope) => {
                warn!("Unexpected info response for {}: {}", path, envelope.message);
                None
            }
            Err(e) => {
                error!("Failed to get file info for {}: {}", path, e);
                None
            }
        }
    }

    async fn mkdir(&self, path: &str) -> bool {
        match self.mutate("/api/fs/mkdir", json!({ "path": path })).await {
            Ok(()) => {
                info!("Created directory [{}]", path);
                true
            }
            Err(e) => {
                error!("Failed to create directory [{}]: {}", path, e);
                false
            }
        }
    }

    async fn remove_empty_dir(&self, path: &str) -> bool {
        let body = json!({ "src_dir": path });
        match self.mutate("/api/fs/remove_empty_directory", body).await {
            Ok(()) => {
                info!("Removed empty directories under [{}]", path);
                true
            }
            Err(e) => {
                error!("Failed to remove empty directories under [{}]: {}", path, e);
                false
            }
        }
    }

    async fn remove(&self, dir: &str, names: &[String]) -> bool {
        let body = json!({ "dir": dir, "names": names });
        match self.mutate("/api/fs/remove", body).await {
            Ok(()) => {
                info!("Removed {:?} from [{}]", names, dir);
                true
            }
            Err(e) => {
                error!("Failed to remove {:?} from [{}]: {}", names, dir, e);
                false
            }
        }
    }

    async fn copy(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool {
        let body = json!({ "src_dir": src_dir, "dst_dir": dst_dir, "names": [name] });
        match self.mutate("/api/fs/copy", body).await {
            Ok(()) => {
                info!("Queued copy of [{}] from [{}] to [{}]", name, src_dir, dst_dir);
                true
            }
            Err(e) => {
                error!("Failed to copy [{}] from [{}]: {}", name, src_dir, e);
                false
            }
        }
    }

    async fn move_item(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool {
        let body = json!({ "src_dir": src_dir, "dst_dir": dst_dir, "names": [name] });
        match self.mutate("/api/fs/move", body).await {
            Ok(()) => {
                info!("Moved [{}/{}] to [{}/{}]", src_dir, name, dst_dir, name);
                true
            }
            Err(e) => {
                error!("Failed to move [{}/{}] to [{}]: {}", src_dir, name, dst_dir, e);
                false
            }
        }
    }

    async fn list_storages(&self) -> Vec<String> {
        match self
            .call::<StorageList>(Method::GET, "/api/admin/storage/list", None)
            .await
        {
            Ok(envelope) => envelope
                .data
                .and_then(|s| s.content)
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.mount_path)
                .collect(),
            Err(e) => {
                error!("Failed to list storages: {}", e);
                Vec::new()
            }
        }
    }

    async fn list_pending_copy_tasks(&self) -> Vec<String> {
        self.task_names("/api/admin/task/copy/undone").await
    }

    async fn retry_failed_copy_tasks(&self) -> bool {
        match self
            .call::<Value>(Method::POST, "/api/admin/task/copy/retry_failed", None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to retry failed copy tasks: {}", e);
                false
            }
        }
    }

    async fn close(&self) {
        match self.http.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    debug!("Connection closed");
                }
            }
            Err(_) => warn!("Connection state poisoned while closing"),
        }
    }
}

/// Parse the configured server address, defaulting to plain HTTP
pub fn parse_base_url(raw: &str) -> Result<Url, SyncError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SyncError::Connectivity("base URL is empty".to_string()));
    }
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = Url::parse(&with_scheme)?;
    if url.host_str().is_none() {
        return Err(SyncError::Connectivity(format!("base URL has no host: {}", raw)));
    }
    Ok(url)
}
