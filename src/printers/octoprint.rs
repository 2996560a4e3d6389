// src/printers/octoprint.rs - driver for printers behind an OctoPrint HTTP server
use super::driver::{route_command, Asset, CommandParams, DriverBase, PrinterDriver};
use crate::config::OctoprintConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use printmgr_shared::{DriverCommand, DriverError, DriverResponse, DriverState, JobState, Sensor, Status, Tool};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum OctoprintError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected reply: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Asset has no file name: {0}")]
    BadAsset(String),
    #[error("Printer selected {found:?} instead of {expected}")]
    NotLoaded {
        expected: String,
        found: Option<String>,
    },
}

/// Endpoint layout. Series printers run a fork that predates the 1.1 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    TypeA,
    V1_1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTable {
    pub version: ApiVersion,
    pub settings: &'static str,
    pub upload: &'static str,
    pub upload_field: &'static str,
    pub job: &'static str,
    pub load: &'static str,
    pub state: &'static str,
}

impl ApiVersion {
    pub fn for_name(name: &str) -> Self {
        if name.to_lowercase().contains("series") {
            ApiVersion::TypeA
        } else {
            ApiVersion::V1_1
        }
    }

    pub fn table(self) -> ApiTable {
        match self {
            ApiVersion::TypeA => ApiTable {
                version: self,
                settings: "/ajax/settings",
                upload: "/ajax/gcodefiles/upload",
                upload_field: "gcode_file",
                job: "/ajax/control/job",
                load: "/ajax/gcodefiles/load",
                state: "/api/state",
            },
            ApiVersion::V1_1 => ApiTable {
                version: self,
                settings: "/api/settings",
                upload: "/api/files/local",
                upload_field: "file",
                job: "/api/job",
                load: "/api/files/local/",
                state: "/api/state",
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    api: Option<ApiSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSettings {
    #[serde(default)]
    enabled: bool,
    key: Option<String>,
}

/// Body of `GET /api/state`.
#[derive(Debug, Default, Deserialize)]
pub struct RemoteState {
    #[serde(default)]
    pub state: RemoteStateBlock,
    #[serde(default)]
    pub temperatures: BTreeMap<String, Temperature>,
    pub job: Option<RemoteJob>,
    pub progress: Option<Progress>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteStateBlock {
    #[serde(default)]
    pub flags: Flags,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    #[serde(default)]
    pub operational: bool,
    #[serde(default)]
    pub printing: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub closed_or_error: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct Temperature {
    pub actual: Option<f64>,
    pub current: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteJob {
    pub filename: Option<String>,
    pub file: Option<RemoteFile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteFile {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Progress {
    pub progress: Option<f64>,
    pub completion: Option<f64>,
}

impl RemoteState {
    pub fn loaded_file(&self) -> Option<String> {
        let job = self.job.as_ref()?;
        job.file
            .as_ref()
            .and_then(|f| f.name.clone())
            .or_else(|| job.filename.clone())
    }
}

/// Maps an OctoPrint state reply onto a status snapshot.
pub fn parse_state(remote: &RemoteState) -> Status {
    let flags = &remote.state.flags;
    let (state, job_state) = if !flags.operational {
        (DriverState::Error, None)
    } else if flags.printing {
        (DriverState::Printing, Some(JobState::Printing))
    } else if flags.paused {
        (DriverState::Paused, Some(JobState::Paused))
    } else if flags.ready {
        (DriverState::Ready, None)
    } else if flags.error || flags.closed_or_error {
        (DriverState::Error, None)
    } else {
        (DriverState::Busy, None)
    };

    let mut status = Status::new(state);
    status.job.state = job_state;
    for (tool_name, reading) in &remote.temperatures {
        let name = tool_name.replacen("tool", "extruder", 1);
        status.sensors.insert(
            name.clone(),
            Sensor {
                kind: Some("temperature".to_string()),
                description: Some(format!("{} temperature sensor", name)),
                temperature: reading.actual.or(reading.current),
            },
        );
        status.tools.insert(
            name.clone(),
            Tool {
                kind: name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string(),
            },
        );
    }
    status.job.name = remote.job.as_ref().and_then(|job| job.filename.clone());

    let percent = remote
        .progress
        .as_ref()
        .and_then(|p| p.progress.or(p.completion.map(|c| c / 100.0)))
        .map(|fraction| fraction * 100.0)
        .unwrap_or(0.0);
    if percent == 100.0 {
        status.job.state = Some(JobState::Completed);
    }
    status.job.percent_complete = Some(percent);
    status
}

pub struct OctoprintPrinter {
    base: DriverBase,
    me: Weak<OctoprintPrinter>,
    config: OctoprintConfig,
    api: ApiTable,
    /// Short timeout for state queries.
    query: reqwest::Client,
    /// No timeout: uploads and job commands can take many seconds.
    client: reqwest::Client,
    key: Mutex<Option<String>>,
    load: Mutex<Option<JoinHandle<()>>>,
}

impl OctoprintPrinter {
    /// Creates the driver and starts connecting in the background.
    pub fn new(config: OctoprintConfig) -> Result<Arc<Self>, OctoprintError> {
        let query = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.query_timeout_ms))
            .build()?;
        let client = reqwest::Client::new();
        let api = ApiVersion::for_name(&config.name).table();
        tracing::debug!("OctoPrint {} at {} uses {:?} endpoints", config.name, config.address, api.version);

        let printer = Arc::new_cyclic(|me: &Weak<OctoprintPrinter>| {
            let driver: Weak<dyn PrinterDriver> = me.clone();
            OctoprintPrinter {
                base: DriverBase::new(Duration::from_millis(config.heartbeat_ms), driver),
                me: me.clone(),
                config,
                api,
                query,
                client,
                key: Mutex::new(None),
                load: Mutex::new(None),
            }
        });
        printer.base.set_state(DriverState::Connecting);
        let connecting = printer.clone();
        tokio::spawn(async move { connecting.connect().await });
        Ok(printer)
    }

    pub fn api(&self) -> &ApiTable {
        &self.api
    }

    pub fn api_key(&self) -> Option<String> {
        self.key.lock().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.address.trim_end_matches('/'), path)
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key() {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }

    async fn connect(&self) {
        match self.discover_key().await {
            Ok(key) => *self.key.lock() = Some(key),
            Err(e) => {
                tracing::error!("Failed to get an API key from {}: {}", self.config.address, e);
                self.base.connection_failed();
                return;
            }
        }
        match self.query_state().await {
            Ok(remote) => {
                tracing::info!(
                    "Connected to OctoPrint {}, printer is {}",
                    self.config.name,
                    parse_state(&remote).state
                );
                self.base.connected();
            }
            Err(e) => {
                tracing::error!("Failed to query OctoPrint state: {}", e);
                self.base.connection_failed();
            }
        }
    }

    /// Reads the API key from the settings, enabling the API with a fresh
    /// key when it is off.
    async fn discover_key(&self) -> Result<String, OctoprintError> {
        let url = self.url(self.api.settings);
        tracing::debug!("Getting API key with url={}", url);
        let settings: Settings = self.query.get(&url).send().await?.error_for_status()?.json().await?;
        let api = settings.api.unwrap_or_default();
        if api.enabled {
            if let Some(key) = api.key {
                return Ok(key);
            }
        }

        tracing::debug!("API is not enabled, enabling it");
        let key = api.key.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let body = serde_json::json!({ "api": { "enabled": true, "key": key } });
        self.query.post(&url).json(&body).send().await?.error_for_status()?;
        Ok(key)
    }

    pub async fn query_state(&self) -> Result<RemoteState, OctoprintError> {
        let key = self.api_key().unwrap_or_default();
        let response = self
            .query
            .get(self.url(self.api.state))
            .query(&[("apikey", key)])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn upload(&self, path: &Path) -> Result<String, OctoprintError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OctoprintError::BadAsset(path.display().to_string()))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.clone());
        let form = reqwest::multipart::Form::new()
            .text("filename", name.clone())
            .part(self.api.upload_field, part);
        self.with_key(self.client.post(self.url(self.api.upload)))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!("Uploaded {} to {}", name, self.config.name);
        Ok(name)
    }

    /// Selects an uploaded file and checks the printer picked it up.
    pub async fn select_file(&self, name: &str) -> Result<(), OctoprintError> {
        let request = match self.api.version {
            ApiVersion::TypeA => {
                let form = reqwest::multipart::Form::new().text("filename", name.to_string());
                self.query.post(self.url(self.api.load)).multipart(form)
            }
            ApiVersion::V1_1 => self
                .query
                .post(self.url(&format!("{}{}", self.api.load, name)))
                .json(&serde_json::json!({ "command": "select", "print": false })),
        };
        self.with_key(request).send().await?.error_for_status()?;

        let found = self.query_state().await?.loaded_file();
        if found.as_deref() == Some(name) {
            Ok(())
        } else {
            Err(OctoprintError::NotLoaded {
                expected: name.to_string(),
                found,
            })
        }
    }

    /// Posts a job command. Resume is sent as `pause`, which toggles.
    pub async fn job(&self, command: &DriverCommand) -> Result<(), OctoprintError> {
        let name = match command {
            DriverCommand::Resume => "pause",
            other => other.as_str(),
        };
        let request = self.client.post(self.url(self.api.job));
        let request = match self.api.version {
            ApiVersion::TypeA => request.form(&[("command", name)]),
            ApiVersion::V1_1 => request.json(&serde_json::json!({ "command": name })),
        };
        self.with_key(request).send().await?.error_for_status()?;
        tracing::debug!("OctoPrint executed job command {}", name);
        Ok(())
    }

    async fn load_file(&self, path: &Path) -> Result<(), OctoprintError> {
        let name = self.upload(path).await?;
        self.select_file(&name).await
    }

    async fn run_job(&self, command: DriverCommand, next: DriverState) -> DriverResponse {
        match self.job(&command).await {
            Ok(()) => {
                self.base.set_state(next);
                DriverResponse::success(next)
            }
            Err(e) => {
                tracing::error!("Failed to execute command {}: {}", command.as_str(), e);
                DriverResponse::failure_with(
                    self.state(),
                    vec![format!("failed to execute command {}", command.as_str())],
                )
            }
        }
    }

    /// Reconciles the remote state with what this driver has done locally.
    /// OctoPrint reports a selected but idle file as plain `ready`.
    fn merge_state(&self, remote: DriverState) -> DriverState {
        self.base.update(|local| match (local, remote) {
            (DriverState::LoadingModel | DriverState::ModelLoaded, DriverState::Ready) => local,
            _ => remote,
        })
    }
}

#[async_trait]
impl PrinterDriver for OctoprintPrinter {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    async fn loadmodel(&self, asset: Asset) -> DriverResponse {
        let Some(path) = asset.path().map(Path::to_path_buf) else {
            tracing::debug!("OctoPrint cannot load {:?}", asset);
            return DriverResponse::failure(self.state(), DriverError::BadAsset);
        };
        if self.status().await.state != DriverState::Ready {
            return DriverResponse::failure(self.state(), DriverError::BadState);
        }
        let response = self.base.loadmodel();
        if !response.success {
            return response;
        }

        let Some(me) = self.me.upgrade() else {
            return DriverResponse::failure(self.state(), DriverError::Unknown);
        };
        let task = tokio::spawn(async move {
            let success = match me.load_file(&path).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Failed to load {} onto {}: {}", path.display(), me.config.name, e);
                    false
                }
            };
            me.base.loadmodel_completed(me.as_ref(), success).await;
        });
        if let Some(previous) = self.load.lock().replace(task) {
            previous.abort();
        }
        response
    }

    async fn print(&self) -> DriverResponse {
        match self.status().await.state {
            DriverState::ModelLoaded | DriverState::Ready => {
                let response = self.run_job(DriverCommand::Start, DriverState::Printing).await;
                if response.success {
                    self.base.progress_heartbeat().start();
                }
                response
            }
            _ => DriverResponse::failure(self.state(), DriverError::BadState),
        }
    }

    async fn cancel(&self) -> DriverResponse {
        match self.status().await.state {
            DriverState::LoadingModel => {
                if let Some(task) = self.load.lock().take() {
                    task.abort();
                }
                self.base.cancel()
            }
            DriverState::Printing | DriverState::Paused => {
                let response = self.run_job(DriverCommand::Cancel, DriverState::Ready).await;
                if response.success {
                    self.base.progress_heartbeat().pause();
                }
                response
            }
            _ => DriverResponse::failure(self.state(), DriverError::BadState),
        }
    }

    async fn pause(&self) -> DriverResponse {
        match self.status().await.state {
            DriverState::Paused => {
                tracing::info!("Idempotent pause");
                DriverResponse::success(DriverState::Paused)
            }
            DriverState::Printing => self.run_job(DriverCommand::Pause, DriverState::Paused).await,
            _ => DriverResponse::failure(self.state(), DriverError::BadState),
        }
    }

    async fn resume(&self) -> DriverResponse {
        match self.status().await.state {
            DriverState::Printing => {
                tracing::info!("Idempotent resume");
                DriverResponse::success(DriverState::Printing)
            }
            DriverState::Paused => self.run_job(DriverCommand::Resume, DriverState::Printing).await,
            _ => DriverResponse::failure(self.state(), DriverError::BadState),
        }
    }

    async fn status(&self) -> Status {
        let state = self.state();
        if matches!(state, DriverState::Connecting | DriverState::Disconnected) {
            return Status::new(state);
        }
        match self.query_state().await {
            Ok(remote) => {
                let mut status = parse_state(&remote);
                status.state = self.merge_state(status.state);
                if status.job.state == Some(JobState::Completed) {
                    self.base.progress_heartbeat().pause();
                }
                status
            }
            Err(e) => {
                tracing::debug!("Could not get state from {}: {}", self.config.name, e);
                Status::new(DriverState::Disconnected)
            }
        }
    }

    async fn command(&self, params: CommandParams) -> DriverResponse {
        tracing::debug!("{} received command: {}", self.config.name, params.command);
        match params.kind() {
            DriverCommand::Start => self.print().await,
            _ => route_command(self, params).await,
        }
    }

    async fn cleanup(&self) -> DriverResponse {
        tracing::debug!("Cleaning up octoprint");
        if let Some(task) = self.load.lock().take() {
            task.abort();
        }
        self.base.cleanup()
    }
}
