// printmgr_shared/src/status.rs - driver states, status snapshots and response envelopes
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a printer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Error,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Ready,
    Printing,
    Paused,
    Maintenance,
    Busy,
    LoadingModel,
    ModelLoaded,
}

impl DriverState {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverState::Error => "error",
            DriverState::Connecting => "connecting",
            DriverState::Connected => "connected",
            DriverState::Disconnecting => "disconnecting",
            DriverState::Disconnected => "disconnected",
            DriverState::Ready => "ready",
            DriverState::Printing => "printing",
            DriverState::Paused => "paused",
            DriverState::Maintenance => "maintenance",
            DriverState::Busy => "busy",
            DriverState::LoadingModel => "loadingmodel",
            DriverState::ModelLoaded => "modelloaded",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Ready,
    Sent,
    Received,
    LoadingModel,
    ModelLoaded,
    Printing,
    Paused,
    Canceled,
    Completed,
    Error,
}

/// Failure reasons carried in a response's `errors` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    Unknown,
    UnknownCommand,
    CommandFailed,
    BadState,
    ModelNotLoaded,
    BadAsset,
    ConnectionError,
}

impl DriverError {
    pub fn message(self) -> &'static str {
        match self {
            DriverError::Unknown => "An unknown error occured",
            DriverError::UnknownCommand => "The command is not recognized",
            DriverError::CommandFailed => "The command failed to execute",
            DriverError::BadState => "The printer cannot execute command from existing state",
            DriverError::ModelNotLoaded => "Cannot print if no model has been loaded",
            DriverError::BadAsset => "An asset was corrupt or of the wrong type",
            DriverError::ConnectionError => "There was a problem connecting",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Command names understood by the driver `command` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    Connect,
    Disconnect,
    Start,
    Print,
    Cancel,
    Pause,
    Resume,
    Status,
    GetStatus,
    Exit,
    Reset,
    Command,
    Other(String),
}

impl DriverCommand {
    pub fn parse(name: &str) -> Self {
        match name {
            "connect" => DriverCommand::Connect,
            "disconnect" => DriverCommand::Disconnect,
            "start" => DriverCommand::Start,
            "print" => DriverCommand::Print,
            "cancel" => DriverCommand::Cancel,
            "pause" => DriverCommand::Pause,
            "resume" => DriverCommand::Resume,
            "status" => DriverCommand::Status,
            "getStatus" => DriverCommand::GetStatus,
            "exit" => DriverCommand::Exit,
            "reset" => DriverCommand::Reset,
            "command" => DriverCommand::Command,
            other => DriverCommand::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DriverCommand::Connect => "connect",
            DriverCommand::Disconnect => "disconnect",
            DriverCommand::Start => "start",
            DriverCommand::Print => "print",
            DriverCommand::Cancel => "cancel",
            DriverCommand::Pause => "pause",
            DriverCommand::Resume => "resume",
            DriverCommand::Status => "status",
            DriverCommand::GetStatus => "getStatus",
            DriverCommand::Exit => "exit",
            DriverCommand::Reset => "reset",
            DriverCommand::Command => "command",
            DriverCommand::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
}

/// A point-in-time view of a printer, built fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: DriverState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    pub job: JobInfo,
    pub tools: BTreeMap<String, Tool>,
    pub sensors: BTreeMap<String, Sensor>,
    pub materials: BTreeMap<String, serde_json::Value>,
}

impl Status {
    pub fn new(state: DriverState) -> Self {
        Self {
            state,
            errors: None,
            warnings: None,
            job: JobInfo::default(),
            tools: BTreeMap::new(),
            sensors: BTreeMap::new(),
            materials: BTreeMap::new(),
        }
    }

    pub fn temperature_sensor(&mut self, name: &str, temperature: f64) {
        self.sensors.insert(
            name.to_string(),
            Sensor {
                kind: Some("temperature".to_string()),
                description: None,
                temperature: Some(temperature),
            },
        );
    }
}

/// Response envelope returned by every driver entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverResponse {
    pub success: bool,
    pub state: DriverState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl DriverResponse {
    pub fn success(state: DriverState) -> Self {
        Self {
            success: true,
            state,
            errors: None,
            warnings: None,
            status: None,
        }
    }

    pub fn failure(state: DriverState, error: DriverError) -> Self {
        Self::failure_with(state, vec![error.message().to_string()])
    }

    pub fn failure_with(state: DriverState, errors: Vec<String>) -> Self {
        Self {
            success: false,
            state,
            errors: Some(errors),
            warnings: None,
            status: None,
        }
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            success: true,
            state: status.state,
            errors: None,
            warnings: None,
            status: Some(status),
        }
    }

    pub fn has_error(&self, error: DriverError) -> bool {
        self.errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|e| e == error.message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_lowercase() {
        let json = serde_json::to_string(&DriverState::LoadingModel).unwrap();
        assert_eq!(json, "\"loadingmodel\"");
        assert_eq!(DriverState::ModelLoaded.to_string(), "modelloaded");
    }

    #[test]
    fn failure_carries_state_and_message() {
        let response = DriverResponse::failure(DriverState::Ready, DriverError::BadState);
        assert!(!response.success);
        assert_eq!(response.state, DriverState::Ready);
        assert!(response.has_error(DriverError::BadState));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["state"], "ready");
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn status_job_uses_camel_case() {
        let mut status = Status::new(DriverState::Printing);
        status.job.percent_complete = Some(42.0);
        status.job.print_method = Some("streaming".into());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["job"]["percentComplete"], 42.0);
        assert_eq!(json["job"]["printMethod"], "streaming");
    }

    #[test]
    fn command_names_round_trip() {
        assert_eq!(DriverCommand::parse("getStatus"), DriverCommand::GetStatus);
        assert_eq!(DriverCommand::parse("custom command #1").as_str(), "custom command #1");
    }
}
