use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub playlist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<Supervisor>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Supervisor {
    pub state: SupervisorState,
    pub generation: u64,
    pub restarts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<String>,
    pub since: i64,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Crashed,
    Restarting,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Active,
    Stopping,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub started_at: i64,
    pub cameras: Vec<String>,
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecordStart {
    pub status: String,
    pub session_id: String,
    pub cameras: Vec<String>,
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecordStop {
    pub status: String,
    pub session_id: String,
    pub state: SessionState,
    /// camera id -> file name under the records root
    pub files: BTreeMap<String, String>,
    /// camera id -> failure reason
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Error {
    pub status: String,
    pub message: String,
}

impl Error {
    pub fn new<T: ToString>(message: T) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: message.to_string(),
        }
    }
}
