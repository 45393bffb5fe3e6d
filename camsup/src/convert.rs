use std::collections::BTreeMap;
use std::path::PathBuf;

use api::response::{SessionState as ApiSessionState, SupervisorState};

use crate::recorder::{Session, SessionState, StartedSession, StoppedSession};
use crate::registry::Camera;
use crate::supervisor::{CameraFailure, State, Status};

impl From<State> for SupervisorState {
    fn from(value: State) -> Self {
        match value {
            State::Stopped => SupervisorState::Stopped,
            State::Starting => SupervisorState::Starting,
            State::Running => SupervisorState::Running,
            State::Crashed => SupervisorState::Crashed,
            State::Restarting => SupervisorState::Restarting,
        }
    }
}

impl From<SessionState> for ApiSessionState {
    fn from(value: SessionState) -> Self {
        match value {
            SessionState::Active => ApiSessionState::Active,
            SessionState::Stopping => ApiSessionState::Stopping,
            SessionState::Completed => ApiSessionState::Completed,
            SessionState::Failed => ApiSessionState::Failed,
        }
    }
}

impl From<Status> for api::response::Supervisor {
    fn from(value: Status) -> Self {
        api::response::Supervisor {
            state: value.state.into(),
            generation: value.generation,
            restarts: value.restarts,
            pid: value.pid,
            last_error: value.last_error,
            recording: value.recording,
            since: value.since.timestamp_millis(),
        }
    }
}

pub fn camera(camera: Camera, status: Option<Status>) -> api::response::Camera {
    api::response::Camera {
        name: camera.display_name().to_string(),
        playlist: api::path::playlist(&camera.id),
        id: camera.id,
        rtsp_url: camera.rtsp_url,
        enabled: camera.enabled,
        width: camera.width,
        height: camera.height,
        fps: camera.fps,
        supervisor: status.map(Into::into),
    }
}

/// Merges a request body over the stored camera, or over defaults for a new id.
pub fn apply_spec(id: &str, existing: Option<Camera>, spec: api::request::CameraSpec) -> Camera {
    let mut camera = existing.unwrap_or_else(|| Camera::new(id, ""));
    if let Some(name) = spec.name {
        camera.name = name;
    }
    if let Some(rtsp_url) = spec.rtsp_url {
        camera.rtsp_url = rtsp_url.trim().to_string();
    }
    if let Some(enabled) = spec.enabled {
        camera.enabled = enabled;
    }
    if let Some(width) = spec.width {
        camera.width = width;
    }
    if let Some(height) = spec.height {
        camera.height = height;
    }
    if let Some(fps) = spec.fps {
        camera.fps = fps;
    }
    camera
}

fn failures(failed: BTreeMap<String, CameraFailure>) -> BTreeMap<String, String> {
    failed
        .into_iter()
        .map(|(camera, e)| (camera, e.to_string()))
        .collect()
}

fn file_name(path: PathBuf) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

impl From<Session> for api::response::Session {
    fn from(value: Session) -> Self {
        api::response::Session {
            id: value.id,
            state: value.state.into(),
            started_at: value.started_at.timestamp_millis(),
            cameras: value.cameras,
            failed: failures(value.failed),
        }
    }
}

impl From<StartedSession> for api::response::RecordStart {
    fn from(value: StartedSession) -> Self {
        api::response::RecordStart {
            status: api::response::STATUS_SUCCESS.to_string(),
            session_id: value.id,
            cameras: value.cameras,
            failed: failures(value.failed),
        }
    }
}

impl From<StoppedSession> for api::response::RecordStop {
    fn from(value: StoppedSession) -> Self {
        api::response::RecordStop {
            status: api::response::STATUS_SUCCESS.to_string(),
            session_id: value.id,
            state: value.state.into(),
            files: value
                .files
                .into_iter()
                .map(|(camera, path)| (camera, file_name(path)))
                .collect(),
            failed: failures(value.failed),
        }
    }
}
