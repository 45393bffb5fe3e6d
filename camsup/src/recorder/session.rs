use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::supervisor::CameraFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stopping,
    Completed,
    Failed,
}

/// The single system-wide recording.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Cameras asked to record, in request order
    pub cameras: Vec<String>,
    /// Cameras that could not redirect
    pub failed: BTreeMap<String, CameraFailure>,
}

#[derive(Debug, Clone)]
pub struct StartedSession {
    pub id: String,
    /// Cameras recording now
    pub cameras: Vec<String>,
    pub failed: BTreeMap<String, CameraFailure>,
}

#[derive(Debug, Clone)]
pub struct StoppedSession {
    pub id: String,
    pub state: SessionState,
    pub files: BTreeMap<String, PathBuf>,
    pub failed: BTreeMap<String, CameraFailure>,
}

/// Short opaque token, 8 hex characters.
pub(super) fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
