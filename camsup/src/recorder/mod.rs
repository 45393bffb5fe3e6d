//! Recording Session Manager: one synchronized recording across cameras.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config;
use crate::metrics;
use crate::supervisor::SupervisorSet;

mod session;

pub use session::{Session, SessionState, StartedSession, StoppedSession};

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("recording session {0} already active")]
    Conflict(String),
    #[error("unknown recording session {0}")]
    UnknownSession(String),
    #[error("no camera to record")]
    NoCameras,
    #[error("recording session {0} is already stopping")]
    Stopping(String),
    #[error("timed recording interrupted: {0}")]
    Interrupted(String),
}

pub struct SessionManager {
    supervisors: Arc<SupervisorSet>,
    cfg: config::Recording,
    current: Mutex<Option<Session>>,
    watchdog: Mutex<Option<AbortHandle>>,
}

impl SessionManager {
    pub fn new(cfg: config::Recording, supervisors: Arc<SupervisorSet>) -> Self {
        Self {
            supervisors,
            cfg,
            current: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    /// Redirects every camera into a new session. Cameras that cannot follow
    /// are reported in `failed`, the session goes on without them.
    pub async fn start_session(
        self: &Arc<Self>,
        camera_ids: Vec<String>,
    ) -> Result<StartedSession, RecordingError> {
        if camera_ids.is_empty() {
            return Err(RecordingError::NoCameras);
        }

        let id = session::new_id();
        {
            let mut current = self.current.lock().await;
            if let Some(session) = current.as_ref() {
                return Err(RecordingError::Conflict(session.id.clone()));
            }
            let mut watchdog = self.watchdog.lock().await;
            // session and deadline are set together, a caller dropped during
            // the fan-out leaves a session that still expires
            *current = Some(Session {
                id: id.clone(),
                state: SessionState::Active,
                started_at: Utc::now(),
                cameras: camera_ids.clone(),
                failed: BTreeMap::new(),
            });
            *watchdog = Some(self.arm_watchdog(&id));
            metrics::SESSIONS.inc();
        }
        info!("recording {} start on {:?}", id, camera_ids);

        let timeout = self.cfg.redirect_timeout.duration();
        let results = join_all(camera_ids.iter().map(|camera_id| async {
            let result = self.supervisors.redirect(camera_id, &id, timeout).await;
            (camera_id.clone(), result)
        }))
        .await;

        let mut failed = BTreeMap::new();
        for (camera_id, result) in results {
            if let Err(e) = result {
                warn!("[{}] not recording {}: {}", camera_id, id, e);
                failed.insert(camera_id, e);
            }
        }

        {
            let mut current = self.current.lock().await;
            // a stop may have raced the fan-out
            if let Some(session) = current.as_mut().filter(|s| s.id == id) {
                session.failed = failed.clone();
            }
        }

        Ok(StartedSession {
            cameras: camera_ids
                .into_iter()
                .filter(|c| !failed.contains_key(c))
                .collect(),
            id,
            failed,
        })
    }

    fn arm_watchdog(self: &Arc<Self>, session_id: &str) -> AbortHandle {
        let manager = self.clone();
        let session_id = session_id.to_string();
        let max_duration = self.cfg.max_duration.duration();
        tokio::spawn(async move {
            tokio::time::sleep(max_duration).await;
            warn!(
                "recording {} reached {:?} without stop",
                session_id, max_duration
            );
            if let Err(e) = manager.stop(&session_id, false).await {
                warn!("recording {} auto stop: {}", session_id, e);
            }
        })
        .abort_handle()
    }

    /// Finalizes every participating camera concurrently and ends the session.
    pub async fn stop_session(&self, session_id: &str) -> Result<StoppedSession, RecordingError> {
        self.stop(session_id, true).await
    }

    async fn stop(
        &self,
        session_id: &str,
        abort_watchdog: bool,
    ) -> Result<StoppedSession, RecordingError> {
        let (cameras, mut failed) = {
            let mut current = self.current.lock().await;
            match current.as_mut() {
                Some(session) if session.id == session_id => {
                    if session.state != SessionState::Active {
                        return Err(RecordingError::Stopping(session_id.to_string()));
                    }
                    session.state = SessionState::Stopping;
                    (session.cameras.clone(), session.failed.clone())
                }
                _ => return Err(RecordingError::UnknownSession(session_id.to_string())),
            }
        };
        let watchdog = self.watchdog.lock().await.take();
        if let Some(watchdog) = watchdog.filter(|_| abort_watchdog) {
            watchdog.abort();
        }
        info!("recording {} stop", session_id);

        let timeout = self.cfg.finalize_timeout.duration();
        let results = join_all(
            cameras
                .iter()
                .filter(|c| !failed.contains_key(*c))
                .map(|camera_id| async {
                    let result = self
                        .supervisors
                        .finalize(camera_id, session_id, timeout)
                        .await;
                    (camera_id.clone(), result)
                }),
        )
        .await;

        let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
        for (camera_id, result) in results {
            match result {
                Ok(recorded) => {
                    debug!(
                        "[{}] recording {} {} bytes",
                        camera_id, session_id, recorded.bytes
                    );
                    files.insert(camera_id, recorded.path);
                }
                Err(e) => {
                    warn!("[{}] recording {} failed: {}", camera_id, session_id, e);
                    failed.insert(camera_id, e);
                }
            }
        }
        let state = if files.is_empty() {
            SessionState::Failed
        } else {
            SessionState::Completed
        };

        {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|s| s.id == session_id) {
                *current = None;
            }
        }
        metrics::SESSIONS.dec();
        info!(
            "recording {} {:?} files {} failed {}",
            session_id,
            state,
            files.len(),
            failed.len()
        );

        Ok(StoppedSession {
            id: session_id.to_string(),
            state,
            files,
            failed,
        })
    }

    /// Records for `duration` and returns the stopped session. Runs on its
    /// own task, dropping the caller does not cut the recording short.
    pub async fn record_for(
        self: &Arc<Self>,
        camera_ids: Vec<String>,
        duration: Duration,
    ) -> Result<StoppedSession, RecordingError> {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let started = manager.start_session(camera_ids).await?;
            tokio::time::sleep(duration).await;
            manager.stop_session(&started.id).await
        });
        task.await
            .map_err(|e| RecordingError::Interrupted(e.to_string()))?
    }

    /// Stops the active session, if any. Used on shutdown.
    pub async fn stop_current(&self) -> Option<StoppedSession> {
        let id = self.current.lock().await.as_ref().map(|s| s.id.clone())?;
        match self.stop_session(&id).await {
            Ok(stopped) => Some(stopped),
            Err(e) => {
                warn!("recording {} stop: {}", id, e);
                None
            }
        }
    }
}
