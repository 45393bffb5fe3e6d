use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::convert;
use crate::error::AppError;
use crate::process::{FfmpegLauncher, Launcher};
use crate::recorder::{SessionManager, StartedSession, StoppedSession};
use crate::registry::{CameraStore, Registry};
use crate::result::Result;
use crate::sink::OutputSink;
use crate::supervisor::SupervisorSet;

pub struct Manager {
    config: Config,
    registry: Arc<Registry>,
    supervisors: Arc<SupervisorSet>,
    sessions: Arc<SessionManager>,
    dispatcher: JoinHandle<()>,
}

impl Manager {
    pub async fn new(config: Config) -> Result<Self> {
        let store = CameraStore::fs(&config.storage.cameras_root).map_err(AppError::registry)?;
        let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone()));
        Self::with(config, store, launcher).await
    }

    pub async fn with(
        config: Config,
        store: CameraStore,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Self> {
        let registry = Arc::new(Registry::load(store).await.map_err(AppError::registry)?);
        registry
            .seed(&config.cameras)
            .await
            .map_err(AppError::registry)?;

        let sink = OutputSink::new(&config.storage);
        let supervisors = Arc::new(SupervisorSet::new(
            config.supervisor.clone(),
            launcher,
            sink,
        ));
        let dispatcher = supervisors.watch(registry.clone());
        let sessions = Arc::new(SessionManager::new(
            config.recording.clone(),
            supervisors.clone(),
        ));
        info!("manager up with {} cameras", registry.list().await.len());

        Ok(Manager {
            config,
            registry,
            supervisors,
            sessions,
            dispatcher,
        })
    }

    pub fn hls_root(&self) -> PathBuf {
        self.supervisors.sink().hls_root().to_path_buf()
    }

    pub async fn cameras(&self) -> Vec<api::response::Camera> {
        let mut snapshots = self.supervisors.snapshots().await;
        self.registry
            .list()
            .await
            .into_iter()
            .map(|camera| {
                let status = snapshots.remove(&camera.id);
                convert::camera(camera, status)
            })
            .collect()
    }

    pub async fn camera(&self, id: &str) -> Result<api::response::Camera> {
        let camera = self.registry.get(id).await.map_err(AppError::registry)?;
        let status = self.supervisors.status(id).await;
        Ok(convert::camera(camera, status))
    }

    /// Creates or updates a camera. Returns once a disabled camera no longer
    /// holds an encoder.
    pub async fn put_camera(
        &self,
        id: &str,
        spec: api::request::CameraSpec,
    ) -> Result<api::response::Camera> {
        let existing = self.registry.get(id).await.ok();
        let camera = convert::apply_spec(id, existing, spec);
        let runnable = camera.runnable();
        let event = self
            .registry
            .upsert(camera)
            .await
            .map_err(AppError::registry)?;

        if let Some(event) = event.filter(|_| !runnable) {
            if !self
                .supervisors
                .wait_stopped(id, event.revision, self.teardown_bound())
                .await
            {
                warn!("[{}] teardown still running", id);
            }
        }
        self.camera(id).await
    }

    pub async fn remove_camera(&self, id: &str) -> Result<()> {
        let event = self.registry.remove(id).await.map_err(AppError::registry)?;
        if !self
            .supervisors
            .wait_stopped(id, event.revision, self.teardown_bound())
            .await
        {
            warn!("[{}] teardown still running", id);
        }
        if let Err(e) = self.supervisors.sink().remove_live(id).await {
            warn!("[{}] remove live directory: {}", id, e);
        }
        Ok(())
    }

    fn teardown_bound(&self) -> Duration {
        self.config.supervisor.stop_grace.duration() * 3
    }

    async fn recordable(&self) -> Result<Vec<String>> {
        if let Some(fault) = self.supervisors.fault() {
            return Err(AppError::unavailable(format!(
                "cannot start encoders: {}",
                fault
            )));
        }
        Ok(self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|c| c.runnable())
            .map(|c| c.id)
            .collect())
    }

    pub async fn start_recording(&self) -> Result<StartedSession> {
        let cameras = self.recordable().await?;
        self.sessions
            .start_session(cameras)
            .await
            .map_err(AppError::recording)
    }

    pub async fn stop_recording(&self, session_id: &str) -> Result<StoppedSession> {
        self.sessions
            .stop_session(session_id)
            .await
            .map_err(AppError::recording)
    }

    /// Records every runnable camera for `seconds`, or the configured default.
    pub async fn record_for(&self, seconds: Option<u64>) -> Result<StoppedSession> {
        let duration = seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.recording.default_duration.duration());
        if duration > self.config.recording.max_duration.duration() {
            return Err(AppError::BadRequest(format!(
                "duration {:?} exceeds {:?}",
                duration,
                self.config.recording.max_duration.duration()
            )));
        }
        let cameras = self.recordable().await?;
        self.sessions
            .record_for(cameras, duration)
            .await
            .map_err(AppError::recording)
    }

    pub async fn current_session(&self) -> Option<api::response::Session> {
        self.sessions.current().await.map(Into::into)
    }

    pub async fn recording_path(&self, filename: &str) -> Result<PathBuf> {
        self.supervisors
            .sink()
            .resolve_download(filename)
            .await
            .map_err(AppError::sink)
    }

    pub async fn shutdown(&self) {
        if let Some(stopped) = self.sessions.stop_current().await {
            info!(
                "recording {} closed on shutdown, {} files",
                stopped.id,
                stopped.files.len()
            );
        }
        self.dispatcher.abort();
        self.supervisors.shutdown().await;
    }
}
