//! Stream Supervisors: one control loop per camera.
//!
//! The set owns the loops and feeds them from the registry's change events.
//! Each loop reads its camera through a `watch` channel, so a newer commit
//! replaces an undelivered older one.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config;
use crate::process::Launcher;
use crate::registry::{Camera, ChangeEvent, ChangeKind, Registry};
use crate::sink::{OutputSink, OutputTarget};

mod backoff;
mod task;

pub use backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Crashed,
    Restarting,
}

#[derive(Debug, Clone)]
pub struct Status {
    pub state: State,
    pub generation: u64,
    pub restarts: u64,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    /// Session whose file this camera is writing
    pub recording: Option<String>,
    pub since: DateTime<Utc>,
    /// Registry revision this status reflects
    pub revision: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: State::Stopped,
            generation: 0,
            restarts: 0,
            pid: None,
            last_error: None,
            recording: None,
            since: Utc::now(),
            revision: 0,
        }
    }
}

/// What the registry wants this loop to run. `camera: None` ends the loop.
#[derive(Debug, Clone)]
pub(crate) struct Desired {
    pub revision: u64,
    pub camera: Option<Camera>,
}

/// Per-camera outcome reported to the recording session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraFailure {
    #[error("camera is not running")]
    NotRunning,
    #[error("redirect failed: {0}")]
    RedirectFailed(String),
    #[error("redirect timed out")]
    RedirectTimeout,
    #[error("camera is not recording this session")]
    NotRecording,
    #[error("finalize timed out")]
    FinalizeTimeout,
    #[error("finalize failed: {0}")]
    FinalizeFailed(String),
    #[error("supervisor gone")]
    SupervisorGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub path: PathBuf,
    pub bytes: u64,
}

pub(crate) enum Command {
    StartRecording {
        session_id: String,
        target: OutputTarget,
        reply: oneshot::Sender<Result<(), CameraFailure>>,
    },
    AbortRecording {
        session_id: String,
    },
    FinalizeRecording {
        session_id: String,
        reply: oneshot::Sender<Result<Recorded, CameraFailure>>,
    },
}

struct Worker {
    desired: watch::Sender<Desired>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Workers {
    active: HashMap<String, Worker>,
    /// Loops of deleted cameras, possibly still tearing down
    retired: HashMap<String, Worker>,
    /// Newest registry revision applied per camera
    seen: HashMap<String, u64>,
}

pub struct SupervisorSet {
    workers: Mutex<Workers>,
    launcher: Arc<dyn Launcher>,
    sink: OutputSink,
    cfg: config::Supervisor,
    fault: Arc<watch::Sender<Option<String>>>,
    dispatched: watch::Sender<u64>,
}

impl SupervisorSet {
    pub fn new(cfg: config::Supervisor, launcher: Arc<dyn Launcher>, sink: OutputSink) -> Self {
        Self {
            workers: Mutex::new(Workers::default()),
            launcher,
            sink,
            cfg,
            fault: Arc::new(watch::channel(None).0),
            dispatched: watch::channel(0).0,
        }
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Set while encoder spawns fail for lack of OS resources.
    pub fn fault(&self) -> Option<String> {
        self.fault.borrow().clone()
    }

    /// Subscribes to registry changes and applies them in commit order.
    pub fn watch(self: &Arc<Self>, registry: Arc<Registry>) -> JoinHandle<()> {
        let mut events = registry.subscribe();
        let set = self.clone();
        tokio::spawn(async move {
            set.resync(&registry).await;
            loop {
                match events.recv().await {
                    Ok(event) => set.apply(&event).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!("missed {} camera events, resync", n);
                        set.resync(&registry).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("camera event dispatcher exit");
        })
    }

    async fn resync(&self, registry: &Registry) {
        let revision = registry.revision();
        let cameras = registry.list().await;
        let ids: HashSet<String> = cameras.iter().map(|c| c.id.clone()).collect();
        for camera in cameras {
            self.apply(&ChangeEvent {
                camera_id: camera.id.clone(),
                kind: ChangeKind::Updated,
                fields_changed: vec![],
                camera: Some(camera),
                revision,
            })
            .await;
        }

        let stale: Vec<String> = self
            .workers
            .lock()
            .await
            .active
            .keys()
            .filter(|id| !ids.contains(*id))
            .cloned()
            .collect();
        for camera_id in stale {
            self.apply(&ChangeEvent {
                camera_id,
                kind: ChangeKind::Removed,
                fields_changed: vec![],
                camera: None,
                revision,
            })
            .await;
        }
    }

    pub async fn apply(&self, event: &ChangeEvent) {
        let mut workers = self.workers.lock().await;
        let id = &event.camera_id;
        if workers.seen.get(id).is_some_and(|seen| *seen >= event.revision) {
            debug!("[{}] skip revision {}", id, event.revision);
            return;
        }
        workers.seen.insert(id.clone(), event.revision);
        workers.retired.retain(|_, w| !w.handle.is_finished());

        match &event.camera {
            None => {
                if let Some(worker) = workers.active.remove(id) {
                    worker.desired.send_replace(Desired {
                        revision: event.revision,
                        camera: None,
                    });
                    workers.retired.insert(id.clone(), worker);
                }
            }
            Some(camera) => {
                if let Some(worker) = workers.active.get(id) {
                    worker.desired.send_replace(Desired {
                        revision: event.revision,
                        camera: Some(camera.clone()),
                    });
                } else if camera.runnable() {
                    let predecessor = workers.retired.remove(id).map(|w| w.handle);
                    let worker = self.spawn(camera.clone(), event.revision, predecessor);
                    workers.active.insert(id.clone(), worker);
                }
            }
        }
        drop(workers);
        self.dispatched.send_modify(|r| *r = (*r).max(event.revision));
    }

    fn spawn(&self, camera: Camera, revision: u64, predecessor: Option<JoinHandle<()>>) -> Worker {
        info!("[{}] supervisor spawn", camera.id);
        let (desired_tx, desired_rx) = watch::channel(Desired {
            revision,
            camera: Some(camera.clone()),
        });
        let (command_tx, command_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(Status::default());

        let supervisor = task::Supervisor::new(
            camera.id,
            self.cfg.clone(),
            self.launcher.clone(),
            self.sink.clone(),
            self.fault.clone(),
            desired_rx,
            command_rx,
            status_tx,
        );
        Worker {
            desired: desired_tx,
            commands: command_tx,
            status: status_rx,
            handle: tokio::spawn(supervisor.run(predecessor)),
        }
    }

    async fn commands(&self, camera_id: &str) -> Option<mpsc::Sender<Command>> {
        self.workers
            .lock()
            .await
            .active
            .get(camera_id)
            .map(|w| w.commands.clone())
    }

    pub async fn status_receiver(&self, camera_id: &str) -> Option<watch::Receiver<Status>> {
        let workers = self.workers.lock().await;
        workers
            .active
            .get(camera_id)
            .or_else(|| workers.retired.get(camera_id))
            .map(|w| w.status.clone())
    }

    pub async fn status(&self, camera_id: &str) -> Option<Status> {
        self.workers
            .lock()
            .await
            .active
            .get(camera_id)
            .map(|w| w.status.borrow().clone())
    }

    pub async fn snapshots(&self) -> HashMap<String, Status> {
        self.workers
            .lock()
            .await
            .active
            .iter()
            .map(|(id, w)| (id.clone(), w.status.borrow().clone()))
            .collect()
    }

    /// Waits until the loop of `camera_id` has applied `revision` and holds
    /// no process, or is gone. False when `bound` passes first.
    pub async fn wait_stopped(&self, camera_id: &str, revision: u64, bound: Duration) -> bool {
        let wait = async {
            let mut dispatched = self.dispatched.subscribe();
            let _ = dispatched.wait_for(|r| *r >= revision).await;
            if let Some(mut status) = self.status_receiver(camera_id).await {
                let _ = status
                    .wait_for(|s| s.state == State::Stopped && s.revision >= revision)
                    .await;
            }
        };
        tokio::time::timeout(bound, wait).await.is_ok()
    }

    /// Asks a camera to restart into `session_id`'s recording target and
    /// waits for the new generation to come up.
    pub async fn redirect(
        &self,
        camera_id: &str,
        session_id: &str,
        timeout: Duration,
    ) -> Result<(), CameraFailure> {
        let commands = self
            .commands(camera_id)
            .await
            .ok_or(CameraFailure::NotRunning)?;
        let (reply, rx) = oneshot::channel();
        let command = Command::StartRecording {
            session_id: session_id.to_string(),
            target: self.sink.recording_target(camera_id, session_id),
            reply,
        };

        let result = tokio::time::timeout(timeout, async {
            commands
                .send(command)
                .await
                .map_err(|_| CameraFailure::SupervisorGone)?;
            rx.await.map_err(|_| CameraFailure::SupervisorGone)?
        })
        .await;
        match result {
            Ok(result) => result,
            Err(_) => {
                warn!("[{}] redirect to {} timed out", camera_id, session_id);
                let _ = commands
                    .send(Command::AbortRecording {
                        session_id: session_id.to_string(),
                    })
                    .await;
                Err(CameraFailure::RedirectTimeout)
            }
        }
    }

    /// Asks a camera to close its recording of `session_id`.
    pub async fn finalize(
        &self,
        camera_id: &str,
        session_id: &str,
        timeout: Duration,
    ) -> Result<Recorded, CameraFailure> {
        let commands = self
            .commands(camera_id)
            .await
            .ok_or(CameraFailure::SupervisorGone)?;
        let (reply, rx) = oneshot::channel();
        let command = Command::FinalizeRecording {
            session_id: session_id.to_string(),
            reply,
        };

        tokio::time::timeout(timeout, async {
            commands
                .send(command)
                .await
                .map_err(|_| CameraFailure::SupervisorGone)?;
            rx.await.map_err(|_| CameraFailure::SupervisorGone)?
        })
        .await
        .unwrap_or(Err(CameraFailure::FinalizeTimeout))
    }

    /// Ends every loop and waits until all processes are stopped.
    pub async fn shutdown(&self) {
        let workers: Vec<Worker> = {
            let mut workers = self.workers.lock().await;
            let mut all: Vec<Worker> = workers.active.drain().map(|(_, w)| w).collect();
            all.extend(workers.retired.drain().map(|(_, w)| w));
            all
        };
        info!("stopping {} supervisors", workers.len());
        let handles: Vec<JoinHandle<()>> = workers
            .into_iter()
            .map(|w| {
                w.desired.send_modify(|d| d.camera = None);
                w.handle
            })
            .collect();
        futures::future::join_all(handles).await;
    }
}
