use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Backoff, CameraFailure, Command, Desired, Recorded, State, Status};
use crate::config;
use crate::metrics;
use crate::process::{ExitInfo, Launcher, Liveness, ProcessHandle};
use crate::registry::Camera;
use crate::sink::{OutputSink, OutputTarget};

struct Recording {
    session_id: String,
    target: OutputTarget,
}

/// The control loop of one camera. Every field is owned by the loop, nothing
/// here is shared with other cameras.
pub(super) struct Supervisor {
    id: String,
    cfg: config::Supervisor,
    launcher: Arc<dyn Launcher>,
    sink: OutputSink,
    fault: Arc<watch::Sender<Option<String>>>,
    desired: watch::Receiver<Desired>,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<Status>,

    /// Camera the current generation was started from
    camera: Option<Camera>,
    handle: Option<ProcessHandle>,
    backoff: Backoff,
    generation: u64,
    restarts: u64,
    running_since: Option<Instant>,
    recording: Option<Recording>,
    pending_redirect: Option<oneshot::Sender<Result<(), CameraFailure>>>,
    /// Session whose recording died with a generation, and why
    lost: Option<(String, CameraFailure)>,
    last_error: Option<String>,
    applied: u64,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: String,
        cfg: config::Supervisor,
        launcher: Arc<dyn Launcher>,
        sink: OutputSink,
        fault: Arc<watch::Sender<Option<String>>>,
        desired: watch::Receiver<Desired>,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<Status>,
    ) -> Self {
        let backoff = Backoff::from_config(&cfg);
        Self {
            id,
            cfg,
            launcher,
            sink,
            fault,
            desired,
            commands,
            status,
            camera: None,
            handle: None,
            backoff,
            generation: 0,
            restarts: 0,
            running_since: None,
            recording: None,
            pending_redirect: None,
            lost: None,
            last_error: None,
            applied: 0,
        }
    }

    pub(super) async fn run(mut self, predecessor: Option<JoinHandle<()>>) {
        // the previous loop of a re-created camera must be gone first
        if let Some(predecessor) = predecessor {
            let _ = predecessor.await;
        }

        let mut state = State::Stopped;
        loop {
            self.enter(state).await;
            let next = match state {
                State::Stopped => self.stopped().await,
                State::Starting => self.starting().await,
                State::Running => self.running().await,
                State::Crashed => self.crashed().await,
                State::Restarting => self.restarting().await,
            };
            match next {
                Some(next) => {
                    if next != state {
                        debug!("[{}] {:?} -> {:?}", self.id, state, next);
                    }
                    state = next;
                }
                None => break,
            }
        }

        self.stop_process().await;
        if let Some(reply) = self.pending_redirect.take() {
            let _ = reply.send(Err(CameraFailure::SupervisorGone));
        }
        self.publish(State::Stopped);
        info!("[{}] supervisor exit", self.id);
    }

    async fn enter(&mut self, state: State) {
        if state == State::Stopped {
            self.stop_process().await;
            self.running_since = None;
            if let Some(recording) = self.recording.take() {
                warn!(
                    "[{}] stopped while recording {}",
                    self.id, recording.session_id
                );
                self.lost = Some((
                    recording.session_id,
                    CameraFailure::FinalizeFailed("camera stopped while recording".to_string()),
                ));
            }
            if let Some(reply) = self.pending_redirect.take() {
                let _ = reply.send(Err(CameraFailure::NotRunning));
            }
        }
        self.publish(state);
    }

    fn publish(&self, state: State) {
        let pid = self.handle.as_ref().and_then(|h| h.pid());
        self.status.send_modify(|s| {
            if s.state != state {
                s.since = Utc::now();
            }
            s.state = state;
            s.generation = self.generation;
            s.restarts = self.restarts;
            s.pid = pid;
            s.last_error = self.last_error.clone();
            s.recording = self.recording.as_ref().map(|r| r.session_id.clone());
            s.revision = self.applied;
        });
    }

    fn take_desired(&mut self) -> Desired {
        let desired = self.desired.borrow_and_update().clone();
        self.applied = desired.revision;
        desired
    }

    /// The camera to run right now, if any. Checked at every transition.
    fn wanted(&mut self) -> Option<Camera> {
        self.take_desired().camera.filter(Camera::runnable)
    }

    /// Applies a registry change. `None` keeps the current state.
    fn on_desired_change(&mut self) -> Option<State> {
        match self.take_desired().camera {
            Some(camera) if camera.runnable() => {
                let restart = self
                    .camera
                    .as_ref()
                    .is_none_or(|current| current.needs_restart(&camera));
                self.camera = Some(camera);
                if restart {
                    info!("[{}] configuration changed, restart", self.id);
                    // the next generation would truncate the file, keep it as is
                    if self.pending_redirect.is_none() {
                        if let Some(recording) = self.recording.take() {
                            warn!(
                                "[{}] recording {} ended by configuration change",
                                self.id, recording.session_id
                            );
                            self.lost = Some((
                                recording.session_id,
                                CameraFailure::FinalizeFailed(
                                    "configuration changed while recording".to_string(),
                                ),
                            ));
                        }
                    }
                    Some(State::Restarting)
                } else {
                    None
                }
            }
            _ => Some(State::Stopped),
        }
    }

    async fn stopped(&mut self) -> Option<State> {
        loop {
            let desired = self.take_desired();
            match desired.camera {
                None => return None,
                Some(camera) if camera.runnable() => {
                    self.camera = Some(camera);
                    self.backoff.reset();
                    return Some(State::Starting);
                }
                Some(camera) => {
                    self.camera = Some(camera);
                    self.publish(State::Stopped);
                }
            }

            tokio::select! {
                changed = self.desired.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command, State::Stopped).await;
                }
            }
        }
    }

    async fn starting(&mut self) -> Option<State> {
        let Some(camera) = self.wanted() else {
            return Some(State::Stopped);
        };
        self.camera = Some(camera.clone());

        let target = match &self.recording {
            Some(recording) => recording.target.clone(),
            None => self.sink.live_target(&camera.id),
        };
        if let Err(e) = self.sink.prepare(&target).await {
            error!("[{}] prepare output: {}", self.id, e);
            self.last_error = Some(e.to_string());
            return Some(State::Crashed);
        }

        self.generation += 1;
        match ProcessHandle::start(self.launcher.as_ref(), &camera, &target).await {
            Ok(handle) => {
                self.fault.send_if_modified(|fault| fault.take().is_some());
                info!(
                    "[{}] generation {} started pid {:?}",
                    self.id,
                    self.generation,
                    handle.pid()
                );
                self.handle = Some(handle);
                self.publish(State::Starting);
            }
            Err(e) => {
                if e.is_exhausted() {
                    error!("[{}] {}", self.id, e);
                    self.fault.send_replace(Some(e.to_string()));
                } else {
                    warn!("[{}] {}", self.id, e);
                }
                self.last_error = Some(e.to_string());
                return Some(State::Crashed);
            }
        }

        let deadline = Instant::now() + self.cfg.startup_timeout.duration();
        loop {
            if let Some(next) = self.probe_exit() {
                return Some(next);
            }
            if self.sink.playlist_age(&self.id).await.is_some() {
                return Some(State::Running);
            }
            if Instant::now() >= deadline {
                warn!("[{}] no output after {:?}", self.id, self.cfg.startup_timeout.duration());
                self.last_error = Some("liveness timeout".to_string());
                return Some(State::Crashed);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cfg.probe_interval.duration()) => {}
                changed = self.desired.changed() => {
                    if changed.is_err() {
                        return Some(State::Stopped);
                    }
                    if let Some(next) = self.on_desired_change() {
                        return Some(next);
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.on_command(command, State::Starting).await {
                        return Some(next);
                    }
                }
            }
        }
    }

    async fn running(&mut self) -> Option<State> {
        let since = Instant::now();
        self.running_since = Some(since);
        info!("[{}] running generation {}", self.id, self.generation);
        if let Some(reply) = self.pending_redirect.take() {
            if let Some(recording) = &self.recording {
                info!("[{}] recording {}", self.id, recording.session_id);
            }
            let _ = reply.send(Ok(()));
        }

        let mut probe = tokio::time::interval(self.cfg.probe_interval.duration());
        loop {
            tokio::select! {
                _ = probe.tick() => {
                    if let Some(next) = self.probe_exit() {
                        return Some(next);
                    }
                    if let Some(age) = self.sink.playlist_age(&self.id).await {
                        if age > self.cfg.stall_timeout.duration() {
                            warn!("[{}] playlist stale for {:?}", self.id, age);
                            self.last_error = Some(format!("stalled for {:?}", age));
                            return Some(State::Crashed);
                        }
                    }
                    if self.backoff.attempts() > 0 && since.elapsed() >= self.cfg.stable_after.duration() {
                        debug!("[{}] stable, reset backoff", self.id);
                        self.backoff.reset();
                    }
                }
                changed = self.desired.changed() => {
                    if changed.is_err() {
                        return Some(State::Stopped);
                    }
                    if let Some(next) = self.on_desired_change() {
                        return Some(next);
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Some(next) = self.on_command(command, State::Running).await {
                        return Some(next);
                    }
                }
            }
        }
    }

    async fn crashed(&mut self) -> Option<State> {
        self.stop_process().await;
        self.running_since = None;
        let reason = self
            .last_error
            .clone()
            .unwrap_or_else(|| "encoder exited".to_string());

        if let Some(reply) = self.pending_redirect.take() {
            self.recording = None;
            let _ = reply.send(Err(CameraFailure::RedirectFailed(reason.clone())));
        } else if let Some(recording) = self.recording.take() {
            warn!(
                "[{}] recording {} lost: {}",
                self.id, recording.session_id, reason
            );
            self.lost = Some((
                recording.session_id,
                CameraFailure::FinalizeFailed(format!("encoder crashed: {}", reason)),
            ));
        }

        let delay = self.backoff.next_delay();
        warn!(
            "[{}] crashed ({}), attempt {} restarts in {:?}",
            self.id,
            reason,
            self.backoff.attempts(),
            delay
        );
        self.wait_restart(delay, State::Crashed).await
    }

    async fn restarting(&mut self) -> Option<State> {
        self.stop_process().await;
        self.running_since = None;
        self.wait_restart(Duration::ZERO, State::Restarting).await
    }

    /// Sleeps `delay` unless the camera goes away or changes meanwhile.
    async fn wait_restart(&mut self, delay: Duration, state: State) -> Option<State> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = self.desired.changed() => {
                    if changed.is_err() {
                        return Some(State::Stopped);
                    }
                    match self.on_desired_change() {
                        Some(State::Restarting) => break,
                        Some(next) => return Some(next),
                        None => {}
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Some(State::Stopped) = self.on_command(command, state).await {
                        return Some(State::Stopped);
                    }
                }
            }
        }

        // a timer that fired for a camera disabled meanwhile must not spawn
        if self.wanted().is_none() {
            return Some(State::Stopped);
        }
        self.restarts += 1;
        metrics::RESTARTS.inc();
        Some(State::Starting)
    }

    fn probe_exit(&mut self) -> Option<State> {
        let handle = self.handle.as_mut()?;
        match handle.liveness() {
            Liveness::Running => None,
            Liveness::ExitedClean => {
                warn!("[{}] encoder exited", self.id);
                self.last_error = Some("encoder exited".to_string());
                Some(State::Crashed)
            }
            Liveness::ExitedError(code) => {
                warn!("[{}] encoder exited with {:?}", self.id, code);
                self.last_error = Some(format!("encoder exited with {:?}", code));
                Some(State::Crashed)
            }
        }
    }

    async fn stop_process(&mut self) -> Option<ExitInfo> {
        let handle = self.handle.take()?;
        let pid = handle.pid();
        let info = handle.stop(self.cfg.stop_grace.duration()).await;
        info!(
            "[{}] encoder pid {:?} stopped code {:?} forced {} after {:?}",
            self.id, pid, info.code, info.forced, info.runtime
        );
        Some(info)
    }

    /// Handles a recording command. Returns the state to move to, if any.
    async fn on_command(&mut self, command: Command, state: State) -> Option<State> {
        match command {
            Command::StartRecording {
                session_id,
                target,
                reply,
            } => {
                if state == State::Stopped {
                    let _ = reply.send(Err(CameraFailure::NotRunning));
                    return None;
                }
                info!("[{}] redirect into session {}", self.id, session_id);
                if let Some(previous) = self.pending_redirect.replace(reply) {
                    let _ = previous.send(Err(CameraFailure::RedirectFailed(
                        "superseded".to_string(),
                    )));
                }
                self.lost = None;
                self.recording = Some(Recording { session_id, target });
                match state {
                    State::Starting | State::Running => Some(State::Restarting),
                    _ => None,
                }
            }
            Command::AbortRecording { session_id } => {
                if self
                    .recording
                    .take_if(|r| r.session_id == session_id)
                    .is_none()
                {
                    return None;
                }
                info!("[{}] abort recording {}", self.id, session_id);
                if let Some(reply) = self.pending_redirect.take() {
                    let _ = reply.send(Err(CameraFailure::RedirectTimeout));
                }
                match state {
                    State::Starting | State::Running => Some(State::Restarting),
                    _ => None,
                }
            }
            Command::FinalizeRecording { session_id, reply } => {
                let (result, next) = self.finalize(&session_id, state).await;
                if let Err(e) = &result {
                    warn!("[{}] finalize {}: {}", self.id, session_id, e);
                }
                let _ = reply.send(result);
                next
            }
        }
    }

    async fn finalize(
        &mut self,
        session_id: &str,
        state: State,
    ) -> (Result<Recorded, CameraFailure>, Option<State>) {
        if let Some((_, reason)) = self.lost.take_if(|(lost, _)| lost == session_id) {
            return (Err(reason), None);
        }
        let Some(recording) = self.recording.take_if(|r| r.session_id == session_id) else {
            return (Err(CameraFailure::NotRecording), None);
        };
        let next = match state {
            State::Starting | State::Running => Some(State::Restarting),
            _ => None,
        };

        if let Some(reply) = self.pending_redirect.take() {
            let _ = reply.send(Err(CameraFailure::RedirectFailed(
                "session stopped".to_string(),
            )));
            return (Err(CameraFailure::NotRecording), next);
        }
        if state != State::Running {
            return (
                Err(CameraFailure::FinalizeFailed(format!("camera {:?}", state))),
                next,
            );
        }
        let Some(path) = recording.target.recording else {
            return (Err(CameraFailure::NotRecording), next);
        };

        // the container trailer is written when the encoder exits
        self.stop_process().await;
        let result = match self.sink.finalize(&path).await {
            Ok(file) => {
                let bytes = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                info!(
                    "[{}] recording {} finalized {:?} {} bytes",
                    self.id, session_id, path, bytes
                );
                Ok(Recorded { path, bytes })
            }
            Err(e) => Err(CameraFailure::FinalizeFailed(e.to_string())),
        };
        (result, next)
    }
}
