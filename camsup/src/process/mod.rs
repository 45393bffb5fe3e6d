//! Process Handle: one external encoder instance.

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::metrics;
use crate::registry::Camera;
use crate::sink::OutputTarget;

mod ffmpeg;
#[cfg(test)]
pub mod fake;

pub use ffmpeg::FfmpegLauncher;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("resources exhausted spawning {program}: {source}")]
    Exhausted {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ProcessError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    ExitedClean,
    ExitedError(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    /// `None` when terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
}

impl From<std::process::ExitStatus> for Exit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Needed a kill after the grace period
    pub forced: bool,
    pub runtime: Duration,
}

/// A spawned OS process as seen by its handle.
#[async_trait]
pub trait Process: Send {
    fn id(&self) -> Option<u32>;
    fn try_wait(&mut self) -> io::Result<Option<Exit>>;
    /// Asks the process to exit on its own.
    fn terminate(&mut self) -> io::Result<()>;
    async fn wait(&mut self) -> io::Result<Exit>;
    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        camera: &Camera,
        target: &OutputTarget,
    ) -> Result<Box<dyn Process>, ProcessError>;
}

/// Owned by exactly one Supervisor. `stop` consumes the handle so it runs
/// once per started process.
pub struct ProcessHandle {
    process: Box<dyn Process>,
    pid: Option<u32>,
    started_at: Instant,
    exit: Option<Exit>,
}

impl ProcessHandle {
    pub async fn start(
        launcher: &dyn Launcher,
        camera: &Camera,
        target: &OutputTarget,
    ) -> Result<Self, ProcessError> {
        metrics::SPAWNS.inc();
        let process = match launcher.launch(camera, target).await {
            Ok(process) => process,
            Err(e) => {
                metrics::SPAWN_FAILURES.inc();
                return Err(e);
            }
        };
        metrics::RUNNING.inc();
        let pid = process.id();
        debug!(
            "[{}] encoder started pid {:?} into {:?}",
            camera.id, pid, target.live
        );
        Ok(Self {
            process,
            pid,
            started_at: Instant::now(),
            exit: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking probe. Once an exit has been observed it is cached.
    pub fn liveness(&mut self) -> Liveness {
        if self.exit.is_none() {
            match self.process.try_wait() {
                Ok(Some(exit)) => self.exit = Some(exit),
                Ok(None) => return Liveness::Running,
                Err(e) => {
                    warn!("encoder pid {:?} try_wait: {}", self.pid, e);
                    return Liveness::ExitedError(None);
                }
            }
        }
        match self.exit {
            Some(Exit { success: true, .. }) => Liveness::ExitedClean,
            Some(Exit { code, .. }) => Liveness::ExitedError(code),
            None => Liveness::Running,
        }
    }

    /// Terminates gracefully, kills after `grace`. Always returns.
    pub async fn stop(mut self, grace: Duration) -> ExitInfo {
        let runtime = self.started_at.elapsed();
        if let Some(exit) = self.exit {
            return ExitInfo {
                code: exit.code,
                forced: false,
                runtime,
            };
        }

        if let Err(e) = self.process.terminate() {
            debug!("encoder pid {:?} terminate: {}", self.pid, e);
        }
        if let Ok(Ok(exit)) = tokio::time::timeout(grace, self.process.wait()).await {
            self.exit = Some(exit);
            return ExitInfo {
                code: exit.code,
                forced: false,
                runtime,
            };
        }

        warn!("encoder pid {:?} ignored terminate, killing", self.pid);
        if let Err(e) = self.process.kill().await {
            warn!("encoder pid {:?} kill: {}", self.pid, e);
        }
        let code = match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(Ok(exit)) => {
                self.exit = Some(exit);
                exit.code
            }
            _ => None,
        };
        ExitInfo {
            code,
            forced: true,
            runtime,
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        metrics::RUNNING.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeLauncher;
    use super::*;

    fn target() -> OutputTarget {
        let dir = std::env::temp_dir().join("camsup-process-test");
        OutputTarget {
            live: dir,
            recording: None,
        }
    }

    #[tokio::test]
    async fn test_liveness_tristate() {
        let launcher = FakeLauncher::default();
        let camera = Camera::new("cam1", "rtsp://host/a");
        let mut handle = ProcessHandle::start(&launcher, &camera, &target())
            .await
            .unwrap();
        assert_eq!(handle.liveness(), Liveness::Running);

        launcher.crash("cam1", 1);
        assert_eq!(handle.liveness(), Liveness::ExitedError(Some(1)));
        // stays observable after exit
        assert_eq!(handle.liveness(), Liveness::ExitedError(Some(1)));

        let info = handle.stop(Duration::from_millis(50)).await;
        assert_eq!(info.code, Some(1));
        assert!(!info.forced);
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_stop_kills_stubborn_process() {
        let launcher = FakeLauncher::default();
        launcher.set_ignore_terminate(true);
        let camera = Camera::new("cam1", "rtsp://host/a");
        let handle = ProcessHandle::start(&launcher, &camera, &target())
            .await
            .unwrap();
        assert_eq!(launcher.live(), 1);

        let started = Instant::now();
        let info = handle.stop(Duration::from_millis(100)).await;
        assert!(info.forced);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let launcher = FakeLauncher::default();
        launcher.set_fail_spawn(true);
        let camera = Camera::new("cam1", "rtsp://host/a");
        let err = ProcessHandle::start(&launcher, &camera, &target())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(launcher.attempts("cam1").len(), 1);
        assert_eq!(launcher.live(), 0);
    }
}
