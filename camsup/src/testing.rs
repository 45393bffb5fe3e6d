//! Fixtures shared by the supervisor and session tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::config::{self, Millis};
use crate::process::fake::FakeLauncher;
use crate::registry::{Camera, CameraStore, Registry};
use crate::sink::OutputSink;
use crate::supervisor::{State, Status, SupervisorSet};

pub struct Harness {
    pub dir: TempDir,
    pub launcher: FakeLauncher,
    pub registry: Arc<Registry>,
    pub set: Arc<SupervisorSet>,
}

pub fn cfg() -> config::Supervisor {
    config::Supervisor {
        backoff_initial: Millis(50),
        backoff_max: Millis(400),
        backoff_multiplier: 2.0,
        stable_after: Millis(30_000),
        startup_timeout: Millis(2_000),
        probe_interval: Millis(20),
        stall_timeout: Millis(60_000),
        stop_grace: Millis(200),
    }
}

pub async fn harness_with(cfg: config::Supervisor) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::default();
    let sink = OutputSink::new(&config::Storage {
        hls_root: dir.path().join("hls"),
        records_root: dir.path().join("records"),
        cameras_root: dir.path().join("data"),
    });
    let registry = Arc::new(
        Registry::load(CameraStore::memory().unwrap())
            .await
            .unwrap(),
    );
    let set = Arc::new(SupervisorSet::new(cfg, Arc::new(launcher.clone()), sink));
    set.watch(registry.clone());
    Harness {
        dir,
        launcher,
        registry,
        set,
    }
}

pub async fn harness() -> Harness {
    harness_with(cfg()).await
}

pub async fn wait_status(
    set: &SupervisorSet,
    id: &str,
    within: Duration,
    f: impl Fn(&Status) -> bool,
) -> Status {
    let deadline = Instant::now() + within;
    loop {
        if let Some(status) = set.status(id).await {
            if f(&status) {
                return status;
            }
        }
        if Instant::now() > deadline {
            panic!("[{}] timed out, last {:?}", id, set.status(id).await);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_running(set: &SupervisorSet, id: &str) -> Status {
    wait_status(set, id, Duration::from_secs(3), |s| s.state == State::Running).await
}

pub fn camera(id: &str) -> Camera {
    Camera::new(id, format!("rtsp://10.0.0.2/{}", id))
}

