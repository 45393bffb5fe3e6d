//! In-process stand-in for the encoder, used by supervisor and session tests.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Exit, Launcher, Process, ProcessError};
use crate::registry::Camera;
use crate::sink::OutputTarget;

#[derive(Default)]
struct Slot {
    exited: AtomicBool,
    code: AtomicI32,
}

#[derive(Default)]
struct Shared {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    launches: Mutex<Vec<(String, OutputTarget)>>,
    current: Mutex<HashMap<String, Arc<Slot>>>,
    fail_spawn: AtomicBool,
    exhausted: AtomicBool,
    silent: AtomicBool,
    ignore_terminate: AtomicBool,
    live: AtomicUsize,
    next_pid: AtomicU32,
}

impl Shared {
    fn exit(&self, slot: &Slot, code: i32) {
        if !slot.exited.swap(true, Ordering::SeqCst) {
            slot.code.store(code, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    shared: Arc<Shared>,
}

impl FakeLauncher {
    pub fn set_fail_spawn(&self, fail: bool) {
        self.shared.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn set_exhausted(&self, exhausted: bool) {
        self.shared.exhausted.store(exhausted, Ordering::SeqCst);
    }

    /// Launched processes never write a playlist.
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::SeqCst);
    }

    pub fn set_ignore_terminate(&self, ignore: bool) {
        self.shared.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    /// Processes alive right now.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, camera_id: &str) -> Vec<Instant> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .get(camera_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Successful launches, in order.
    pub fn launches(&self, camera_id: &str) -> Vec<OutputTarget> {
        self.shared
            .launches
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == camera_id)
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// Makes the newest process of a camera exit with `code`.
    pub fn crash(&self, camera_id: &str, code: i32) {
        let slot = self.shared.current.lock().unwrap().get(camera_id).cloned();
        if let Some(slot) = slot {
            self.shared.exit(&slot, code);
        }
    }

    pub async fn wait_live(&self, expected: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.live() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.live() == expected
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(
        &self,
        camera: &Camera,
        target: &OutputTarget,
    ) -> Result<Box<dyn Process>, ProcessError> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .entry(camera.id.clone())
            .or_default()
            .push(Instant::now());

        if self.shared.exhausted.load(Ordering::SeqCst) {
            return Err(ProcessError::Exhausted {
                program: "fake".to_string(),
                source: io::Error::from_raw_os_error(11),
            });
        }
        if self.shared.fail_spawn.load(Ordering::SeqCst) {
            return Err(ProcessError::Spawn {
                program: "fake".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such encoder"),
            });
        }

        if !self.shared.silent.load(Ordering::SeqCst) {
            std::fs::create_dir_all(&target.live)?;
            std::fs::write(target.playlist(), "#EXTM3U\n")?;
        }
        if let Some(recording) = &target.recording {
            std::fs::write(recording, format!("fake mp4 {}", camera.id))?;
        }

        let slot = Arc::new(Slot::default());
        self.shared
            .current
            .lock()
            .unwrap()
            .insert(camera.id.clone(), slot.clone());
        self.shared
            .launches
            .lock()
            .unwrap()
            .push((camera.id.clone(), target.clone()));
        self.shared.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            pid: 1000 + self.shared.next_pid.fetch_add(1, Ordering::SeqCst),
            slot,
            shared: self.shared.clone(),
        }))
    }
}

struct FakeProcess {
    pid: u32,
    slot: Arc<Slot>,
    shared: Arc<Shared>,
}

impl FakeProcess {
    fn exit_status(&self) -> Option<Exit> {
        if self.slot.exited.load(Ordering::SeqCst) {
            let code = self.slot.code.load(Ordering::SeqCst);
            Some(Exit {
                code: Some(code),
                success: code == 0,
            })
        } else {
            None
        }
    }
}

#[async_trait]
impl Process for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<Exit>> {
        Ok(self.exit_status())
    }

    fn terminate(&mut self) -> io::Result<()> {
        if !self.shared.ignore_terminate.load(Ordering::SeqCst) {
            self.shared.exit(&self.slot, 255);
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<Exit> {
        loop {
            if let Some(exit) = self.exit_status() {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.shared.exit(&self.slot, 137);
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.shared.exit(&self.slot, 137);
    }
}
