use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use super::{Exit, Launcher, Process, ProcessError};
use crate::config;
use crate::registry::Camera;
use crate::sink::OutputTarget;

pub struct FfmpegLauncher {
    cfg: config::Encoder,
}

impl FfmpegLauncher {
    pub fn new(cfg: config::Encoder) -> Self {
        Self { cfg }
    }

    pub fn args(&self, camera: &Camera, target: &OutputTarget) -> Vec<String> {
        let gop = camera.gop().to_string();
        let mut args: Vec<String> = vec![
            "-rtsp_transport".into(),
            "tcp".into(),
            "-i".into(),
            camera.rtsp_url.trim().to_string(),
            "-vf".into(),
            format!("scale={}:{}", camera.width, camera.height),
            "-r".into(),
            camera.fps.to_string(),
            "-an".into(),
            "-c:v".into(),
            "libx264".into(),
            "-g".into(),
            gop.clone(),
            "-keyint_min".into(),
            gop,
            "-sc_threshold".into(),
            "0".into(),
            "-preset".into(),
            self.cfg.preset.clone(),
            "-tune".into(),
            "zerolatency".into(),
        ];

        let hls_flags = "delete_segments+append_list+independent_segments";
        let playlist = target.playlist().to_string_lossy().to_string();
        match &target.recording {
            None => args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                self.cfg.hls_time.to_string(),
                "-hls_list_size".into(),
                self.cfg.hls_list_size.to_string(),
                "-hls_flags".into(),
                hls_flags.into(),
                playlist,
            ]),
            // encode once, write both outputs; mp4 needs the codec headers up front
            Some(recording) => args.extend([
                "-map".into(),
                "0:v".into(),
                "-flags".into(),
                "+global_header".into(),
                "-f".into(),
                "tee".into(),
                format!(
                    "[f=hls:hls_time={}:hls_list_size={}:hls_flags={}]{}|[f=mp4:movflags=+faststart]{}",
                    self.cfg.hls_time,
                    self.cfg.hls_list_size,
                    hls_flags,
                    playlist,
                    recording.to_string_lossy()
                ),
            ]),
        }
        args
    }
}

/// Spawn failures that mean the host is out of processes, memory or descriptors.
fn exhausted(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        if let Some(code) = e.raw_os_error() {
            return matches!(
                Errno::from_raw(code),
                Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE
            );
        }
    }
    false
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(
        &self,
        camera: &Camera,
        target: &OutputTarget,
    ) -> Result<Box<dyn Process>, ProcessError> {
        let args = self.args(camera, target);
        info!(
            "[{}] spawn {} for {}",
            camera.id, self.cfg.program, camera.rtsp_url
        );

        let mut child = Command::new(&self.cfg.program)
            .args(&self.cfg.global_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                let program = self.cfg.program.clone();
                if exhausted(&source) {
                    ProcessError::Exhausted { program, source }
                } else {
                    ProcessError::Spawn { program, source }
                }
            })?;

        if let Some(stderr) = child.stderr.take() {
            let id = camera.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.to_lowercase().contains("error") {
                        error!("[{}] encoder: {}", id, line);
                    } else {
                        warn!("[{}] encoder: {}", id, line);
                    }
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child }))
    }
}

struct FfmpegProcess {
    child: Child,
}

#[async_trait]
impl Process for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<Exit>> {
        Ok(self.child.try_wait()?.map(Exit::from))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // ffmpeg closes its outputs cleanly on SIGTERM
        match self.child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<Exit> {
        Ok(self.child.wait().await?.into())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn launcher() -> FfmpegLauncher {
        FfmpegLauncher::new(config::Encoder::default())
    }

    #[test]
    fn test_live_args() {
        let mut camera = Camera::new("cam1", "rtsp://10.0.0.2/stream1");
        camera.width = 640;
        camera.height = 360;
        camera.fps = 10;
        let target = OutputTarget {
            live: PathBuf::from("/hls/cam1"),
            recording: None,
        };
        let args = launcher().args(&camera, &target).join(" ");
        assert_eq!(
            args,
            "-rtsp_transport tcp -i rtsp://10.0.0.2/stream1 -vf scale=640:360 -r 10 -an \
             -c:v libx264 -g 20 -keyint_min 20 -sc_threshold 0 -preset veryfast -tune zerolatency \
             -f hls -hls_time 2 -hls_list_size 6 \
             -hls_flags delete_segments+append_list+independent_segments /hls/cam1/index.m3u8"
        );
    }

    #[test]
    fn test_recording_args_tee() {
        let camera = Camera::new("cam1", "rtsp://10.0.0.2/stream1");
        let target = OutputTarget {
            live: PathBuf::from("/hls/cam1"),
            recording: Some(PathBuf::from("/records/record_cam1_ab12cd34.mp4")),
        };
        let args = launcher().args(&camera, &target);
        let tee = args.last().unwrap();
        assert!(args.contains(&"tee".to_string()));
        let flags = args.iter().position(|a| a == "-flags").unwrap();
        assert_eq!(args[flags + 1], "+global_header");
        assert!(flags < args.iter().position(|a| a == "tee").unwrap());
        assert!(tee.starts_with("[f=hls:hls_time=2:hls_list_size=6:"));
        assert!(tee.ends_with(
            "]/hls/cam1/index.m3u8|[f=mp4:movflags=+faststart]/records/record_cam1_ab12cd34.mp4"
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let launcher = FfmpegLauncher::new(config::Encoder {
            program: "/nonexistent/camwall-encoder".to_string(),
            ..Default::default()
        });
        let camera = Camera::new("cam1", "rtsp://10.0.0.2/stream1");
        let target = OutputTarget {
            live: PathBuf::from("/tmp"),
            recording: None,
        };
        match launcher.launch(&camera, &target).await {
            Err(ProcessError::Spawn { .. }) => {}
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("spawned a missing binary"),
        }
    }
}
