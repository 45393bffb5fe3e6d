//! Output Sink Layout: where each camera's encoder writes.
//!
//! Every path is a pure function of the camera id and, for recordings, the
//! session id, so the layout can be recomputed after a crash.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, trace};

use crate::config;

pub const PLAYLIST: &str = "index.m3u8";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("recording {0} is empty")]
    Empty(PathBuf),
    #[error("invalid recording name {0:?}")]
    InvalidName(String),
    #[error("recording {0} not found")]
    NotFound(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where one encoder generation writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Live HLS directory
    pub live: PathBuf,
    /// MP4 file written alongside the live output while recording
    pub recording: Option<PathBuf>,
}

impl OutputTarget {
    pub fn playlist(&self) -> PathBuf {
        self.live.join(PLAYLIST)
    }
}

#[derive(Debug, Clone)]
pub struct OutputSink {
    hls_root: PathBuf,
    records_root: PathBuf,
}

impl OutputSink {
    pub fn new(storage: &config::Storage) -> Self {
        Self {
            hls_root: storage.hls_root.clone(),
            records_root: storage.records_root.clone(),
        }
    }

    pub fn hls_root(&self) -> &Path {
        &self.hls_root
    }

    pub fn live_target(&self, camera_id: &str) -> OutputTarget {
        OutputTarget {
            live: self.hls_root.join(camera_id),
            recording: None,
        }
    }

    pub fn recording_file_name(camera_id: &str, session_id: &str) -> String {
        format!("record_{}_{}.mp4", camera_id, session_id)
    }

    pub fn recording_target(&self, camera_id: &str, session_id: &str) -> OutputTarget {
        OutputTarget {
            recording: Some(
                self.records_root
                    .join(Self::recording_file_name(camera_id, session_id)),
            ),
            ..self.live_target(camera_id)
        }
    }

    pub fn playlist(&self, camera_id: &str) -> PathBuf {
        self.live_target(camera_id).playlist()
    }

    /// Creates the live directory and clears whatever a previous generation
    /// left in it. A stale recording file at the target is removed too.
    pub async fn prepare(&self, target: &OutputTarget) -> Result<(), SinkError> {
        fs::create_dir_all(&target.live)
            .await
            .map_err(io_err(&target.live))?;

        let mut entries = fs::read_dir(&target.live)
            .await
            .map_err(io_err(&target.live))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&target.live))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_err(&path))?;
            if file_type.is_dir() {
                continue;
            }
            trace!("remove stale {:?}", path);
            remove_file(&path).await?;
        }

        if let Some(recording) = &target.recording {
            if let Some(parent) = recording.parent() {
                fs::create_dir_all(parent).await.map_err(io_err(parent))?;
            }
            remove_file(recording).await?;
        }
        debug!("prepared {:?}", target);
        Ok(())
    }

    /// Makes sure a finished recording is flushed to disk and not empty.
    /// Only call once the encoder writing it has exited.
    pub async fn finalize(&self, path: &Path) -> Result<fs::File, SinkError> {
        let file = fs::File::open(path).await.map_err(io_err(path))?;
        file.sync_all().await.map_err(io_err(path))?;
        let metadata = file.metadata().await.map_err(io_err(path))?;
        if metadata.len() == 0 {
            return Err(SinkError::Empty(path.to_path_buf()));
        }
        Ok(file)
    }

    /// Time since the live playlist was last written, `None` if it does not exist.
    pub async fn playlist_age(&self, camera_id: &str) -> Option<Duration> {
        let modified = fs::metadata(self.playlist(camera_id))
            .await
            .and_then(|m| m.modified())
            .ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    pub async fn remove_live(&self, camera_id: &str) -> Result<(), SinkError> {
        let dir = self.hls_root.join(camera_id);
        match fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_err(&dir)(e)),
            _ => Ok(()),
        }
    }

    /// Maps a download name to a file under `records_root`.
    pub async fn resolve_download(&self, filename: &str) -> Result<PathBuf, SinkError> {
        let mut components = Path::new(filename).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == filename
        );
        if !single || !filename.ends_with(".mp4") {
            return Err(SinkError::InvalidName(filename.to_string()));
        }

        let path = self.records_root.join(filename);
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            Ok(_) => Err(SinkError::NotFound(filename.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SinkError::NotFound(filename.to_string()))
            }
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}

async fn remove_file(path: &Path) -> Result<(), SinkError> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(io_err(path)(e)),
        _ => Ok(()),
    }
}
