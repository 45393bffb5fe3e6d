use std::{env, fs, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::registry::Camera;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub encoder: Encoder,
    #[serde(default)]
    pub supervisor: Supervisor,
    #[serde(default)]
    pub recording: Recording,
    /// Seed records, written to the camera store only when it is empty
    #[serde(default)]
    pub cameras: Vec<Camera>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default = "default_hls_root")]
    pub hls_root: PathBuf,
    #[serde(default = "default_records_root")]
    pub records_root: PathBuf,
    #[serde(default = "default_cameras_root")]
    pub cameras_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    #[serde(default = "default_encoder_program")]
    pub program: String,
    /// Placed before the input arguments
    #[serde(default = "default_encoder_global_args")]
    pub global_args: Vec<String>,
    /// Segment length in seconds
    #[serde(default = "default_hls_time")]
    pub hls_time: u32,
    /// Segments kept in the live playlist
    #[serde(default = "default_hls_list_size")]
    pub hls_list_size: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Millis(pub u64);

impl Millis {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supervisor {
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial: Millis,
    #[serde(default = "default_backoff_max")]
    pub backoff_max: Millis,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Time spent Running before the backoff is reset
    #[serde(default = "default_stable_after")]
    pub stable_after: Millis,
    /// Bound for the first playlist to appear after a spawn
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: Millis,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: Millis,
    /// A playlist older than this is a stalled encoder
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: Millis,
    #[serde(default = "default_stop_grace")]
    pub stop_grace: Millis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default = "default_redirect_timeout")]
    pub redirect_timeout: Millis,
    #[serde(default = "default_finalize_timeout")]
    pub finalize_timeout: Millis,
    /// Sessions without a stop request are stopped after this long
    #[serde(default = "default_max_duration")]
    pub max_duration: Millis,
    /// Length of `POST /api/record` when the body names none
    #[serde(default = "default_record_duration")]
    pub default_duration: Millis,
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("8080"))
    ))
    .expect("invalid listen address")
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_hls_root() -> PathBuf {
    PathBuf::from("hls")
}

fn default_records_root() -> PathBuf {
    PathBuf::from("records")
}

fn default_cameras_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_encoder_program() -> String {
    "ffmpeg".to_string()
}

fn default_encoder_global_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
    ]
}

fn default_hls_time() -> u32 {
    2
}

fn default_hls_list_size() -> u32 {
    6
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_backoff_initial() -> Millis {
    Millis(1000)
}

fn default_backoff_max() -> Millis {
    Millis(60_000)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_stable_after() -> Millis {
    Millis(30_000)
}

fn default_startup_timeout() -> Millis {
    Millis(15_000)
}

fn default_probe_interval() -> Millis {
    Millis(500)
}

fn default_stall_timeout() -> Millis {
    Millis(20_000)
}

fn default_stop_grace() -> Millis {
    Millis(5_000)
}

fn default_redirect_timeout() -> Millis {
    Millis(20_000)
}

fn default_finalize_timeout() -> Millis {
    Millis(15_000)
}

fn default_max_duration() -> Millis {
    Millis(60 * 60 * 1000)
}

fn default_record_duration() -> Millis {
    Millis(10 * 60 * 1000)
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            hls_root: default_hls_root(),
            records_root: default_records_root(),
            cameras_root: default_cameras_root(),
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            program: default_encoder_program(),
            global_args: default_encoder_global_args(),
            hls_time: default_hls_time(),
            hls_list_size: default_hls_list_size(),
            preset: default_preset(),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            backoff_initial: default_backoff_initial(),
            backoff_max: default_backoff_max(),
            backoff_multiplier: default_backoff_multiplier(),
            stable_after: default_stable_after(),
            startup_timeout: default_startup_timeout(),
            probe_interval: default_probe_interval(),
            stall_timeout: default_stall_timeout(),
            stop_grace: default_stop_grace(),
        }
    }
}

impl Default for Recording {
    fn default() -> Self {
        Self {
            redirect_timeout: default_redirect_timeout(),
            finalize_timeout: default_finalize_timeout(),
            max_duration: default_max_duration(),
            default_duration: default_record_duration(),
        }
    }
}

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("camwall.toml")))
            .or(fs::read_to_string("/etc/camwall/camwall.toml"))
            .unwrap_or("".to_string());
        let cfg: Self = toml::from_str(result.as_str()).expect("config parse error");
        match cfg.validate() {
            Ok(_) => cfg,
            Err(err) => panic!("config validate [{}]", err),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encoder.program.trim().is_empty() {
            anyhow::bail!("encoder.program cannot be empty");
        }
        if self.encoder.hls_time == 0 || self.encoder.hls_list_size == 0 {
            anyhow::bail!("encoder.hls_time and encoder.hls_list_size must be positive");
        }

        let sup = &self.supervisor;
        if sup.backoff_initial.0 == 0 {
            anyhow::bail!("supervisor.backoff_initial must be positive");
        }
        if sup.backoff_max.0 < sup.backoff_initial.0 {
            anyhow::bail!("supervisor.backoff_max must not be below backoff_initial");
        }
        if sup.backoff_multiplier < 1.0 {
            anyhow::bail!("supervisor.backoff_multiplier must be at least 1.0");
        }
        if sup.probe_interval.0 == 0 {
            anyhow::bail!("supervisor.probe_interval must be positive");
        }

        for camera in self.cameras.iter() {
            camera
                .validate()
                .map_err(|e| anyhow::anyhow!("camera config error: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.encoder.program, "ffmpeg");
        assert_eq!(cfg.encoder.hls_list_size, 6);
        assert_eq!(cfg.supervisor.backoff_initial.duration(), Duration::from_secs(1));
        assert_eq!(cfg.recording.default_duration.0, 600_000);
        assert!(cfg.cameras.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cameras_section() {
        let cfg: Config = toml::from_str(
            r#"
            [supervisor]
            backoff_initial = 250
            backoff_max = 8000

            [[cameras]]
            id = "cam1"
            rtsp_url = "rtsp://10.0.0.2/stream1"

            [[cameras]]
            id = "cam2"
            name = "Garage"
            rtsp_url = "rtsp://10.0.0.3/stream1"
            enabled = false
            fps = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.supervisor.backoff_initial.0, 250);
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[0].name, "");
        assert_eq!(cfg.cameras[0].width, 1280);
        assert!(cfg.cameras[0].enabled);
        assert_eq!(cfg.cameras[1].fps, 10);
        assert!(!cfg.cameras[1].enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let cfg: Config = toml::from_str(
            r#"
            [supervisor]
            backoff_initial = 5000
            backoff_max = 1000
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }
}
