use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::{Duration, Instant};

use camsup::config::{self, Config, Millis};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Stands in for ffmpeg: keeps the playlist fresh, writes the recording
/// once and exits cleanly on SIGTERM.
const ENCODER: &str = r#"
for last in "$@"; do :; done
case "$last" in
    *'|'*)
        playlist=${last%%|*}
        playlist=${playlist##*]}
        record=${last##*]}
        printf rec > "$record"
        ;;
    *)
        playlist=$last
        ;;
esac
trap 'exit 0' TERM INT
while :; do
    printf '#EXTM3U\n' > "$playlist"
    sleep 0.2
done
"#;

pub fn config(root: &Path) -> Config {
    Config {
        storage: config::Storage {
            hls_root: root.join("hls"),
            records_root: root.join("records"),
            cameras_root: root.join("data"),
        },
        encoder: config::Encoder {
            program: "sh".to_string(),
            global_args: vec!["-c".to_string(), ENCODER.to_string(), "encoder".to_string()],
            ..Default::default()
        },
        supervisor: config::Supervisor {
            backoff_initial: Millis(100),
            backoff_max: Millis(1_000),
            startup_timeout: Millis(5_000),
            probe_interval: Millis(50),
            stop_grace: Millis(1_000),
            ..Default::default()
        },
        recording: config::Recording {
            redirect_timeout: Millis(5_000),
            finalize_timeout: Millis(5_000),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct Server {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Server {
    pub async fn start(cfg: Config) -> Self {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(camsup::serve(cfg, listener, async move {
            let _ = rx.await;
        }));
        Server { addr, stop, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Graceful stop, returns once every encoder is down.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

pub async fn wait_state(server: &Server, id: &str, state: api::response::SupervisorState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let res = reqwest::get(server.url(&api::path::camera(id))).await.unwrap();
        if res.status().is_success() {
            let camera = res.json::<api::response::Camera>().await.unwrap();
            if camera.supervisor.as_ref().map(|s| s.state) == Some(state) {
                return;
            }
        }
        assert!(Instant::now() < deadline, "[{}] never reached {:?}", id, state);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
