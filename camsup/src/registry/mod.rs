use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info};

mod camera;
mod store;

pub use camera::{Camera, Field};
pub use store::CameraStore;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("camera {0} not found")]
    NotFound(String),
    #[error("invalid camera: {0}")]
    Invalid(String),
    #[error("camera store: {0}")]
    Store(#[from] opendal::Error),
    #[error("camera record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub camera_id: String,
    pub kind: ChangeKind,
    pub fields_changed: Vec<Field>,
    /// Committed record, `None` for `Removed`
    pub camera: Option<Camera>,
    /// Monotonic across the registry, later commits carry higher revisions
    pub revision: u64,
}

pub struct Registry {
    cameras: RwLock<HashMap<String, Camera>>,
    writer: Mutex<()>,
    store: CameraStore,
    event_sender: broadcast::Sender<ChangeEvent>,
    revision: AtomicU64,
}

impl Registry {
    pub async fn load(store: CameraStore) -> Result<Self, RegistryError> {
        let cameras: HashMap<String, Camera> = store
            .load_all()
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        info!("camera registry loaded {} cameras", cameras.len());
        let (event_sender, _) = broadcast::channel(256);
        Ok(Self {
            cameras: RwLock::new(cameras),
            writer: Mutex::new(()),
            store,
            event_sender,
            revision: AtomicU64::new(0),
        })
    }

    /// Writes the configured cameras into an empty store.
    pub async fn seed(&self, cameras: &[Camera]) -> Result<(), RegistryError> {
        if cameras.is_empty() || !self.cameras.read().await.is_empty() {
            return Ok(());
        }
        info!("seeding camera registry with {} cameras", cameras.len());
        for camera in cameras {
            self.upsert(camera.clone()).await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Camera, RegistryError> {
        self.cameras
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Camera> {
        let mut cameras: Vec<Camera> = self.cameras.read().await.values().cloned().collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        cameras
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_sender.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Creates or replaces a camera. Returns the emitted event, `None` when
    /// nothing a Supervisor cares about changed.
    pub async fn upsert(&self, camera: Camera) -> Result<Option<ChangeEvent>, RegistryError> {
        camera.validate()?;
        let _writer = self.writer.lock().await;

        let old = self.cameras.read().await.get(&camera.id).cloned();
        if old.as_ref() == Some(&camera) {
            return Ok(None);
        }

        self.store.put(&camera).await?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.cameras
            .write()
            .await
            .insert(camera.id.clone(), camera.clone());

        let event = match old {
            None => ChangeEvent {
                camera_id: camera.id.clone(),
                kind: ChangeKind::Created,
                fields_changed: vec![],
                camera: Some(camera),
                revision,
            },
            Some(old) => {
                let fields_changed = old.changes(&camera);
                if !fields_changed.iter().any(Field::needs_restart) {
                    debug!("[{}] cosmetic change {:?}", camera.id, fields_changed);
                    return Ok(None);
                }
                ChangeEvent {
                    camera_id: camera.id.clone(),
                    kind: ChangeKind::Updated,
                    fields_changed,
                    camera: Some(camera),
                    revision,
                }
            }
        };
        info!(
            "[{}] camera {:?} {:?} revision {}",
            event.camera_id, event.kind, event.fields_changed, revision
        );
        let _ = self.event_sender.send(event.clone());
        Ok(Some(event))
    }

    pub async fn remove(&self, id: &str) -> Result<ChangeEvent, RegistryError> {
        let _writer = self.writer.lock().await;
        if !self.cameras.read().await.contains_key(id) {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        self.store.delete(id).await?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.cameras.write().await.remove(id);

        let event = ChangeEvent {
            camera_id: id.to_string(),
            kind: ChangeKind::Removed,
            fields_changed: vec![],
            camera: None,
            revision,
        };
        info!("[{}] camera removed revision {}", id, revision);
        let _ = self.event_sender.send(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> Registry {
        Registry::load(CameraStore::memory().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let registry = registry().await;
        assert!(matches!(
            registry.get("cam1").await,
            Err(RegistryError::NotFound(_))
        ));

        let event = registry
            .upsert(Camera::new("cam1", "rtsp://10.0.0.2/live"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Created);
        assert_eq!(event.revision, 1);
        assert_eq!(registry.get("cam1").await.unwrap().rtsp_url, "rtsp://10.0.0.2/live");
    }

    #[tokio::test]
    async fn test_cosmetic_change_emits_nothing() {
        let registry = registry().await;
        let mut rx = registry.subscribe();
        let mut camera = Camera::new("cam1", "rtsp://10.0.0.2/live");
        registry.upsert(camera.clone()).await.unwrap();

        camera.name = "Lobby".to_string();
        assert!(registry.upsert(camera.clone()).await.unwrap().is_none());
        assert_eq!(registry.get("cam1").await.unwrap().name, "Lobby");

        camera.rtsp_url = "rtsp://10.0.0.9/live".to_string();
        let event = registry.upsert(camera).await.unwrap().unwrap();
        assert_eq!(event.fields_changed, vec![Field::RtspUrl]);

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Created);
        let next = rx.recv().await.unwrap();
        assert_eq!(next.kind, ChangeKind::Updated);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = registry().await;
        registry.upsert(Camera::new("cam1", "")).await.unwrap();
        let event = registry.remove("cam1").await.unwrap();
        assert_eq!(event.kind, ChangeKind::Removed);
        assert!(registry.list().await.is_empty());
        assert!(matches!(
            registry.remove("cam1").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_rejected() {
        let registry = registry().await;
        assert!(matches!(
            registry.upsert(Camera::new("a/b", "")).await,
            Err(RegistryError::Invalid(_))
        ));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_serialized() {
        let registry = std::sync::Arc::new(registry().await);
        let mut tasks = vec![];
        for i in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut camera = Camera::new("cam1", format!("rtsp://10.0.0.{}/live", i));
                camera.fps = 10 + i;
                registry.upsert(camera).await.unwrap()
            }));
        }
        let mut last = 0;
        for task in tasks {
            if let Some(event) = task.await.unwrap() {
                last = last.max(event.revision);
            }
        }
        assert_eq!(registry.revision(), last);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_only_into_empty_store() {
        let registry = registry().await;
        registry
            .seed(&[Camera::new("cam1", ""), Camera::new("cam2", "")])
            .await
            .unwrap();
        assert_eq!(registry.list().await.len(), 2);

        registry.seed(&[Camera::new("cam3", "")]).await.unwrap();
        assert_eq!(registry.list().await.len(), 2);
    }
}
