use std::path::Path;

use opendal::{EntryMode, Operator, services};
use tracing::{debug, warn};

use super::{Camera, RegistryError};

const PREFIX: &str = "cameras/";

/// Durable camera records, one JSON document per camera.
#[derive(Clone)]
pub struct CameraStore {
    op: Operator,
}

impl CameraStore {
    pub fn fs(root: &Path) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(root.join(PREFIX))
            .map_err(|e| RegistryError::Invalid(format!("cameras_root {:?}: {}", root, e)))?;
        let root = root.to_string_lossy();
        debug!("camera store at {}", root);
        let builder = services::Fs::default().root(&root);
        Ok(Self {
            op: Operator::new(builder)?.finish(),
        })
    }

    pub fn memory() -> Result<Self, RegistryError> {
        let builder = services::Memory::default();
        Ok(Self {
            op: Operator::new(builder)?.finish(),
        })
    }

    fn key(id: &str) -> String {
        format!("{}{}.json", PREFIX, id)
    }

    pub async fn load_all(&self) -> Result<Vec<Camera>, RegistryError> {
        let mut cameras = vec![];
        for entry in self.op.list(PREFIX).await? {
            if entry.metadata().mode() != EntryMode::FILE || !entry.name().ends_with(".json") {
                continue;
            }
            let data = self.op.read(entry.path()).await?.to_vec();
            match serde_json::from_slice::<Camera>(&data) {
                Ok(camera) => cameras.push(camera),
                Err(e) => {
                    warn!("skip camera record {}: {}", entry.path(), e);
                }
            }
        }
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cameras)
    }

    pub async fn put(&self, camera: &Camera) -> Result<(), RegistryError> {
        let data = serde_json::to_vec_pretty(camera)?;
        self.op.write(&Self::key(&camera.id), data).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        self.op.delete(&Self::key(id)).await?;
        Ok(())
    }
}
