use serde::{Deserialize, Serialize};

use super::RegistryError;

const MAX_FPS: u32 = 120;
const MAX_DIMENSION: u32 = 7680;

/// Camera record as persisted in the camera store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    /// Display name, falls back to the id when empty
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rtsp_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    15
}

/// Fields whose change is observable by a Supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    RtspUrl,
    Resolution,
    Fps,
    Enabled,
}

impl Field {
    /// Media parameters cannot change under a running encoder.
    pub fn needs_restart(&self) -> bool {
        !matches!(self, Field::Name)
    }
}

impl Camera {
    pub fn new(id: impl Into<String>, rtsp_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            rtsp_url: rtsp_url.into(),
            enabled: default_enabled(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Enabled and pointing somewhere.
    pub fn runnable(&self) -> bool {
        self.enabled && !self.rtsp_url.trim().is_empty()
    }

    pub fn gop(&self) -> u32 {
        (self.fps * 2).max(1)
    }

    pub fn changes(&self, new: &Camera) -> Vec<Field> {
        let mut fields = vec![];
        if self.name != new.name {
            fields.push(Field::Name);
        }
        if self.rtsp_url.trim() != new.rtsp_url.trim() {
            fields.push(Field::RtspUrl);
        }
        if self.width != new.width || self.height != new.height {
            fields.push(Field::Resolution);
        }
        if self.fps != new.fps {
            fields.push(Field::Fps);
        }
        if self.enabled != new.enabled {
            fields.push(Field::Enabled);
        }
        fields
    }

    /// True when moving from `self` to `new` requires a new encoder generation.
    pub fn needs_restart(&self, new: &Camera) -> bool {
        self.changes(new).iter().any(Field::needs_restart)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if !valid_id(&self.id) {
            return Err(RegistryError::Invalid(format!(
                "id {:?} must be 1-64 characters of [A-Za-z0-9_-]",
                self.id
            )));
        }

        let url = self.rtsp_url.trim().to_lowercase();
        if !url.is_empty() && !url.starts_with("rtsp://") && !url.starts_with("rtsps://") {
            return Err(RegistryError::Invalid(format!(
                "rtsp_url {:?} must be rtsp:// or rtsps://",
                self.rtsp_url
            )));
        }

        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(RegistryError::Invalid(format!(
                "resolution {}x{} out of range",
                self.width, self.height
            )));
        }

        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(RegistryError::Invalid(format!(
                "fps {} out of range 1..={}",
                self.fps, MAX_FPS
            )));
        }
        Ok(())
    }
}

/// Ids end up as directory and file names, keep them to a safe alphabet.
fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_only_change_keeps_encoder() {
        let old = Camera::new("cam1", "rtsp://10.0.0.2/live");
        let mut new = old.clone();
        new.name = "Front door".to_string();

        assert_eq!(old.changes(&new), vec![Field::Name]);
        assert!(!old.needs_restart(&new));
    }

    #[test]
    fn test_media_changes_restart() {
        let old = Camera::new("cam1", "rtsp://10.0.0.2/live");

        let mut new = old.clone();
        new.rtsp_url = "rtsp://10.0.0.9/live".to_string();
        assert!(old.needs_restart(&new));

        let mut new = old.clone();
        new.height = 480;
        assert_eq!(old.changes(&new), vec![Field::Resolution]);
        assert!(old.needs_restart(&new));

        let mut new = old.clone();
        new.fps = 30;
        new.enabled = false;
        assert_eq!(old.changes(&new), vec![Field::Fps, Field::Enabled]);
    }

    #[test]
    fn test_validate() {
        assert!(Camera::new("cam1", "rtsp://host/a").validate().is_ok());
        assert!(Camera::new("cam1", "").validate().is_ok());
        assert!(Camera::new("../etc", "rtsp://host/a").validate().is_err());
        assert!(Camera::new("", "rtsp://host/a").validate().is_err());
        assert!(Camera::new("cam1", "http://host/a").validate().is_err());

        let mut camera = Camera::new("cam1", "rtsp://host/a");
        camera.fps = 0;
        assert!(camera.validate().is_err());
    }

    #[test]
    fn test_runnable_and_gop() {
        let mut camera = Camera::new("cam1", "  ");
        assert!(!camera.runnable());
        camera.rtsp_url = "rtsp://host/a".to_string();
        assert!(camera.runnable());
        camera.enabled = false;
        assert!(!camera.runnable());

        assert_eq!(camera.gop(), 30);
        assert_eq!(camera.display_name(), "cam1");
    }
}
