use serde::{Deserialize, Serialize};

/// Body of `PUT /api/cameras/{id}`.
///
/// Omitted fields keep the stored value, or the default when the camera is new.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CameraSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TimedRecord {
    /// Seconds
    #[serde(default)]
    pub duration: Option<u64>,
}
