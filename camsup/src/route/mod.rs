use std::sync::Arc;

use crate::manager::Manager;

pub mod camera;
pub mod download;
pub mod record;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}
