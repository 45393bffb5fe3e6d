use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref RUNNING: IntGauge =
        IntGauge::new("encoders_running", "encoder processes alive").unwrap();
    pub static ref SESSIONS: IntGauge =
        IntGauge::new("recording_sessions", "active recording sessions").unwrap();
    pub static ref SPAWNS: IntCounter =
        IntCounter::new("encoder_spawns_total", "encoder spawn attempts").unwrap();
    pub static ref SPAWN_FAILURES: IntCounter =
        IntCounter::new("encoder_spawn_failures_total", "encoder spawn failures").unwrap();
    pub static ref RESTARTS: IntCounter =
        IntCounter::new("encoder_restarts_total", "supervisor restarts").unwrap();
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("camwall".to_string()), None).unwrap();
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}

static REGISTER: Once = Once::new();

pub fn register() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(RUNNING.clone())).unwrap();
        REGISTRY.register(Box::new(SESSIONS.clone())).unwrap();
        REGISTRY.register(Box::new(SPAWNS.clone())).unwrap();
        REGISTRY.register(Box::new(SPAWN_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(RESTARTS.clone())).unwrap();
    });
}

pub fn gather() -> String {
    ENCODER
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}
