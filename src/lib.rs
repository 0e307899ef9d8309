use std::time::{SystemTime, UNIX_EPOCH};

pub mod db;
pub mod entity;
pub mod logging;
pub mod printer_client;
pub mod relay;
pub mod repo;
pub mod schema;
pub mod server;
pub mod watcher;

pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
