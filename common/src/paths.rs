use crate::types::SocketId;

pub const PATH_SOCKETS: &str = "/sockets";
pub const PATH_SENSORS: &str = "/sensors";

pub const KEY_FORCE_UPDATE: &str = "forceUpdate";
pub const KEY_SYNC_INTERVAL: &str = "rpiSyncInterval";
pub const KEY_LAST_CHECK: &str = "rpiLastCheck";

pub fn socket_key(id: SocketId) -> String {
    format!("socket{id}")
}

pub fn sensor_path(source: &str) -> String {
    format!("{PATH_SENSORS}/{source}")
}
