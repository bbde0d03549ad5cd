use std::fmt;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::paths::{KEY_FORCE_UPDATE, KEY_SYNC_INTERVAL};

pub const SOCKET_COUNT: usize = 5;

/// Format used for every human readable timestamp written to the store.
pub const READABLE_TIME_FORMAT: &str = "%Y-%m-%d:%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("socket id {0} out of range 1..=5")]
pub struct SocketIdError(pub u8);

impl SocketId {
    pub fn new(id: u8) -> Result<Self, SocketIdError> {
        if (1..=SOCKET_COUNT as u8).contains(&id) {
            Ok(Self(id))
        } else {
            Err(SocketIdError(id))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self((index % SOCKET_COUNT) as u8 + 1)
    }

    pub fn all() -> impl Iterator<Item = SocketId> {
        (0..SOCKET_COUNT).map(Self::from_index)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketState {
    pub id: SocketId,
    pub desired: bool,
    pub actual: bool,
}

impl SocketState {
    /// All sockets start "on" until the remote store has been read once.
    pub fn initial(id: SocketId) -> Self {
        Self {
            id,
            desired: true,
            actual: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketCommand {
    pub socket: SocketId,
    pub on: bool,
}

impl SocketCommand {
    pub fn new(socket: SocketId, on: bool) -> Self {
        Self { socket, on }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("sockets document is missing or not an object")]
    NotAnObject,
    #[error("field {0} is missing")]
    MissingField(String),
    #[error("field {field} has unexpected value {value}")]
    InvalidValue { field: String, value: String },
}

/// Remote `/sockets` document, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub sockets: [bool; SOCKET_COUNT],
    pub force_update: bool,
    /// Raw `forceUpdate` value when it was neither a flag nor absent.
    pub unrecognized_force: Option<String>,
    pub sync_interval_secs: Option<i64>,
}

impl DesiredState {
    pub fn from_document(document: &Value) -> Result<Self, DocumentError> {
        let object = document.as_object().ok_or(DocumentError::NotAnObject)?;

        let mut sockets = [false; SOCKET_COUNT];
        for id in SocketId::all() {
            let field = crate::paths::socket_key(id);
            let value = object
                .get(&field)
                .ok_or_else(|| DocumentError::MissingField(field.clone()))?;
            sockets[id.index()] = flag_value(&field, value)?;
        }

        // Only true or 1 requests a resync; anything else leaves the sockets syncing normally.
        let (force_update, unrecognized_force) = match object.get(KEY_FORCE_UPDATE) {
            None | Some(Value::Null) => (false, None),
            Some(value) => match flag_value(KEY_FORCE_UPDATE, value) {
                Ok(flag) => (flag, None),
                Err(_) => (false, Some(value.to_string())),
            },
        };

        // An unreadable interval is not fatal; the cached value stays in use.
        let sync_interval_secs = object.get(KEY_SYNC_INTERVAL).and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_str().and_then(|raw| raw.trim().parse::<i64>().ok()))
        });

        Ok(Self {
            sockets,
            force_update,
            unrecognized_force,
            sync_interval_secs,
        })
    }

    pub fn socket(&self, id: SocketId) -> bool {
        self.sockets[id.index()]
    }
}

fn flag_value(field: &str, value: &Value) -> Result<bool, DocumentError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(DocumentError::InvalidValue {
                field: field.to_string(),
                value: number.to_string(),
            }),
        },
        other => Err(DocumentError::InvalidValue {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "timestampEpoch")]
    pub timestamp_epoch: i64,
    #[serde(rename = "timestampReadable")]
    pub timestamp_readable: String,
    pub temperature: u8,
    pub humidity: u8,
}

impl SensorReading {
    pub fn new<Tz>(now: &DateTime<Tz>, temperature: u8, humidity: u8) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self {
            timestamp_epoch: now.timestamp(),
            timestamp_readable: now.format(READABLE_TIME_FORMAT).to_string(),
            temperature,
            humidity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    #[serde(rename = "timestampEpoch")]
    pub timestamp_epoch: i64,
    #[serde(rename = "timestampReadable")]
    pub timestamp_readable: String,
}

impl PollRecord {
    pub fn new<Tz>(now: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self {
            timestamp_epoch: now.timestamp(),
            timestamp_readable: now.format(READABLE_TIME_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub changed: bool,
    #[serde(rename = "signalsSent")]
    pub signals_sent: usize,
    pub forced: bool,
    #[serde(rename = "intervalChanged")]
    pub interval_changed: bool,
    pub aborted: bool,
}

impl ReconcileResult {
    pub fn aborted() -> Self {
        Self {
            aborted: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SocketView {
    pub id: u8,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub sockets: Vec<SocketView>,
    #[serde(rename = "pollIntervalSecs")]
    pub poll_interval_secs: u64,
    #[serde(rename = "lastPollEpoch")]
    pub last_poll_epoch: Option<i64>,
    #[serde(rename = "lastResult")]
    pub last_result: Option<ReconcileResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn socket_id_rejects_out_of_range() {
        assert!(SocketId::new(0).is_err());
        assert!(SocketId::new(6).is_err());
        assert_eq!(SocketId::new(3).unwrap().index(), 2);
        assert_eq!(
            SocketId::all().map(SocketId::get).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn parses_mixed_bool_and_int_flags() {
        let doc = json!({
            "socket1": 1,
            "socket2": false,
            "socket3": true,
            "socket4": 0,
            "socket5": 1,
            "forceUpdate": 1,
            "rpiSyncInterval": 30,
        });

        let desired = DesiredState::from_document(&doc).unwrap();

        assert_eq!(desired.sockets, [true, false, true, false, true]);
        assert!(desired.force_update);
        assert_eq!(desired.sync_interval_secs, Some(30));
    }

    #[test]
    fn missing_socket_is_an_error() {
        let doc = json!({ "socket1": 1, "socket2": 1, "socket3": 1, "socket4": 1 });
        assert_eq!(
            DesiredState::from_document(&doc),
            Err(DocumentError::MissingField("socket5".to_string()))
        );
    }

    #[test]
    fn null_document_is_an_error() {
        assert_eq!(
            DesiredState::from_document(&Value::Null),
            Err(DocumentError::NotAnObject)
        );
    }

    #[test]
    fn unexpected_flag_value_is_an_error() {
        let doc = json!({
            "socket1": "on", "socket2": 1, "socket3": 1, "socket4": 1, "socket5": 1,
        });
        assert!(matches!(
            DesiredState::from_document(&doc),
            Err(DocumentError::InvalidValue { .. })
        ));
    }

    #[test]
    fn odd_force_values_do_not_block_socket_sync() {
        for force in [json!("1"), json!(2), json!([1])] {
            let doc = json!({
                "socket1": 1, "socket2": 0, "socket3": 1, "socket4": 1, "socket5": 1,
                "forceUpdate": force.clone(),
            });

            let desired = DesiredState::from_document(&doc).unwrap();

            assert_eq!(desired.sockets, [true, false, true, true, true]);
            assert!(!desired.force_update);
            assert_eq!(desired.unrecognized_force, Some(force.to_string()));
        }
    }

    #[test]
    fn optional_fields_default() {
        let doc = json!({
            "socket1": 1, "socket2": 1, "socket3": 1, "socket4": 1, "socket5": 1,
            "rpiSyncInterval": "soon",
        });
        let desired = DesiredState::from_document(&doc).unwrap();
        assert!(!desired.force_update);
        assert_eq!(desired.unrecognized_force, None);
        assert_eq!(desired.sync_interval_secs, None);
    }

    #[test]
    fn reading_serializes_with_camel_case_keys() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        let reading = SensorReading::new(&now, 22, 55);

        let value = serde_json::to_value(&reading).unwrap();

        assert_eq!(
            value,
            json!({
                "timestampEpoch": now.timestamp(),
                "timestampReadable": "2026-03-01:12-30-05",
                "temperature": 22,
                "humidity": 55,
            })
        );
    }
}
