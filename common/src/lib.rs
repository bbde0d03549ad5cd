pub mod config;
pub mod engine;
pub mod paths;
pub mod rf_codes;
pub mod telemetry;
pub mod types;

pub use config::{GatewayConfig, LoggingConfig, RfConfig, RuntimeConfig, StoreConfig, SyncConfig};
pub use engine::{IntervalChange, ReconcilePlan, ReconciliationEngine};
pub use paths::*;
pub use rf_codes::rf_code;
pub use telemetry::{parse_payload, FrameError, SensorSample};
pub use types::{
    ControllerStatus, DesiredState, DocumentError, PollRecord, ReconcileResult, SensorReading,
    SocketCommand, SocketId, SocketState, SocketView, READABLE_TIME_FORMAT, SOCKET_COUNT,
};
