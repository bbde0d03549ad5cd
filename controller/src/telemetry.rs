use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, warn};

use socketsync_common::{parse_payload, sensor_path, SensorReading};

use crate::{gateway::GatewayFrame, store::RemoteStateClient};

/// Turns gateway frames into sensor readings and uploads them.
///
/// Runs on the gateway reader task, concurrently with reconciliation passes;
/// it only ever writes below `/sensors`.
pub struct TelemetryIngestWorker {
    store: Arc<dyn RemoteStateClient>,
    timezone: Tz,
    source_override: Option<String>,
}

impl TelemetryIngestWorker {
    pub fn new(
        store: Arc<dyn RemoteStateClient>,
        timezone: Tz,
        source_override: Option<String>,
    ) -> Self {
        Self {
            store,
            timezone,
            source_override,
        }
    }

    /// Returns the uploaded reading, or `None` when the frame was dropped.
    pub async fn handle_frame(&self, frame: &GatewayFrame) -> Option<SensorReading> {
        let sample = match parse_payload(&frame.payload) {
            Ok(sample) => sample,
            Err(err) => {
                warn!("dropping sensor frame from {}: {err}", frame.source);
                return None;
            }
        };

        let now = Utc::now().with_timezone(&self.timezone);
        let reading = sample.into_reading(&now);
        let source = self.source_override.as_deref().unwrap_or(&frame.source);
        let path = sensor_path(source);
        let key = reading.timestamp_epoch.to_string();

        let value = match serde_json::to_value(&reading) {
            Ok(value) => value,
            Err(err) => {
                warn!("sensor reading serialization failed: {err}");
                return None;
            }
        };

        match self.store.put(&path, &key, value).await {
            Ok(_) => {
                debug!(
                    "uploaded reading {path}/{key}: {}C {}%",
                    reading.temperature, reading.humidity
                );
                Some(reading)
            }
            Err(err) => {
                warn!("failed to upload sensor reading: {err:#}");
                None
            }
        }
    }
}
