use std::fmt;

use chrono::{DateTime, TimeZone};
use thiserror::Error;

use crate::types::SensorReading;

pub const SENSOR_PAYLOAD_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("sensor payload must be {SENSOR_PAYLOAD_LEN} bytes, got {0}")]
    BadLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    pub humidity: u8,
    pub temperature: u8,
}

/// Payload layout is `[humidity, temperature]`.
pub fn parse_payload(payload: &[u8]) -> Result<SensorSample, FrameError> {
    match payload {
        [humidity, temperature] => Ok(SensorSample {
            humidity: *humidity,
            temperature: *temperature,
        }),
        other => Err(FrameError::BadLength(other.len())),
    }
}

impl SensorSample {
    pub fn into_reading<Tz>(self, now: &DateTime<Tz>) -> SensorReading
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        SensorReading::new(now, self.temperature, self.humidity)
    }
}
