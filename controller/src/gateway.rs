use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::{
    codec::{Decoder, FramedRead},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use socketsync_common::GatewayConfig;

use crate::telemetry::TelemetryIngestWorker;

const START_DELIMITER: u8 = 0x7E;
const API_RX_64: u8 = 0x90;
const API_RX_16: u8 = 0x81;
const MAX_FRAME_DATA: usize = 256;
const JOIN_GRACE: Duration = Duration::from_secs(2);

/// One received radio packet from a sensor node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFrame {
    pub source: String,
    pub payload: Vec<u8>,
}

/// XBee API mode 1 framing: `7E len_hi len_lo data.. checksum`.
#[derive(Debug, Default)]
pub struct XbeeCodec;

impl Decoder for XbeeCodec {
    type Item = GatewayFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match src.iter().position(|byte| *byte == START_DELIMITER) {
                Some(0) => {}
                Some(offset) => {
                    debug!("discarding {offset} bytes before frame start");
                    src.advance(offset);
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }

            if src.len() < 3 {
                return Ok(None);
            }

            let length = u16::from_be_bytes([src[1], src[2]]) as usize;
            if length == 0 || length > MAX_FRAME_DATA {
                warn!("dropping frame with implausible length {length}");
                src.advance(1);
                continue;
            }

            let total = 3 + length + 1;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let frame = src.split_to(total);
            let data = &frame[3..3 + length];
            let checksum = frame[3 + length];
            let sum = data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
            if sum.wrapping_add(checksum) != 0xFF {
                warn!("dropping frame with bad checksum");
                continue;
            }

            if let Some(parsed) = parse_frame_data(data) {
                return Ok(Some(parsed));
            }
        }
    }
}

fn parse_frame_data(data: &[u8]) -> Option<GatewayFrame> {
    match data.first().copied() {
        // id, 64-bit source, 16-bit network address, options
        Some(API_RX_64) if data.len() >= 12 => Some(GatewayFrame {
            source: hex(&data[1..9]),
            payload: data[12..].to_vec(),
        }),
        // id, 16-bit source, rssi, options
        Some(API_RX_16) if data.len() >= 5 => Some(GatewayFrame {
            source: hex(&data[1..3]),
            payload: data[5..].to_vec(),
        }),
        Some(api_id) => {
            debug!("skipping gateway frame with api id {api_id:#04x}");
            None
        }
        None => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Opens the configured serial port and starts the reader, or returns `None`
/// when telemetry is not configured.
pub fn spawn_gateway(
    config: &GatewayConfig,
    worker: Arc<TelemetryIngestWorker>,
    shutdown: CancellationToken,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    if config.port.is_empty() {
        info!("no gateway port configured, telemetry disabled");
        return Ok(None);
    }

    let port = tokio_serial::new(&config.port, config.baud_rate)
        .open_native_async()
        .with_context(|| format!("failed to open gateway port {}", config.port))?;
    info!("gateway open on {} at {} baud", config.port, config.baud_rate);

    Ok(Some(spawn_reader(port, worker, shutdown)))
}

/// Feeds decoded frames to the ingest worker until cancelled or EOF. The
/// reader owns the port, so it is closed only after the loop has stopped.
pub fn spawn_reader<R>(
    reader: R,
    worker: Arc<TelemetryIngestWorker>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, XbeeCodec);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        worker.handle_frame(&frame).await;
                    }
                    Some(Err(err)) => {
                        warn!("gateway read error: {err}");
                        break;
                    }
                    None => {
                        info!("gateway stream closed");
                        break;
                    }
                },
            }
        }
        drop(frames);
        info!("gateway reader stopped");
    })
}

/// Waits for the reader to stop, aborting it after a grace period.
pub async fn join_reader(mut handle: JoinHandle<()>) {
    tokio::select! {
        _ = &mut handle => {}
        _ = tokio::time::sleep(JOIN_GRACE) => {
            warn!("gateway reader did not stop in time, aborting");
            handle.abort();
        }
    }
}
