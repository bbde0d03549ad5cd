use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;
use tokio::{process::Command, time::Instant};
use tracing::{debug, warn};

use socketsync_common::{rf_code, RfConfig, SocketCommand, SocketId};

/// Transmits one RF code. No acknowledgement exists on the radio side.
#[async_trait]
pub trait SignalSender: Send + Sync {
    async fn send(&self, code: u32) -> anyhow::Result<()>;
}

/// Runs an external sender program (433Utils `codesend` by default) per code.
pub struct CommandSender {
    program: String,
    args: Vec<String>,
}

impl CommandSender {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl SignalSender for CommandSender {
    async fn send(&self, code: u32) -> anyhow::Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(code.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

enum RfBackend {
    Sender(Arc<dyn SignalSender>),
    Disabled,
}

#[derive(Debug, Default)]
struct DispatchStats {
    last_send: Option<Instant>,
    last_code: Option<u32>,
    sent_codes: u64,
    failed_sends: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RfDiagnostics {
    pub enabled: bool,
    #[serde(rename = "repeatCount")]
    pub repeat_count: u8,
    #[serde(rename = "repeatGapMs")]
    pub repeat_gap_ms: u64,
    #[serde(rename = "minSendIntervalMs")]
    pub min_send_interval_ms: u64,
    #[serde(rename = "lastCode")]
    pub last_code: Option<u32>,
    #[serde(rename = "sentCodes")]
    pub sent_codes: u64,
    #[serde(rename = "failedSends")]
    pub failed_sends: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

pub struct ActuatorDispatcher {
    backend: RfBackend,
    repeat_count: u8,
    repeat_gap: Duration,
    min_send_interval: Duration,
    stats: Mutex<DispatchStats>,
}

impl ActuatorDispatcher {
    pub fn new(sender: Arc<dyn SignalSender>, config: &RfConfig) -> Self {
        Self::with_backend(RfBackend::Sender(sender), config)
    }

    pub fn disabled(config: &RfConfig) -> Self {
        Self::with_backend(RfBackend::Disabled, config)
    }

    pub fn from_config(config: &RfConfig) -> Self {
        if config.enabled {
            let sender = CommandSender::new(config.program.clone(), config.args.clone());
            Self::new(Arc::new(sender), config)
        } else {
            Self::disabled(config)
        }
    }

    fn with_backend(backend: RfBackend, config: &RfConfig) -> Self {
        Self {
            backend,
            repeat_count: config.repeat_count.max(1),
            repeat_gap: Duration::from_millis(config.repeat_gap_ms),
            min_send_interval: Duration::from_millis(config.min_send_interval_ms),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// Fire-and-forget: failures are recorded and logged, never returned.
    pub async fn set_socket(&self, socket: SocketId, on: bool) {
        let code = rf_code(socket, on);
        debug!("socket {socket} -> {} (code {code})", on_off(on));

        let result = self.send_code(code).await;

        let mut stats = self.lock_stats();
        stats.last_code = Some(code);
        match result {
            Ok(()) => {
                stats.sent_codes = stats.sent_codes.saturating_add(1);
                stats.last_error = None;
            }
            Err(err) => {
                warn!("failed to signal socket {socket} {}: {err:#}", on_off(on));
                stats.failed_sends = stats.failed_sends.saturating_add(1);
                stats.last_error = Some(format!("{err:#}"));
            }
        }
    }

    pub async fn execute(&self, commands: &[SocketCommand]) -> usize {
        for command in commands {
            self.set_socket(command.socket, command.on).await;
        }
        commands.len()
    }

    pub fn diagnostics(&self) -> RfDiagnostics {
        let stats = self.lock_stats();
        RfDiagnostics {
            enabled: matches!(self.backend, RfBackend::Sender(_)),
            repeat_count: self.repeat_count,
            repeat_gap_ms: self.repeat_gap.as_millis() as u64,
            min_send_interval_ms: self.min_send_interval.as_millis() as u64,
            last_code: stats.last_code,
            sent_codes: stats.sent_codes,
            failed_sends: stats.failed_sends,
            last_error: stats.last_error.clone(),
        }
    }

    async fn send_code(&self, code: u32) -> anyhow::Result<()> {
        let RfBackend::Sender(sender) = &self.backend else {
            warn!("rf disabled, dropping code {code}");
            return Ok(());
        };

        self.rate_limit().await;

        for repeat in 0..self.repeat_count {
            sender.send(code).await?;
            if repeat + 1 < self.repeat_count && !self.repeat_gap.is_zero() {
                tokio::time::sleep(self.repeat_gap).await;
            }
        }

        self.lock_stats().last_send = Some(Instant::now());
        Ok(())
    }

    async fn rate_limit(&self) {
        let last = self.lock_stats().last_send;
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.min_send_interval {
                tokio::time::sleep(self.min_send_interval - elapsed).await;
            }
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, DispatchStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
