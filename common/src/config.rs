use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub auth_secret: String,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_secret: String::new(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RfConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub repeat_count: u8,
    pub repeat_gap_ms: u64,
    pub min_send_interval_ms: u64,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "codesend".to_string(),
            args: Vec::new(),
            repeat_count: 1,
            repeat_gap_ms: 50,
            min_send_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: String,
    pub baud_rate: u32,
    pub source_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9_600,
            source_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub default_poll_interval_secs: u64,
    pub min_poll_interval_secs: u64,
    pub loop_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_secs: 1,
            min_poll_interval_secs: 1,
            loop_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: String,
    pub archive_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: "HomeAutomation.log".to_string(),
            archive_dir: "Archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub rf: RfConfig,
    pub gateway: GatewayConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub timezone: String,
    pub http_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            rf: RfConfig::default(),
            gateway: GatewayConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            timezone: "UTC".to_string(),
            http_port: 8080,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.store.sanitize();
        self.rf.sanitize();
        self.gateway.sanitize();
        self.sync.sanitize();

        if self.logging.file.trim().is_empty() {
            self.logging.file = LoggingConfig::default().file;
        }
        if self.logging.archive_dir.trim().is_empty() {
            self.logging.archive_dir = LoggingConfig::default().archive_dir;
        }
        if self.timezone.trim().is_empty() {
            self.timezone = "UTC".to_string();
        }
    }
}

impl StoreConfig {
    pub fn sanitize(&mut self) {
        self.url = self.url.trim().trim_end_matches('/').to_string();
        self.timeout_ms = self.timeout_ms.clamp(500, 60_000);
    }
}

impl RfConfig {
    pub fn sanitize(&mut self) {
        if self.program.trim().is_empty() {
            self.program = RfConfig::default().program;
        }
        self.repeat_count = self.repeat_count.clamp(1, 10);
        self.repeat_gap_ms = self.repeat_gap_ms.min(5_000);
        self.min_send_interval_ms = self.min_send_interval_ms.min(5_000);
    }
}

impl GatewayConfig {
    pub fn sanitize(&mut self) {
        self.port = self.port.trim().to_string();
        if self.baud_rate == 0 {
            self.baud_rate = 9_600;
        }
        if self
            .source_id
            .as_deref()
            .is_some_and(|source| source.trim().is_empty())
        {
            self.source_id = None;
        }
    }
}

impl SyncConfig {
    pub fn sanitize(&mut self) {
        self.min_poll_interval_secs = self.min_poll_interval_secs.max(1);
        self.default_poll_interval_secs = self
            .default_poll_interval_secs
            .max(self.min_poll_interval_secs);
        self.loop_delay_ms = self.loop_delay_ms.clamp(50, 60_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = RuntimeConfig::default();
        config.store.url = " https://example.firebaseio.com/ ".to_string();
        config.store.timeout_ms = 1;
        config.rf.program = String::new();
        config.rf.repeat_count = 0;
        config.gateway.baud_rate = 0;
        config.gateway.source_id = Some("  ".to_string());
        config.sync.min_poll_interval_secs = 0;
        config.sync.default_poll_interval_secs = 0;
        config.sync.loop_delay_ms = 0;
        config.timezone = String::new();

        config.sanitize();

        assert_eq!(config.store.url, "https://example.firebaseio.com");
        assert_eq!(config.store.timeout_ms, 500);
        assert_eq!(config.rf.program, "codesend");
        assert_eq!(config.rf.repeat_count, 1);
        assert_eq!(config.gateway.baud_rate, 9_600);
        assert_eq!(config.gateway.source_id, None);
        assert_eq!(config.sync.min_poll_interval_secs, 1);
        assert_eq!(config.sync.default_poll_interval_secs, 1);
        assert_eq!(config.sync.loop_delay_ms, 50);
        assert_eq!(config.timezone, "UTC");
    }

    #[test]
    fn partial_document_fills_missing_sections() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"timezone":"Europe/London","http_port":0}"#).unwrap();

        assert_eq!(config.timezone, "Europe/London");
        assert_eq!(config.http_port, 0);
        assert_eq!(config.rf, RfConfig::default());
        assert_eq!(config.sync, SyncConfig::default());
    }
}
