use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub listeners: ListenerConfig,

    #[serde(default)]
    pub canary: CanaryConfig,

    #[serde(default)]
    pub geoip: GeoIpConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            listeners: ListenerConfig::default(),
            canary: CanaryConfig::default(),
            geoip: GeoIpConfig::default(),
            limits: LimitsConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/clawtrap/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("clawtrap/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Deployment knobs overridable from the environment
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CLAWTRAP_DATA_DIR") {
            self.general.data_dir = dir;
        }
        if let Ok(prefix) = std::env::var("CLAWTRAP_CANARY_PREFIX") {
            self.canary.prefix = prefix;
        }
        if let Ok(days) = std::env::var("CLAWTRAP_LOG_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                self.general.log_retention_days = days;
            }
        }
        if let Ok(db) = std::env::var("CLAWTRAP_GEOIP_DB") {
            self.geoip.city_db = db;
        }
        if let Ok(db) = std::env::var("CLAWTRAP_GEOIP_ASN_DB") {
            self.geoip.asn_db = db;
        }
    }

    /// Get the data directory root
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.data_dir)
    }

    /// Directory for the daily attack-event logs
    pub fn attacks_dir(&self) -> PathBuf {
        self.data_dir().join("attacks")
    }

    /// Directory for per-session WebSocket frame transcripts
    pub fn ws_sessions_dir(&self) -> PathBuf {
        self.data_dir().join("ws-sessions")
    }

    /// Directory for per-session CDP frame transcripts
    pub fn cdp_sessions_dir(&self) -> PathBuf {
        self.data_dir().join("cdp-sessions")
    }

    /// Path of the persisted stats snapshot
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir().join("stats.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Service name advertised by the deception surfaces
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Root directory for logs and the stats snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Days of per-day logs kept by rotation
    #[serde(default = "default_retention_days")]
    pub log_retention_days: i64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            data_dir: default_data_dir(),
            log_retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address for the deception surfaces
    #[serde(default = "default_host")]
    pub host: String,

    /// Gateway (HTTP/WS) port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Browser-debugging-protocol port
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    /// Canvas surface port
    #[serde(default = "default_canvas_port")]
    pub canvas_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cdp_port: default_cdp_port(),
            canvas_port: default_canvas_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// Prefix embedded in every generated decoy credential
    #[serde(default = "default_canary_prefix")]
    pub prefix: String,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            prefix: default_canary_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to the MaxMind City database
    #[serde(default = "default_city_db")]
    pub city_db: String,

    /// Path to the MaxMind ASN database
    #[serde(default = "default_asn_db")]
    pub asn_db: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            city_db: default_city_db(),
            asn_db: default_asn_db(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// HTTP requests admitted per source IP per second
    #[serde(default = "default_http_per_second")]
    pub http_per_second: u32,

    /// Concurrent stream (WS/CDP) connections per source IP
    #[serde(default = "default_stream_concurrent")]
    pub stream_concurrent: u32,

    /// Inbound frames admitted per session per minute
    #[serde(default = "default_frames_per_minute")]
    pub frames_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            http_per_second: default_http_per_second(),
            stream_concurrent: default_stream_concurrent(),
            frames_per_minute: default_frames_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds between snapshot rebuilds/flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
        }
    }
}

fn default_service_name() -> String {
    "openclaw".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18789
}

fn default_cdp_port() -> u16 {
    18791
}

fn default_canvas_port() -> u16 {
    18793
}

fn default_canary_prefix() -> String {
    "HONEYPOT".to_string()
}

fn default_city_db() -> String {
    "./data/GeoLite2-City.mmdb".to_string()
}

fn default_asn_db() -> String {
    "./data/GeoLite2-ASN.mmdb".to_string()
}

fn default_http_per_second() -> u32 {
    100
}

fn default_stream_concurrent() -> u32 {
    10
}

fn default_frames_per_minute() -> u32 {
    1000
}

fn default_flush_interval() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listeners.port, 18789);
        assert_eq!(config.listeners.cdp_port, 18791);
        assert_eq!(config.canary.prefix, "HONEYPOT");
        assert_eq!(config.general.log_retention_days, 30);
        assert_eq!(config.limits.http_per_second, 100);
        assert_eq!(config.limits.stream_concurrent, 10);
        assert_eq!(config.limits.frames_per_minute, 1000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [general]
            data_dir = "/var/lib/clawtrap"

            [limits]
            stream_concurrent = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.general.data_dir, "/var/lib/clawtrap");
        assert_eq!(config.limits.stream_concurrent, 4);
        // untouched sections keep defaults
        assert_eq!(config.limits.http_per_second, 100);
        assert_eq!(config.listeners.port, 18789);
        assert_eq!(config.stats.flush_interval_secs, 60);
    }

    #[test]
    fn test_derived_paths() {
        let mut config = Config::default();
        config.general.data_dir = "/tmp/trap".to_string();
        assert_eq!(config.attacks_dir(), PathBuf::from("/tmp/trap/attacks"));
        assert_eq!(
            config.ws_sessions_dir(),
            PathBuf::from("/tmp/trap/ws-sessions")
        );
        assert_eq!(
            config.cdp_sessions_dir(),
            PathBuf::from("/tmp/trap/cdp-sessions")
        );
        assert_eq!(config.stats_path(), PathBuf::from("/tmp/trap/stats.json"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.canary.prefix = "TRIPWIRE".to_string();
        config.general.log_retention_days = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.canary.prefix, "TRIPWIRE");
        assert_eq!(loaded.general.log_retention_days, 7);
    }
}
