use std::path::PathBuf;
use std::time::Duration;

/// Process-level settings, read from `VETSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5480,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            port: parsed("VETSLOT_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(d.port),
            bind: lookup("VETSLOT_BIND").unwrap_or(d.bind),
            data_dir: lookup("VETSLOT_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            max_connections: parsed("VETSLOT_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .map(|n| n as usize)
                .unwrap_or(d.max_connections),
            compact_threshold: parsed("VETSLOT_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed("VETSLOT_METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            sweep_interval: parsed("VETSLOT_SWEEP_INTERVAL_SECS")
                .filter(|&s| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
