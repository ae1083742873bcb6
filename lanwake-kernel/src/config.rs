use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_WAKE_COMMAND: &str = "/usr/sbin/etherwake -i {iface} {mac}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lan_iface: String,
    pub broadcast: String,
    pub wol_method: String,
    /// Template for the external wake utility; `{iface}`, `{mac}`,
    /// `{target}` and `{ip}` are substituted per word.
    pub wol_command: String,
    pub targets_path: PathBuf,
    pub log_path: PathBuf,
    pub log_retention_days: i64,
    pub log_max_limit: usize,
    pub host: String,
    pub port: u16,
    /// Target written into a registry file that does not exist yet.
    pub seed: Option<SeedTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedTarget {
    pub label: String,
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lan_iface: "eno1".into(),
            broadcast: "192.168.219.255".into(),
            wol_method: "magic-packet".into(),
            wol_command: DEFAULT_WAKE_COMMAND.into(),
            targets_path: PathBuf::from("data/targets.json"),
            log_path: PathBuf::from("logs/lanwake.jsonl"),
            log_retention_days: 7,
            log_max_limit: 500,
            host: "127.0.0.1".into(),
            port: 8000,
            seed: None,
        }
    }
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `LANWAKE_CONFIG` (default `lanwake.yaml`), then process environment.
pub async fn load_settings() -> Settings {
    let path = std::env::var("LANWAKE_CONFIG").unwrap_or_else(|_| "lanwake.yaml".into());
    let mut settings = read_settings_file(Path::new(&path)).await;
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

async fn read_settings_file(path: &Path) -> Settings {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Settings::default();
    }
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return Settings::default();
        }
    };
    if text.trim().is_empty() {
        return Settings::default();
    }
    serde_yaml::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        Settings::default()
    })
}

/// Overrides `settings` from `lookup` (the environment in production).
/// Integers that fail to parse fall back to the built-in default.
pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let defaults = Settings::default();

    if let Some(v) = lookup("LAN_IFACE") {
        settings.lan_iface = v;
    }
    if let Some(v) = lookup("BROADCAST") {
        settings.broadcast = v;
    }
    if let Some(v) = lookup("WOL_METHOD") {
        settings.wol_method = v.trim().to_lowercase();
    }
    if let Some(v) = lookup("WOL_COMMAND") {
        settings.wol_command = v;
    }
    if let Some(v) = lookup("TARGETS_FILE") {
        settings.targets_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("LOG_PATH") {
        settings.log_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("LOG_RETENTION_DAYS") {
        settings.log_retention_days = v.trim().parse().unwrap_or(defaults.log_retention_days);
    }
    if let Some(v) = lookup("LOG_MAX_LIMIT") {
        settings.log_max_limit = v.trim().parse().unwrap_or(defaults.log_max_limit);
    }
    if let Some(v) = lookup("HOST") {
        settings.host = v;
    }
    if let Some(v) = lookup("PORT") {
        settings.port = v.trim().parse().unwrap_or(defaults.port);
    }

    let label = lookup("PC_LABEL").filter(|v| !v.trim().is_empty());
    let ip = lookup("PC_IP").filter(|v| !v.trim().is_empty());
    if let (Some(label), Some(ip)) = (label, ip) {
        settings.seed = Some(SeedTarget {
            label,
            ip,
            mac: lookup("PC_MAC").filter(|v| !v.trim().is_empty()),
        });
    }
}
