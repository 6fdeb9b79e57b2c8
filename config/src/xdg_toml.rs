//! Load `[env]` and `[gate]` tables from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::LoadError;

/// `$XDG_CONFIG_HOME` when set, else the platform config dir.
fn config_home() -> Result<PathBuf, LoadError> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir().ok_or_else(|| LoadError::XdgPath("no config directory for this platform".into()))
}

fn xdg_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let path = config_home()?.join(app_name).join("config.toml");
    if path.is_file() {
        Ok(Some(path))
    } else {
        Ok(None)
    }
}

/// Typed `[gate]` table. Each key maps to one `HITL_*` variable.
///
/// ```toml
/// [gate]
/// default_automation_level = 2
/// risk_low_threshold = 5000000
/// backend = "sqlite"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSection {
    pub default_automation_level: Option<u8>,
    pub risk_low_threshold: Option<u64>,
    pub risk_high_threshold: Option<u64>,
    pub approval_ttl_secs: Option<u64>,
    pub session_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub backend: Option<String>,
    pub sqlite_path: Option<String>,
    pub subscriber_capacity: Option<usize>,
    pub serve_addr: Option<String>,
}

impl GateSection {
    /// Set keys as `HITL_*` environment pairs.
    pub fn to_env_map(&self) -> HashMap<String, String> {
        let pairs = [
            ("HITL_DEFAULT_AUTOMATION_LEVEL", self.default_automation_level.map(|v| v.to_string())),
            ("HITL_RISK_LOW_THRESHOLD", self.risk_low_threshold.map(|v| v.to_string())),
            ("HITL_RISK_HIGH_THRESHOLD", self.risk_high_threshold.map(|v| v.to_string())),
            ("HITL_APPROVAL_TTL_SECS", self.approval_ttl_secs.map(|v| v.to_string())),
            ("HITL_SESSION_TTL_SECS", self.session_ttl_secs.map(|v| v.to_string())),
            ("HITL_SWEEP_INTERVAL_SECS", self.sweep_interval_secs.map(|v| v.to_string())),
            ("HITL_BACKEND", self.backend.clone()),
            ("HITL_SQLITE_PATH", self.sqlite_path.clone()),
            ("HITL_SUBSCRIBER_CAPACITY", self.subscriber_capacity.map(|v| v.to_string())),
            ("HITL_SERVE_ADDR", self.serve_addr.clone()),
        ];
        pairs
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
            .collect()
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    gate: GateSection,
}

/// Env pairs from the XDG file: `[gate]` keys, then `[env]` entries over them.
/// Missing file returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match xdg_config_path(app_name)? {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    let mut map = config.gate.to_env_map();
    map.extend(config.env);
    Ok(map)
}
