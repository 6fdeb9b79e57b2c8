//! Gate configuration from environment variables.
//!
//! Call `config::load_and_apply` first so `.env` and the XDG `config.toml` are already in
//! the process environment; this module only reads `std::env`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::approval::RiskBands;
use crate::checkpoint::BackendKind;
use crate::error::GateError;
use crate::policy::AutomationLevel;

pub const ENV_DEFAULT_AUTOMATION_LEVEL: &str = "HITL_DEFAULT_AUTOMATION_LEVEL";
pub const ENV_RISK_LOW_THRESHOLD: &str = "HITL_RISK_LOW_THRESHOLD";
pub const ENV_RISK_HIGH_THRESHOLD: &str = "HITL_RISK_HIGH_THRESHOLD";
pub const ENV_APPROVAL_TTL_SECS: &str = "HITL_APPROVAL_TTL_SECS";
pub const ENV_SESSION_TTL_SECS: &str = "HITL_SESSION_TTL_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "HITL_SWEEP_INTERVAL_SECS";
pub const ENV_BACKEND: &str = "HITL_BACKEND";
pub const ENV_SQLITE_PATH: &str = "HITL_SQLITE_PATH";
pub const ENV_SUBSCRIBER_CAPACITY: &str = "HITL_SUBSCRIBER_CAPACITY";

/// Gate configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct GateConfig {
    /// Level for sessions created without one.
    pub default_automation_level: AutomationLevel,
    pub risk_bands: RiskBands,
    /// Pending approvals older than this are expired as rejected.
    pub approval_ttl: Duration,
    /// Sessions idle longer than this are soft-expired.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub backend: BackendKind,
    pub sqlite_path: PathBuf,
    /// Live events buffered per conversation before a subscriber lags.
    pub subscriber_capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_automation_level: AutomationLevel::Copilot,
            risk_bands: RiskBands::default(),
            approval_ttl: Duration::from_secs(900),
            session_ttl: Duration::from_secs(86_400),
            sweep_interval: Duration::from_secs(30),
            backend: BackendKind::Memory,
            sqlite_path: PathBuf::from("hitl.db"),
            subscriber_capacity: 256,
        }
    }
}

/// Parses `name` when set. Unparsable values fall back to the default with a warning.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "unparsable value; using default");
            None
        }
    }
}

impl GateConfig {
    /// Builds the config from `HITL_*` variables over [`Default`].
    ///
    /// Unset or unparsable numbers keep their defaults. An unmapped automation level, an
    /// unknown backend, or risk bands with `low >= high` are configuration errors.
    pub fn from_env() -> Result<Self, GateError> {
        let default = Self::default();

        let default_automation_level = match env_parse::<u8>(ENV_DEFAULT_AUTOMATION_LEVEL) {
            Some(code) => AutomationLevel::try_from(code)?,
            None => default.default_automation_level,
        };
        let risk_bands = RiskBands::new(
            env_parse(ENV_RISK_LOW_THRESHOLD).unwrap_or(default.risk_bands.low()),
            env_parse(ENV_RISK_HIGH_THRESHOLD).unwrap_or(default.risk_bands.high()),
        )?;
        let backend = match std::env::var(ENV_BACKEND) {
            Ok(raw) if !raw.trim().is_empty() => BackendKind::from_str(&raw)?,
            _ => default.backend,
        };
        let secs = |name: &str, fallback: Duration| {
            env_parse::<u64>(name)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Ok(Self {
            default_automation_level,
            risk_bands,
            approval_ttl: secs(ENV_APPROVAL_TTL_SECS, default.approval_ttl),
            session_ttl: secs(ENV_SESSION_TTL_SECS, default.session_ttl),
            sweep_interval: secs(ENV_SWEEP_INTERVAL_SECS, default.sweep_interval),
            backend,
            sqlite_path: std::env::var(ENV_SQLITE_PATH)
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.sqlite_path),
            subscriber_capacity: env_parse(ENV_SUBSCRIBER_CAPACITY)
                .unwrap_or(default.subscriber_capacity),
        })
    }

    pub(crate) fn approval_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.approval_ttl)
    }

    pub(crate) fn session_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.session_ttl)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Env is process-global; serialize the tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear() {
        for name in [
            ENV_DEFAULT_AUTOMATION_LEVEL,
            ENV_RISK_LOW_THRESHOLD,
            ENV_RISK_HIGH_THRESHOLD,
            ENV_APPROVAL_TTL_SECS,
            ENV_SESSION_TTL_SECS,
            ENV_SWEEP_INTERVAL_SECS,
            ENV_BACKEND,
            ENV_SQLITE_PATH,
            ENV_SUBSCRIBER_CAPACITY,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn unset_env_yields_defaults() {
        let _g = ENV_LOCK.lock().unwrap();
        clear();
        assert_eq!(GateConfig::from_env().unwrap(), GateConfig::default());
    }

    #[test]
    fn env_overrides_and_unparsable_fallback() {
        let _g = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var(ENV_DEFAULT_AUTOMATION_LEVEL, "1");
        std::env::set_var(ENV_APPROVAL_TTL_SECS, "60");
        std::env::set_var(ENV_SESSION_TTL_SECS, "soon");
        std::env::set_var(ENV_BACKEND, "sqlite");
        let cfg = GateConfig::from_env().unwrap();
        clear();
        assert_eq!(cfg.default_automation_level, AutomationLevel::Pilot);
        assert_eq!(cfg.approval_ttl, Duration::from_secs(60));
        assert_eq!(cfg.session_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.backend, BackendKind::Sqlite);
    }

    #[test]
    fn inverted_bands_and_unmapped_level_fail() {
        let _g = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var(ENV_RISK_LOW_THRESHOLD, "100");
        std::env::set_var(ENV_RISK_HIGH_THRESHOLD, "10");
        assert!(matches!(
            GateConfig::from_env(),
            Err(GateError::Configuration(_))
        ));
        clear();
        std::env::set_var(ENV_DEFAULT_AUTOMATION_LEVEL, "7");
        let res = GateConfig::from_env();
        clear();
        assert!(matches!(res, Err(GateError::Configuration(_))));
    }
}
