//! Load configuration from XDG `config.toml` and project `.env`, then apply to the process
//! environment with priority: **existing env > .env > XDG**.
//!
//! The XDG file has two tables:
//!
//! | Table | Applied as |
//! |-------|-----------|
//! | `[env]` | Arbitrary `KEY = "value"` pairs, verbatim. |
//! | `[gate]` | Typed gate settings ([`GateSection`]), each mapped to its `HITL_*` variable. `[env]` wins when both name the same variable. |
//!
//! The gate reads only `std::env`, so call [`load_and_apply`] before building its config.

mod dotenv_file;
mod xdg_toml;

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

pub use xdg_toml::GateSection;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    Dotenv(::dotenv::Error),
}

/// Loads `$XDG_CONFIG_HOME/<app_name>/config.toml` and the project `.env`, then sets each key
/// that is **not** already in the process environment.
///
/// * `app_name`: e.g. `"hitl"`; the XDG path is `~/.config/<app_name>/config.toml`.
/// * `override_dir`: look for `.env` here instead of the current directory.
///
/// Returns the keys that were set.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<Vec<String>, LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv_file::load_env_map(override_dir)?;

    let mut keys: HashSet<&String> = xdg_map.keys().collect();
    keys.extend(dotenv_map.keys());

    let mut applied = Vec::new();
    for key in keys {
        if std::env::var_os(key).is_some() {
            continue;
        }
        if let Some(v) = dotenv_map.get(key).or_else(|| xdg_map.get(key)) {
            std::env::set_var(key, v);
            applied.push(key.clone());
        }
    }
    applied.sort();
    Ok(applied)
}

/// Env is process-global; tests touching it serialize on this lock.
#[cfg(test)]
pub(crate) mod test_env {
    use std::path::Path;
    use std::sync::Mutex;

    pub static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Runs `f` with `XDG_CONFIG_HOME` pointed at `dir`, restoring it afterwards.
    pub fn with_xdg_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let prev = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }
}
