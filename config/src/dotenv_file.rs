//! Read the project `.env` into a key-value map without touching the process env.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::LoadError;

/// `.env` in `override_dir`, else the current directory. `None` when absent.
fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Parsed pairs of `.env`. A missing file is an empty map; later duplicates win.
pub fn load_env_map(override_dir: Option<&Path>) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = dotenv_path(override_dir) else {
        return Ok(HashMap::new());
    };
    let mut out = HashMap::new();
    for item in dotenv::from_path_iter(&path).map_err(LoadError::Dotenv)? {
        let (key, value) = item.map_err(LoadError::Dotenv)?;
        out.insert(key, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(content: &str) -> HashMap<String, String> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), content).unwrap();
        load_env_map(Some(dir.path())).unwrap()
    }

    #[test]
    fn missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn reads_pairs_and_skips_comments() {
        let m = map_of("# gate\nHITL_BACKEND=sqlite\n\nHITL_APPROVAL_TTL_SECS=60\n");
        assert_eq!(m.get("HITL_BACKEND"), Some(&"sqlite".to_string()));
        assert_eq!(m.get("HITL_APPROVAL_TTL_SECS"), Some(&"60".to_string()));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn quoted_values_are_unwrapped() {
        let m = map_of("HITL_SQLITE_PATH=\"/var/lib/hitl state.db\"\nNAME='single'\n");
        assert_eq!(m.get("HITL_SQLITE_PATH"), Some(&"/var/lib/hitl state.db".to_string()));
        assert_eq!(m.get("NAME"), Some(&"single".to_string()));
    }

    #[test]
    fn empty_value_is_kept() {
        let m = map_of("KEY=\nOTHER=val\n");
        assert_eq!(m.get("KEY"), Some(&String::new()));
    }
}
