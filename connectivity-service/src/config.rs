//! Where the service keeps its settings.

use anyhow::{Context, anyhow};
use std::ffi::OsString;
use std::path::PathBuf;

/// Points the settings store at another directory.
pub const SETTINGS_PATH_ENV: &str = "CONNECTIVITY_SETTINGS_PATH";

const SETTINGS_DIR_NAME: &str = "connectivity-service";

fn resolve(env_override: Option<OsString>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    match env_override {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => config_dir.map(|dir| dir.join(SETTINGS_DIR_NAME)),
    }
}

/// The settings directory, created if missing.
pub fn settings_dir() -> anyhow::Result<PathBuf> {
    let dir = resolve(std::env::var_os(SETTINGS_PATH_ENV), dirs::config_dir())
        .ok_or_else(|| anyhow!("No configuration directory; set {SETTINGS_PATH_ENV}"))?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create settings directory {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let dir = resolve(
            Some(OsString::from("/tmp/scratch")),
            Some(PathBuf::from("/home/u/.config")),
        );
        assert_eq!(dir, Some(PathBuf::from("/tmp/scratch")));
    }

    #[test]
    fn falls_back_to_config_dir() {
        let config = Some(PathBuf::from("/home/u/.config"));
        assert_eq!(
            resolve(None, config.clone()),
            Some(PathBuf::from("/home/u/.config/connectivity-service"))
        );
        assert_eq!(
            resolve(Some(OsString::new()), config),
            Some(PathBuf::from("/home/u/.config/connectivity-service"))
        );
        assert_eq!(resolve(None, None), None);
    }
}
