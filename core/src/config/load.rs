use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

/// Get the default outpost data directory: ~/.outpost
pub fn get_outpost_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".outpost"))
}

/// Load config from the default locations, then apply environment overrides.
pub fn load_default() -> anyhow::Result<AppConfig> {
    load(None)
}

/// Load config, preferring `explicit` when given.
///
/// Priority: explicit path > ~/.outpost/config.toml > ./outpost.toml > defaults.
/// Environment variables are applied on top of whichever file won.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut cfg = match explicit {
        Some(path) => read_file(path)?,
        None => {
            let home_config = get_outpost_data_dir()
                .ok()
                .map(|dir| dir.join("config.toml"))
                .filter(|p| p.exists());
            let local_config = Path::new("outpost.toml");

            if let Some(path) = home_config {
                read_file(&path)?
            } else if local_config.exists() {
                read_file(local_config)?
            } else {
                AppConfig::default()
            }
        }
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn read_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

/// Apply `OUTPOST_*` overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("OUTPOST_SERVER_URL") {
        cfg.server.base_url = v;
    }
    if let Some(v) = get("OUTPOST_TOKEN") {
        cfg.server.token = Some(v);
    }
    if let Some(v) = get("OUTPOST_PROJECT") {
        cfg.server.project_id = Some(v);
    }
    if let Some(v) = get("OUTPOST_ENTRY") {
        cfg.runner.entry = v;
    }
}
