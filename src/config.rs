use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubedrop-env";
pub const CONFIG_PATH_ENV: &str = "TUBEDROP_CONFIG";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_WORK_ROOT: &str = "/srv/tubedrop";
pub const DEFAULT_CATALOG_URL: &str = "http://127.0.0.1:9090";

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub work_root: Option<PathBuf>,
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub catalog_url: Option<String>,
    pub catalog_token: Option<String>,
}

/// Fully-resolved settings the backend runs with.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub work_root: PathBuf,
    pub listen_host: String,
    pub listen_port: u16,
    pub catalog_url: String,
    pub catalog_token: Option<String>,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key {
                "WORK_ROOT" => cfg.work_root = Some(PathBuf::from(value)),
                "LISTEN_HOST" => {
                    if !value.is_empty() {
                        cfg.listen_host = Some(value.to_string());
                    }
                }
                "LISTEN_PORT" => {
                    let port: u16 = value
                        .parse()
                        .with_context(|| format!("Parsing LISTEN_PORT from {}", path.display()))?;
                    cfg.listen_port = Some(port);
                }
                "CATALOG_URL" => {
                    if !value.is_empty() {
                        cfg.catalog_url = Some(value.to_string());
                    }
                }
                "CATALOG_TOKEN" => {
                    if !value.is_empty() {
                        cfg.catalog_token = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    load_runtime_config_from(path)
}

/// Resolves the runtime settings, applying defaults for everything the config
/// file leaves out. A missing file is not an error; the defaults stand in.
pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let cfg = read_env_config(path)?.unwrap_or_default();
    let work_root = cfg
        .work_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_ROOT));
    let listen_host = cfg
        .listen_host
        .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
    let listen_port = cfg.listen_port.unwrap_or(DEFAULT_LISTEN_PORT);
    let catalog_url = cfg
        .catalog_url
        .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());
    Ok(RuntimeConfig {
        work_root,
        listen_host,
        listen_port,
        catalog_url,
        catalog_token: cfg.catalog_token,
    })
}
