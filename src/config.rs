//! Configuration management for dev-env.
//!
//! This module resolves the installation root and loads the optional
//! `config.toml` stored inside it.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config.toml";
const ROOT_ENV: &str = "DEV_ENV_HOME";
const ROOT_DIR: &str = "dev-env";
const DEFAULT_PORT: u16 = 8080;

/// Optional settings read from `<root>/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the dashboard binds to (default: 127.0.0.1).
    pub dashboard_host: Option<IpAddr>,
    /// Port the dashboard listens on (default: 8080).
    pub dashboard_port: Option<u16>,
    /// Whether `dashboard` opens the default browser (default: true).
    pub open_browser: Option<bool>,
    /// Whether recorded pids are checked for liveness before being trusted (default: true).
    pub check_liveness: Option<bool>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Loads `<root>/config.toml`, falling back to defaults when it does not exist.
pub fn load_root_config(root: &Path) -> Result<Config> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config(&path)
}

/// Picks the installation root: explicit flag, then `DEV_ENV_HOME`, then `~/dev-env`.
pub fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    if let Some(root) = env::var_os(ROOT_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    home_dir()
        .map(|home| home.join(ROOT_DIR))
        .ok_or_else(|| anyhow!("could not determine home directory; set {}", ROOT_ENV))
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Dashboard settings after applying CLI overrides to the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSettings {
    pub host: IpAddr,
    pub port: u16,
    pub open_browser: bool,
}

impl DashboardSettings {
    pub fn resolve(
        config: &Config,
        host: Option<IpAddr>,
        port: Option<u16>,
        no_browser: bool,
    ) -> Self {
        Self {
            host: host
                .or(config.dashboard_host)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: port.or(config.dashboard_port).unwrap_or(DEFAULT_PORT),
            open_browser: !no_browser && config.open_browser.unwrap_or(true),
        }
    }

    pub fn url(&self) -> String {
        let host = if self.host.is_unspecified() {
            "localhost".to_string()
        } else if self.host.is_ipv6() {
            format!("[{}]", self.host)
        } else {
            self.host.to_string()
        };
        format!("http://{}:{}", host, self.port)
    }
}

impl Config {
    pub fn check_liveness(&self) -> bool {
        self.check_liveness.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
dashboard_host = "0.0.0.0"
dashboard_port = 9090
open_browser = false
check_liveness = false
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.dashboard_host, Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert_eq!(config.dashboard_port, Some(9090));
        assert_eq!(config.open_browser, Some(false));
        assert!(!config.check_liveness());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("dashbaord_port = 1").is_err());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_root_config(dir.path()).unwrap();
        assert!(config.dashboard_port.is_none());
        assert!(config.check_liveness());
    }

    #[test]
    fn unparsable_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "dashboard_port = \"high\"").unwrap();
        let err = load_root_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn explicit_root_wins() {
        let root = resolve_root(Some(PathBuf::from("/tmp/custom-root"))).unwrap();
        assert_eq!(root, PathBuf::from("/tmp/custom-root"));
    }

    #[test]
    fn cli_overrides_config_for_dashboard() {
        let config = Config {
            dashboard_port: Some(9000),
            open_browser: Some(true),
            ..Config::default()
        };
        let settings = DashboardSettings::resolve(&config, None, Some(9100), true);
        assert_eq!(settings.port, 9100);
        assert!(!settings.open_browser);
        assert_eq!(settings.url(), "http://127.0.0.1:9100");

        let defaults = DashboardSettings::resolve(&Config::default(), None, None, false);
        assert_eq!(defaults.port, 8080);
        assert!(defaults.open_browser);
    }

    #[test]
    fn unspecified_host_is_shown_as_localhost() {
        let settings = DashboardSettings {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            open_browser: false,
        };
        assert_eq!(settings.url(), "http://localhost:8080");
    }
}
