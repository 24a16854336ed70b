use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use downlink_client::ClientConfig;
use serde::Deserialize;
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// `~/.downlink/config.toml`. Every field is optional; flags and
/// environment variables override it.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server_url: Option<String>,
    pub idle_timeout_secs: Option<u64>,
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".downlink").join("config.toml"))
}

fn parse_file_config(raw: &str) -> anyhow::Result<FileConfig> {
    toml::from_str(raw).context("parsing config file")
}

pub fn load_file_config() -> anyhow::Result<FileConfig> {
    let Some(path) = config_path() else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_file_config(&raw).with_context(|| format!("in {}", path.display()))
}

/// Resolve the client configuration: `--server` flag (which clap also
/// fills from `DOWNLINK_SERVER_URL`), then the config file, then the
/// local default.
pub fn resolve(server_flag: Option<String>) -> anyhow::Result<ClientConfig> {
    resolve_from(load_file_config()?, server_flag)
}

fn resolve_from(file: FileConfig, server_flag: Option<String>) -> anyhow::Result<ClientConfig> {
    let raw_url = server_flag
        .or(file.server_url)
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    let base_url = Url::parse(&raw_url).with_context(|| format!("invalid server url {raw_url}"))?;

    let mut config = ClientConfig::new(base_url);
    if let Some(secs) = file.idle_timeout_secs {
        config.idle_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses_all_fields() {
        let file = parse_file_config(
            "server_url = \"http://dock.example:4000\"\nidle_timeout_secs = 120\n",
        )
        .expect("parse");
        assert_eq!(
            file.server_url.as_deref(),
            Some("http://dock.example:4000")
        );
        assert_eq!(file.idle_timeout_secs, Some(120));
    }

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let file = parse_file_config("").expect("parse");
        assert!(file.server_url.is_none());
        assert!(file.idle_timeout_secs.is_none());
    }

    #[test]
    fn flag_overrides_file_server_url() {
        let file = FileConfig {
            server_url: Some("http://from-file:1".to_string()),
            idle_timeout_secs: None,
        };
        let config = resolve_from(file, Some("http://from-flag:2".to_string())).expect("resolve");
        assert_eq!(config.base_url.as_str(), "http://from-flag:2/");
    }

    #[test]
    fn file_server_url_used_when_no_flag() {
        let file = FileConfig {
            server_url: Some("http://from-file:1".to_string()),
            idle_timeout_secs: None,
        };
        let config = resolve_from(file, None).expect("resolve");
        assert_eq!(config.base_url.as_str(), "http://from-file:1/");
    }

    #[test]
    fn default_when_nothing_configured() {
        let config = resolve_from(FileConfig::default(), None).expect("resolve");
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:3000/");
    }

    #[test]
    fn idle_timeout_from_file_lands_in_client_config() {
        let file = FileConfig {
            server_url: None,
            idle_timeout_secs: Some(90),
        };
        let config = resolve_from(file, None).expect("resolve");
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        let result = resolve_from(FileConfig::default(), Some("not a url".to_string()));
        assert!(result.is_err());
    }
}
