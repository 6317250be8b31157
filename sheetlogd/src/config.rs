use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::sync::event_filter::TerminalKind;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const DEFAULT_WATCH_DIR_NAME: &str = "Downloads";
const DEFAULT_WATCH_EXTENSION: &str = "torrent";
const DEFAULT_CLIENT_SECRET: &str = "credentials/google-spreadsheet/client_secret.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config field `{0}` must not be empty")]
    EmptyField(&'static str),
}

/// Which spreadsheet and sheet receive the rows. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerLocation {
    #[serde(rename = "spreadsheetID")]
    pub spreadsheet_id: String,
    #[serde(rename = "sheetName")]
    pub sheet_name: String,
}

impl LedgerLocation {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let location: Self = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        if location.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::EmptyField("spreadsheetID"));
        }
        if location.sheet_name.trim().is_empty() {
            return Err(ConfigError::EmptyField("sheetName"));
        }
        Ok(location)
    }
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub config_path: PathBuf,
    pub watch_dir: PathBuf,
    pub extension: String,
    pub terminal_kind: TerminalKind,
    pub client_secret_path: PathBuf,
    pub credential_cache_path: PathBuf,
    pub request_timeout: Duration,
    pub sheets_base_url: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let config_path = match std::env::var("SHEETLOG_CONFIG") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => std::env::current_dir()
                .context("working directory is unavailable")?
                .join(DEFAULT_CONFIG_FILE),
        };
        let watch_dir = std::env::var("SHEETLOG_WATCH_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_WATCH_DIR_NAME));
        let extension = std::env::var("SHEETLOG_WATCH_EXTENSION")
            .ok()
            .map(|value| value.trim().trim_start_matches('.').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_WATCH_EXTENSION.to_string());
        let terminal_kind = match std::env::var("SHEETLOG_TERMINAL_EVENT") {
            Ok(value) => value
                .parse::<TerminalKind>()
                .context("invalid SHEETLOG_TERMINAL_EVENT")?,
            Err(_) => TerminalKind::default(),
        };
        let client_secret_path = std::env::var("SHEETLOG_CLIENT_SECRET")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_CLIENT_SECRET));
        let credential_cache_path = match std::env::var("SHEETLOG_CREDENTIAL_CACHE") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => crate::storage::default_cache_path()?,
        };
        let request_timeout = Duration::from_secs(read_u64_env(
            "SHEETLOG_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));
        let sheets_base_url = std::env::var("SHEETLOG_SHEETS_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Ok(Self {
            config_path,
            watch_dir,
            extension,
            terminal_kind,
            client_secret_path,
            credential_cache_path,
            request_timeout,
            sheets_base_url,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ledger_location() {
        let location =
            LedgerLocation::parse("spreadsheetID: 1BxiMVs0XRA5\nsheetName: Downloads\n").unwrap();
        assert_eq!(location.spreadsheet_id, "1BxiMVs0XRA5");
        assert_eq!(location.sheet_name, "Downloads");
    }

    #[test]
    fn accepts_json_shaped_config() {
        let location =
            LedgerLocation::parse(r#"{"spreadsheetID": "abc", "sheetName": "Sheet1"}"#).unwrap();
        assert_eq!(location.sheet_name, "Sheet1");
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let err = LedgerLocation::parse("spreadsheetID: abc\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_field_is_rejected() {
        let err = LedgerLocation::parse("spreadsheetID: abc\nsheetName: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyField("sheetName")));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let err = LedgerLocation::load(&path).unwrap_err();
        match err {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_attaches_path_to_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "spreadsheetID: [unclosed").unwrap();
        let err = LedgerLocation::load(&path).unwrap_err();
        match err {
            ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expands_tilde_to_home() {
        let home = PathBuf::from("/tmp/home-user");
        assert_eq!(
            expand_with_home("~/Downloads", &home),
            PathBuf::from("/tmp/home-user/Downloads")
        );
        assert_eq!(expand_with_home("~", &home), home);
        assert_eq!(expand_with_home("/srv/in", &home), PathBuf::from("/srv/in"));
    }

    #[test]
    fn reads_timeouts_from_env_or_default() {
        assert_eq!(read_u64_env("NO_SUCH_SHEETLOG_ENV_FOR_TEST", 30), 30);
    }
}
