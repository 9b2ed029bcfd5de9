//! Global settings — defaults, properties-file parsing, and CLI overrides
//! (spec.md §4.B / §6). Grounded on the original's
//! `dockerup/conf.py::settings/properties`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::cli::Cli;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read properties file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("malformed line in {0}: {1:?}")]
    MalformedLine(PathBuf, String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub confdir: PathBuf,
    pub remote: String,
    pub interval: u64,
    pub aws: bool,
    pub pull: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub server: bool,
    /// Any settings keys neither recognized above nor consumed by the CLI,
    /// retained so the inventory merge can still see them (spec.md §4.B:
    /// "top-level scalar settings are last-writer-wins").
    pub extra: HashMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confdir: PathBuf::from("/etc/dockerup/containers.d"),
            remote: "unix://var/run/docker.sock".to_string(),
            interval: 60,
            aws: false,
            pull: true,
            username: None,
            password: None,
            email: None,
            server: false,
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Builds settings from (in priority order, lowest to highest):
    /// built-in defaults, the properties file named in `cli.config` (if it
    /// exists), then explicit CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if cli.config.is_file() {
            let props = properties(&cli.config)?;
            settings.apply_properties(props);
        }

        if let Some(confdir) = &cli.confdir {
            settings.confdir = confdir.clone();
        }
        if let Some(aws) = cli.aws() {
            settings.aws = aws;
        }
        if let Some(pull) = cli.pull() {
            settings.pull = pull;
        }
        if let Some(server) = cli.server() {
            settings.server = server;
        }

        Ok(settings)
    }

    fn apply_properties(&mut self, props: HashMap<String, Value>) {
        for (key, value) in props {
            match key.as_str() {
                "confdir" => {
                    if let Some(s) = value.as_str() {
                        self.confdir = PathBuf::from(s);
                    }
                }
                "remote" => {
                    if let Some(s) = value.as_str() {
                        self.remote = s.to_string();
                    }
                }
                "interval" => {
                    if let Some(n) = value.as_u64() {
                        self.interval = n;
                    } else if let Some(s) = value.as_str() {
                        if let Ok(n) = s.parse() {
                            self.interval = n;
                        }
                    }
                }
                "aws" => {
                    if let Some(b) = value.as_bool() {
                        self.aws = b;
                    }
                }
                "pull" => {
                    if let Some(b) = value.as_bool() {
                        self.pull = b;
                    }
                }
                "server" => {
                    if let Some(b) = value.as_bool() {
                        self.server = b;
                    }
                }
                "username" => self.username = value.as_str().map(str::to_string),
                "password" => self.password = value.as_str().map(str::to_string),
                "email" => self.email = value.as_str().map(str::to_string),
                other => {
                    self.extra.insert(other.to_string(), value);
                }
            }
        }
    }
}

/// Parses a line-based `key=value` properties file. Lines starting with
/// `#` are comments; `true|yes|1` and `false|no|0` (case-insensitive)
/// coerce to booleans, everything else stays a string. Blank lines are
/// skipped.
pub fn properties(path: &Path) -> Result<HashMap<String, Value>, SettingsError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| SettingsError::Read(path.to_path_buf(), e))?;

    let mut config = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(SettingsError::MalformedLine(
                path.to_path_buf(),
                line.to_string(),
            ));
        };
        let key = key.trim().to_string();
        let value = value.trim();
        let coerced = match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => Value::String(value.to_string()),
        };
        config.insert(key, coerced);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_parses_comments_and_booleans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockerup.conf");
        std::fs::write(
            &path,
            "# a comment\naws=true\npull = No\nremote=unix:///var/run/docker.sock\n",
        )
        .unwrap();
        let props = properties(&path).unwrap();
        assert_eq!(props["aws"], Value::Bool(true));
        assert_eq!(props["pull"], Value::Bool(false));
        assert_eq!(
            props["remote"],
            Value::String("unix:///var/run/docker.sock".to_string())
        );
    }

    #[test]
    fn properties_rejects_line_without_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockerup.conf");
        std::fs::write(&path, "not-a-kv-line\n").unwrap();
        assert!(properties(&path).is_err());
    }

    #[test]
    fn defaults_match_original_settings_dict() {
        let settings = Settings::default();
        assert_eq!(settings.confdir, PathBuf::from("/etc/dockerup/containers.d"));
        assert_eq!(settings.remote, "unix://var/run/docker.sock");
        assert_eq!(settings.interval, 60);
        assert!(!settings.aws);
        assert!(settings.pull);
    }
}
