//! Configuration parsing for the migration daemon.
//!
//! Uses a simple key=value format with `#` comments and optional quoting.
//! Precedence: CLI flags > `--config` file > defaults.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Settings for launching the external migration tool.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program that hosts the migration tool.
    pub tool_bin: PathBuf,
    /// Arguments placed before every tool subcommand (`gh gei ...`).
    pub tool_args: Vec<String>,
    /// File name the generated migration script is written to.
    pub script_name: String,
    /// Parent directory for per-run working directories.
    pub work_root: PathBuf,
    /// Variables copied from the daemon environment into the child.
    pub inherit_env: Vec<String>,
    /// Default API base URL for an Enterprise Server source.
    pub ghes_api_url: Option<String>,
    /// Capacity of each run's output channel, in lines.
    pub output_buffer: usize,
    /// Deadline for script generation in seconds (0 = none).
    pub generate_timeout_sec: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_bin: PathBuf::from("gh"),
            tool_args: vec!["gei".to_string()],
            script_name: "migrate.ps1".to_string(),
            work_root: std::env::temp_dir(),
            inherit_env: vec!["PATH".to_string(), "HOME".to_string()],
            ghes_api_url: None,
            output_buffer: 256,
            generate_timeout_sec: 0,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    pub fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "tool_bin" => self.tool_bin = PathBuf::from(value),
            "tool_args" => {
                self.tool_args = value.split_whitespace().map(String::from).collect();
            }
            "script_name" => {
                if value.is_empty() || value.contains('/') {
                    return Err(ConfigError::InvalidLine(format!(
                        "script_name must be a plain file name, got '{value}'"
                    )));
                }
                self.script_name = value.to_string();
            }
            "work_root" => self.work_root = PathBuf::from(value),
            "inherit_env" => {
                self.inherit_env = value.split_whitespace().map(String::from).collect();
            }
            "ghes_api_url" => {
                self.ghes_api_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "output_buffer" => {
                self.output_buffer = match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(ConfigError::InvalidInt {
                            key: key.to_string(),
                            value: value.to_string(),
                        })
                    }
                };
            }
            "generate_timeout_sec" => {
                self.generate_timeout_sec = value.parse().map_err(|_| ConfigError::InvalidInt {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
            }
            "inherit_home" => {
                let inherit = Self::parse_bool(key, value)?;
                self.inherit_env.retain(|name| name != "HOME");
                if inherit {
                    self.inherit_env.push("HOME".to_string());
                }
            }
            _ => {
                // Warn but don't fail for unknown keys.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Resolve relative paths against the directory holding the config file.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.work_root.is_relative() && !base.as_os_str().is_empty() {
            self.work_root = base.join(&self.work_root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.tool_bin, PathBuf::from("gh"));
        assert_eq!(config.tool_args, vec!["gei"]);
        assert_eq!(config.script_name, "migrate.ps1");
        assert_eq!(config.inherit_env, vec!["PATH", "HOME"]);
        assert!(config.ghes_api_url.is_none());
        assert_eq!(config.output_buffer, 256);
        assert_eq!(config.generate_timeout_sec, 0);
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# tool settings
tool_bin="/usr/local/bin/gh"
tool_args=gei --verbose
script_name='run-all.sh'
ghes_api_url=https://ghes.example.com/api/v3
output_buffer=64
generate_timeout_sec=120
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.tool_bin, PathBuf::from("/usr/local/bin/gh"));
        assert_eq!(config.tool_args, vec!["gei", "--verbose"]);
        assert_eq!(config.script_name, "run-all.sh");
        assert_eq!(
            config.ghes_api_url.as_deref(),
            Some("https://ghes.example.com/api/v3")
        );
        assert_eq!(config.output_buffer, 64);
        assert_eq!(config.generate_timeout_sec, 120);
    }

    #[test]
    fn empty_ghes_api_url_clears_default() {
        let mut config = Config {
            ghes_api_url: Some("https://old".to_string()),
            ..Config::default()
        };
        config.parse_content("ghes_api_url=").unwrap();
        assert!(config.ghes_api_url.is_none());
    }

    #[test]
    fn zero_output_buffer_is_rejected() {
        let mut config = Config::default();
        let err = config.parse_content("output_buffer=0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInt { .. }));
    }

    #[test]
    fn script_name_must_be_plain_file_name() {
        let mut config = Config::default();
        assert!(config.parse_content("script_name=../escape.sh").is_err());
        assert!(config.parse_content("script_name=").is_err());
    }

    #[test]
    fn line_without_equals_is_invalid() {
        let mut config = Config::default();
        let err = config.parse_content("tool_bin").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLine(_)));
    }

    #[test]
    fn inherit_home_toggles_home_propagation() {
        let mut config = Config::default();
        config.parse_content("inherit_home=no").unwrap();
        assert_eq!(config.inherit_env, vec!["PATH"]);
        config.parse_content("inherit_home=yes").unwrap();
        assert_eq!(config.inherit_env, vec!["PATH", "HOME"]);
        assert!(config.parse_content("inherit_home=maybe").is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("colour=blue").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn from_file_resolves_relative_work_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migrator.conf");
        std::fs::write(&path, "work_root=runs\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.work_root, dir.path().join("runs"));
    }

    #[test]
    fn from_file_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("absent.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
