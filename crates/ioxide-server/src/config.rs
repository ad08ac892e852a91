use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `server.init_file`
pub const INIT_ENV: &str = "IOXIDE_INIT";

#[derive(Debug)]
pub enum ConfigLoadError {
    NoConfigDir,
    ParseError(String),
    IoError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::NoConfigDir => write!(f, "Could not determine a config directory"),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigLoadError::IoError(msg) => write!(f, "IO error reading config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Port, `port@host` or `host:port` to accept sessions on
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_backlog")]
    pub backlog: u32,

    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Scheme file every new session loads before its first prompt
    #[serde(default)]
    pub init_file: Option<PathBuf>,
}

fn default_listen() -> String {
    "8642".to_string()
}

fn default_backlog() -> u32 {
    16
}

fn default_prompt() -> String {
    "> ".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            prompt: default_prompt(),
            init_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Also log to `<data dir>/logs/<component>.log`
    #[serde(default)]
    pub file: bool,
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Nothing at this path, so every setting is a default
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "config from {}", path.display()),
            ConfigSource::Defaults(path) => {
                write!(f, "default config (no file at {})", path.display())
            }
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ioxide")
}

impl ServerConfig {
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        let dirs = project_dirs().ok_or(ConfigLoadError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load from the platform config directory, falling back to defaults
    /// when there is no config file. Logging is set up from the result, so
    /// the caller reports the source once it is.
    pub fn load() -> Result<(Self, ConfigSource), ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<(Self, ConfigSource), ConfigLoadError> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Apply `IOXIDE_INIT` if it is set
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var(INIT_ENV) {
            if !path.is_empty() {
                self.server.init_file = Some(PathBuf::from(path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let (config, source) = ServerConfig::load_from(&path).unwrap();
        assert_eq!(source, ConfigSource::Defaults(path.clone()));
        assert!(source.to_string().contains("no file at"));
        assert_eq!(config.server.listen, "8642");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.prompt, "> ");
        assert!(config.server.init_file.is_none());
        assert!(!config.logging.file);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
listen = "9000@127.0.0.1"
init_file = "/etc/ioxide/init.scm"

[logging]
file = true
"#,
        )
        .unwrap();

        let (config, source) = ServerConfig::load_from(&path).unwrap();
        assert_eq!(source, ConfigSource::File(path.clone()));
        assert_eq!(source.to_string(), format!("config from {}", path.display()));
        assert_eq!(config.server.listen, "9000@127.0.0.1");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(
            config.server.init_file.as_deref(),
            Some(Path::new("/etc/ioxide/init.scm"))
        );
        assert!(config.logging.file);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nbacklog = \"lots\"\n").unwrap();
        assert!(matches!(
            ServerConfig::load_from(&path),
            Err(ConfigLoadError::ParseError(_))
        ));
    }

    #[test]
    fn test_config_path_names_the_project() {
        if let Ok(path) = ServerConfig::config_path() {
            assert!(path.to_string_lossy().contains("ioxide"));
            assert!(path.ends_with("config.toml"));
        }
    }
}
