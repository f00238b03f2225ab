//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "PLATTER_ROOT";

/// Configuration file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "platter.toml";

/// Logging section shared by every binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_path: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    let config_path = config_path.map(Path::to_path_buf).or_else(default_config_path);
    if let Some(config_path) = config_path {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Default configuration file path for the platform (`~/.config/platter/platter.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("platter").join(CONFIG_FILE_NAME))
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("platter"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/platter"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("platter"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/platter"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("platter"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\platter"))
    } else {
        PathBuf::from("./platter_data")
    }
}

/// Load a TOML configuration file, falling back to defaults when it does not exist
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML configuration file atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    {
        // Config may carry API keys
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Creates the root folder layout on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder (and cache folder) if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.cache_path())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Catalog database location
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("platter.db")
    }

    /// Default directory for lookup caches
    pub fn cache_path(&self) -> PathBuf {
        self.root_folder.join("cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        root_folder: Option<String>,
        logging: LoggingConfig,
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        std::env::set_var("PLATTER_TEST_ROOT_A", "/from/env");
        let path = resolve_root_folder(Some("/from/cli"), "PLATTER_TEST_ROOT_A", None);
        assert_eq!(path, PathBuf::from("/from/cli"));
        std::env::remove_var("PLATTER_TEST_ROOT_A");
    }

    #[test]
    #[serial]
    fn test_env_var_beats_toml() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "root_folder = \"/from/toml\"\n").unwrap();

        std::env::set_var("PLATTER_TEST_ROOT_B", "/from/env");
        let path = resolve_root_folder(None, "PLATTER_TEST_ROOT_B", Some(&config_path));
        assert_eq!(path, PathBuf::from("/from/env"));
        std::env::remove_var("PLATTER_TEST_ROOT_B");

        let path = resolve_root_folder(None, "PLATTER_TEST_ROOT_B", Some(&config_path));
        assert_eq!(path, PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_missing_config_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded: Sample = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Sample::default());
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let sample = Sample {
            root_folder: Some("/data/platter".to_string()),
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        };

        write_toml_config(&sample, &path).unwrap();
        let loaded: Sample = load_toml_config(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "root_folder = [unterminated").unwrap();
        let result: Result<Sample> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_initializer_creates_layout() {
        let dir = TempDir::new().unwrap();
        let init = RootFolderInitializer::new(dir.path().join("root"));
        init.ensure_directory_exists().unwrap();
        assert!(init.cache_path().is_dir());
        assert_eq!(init.database_path(), dir.path().join("root").join("platter.db"));
    }
}
