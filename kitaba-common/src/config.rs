//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`KITABA_ROOT_FOLDER`, then `KITABA_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! Application settings live in `kitaba.toml` inside the root folder. A missing
//! or unreadable file never aborts startup: defaults are used and a warning is
//! logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary environment variable for the root folder
pub const ROOT_FOLDER_ENV: &str = "KITABA_ROOT_FOLDER";
/// Alternative environment variable for the root folder
pub const ROOT_ENV: &str = "KITABA_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "kitaba.db";
/// Application settings file name inside the root folder
pub const SETTINGS_FILE: &str = "kitaba.toml";

/// Default Gemini REST endpoint (without the model path)
pub const DEFAULT_INFERENCE_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default multimodal model
pub const DEFAULT_INFERENCE_MODEL: &str = "gemini-2.0-flash";
/// Default HTTP port for kitaba-ui
pub const DEFAULT_PORT: u16 = 5780;
/// Default duration of the "Saved" confirmation after a correction
pub const DEFAULT_SAVED_FLASH_MS: u64 = 2000;

/// Compiled defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    /// Filter level used when `RUST_LOG` is not set
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/kitaba (or /var/lib/kitaba for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("kitaba"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/kitaba"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/kitaba
        dirs::data_dir()
            .map(|d| d.join("kitaba"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/kitaba"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\kitaba
        dirs::data_local_dir()
            .map(|d| d.join("kitaba"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\kitaba"))
    } else {
        PathBuf::from("./kitaba_data")
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Remote inference endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// API key passed as the `key` query parameter; detection is refused without it
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    /// Optional client-side timeout; none by default
    pub timeout_secs: Option<u64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_INFERENCE_ENDPOINT.to_string(),
            model: DEFAULT_INFERENCE_MODEL.to_string(),
            timeout_secs: None,
        }
    }
}

impl InferenceConfig {
    /// The configured key, ignoring blank values
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Session settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Custom token used for the one startup sign-in instead of an anonymous identity
    pub initial_auth_token: Option<String>,
}

/// Presentation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub saved_flash_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            saved_flash_ms: DEFAULT_SAVED_FLASH_MS,
        }
    }
}

/// Settings file contents (`kitaba.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub auth: AuthConfig,
    pub ui: UiConfig,
}

/// Parse a settings file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}

/// Load a settings file, falling back to defaults when it is missing or invalid
pub fn load_toml_config_or_default(path: &Path) -> TomlConfig {
    if !path.exists() {
        debug!("No settings file at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring settings file {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variables
        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(config_path) = self.user_config_path() {
            if config_path.exists() {
                match load_toml_config(&config_path) {
                    Ok(TomlConfig {
                        root_folder: Some(root),
                        ..
                    }) => return root,
                    Ok(_) => {}
                    Err(e) => warn!("{}: {}", self.module_name, e),
                }
            }
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }

    /// `~/.config/kitaba/<module>.toml`
    fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| {
            d.join("kitaba")
                .join(format!("{}.toml", self.module_name))
        })
    }
}

/// Creates the root folder and locates the files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
        }
        if !self.root_folder.is_dir() {
            return Err(Error::Config(format!(
                "Root folder is not a directory: {}",
                self.root_folder.display()
            )));
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root_folder.join(SETTINGS_FILE)
    }
}
