// =============================================================================
// CONFIGURATION - Load settings from renderer.toml
// =============================================================================
//
// This module handles loading and parsing configuration from renderer.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Default location looked up by `RendererConfig::load`
pub const CONFIG_FILE: &str = "renderer.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RendererConfig {
    pub app: AppConfig,
    pub device: DeviceConfig,
    pub graphics: GraphicsConfig,
    pub window: WindowConfig,
    pub debug: DebugConfig,
}

/// Identity reported to the Vulkan instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: [u32; 3],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Quantum Engine".to_string(),
            version: [3, 0, 0],
        }
    }
}

/// Device bring-up settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Only honoured in debug builds, and only if the layer is installed
    pub validation_layers: bool,
    pub api_version: [u32; 3],
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validation_layers: false,
            api_version: [1, 3, 0],
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.1, 0.15, 1.0],
        }
    }
}

/// Window settings (demo binary)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Quantum Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_to_file: false,
            log_file: "qe_renderer.log".to_string(),
        }
    }
}

impl DebugConfig {
    /// Truncate the configured log file and write a run header.
    /// `None` when file logging is off.
    pub fn open_log_file(&self) -> Result<Option<File>> {
        if !self.log_to_file {
            return Ok(None);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file: {:?}", self.log_file))?;
        writeln!(file, "=== QE Renderer Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        Ok(Some(file))
    }
}

impl RendererConfig {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
            RendererConfig::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(RendererConfig::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode as Vulkan enum; availability is checked at swapchain build
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn api_version(&self) -> u32 {
        let [major, minor, patch] = self.device.api_version;
        vk::make_api_version(0, major, minor, patch)
    }

    pub fn app_version(&self) -> u32 {
        let [major, minor, patch] = self.app.version;
        vk::make_api_version(0, major, minor, patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_identity() {
        let config = RendererConfig::default();
        assert_eq!(config.app.name, "Quantum Engine");
        assert_eq!(config.graphics.clear_color, [0.1, 0.1, 0.15, 1.0]);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.api_version(), vk::API_VERSION_1_3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            [graphics]
            present_mode = "FIFO"

            [window]
            width = 640
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.clear_color, [0.1, 0.1, 0.15, 1.0]);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = RendererConfig::default();
        config.graphics.present_mode = "vsync-ish".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(RendererConfig::from_toml_str("[graphics]\nclear_color = 3").is_err());
    }

    #[test]
    fn log_file_is_only_opened_when_enabled() {
        let path = std::env::temp_dir().join(format!("qe_renderer_{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut debug = DebugConfig {
            log_to_file: false,
            log_file: path.to_string_lossy().into_owned(),
        };
        assert!(debug.open_log_file().unwrap().is_none());
        assert!(!path.exists());

        debug.log_to_file = true;
        let file = debug.open_log_file().unwrap();
        assert!(file.is_some());
        drop(file);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("=== QE Renderer Log ==="));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let debug = DebugConfig {
            log_to_file: true,
            log_file: "does/not/exist/qe.log".to_string(),
        };
        assert!(debug.open_log_file().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = RendererConfig::load_from_path("does/not/exist/renderer.toml").unwrap();
        assert_eq!(config.device.api_version, [1, 3, 0]);
    }
}
