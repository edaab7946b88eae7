// Explicit configuration, loaded by the binary and handed to the engine

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::engine::hardware::CapabilitySnapshot;
use crate::engine::{AccelMode, FontColor, NotifyPolicy, Quality, SupervisorOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to ffmpeg; empty means search the usual locations
    #[serde(default)]
    pub ffmpeg_path: String,

    /// Upper bound for each capability introspection call
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

/// Requested acceleration; `Auto` defers to the capability probe's recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelPreference {
    #[default]
    Auto,
    Cuda,
    Amd,
    Cpu,
}

impl AccelPreference {
    pub fn resolve(self, snapshot: &CapabilitySnapshot) -> AccelMode {
        match self {
            Self::Auto => snapshot.recommend(),
            Self::Cuda => AccelMode::Cuda,
            Self::Amd => AccelMode::Amd,
            Self::Cpu => AccelMode::Cpu,
        }
    }
}

impl std::str::FromStr for AccelPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let mode: AccelMode = s.parse()?;
        Ok(match mode {
            AccelMode::Cuda => Self::Cuda,
            AccelMode::Amd => Self::Amd,
            AccelMode::Cpu => Self::Cpu,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub accel_mode: AccelPreference,

    /// Used when a request carries no quality tier
    #[serde(default)]
    pub quality: Quality,

    #[serde(default = "default_subtitle_font_size")]
    pub subtitle_font_size: u32,

    /// Palette name; unknown names render white
    #[serde(default = "default_subtitle_font_color")]
    pub subtitle_font_color: String,

    /// Default overwrite setting (whether to overwrite existing output files)
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Time between the graceful stop and the forced kill on cancel
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Notify on any field change instead of only on time/frame updates
    #[serde(default)]
    pub notify_on_any_change: bool,
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_subtitle_font_size() -> u32 {
    24
}

fn default_subtitle_font_color() -> String {
    "white".to_string()
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: String::new(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            accel_mode: AccelPreference::Auto,
            quality: Quality::Medium,
            subtitle_font_size: default_subtitle_font_size(),
            subtitle_font_color: default_subtitle_font_color(),
            overwrite: false,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            notify_on_any_change: false,
        }
    }
}

impl EncoderConfig {
    pub fn ffmpeg_path(&self) -> Option<PathBuf> {
        let trimmed = self.ffmpeg_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

impl DefaultsConfig {
    pub fn font_color(&self) -> FontColor {
        FontColor::from_name(&self.subtitle_font_color)
    }
}

impl SupervisorConfig {
    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            grace_period: Duration::from_secs(self.grace_period_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            notify_policy: if self.notify_on_any_change {
                NotifyPolicy::AnyChange
            } else {
                NotifyPolicy::TimeOrFrame
            },
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("ffcut")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("ffcut")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Read and parse a config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let config = Config::default();

        // Try to save the default config, but don't fail if we can't
        if let Err(e) = config.save_to(&config_path) {
            warn!(
                "Could not create default config file: {:#}. Using built-in defaults; run 'ffcut init-config' to create one.",
                e
            );
        }

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }
}
