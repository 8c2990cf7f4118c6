use crate::models::BuilderSettings;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Settings file name inside the configuration directory
pub const SETTINGS_FILE_NAME: &str = "BrawlBuilder Config.yaml";

/// Prefix for environment overrides (`BRAWLBUILDER__WORKING_DIR=...`)
pub const ENV_PREFIX: &str = "BRAWLBUILDER";

/// Configuration manager for loading and saving the builder settings.
///
/// Settings are layered: built-in defaults, then `BrawlBuilder Config.yaml`
/// (optional), then `BRAWLBUILDER__*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager for `config_dir` (usually `Resources`).
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE_NAME),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    /// Load settings from the file and the environment.
    ///
    /// # Returns
    /// The merged settings; defaults fill anything neither source sets
    pub fn load_settings(&self) -> Result<BuilderSettings> {
        self.load_with_environment(environment())
    }

    fn load_with_environment(&self, environment: Environment) -> Result<BuilderSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let settings: BuilderSettings = Config::builder()
            .add_source(
                File::new(self.settings_path.as_str(), FileFormat::Yaml).required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    /// Save the settings file.
    pub fn save_settings(&self, settings: &BuilderSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Write a default settings file unless one exists.
    ///
    /// # Returns
    /// `true` if a file was written
    pub fn init_settings(&self) -> Result<bool> {
        if self.settings_path.exists() {
            tracing::info!("Settings file already exists at {}", self.settings_path);
            return Ok(false);
        }
        self.save_settings(&BuilderSettings::default())?;
        Ok(true)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
