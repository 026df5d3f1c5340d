//! Flashing defaults loaded from a configuration file
//!
//! The file is looked up as `espburn.toml` in the working directory first,
//! then in the user's configuration directory. A missing file yields the
//! defaults; a file that exists but cannot be parsed is an error.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Error},
    flasher::FlashSettings,
    image::Compression,
};

const CONFIG_FILE: &str = "espburn.toml";

/// Defaults applied to flash jobs
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Baudrate used for flashing
    #[serde(default)]
    pub baudrate: Option<u32>,
    /// Flash settings written to the image header
    #[serde(default)]
    pub flash: FlashSettings,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encrypt: bool,
}

impl Config {
    /// Load the configuration from the first configuration file found
    pub fn load() -> Result<Self, Error> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load the configuration from `path`, defaulting when it does not exist
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = read_to_string(path)
            .map_err(|e| Error::Config(path.display().to_string(), ConfigError::Io(e)))?;
        let config = Self::from_toml(&raw)
            .map_err(|e| Error::Config(path.display().to_string(), e))?;

        debug!("Config: {config:#?}");

        Ok(config)
    }

    /// Parse a configuration from TOML
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::current_dir() {
            let local_config = dir.join(CONFIG_FILE);
            if local_config.exists() {
                return Some(local_config);
            }
        }

        ProjectDirs::from("rs", "esp", "espburn").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::flasher::{FlashFrequency, FlashMode, FlashSize};

    #[test]
    fn empty_config_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
            baudrate = 460800
            compression = "on"
            encrypt = true

            [flash]
            mode = "qio"
            size = "8MB"
            frequency = "26MHz"
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            Config {
                baudrate: Some(460_800),
                flash: FlashSettings::new(
                    Some(FlashMode::Qio),
                    Some(FlashSize::_8Mb),
                    Some(FlashFrequency::_26Mhz)
                ),
                compression: Compression::On,
                encrypt: true,
            }
        );
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(matches!(
            Config::from_toml("baudrate = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(Config::from_toml("[flash]\nsize = \"3MB\"").is_err());
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join("espburn-does-not-exist.toml");
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let path = std::env::temp_dir().join(format!("espburn-{}.toml", std::process::id()));
        std::fs::write(&path, "encrypt = 1").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, Error::Config(_, ConfigError::Toml(_))));
    }
}
