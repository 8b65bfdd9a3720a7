// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::listeners::MAX_LISTENER_POOL_SIZE;
use crate::objects::MAX_OBJECT_POOL_SIZE;

const DEFAULT_OBJECT_POOL_SIZE: usize = 512;
const DEFAULT_LISTENER_POOL_SIZE: usize = 8;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_LANGUAGE: &str = "english";

/// A YAML representation of the translation layer configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct AtlConfig {
    /// Number of reservable audio objects, not counting the global object.
    object_pool_size: Option<usize>,

    /// Number of reservable listeners.
    listener_pool_size: Option<usize>,

    /// How often the audio thread ticks the translation layer (e.g. "10ms").
    tick_interval: Option<String>,

    /// Folder holding the global control data.
    controls_path: Option<String>,

    /// The localization language handed to the middleware.
    language: Option<String>,

    /// Priority (0-99) of the audio thread. Leave unset to keep the default priority.
    audio_thread_priority: Option<u8>,
}

impl AtlConfig {
    /// Deserializes the configuration from a file.
    pub fn deserialize(path: &Path) -> Result<AtlConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<AtlConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the pool sizes fit the handle space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pools = [
            ("object", self.object_pool_size(), MAX_OBJECT_POOL_SIZE),
            ("listener", self.listener_pool_size(), MAX_LISTENER_POOL_SIZE),
        ];
        for (pool, size, max) in pools {
            if size > max {
                return Err(ConfigError::PoolSize { pool, size, max });
            }
        }
        Ok(())
    }

    /// Sets the object pool size, returning the config.
    pub fn with_object_pool_size(mut self, size: usize) -> AtlConfig {
        self.object_pool_size = Some(size);
        self
    }

    /// Sets the listener pool size, returning the config.
    pub fn with_listener_pool_size(mut self, size: usize) -> AtlConfig {
        self.listener_pool_size = Some(size);
        self
    }

    /// Sets the tick interval, returning the config.
    pub fn with_tick_interval(mut self, interval: &str) -> AtlConfig {
        self.tick_interval = Some(interval.to_string());
        self
    }

    /// Sets the global controls path, returning the config.
    pub fn with_controls_path(mut self, path: &Path) -> AtlConfig {
        self.controls_path = Some(path.to_string_lossy().into_owned());
        self
    }

    pub fn object_pool_size(&self) -> usize {
        self.object_pool_size.unwrap_or(DEFAULT_OBJECT_POOL_SIZE)
    }

    pub fn listener_pool_size(&self) -> usize {
        self.listener_pool_size
            .unwrap_or(DEFAULT_LISTENER_POOL_SIZE)
    }

    /// Returns the tick interval (default: 10ms).
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        match &self.tick_interval {
            Some(interval) => DurationString::from_string(interval.clone())
                .map(Into::into)
                .map_err(|e| ConfigError::Duration {
                    value: interval.clone(),
                    message: e.to_string(),
                }),
            None => Ok(DEFAULT_TICK_INTERVAL),
        }
    }

    pub fn controls_path(&self) -> Option<PathBuf> {
        self.controls_path.as_ref().map(PathBuf::from)
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn audio_thread_priority(&self) -> Option<u8> {
        self.audio_thread_priority.filter(|p| *p < 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AtlConfig::default();
        assert_eq!(config.object_pool_size(), DEFAULT_OBJECT_POOL_SIZE);
        assert_eq!(config.listener_pool_size(), DEFAULT_LISTENER_POOL_SIZE);
        assert_eq!(config.tick_interval().unwrap(), DEFAULT_TICK_INTERVAL);
        assert_eq!(config.language(), "english");
        assert!(config.controls_path().is_none());
        assert!(config.audio_thread_priority().is_none());
    }

    #[test]
    fn test_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atl.yaml");
        std::fs::write(
            &path,
            r#"
object_pool_size: 16
listener_pool_size: 2
tick_interval: 5ms
controls_path: /tmp/controls
language: german
audio_thread_priority: 120
"#,
        )
        .unwrap();

        let config = AtlConfig::deserialize(&path).unwrap();
        assert_eq!(config.object_pool_size(), 16);
        assert_eq!(config.listener_pool_size(), 2);
        assert_eq!(config.tick_interval().unwrap(), Duration::from_millis(5));
        assert_eq!(config.controls_path(), Some(PathBuf::from("/tmp/controls")));
        assert_eq!(config.language(), "german");
        // Out of range priorities are ignored.
        assert!(config.audio_thread_priority().is_none());
    }

    #[test]
    fn test_oversized_pools_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atl.yaml");
        std::fs::write(&path, "object_pool_size: 4294967295\n").unwrap();
        assert!(matches!(
            AtlConfig::deserialize(&path),
            Err(ConfigError::PoolSize { pool: "object", .. })
        ));

        std::fs::write(&path, "listener_pool_size: 4294967296\n").unwrap();
        assert!(matches!(
            AtlConfig::deserialize(&path),
            Err(ConfigError::PoolSize { pool: "listener", .. })
        ));

        let largest = AtlConfig::default().with_object_pool_size(MAX_OBJECT_POOL_SIZE);
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_bad_tick_interval() {
        let config = AtlConfig::default().with_tick_interval("soon");
        assert!(matches!(
            config.tick_interval(),
            Err(ConfigError::Duration { .. })
        ));
    }
}
