//! [`ConfigPort`] implementations.
//!
//! `FileConfigStore` persists the `key value` text format to a file on
//! host builds.  `MemoryConfigStore` keeps everything in a `RefCell`
//! and counts saves, which is what the tests want.

use core::cell::{Cell, RefCell};
use std::io::ErrorKind;
use std::path::PathBuf;

use log::{info, warn};

use crate::config::{ConfigError, ConfigPort, SystemConfig};

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPort for FileConfigStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => SystemConfig::from_lines(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Config: {} not found, using defaults", self.path.display());
                Ok(SystemConfig::default())
            }
            Err(e) => {
                warn!("Config: reading {} failed: {}", self.path.display(), e);
                Err(ConfigError::IoError)
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        std::fs::write(&self.path, config.to_lines()).map_err(|e| {
            warn!("Config: writing {} failed: {}", self.path.display(), e);
            ConfigError::IoError
        })?;
        info!("Config: saved to {}", self.path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    stored: RefCell<Option<SystemConfig>>,
    saves: Cell<u32>,
    fail_saves: Cell<bool>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            stored: RefCell::new(Some(config)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> u32 {
        self.saves.get()
    }

    pub fn stored(&self) -> Option<SystemConfig> {
        self.stored.borrow().clone()
    }

    /// Make subsequent saves fail with [`ConfigError::IoError`].
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }
}

impl ConfigPort for MemoryConfigStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        Ok(self.stored.borrow().clone().unwrap_or_default())
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.fail_saves.get() {
            return Err(ConfigError::IoError);
        }
        *self.stored.borrow_mut() = Some(config.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}
