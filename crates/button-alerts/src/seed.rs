//! Seed file for installations and buttons
//!
//! ```toml
//! [[installations]]
//! id = "inst-1"
//! name = "Main Street"
//! responder_phone_number = "+15550000001"
//! fallback_phone_number = "+15550000002"
//! incident_categories = ["Accidental", "Safer Use", "Overdose", "Other"]
//!
//! [[buttons]]
//! button_id = "111"
//! installation_id = "inst-1"
//! unit = "1"
//! phone_number = "+15559990001"
//! ```

use std::path::{Path, PathBuf};

use lifecycle::{Button, Installation, MemoryStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid seed file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("button {button_id} references unknown installation {installation_id}")]
    DanglingButton {
        button_id: String,
        installation_id: String,
    },

    #[error("duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registry contents loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub installations: Vec<Installation>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let seed: Self = text.parse()?;
        info!(
            path = %path.display(),
            installations = seed.installations.len(),
            buttons = seed.buttons.len(),
            "Loaded seed file"
        );
        Ok(seed)
    }

    /// Reject duplicate ids and buttons pointing at missing installations.
    pub fn validate(&self) -> Result<(), SeedError> {
        let mut installation_ids = std::collections::HashSet::new();
        for installation in &self.installations {
            if !installation_ids.insert(installation.id.as_str()) {
                return Err(SeedError::Duplicate {
                    kind: "installation",
                    id: installation.id.clone(),
                });
            }
        }

        let mut button_ids = std::collections::HashSet::new();
        for button in &self.buttons {
            if !button_ids.insert(button.button_id.as_str()) {
                return Err(SeedError::Duplicate {
                    kind: "button",
                    id: button.button_id.clone(),
                });
            }
            if !installation_ids.contains(button.installation_id.as_str()) {
                return Err(SeedError::DanglingButton {
                    button_id: button.button_id.clone(),
                    installation_id: button.installation_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn apply(&self, store: &MemoryStore) -> Result<(), SeedError> {
        self.validate()?;
        for installation in &self.installations {
            store.insert_installation(installation.clone())?;
        }
        for button in &self.buttons {
            store.insert_button(button.clone())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SeedFile {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
