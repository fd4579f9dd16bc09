//! Runtime settings for the command-line tools
//!
//! A small JSON document controls the knobs the library takes as plain
//! arguments: worker count, CRT acceleration, and the geotag stamped into
//! headers and signatures. Every field has a default, so an empty object (or
//! no file at all) is a valid configuration. The binaries layer environment
//! overrides on top.

#![forbid(unsafe_code)]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::blocks::Location;

/// Tool configuration. `workers == 0` means "detect".
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads for key generation and decryption; 0 = logical CPUs.
    pub workers: usize,
    /// Use the CRT split for private-key exponentiation.
    pub use_crt: bool,
    /// Degrees north, stamped into headers and signatures.
    pub latitude: f32,
    /// Degrees east.
    pub longitude: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self { workers: 0, use_crt: true, latitude: 0.0, longitude: 0.0 }
    }
}

/// Settings load failures.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The settings file is not well-formed JSON.
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Settings {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolved worker count (detect when 0, then clamp).
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            crate::default_workers()
        } else {
            self.workers.clamp(1, crate::MAX_WORKERS)
        }
    }

    /// The configured geotag.
    pub fn location(&self) -> Location {
        Location { latitude: self.latitude, longitude: self.longitude }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.workers, 0);
        assert!(s.use_crt);
        assert_eq!(s.latitude, 0.0);
        assert!(s.effective_workers() >= 1);
        assert!(s.effective_workers() <= crate::MAX_WORKERS);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let s = Settings { workers: 4, use_crt: false, latitude: 37.775, longitude: -122.4183 };
        std::fs::write(&path, serde_json::to_string_pretty(&s).unwrap()).unwrap();

        let back = Settings::load(&path).unwrap();
        assert_eq!(back.workers, 4);
        assert!(!back.use_crt);
        assert_eq!(back.location(), Location { latitude: 37.775, longitude: -122.4183 });
    }

    #[test]
    fn oversized_worker_requests_are_clamped() {
        let s = Settings { workers: 10_000, ..Settings::default() };
        assert_eq!(s.effective_workers(), crate::MAX_WORKERS);
    }

    #[test]
    fn bad_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{workers: nope}").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Json(_))));
    }
}
