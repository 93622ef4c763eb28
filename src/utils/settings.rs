use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use thiserror::Error;

use crate::constants::{
    DEFAULT_CULL_WORKGROUP_SIZE, DEFAULT_LIGHT_ARENA_CAPACITY, DEFAULT_STAGING_CAPACITY,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is corrupt: {0}")]
    Decode(#[from] bincode::Error),

    #[error("settings file has format version {found}, expected {}", SETTINGS_VERSION)]
    Version { found: u32 },
}

/// Written ahead of the settings; bump whenever a field is added or removed
pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RenderSettings {
    pub light: LightSettings,
    pub staging: StagingSettings,
    pub culling: CullingSettings,
    pub tasks: TaskSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LightSettings {
    /// Sections the light arena holds before its first growth
    pub initial_sections: usize,
    /// Upload only changed sections instead of the whole arena
    pub partial_upload: bool,
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            initial_sections: DEFAULT_LIGHT_ARENA_CAPACITY,
            partial_upload: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StagingSettings {
    pub initial_capacity: u64,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_STAGING_CAPACITY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CullingSettings {
    pub workgroup_size: u32,
    /// Bytes per vertex in the shared vertex buffer
    pub vertex_stride: u32,
}

impl Default for CullingSettings {
    fn default() -> Self {
        Self {
            workgroup_size: DEFAULT_CULL_WORKGROUP_SIZE,
            vertex_stride: 32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskSettings {
    /// Zero runs maintenance on the calling thread
    pub worker_count: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().saturating_sub(1),
        }
    }
}

pub fn save_settings(path: &Path, settings: &RenderSettings) -> Result<(), SettingsError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &SETTINGS_VERSION)?;
    bincode::serialize_into(&mut writer, settings)?;
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<RenderSettings, SettingsError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let found: u32 = bincode::deserialize_from(&mut reader)?;
    if found != SETTINGS_VERSION {
        return Err(SettingsError::Version { found });
    }
    let settings = bincode::deserialize_from(&mut reader)?;
    Ok(settings)
}

/// Load settings, falling back to defaults when the file is missing, unreadable
/// or from another format version
pub fn load_or_default(path: &Path) -> RenderSettings {
    match load_settings(path) {
        Ok(settings) => settings,
        Err(SettingsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            RenderSettings::default()
        }
        Err(err) => {
            tracing::warn!("Ignoring settings at {}: {}", path.display(), err);
            RenderSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("render-settings-{}.bin", std::process::id()));
        let mut settings = RenderSettings::default();
        settings.light.partial_upload = false;
        settings.staging.initial_capacity = 4096;
        settings.tasks.worker_count = 3;

        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_other_format_version_uses_defaults() {
        let path = std::env::temp_dir().join(format!("render-settings-old-{}.bin", std::process::id()));
        let mut old = bincode::serialize(&0u32).unwrap();
        old.extend(bincode::serialize(&LightSettings::default()).unwrap());
        std::fs::write(&path, &old).unwrap();

        let loaded = load_settings(&path);
        let fallback = load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(loaded, Err(SettingsError::Version { found: 0 })));
        assert_eq!(fallback, RenderSettings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("render-settings-that-does-not-exist.bin");
        assert!(matches!(load_settings(&path), Err(SettingsError::Io(_))));
        assert_eq!(load_or_default(&path), RenderSettings::default());
    }

    #[test]
    fn test_defaults() {
        let settings = RenderSettings::default();
        assert_eq!(settings.light.initial_sections, 64);
        assert_eq!(settings.staging.initial_capacity, 1 << 20);
        assert_eq!(settings.culling.workgroup_size, 32);
    }
}
