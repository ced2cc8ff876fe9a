use crate::config::types::{
    EQUIVALENTS_FILE, EquivalentsDoc, SCENE_TAGS_FILE, SceneTagsDoc, SOURCE_PRIORITY_FILE,
    Settings, SourcePriorityDoc,
};
use crate::error::{MergeError, Result};
use crate::utils::paths::expand_path;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::warn;

/// The auxiliary documents the naming services are built from.
#[derive(Debug, Clone, Default)]
pub struct Documents {
    pub equivalents: EquivalentsDoc,
    pub scene_tags: SceneTagsDoc,
    pub source_priority: SourcePriorityDoc,
}

/// Load and validate `settings.yml`. The settings file is required.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(MergeError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    let mut settings: Settings = serde_yaml::from_str(&raw)?;
    settings.sources_root = expand_path(&settings.sources_root)?;
    settings.merged_root = expand_path(&settings.merged_root)?;
    settings.state_root = expand_path(&settings.state_root)?;
    if let Some(root) = &settings.override_root {
        settings.override_root = Some(expand_path(root)?);
    }
    settings.validate()?;
    Ok(settings)
}

/// Load the auxiliary documents from the directory holding `settings.yml`.
///
/// Each document is optional: a missing file degrades to an empty default
/// with a logged warning, a present-but-malformed file is an error.
pub fn load_documents(config_dir: &Path) -> Result<Documents> {
    Ok(Documents {
        equivalents: load_optional(config_dir, EQUIVALENTS_FILE)?,
        scene_tags: load_optional(config_dir, SCENE_TAGS_FILE)?,
        source_priority: load_optional(config_dir, SOURCE_PRIORITY_FILE)?,
    })
}

fn load_optional<T: DeserializeOwned + Default>(dir: &Path, file: &str) -> Result<T> {
    let path = dir.join(file);
    if !path.exists() {
        warn!(
            event = "config.document_missing",
            document = file,
            "Optional configuration document not found, using defaults"
        );
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(serde_yaml::from_str(&raw)?)
}
