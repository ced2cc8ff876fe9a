mod loader;
mod types;

pub use loader::{Documents, load_documents, load_settings};
pub use types::{
    EQUIVALENTS_FILE, EquivalentsDoc, SCENE_TAGS_FILE, SETTINGS_FILE, SOURCE_PRIORITY_FILE,
    SceneTagsDoc, Settings, SourcePriorityDoc,
};
