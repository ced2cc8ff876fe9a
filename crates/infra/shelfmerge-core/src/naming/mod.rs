mod equivalence;
mod normalizer;
mod priority;
mod scene_tags;

pub use equivalence::EquivalenceService;
pub use normalizer::TitleNormalizer;
pub use priority::SourcePriorityService;
pub use scene_tags::SceneTagMatcher;
