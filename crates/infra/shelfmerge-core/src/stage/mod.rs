mod linker;

pub use linker::{BranchLinkStager, StagedLinks};
