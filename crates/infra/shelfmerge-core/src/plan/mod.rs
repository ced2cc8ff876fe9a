mod planner;
mod types;

pub use planner::{BranchPlanner, PlanOutput};
pub use types::{BranchEntry, MountPlan, fingerprint_branches, short_title_hash};
