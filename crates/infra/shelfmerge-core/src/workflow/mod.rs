mod merge_pass;

pub use merge_pass::{MergePassOrchestrator, MergePassOutcome, MergeReason};
