mod service;

pub use service::{ApplyOutcome, ApplyResult, MountCommandService, MountToolPolicy};
