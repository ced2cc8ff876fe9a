pub mod config;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod mount;
pub mod naming;
pub mod plan;
pub mod platform;
pub mod reconcile;
pub mod snapshot;
pub mod stage;
pub mod utils;
pub mod watch;
pub mod workflow;

pub use config::{Settings, load_documents, load_settings};
pub use daemon::{DaemonSupervisor, ExitCode};
pub use error::{MergeError, Result};
pub use exec::{CommandExecutor, CommandOutcome, CommandRequest, CommandResult};
pub use plan::{BranchEntry, MountPlan};
pub use snapshot::{MountSnapshot, MountSnapshotReader};
pub use workflow::{MergePassOrchestrator, MergePassOutcome, MergeReason};
