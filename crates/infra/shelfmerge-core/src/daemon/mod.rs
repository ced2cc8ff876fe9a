mod lock;
mod supervisor;

pub use lock::open_lock_file;
pub use supervisor::{DaemonSupervisor, ExitCode};
