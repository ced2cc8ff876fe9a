mod parser;
mod reader;
mod types;

pub use parser::parse_pairs_output;
pub use reader::MountSnapshotReader;
pub use types::{
    MountSnapshot, MountSnapshotEntry, SnapshotWarning, WARN_SNAPSHOT_COMMAND, WARN_SNAPSHOT_LINE,
};
