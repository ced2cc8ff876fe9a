mod executor;

pub use executor::{
    CommandExecutor, CommandOutcome, CommandRequest, CommandResult, SpawnFailureKind,
};
