mod constants;
mod preflight;

pub use constants::*;
pub use preflight::{check_environment, find_fusermount};
