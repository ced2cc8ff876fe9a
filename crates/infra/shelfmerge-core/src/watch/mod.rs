mod inotify;

pub use inotify::{
    MonotonicClock, PersistentInotifyWatcher, WatchEvent, WatchPollOutcome, WatchPollResult,
    system_clock,
};
