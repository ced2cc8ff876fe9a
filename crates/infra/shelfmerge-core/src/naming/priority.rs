use crate::error::{MergeError, Result};
use std::collections::HashMap;

/// Ranks source volumes: index in the configured order = priority, 0 being
/// the highest. Unknown sources fall back to the caller's default.
#[derive(Debug)]
pub struct SourcePriorityService {
    rank_by_name: HashMap<String, usize>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SourcePriorityService {
    pub fn new(ordered_sources: &[String]) -> Result<Self> {
        let mut rank_by_name = HashMap::with_capacity(ordered_sources.len());
        for (rank, name) in ordered_sources.iter().enumerate() {
            let key = normalize(name);
            if key.is_empty() {
                return Err(MergeError::ConfigConflict {
                    message: format!("source priority entry {rank} is empty"),
                });
            }
            if rank_by_name.insert(key, rank).is_some() {
                return Err(MergeError::ConfigConflict {
                    message: format!("duplicate source '{name}' in priority list"),
                });
            }
        }
        Ok(Self { rank_by_name })
    }

    pub fn try_get_priority(&self, name: &str) -> Option<usize> {
        self.rank_by_name.get(&normalize(name)).copied()
    }

    pub fn priority_or_default(&self, name: &str, fallback: usize) -> usize {
        self.try_get_priority(name).unwrap_or(fallback)
    }
}
