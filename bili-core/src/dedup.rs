//! Per-conversation duplicate suppression.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};

/// Remembers which analysis targets a conversation has seen recently so the
/// same link pasted twice in quick succession is answered once.
///
/// A non-positive window means "remember only the latest target": a fresh
/// target wipes the conversation's history before being recorded, so only a
/// back-to-back repeat of the same target counts as a duplicate.
#[derive(Debug)]
pub struct DedupCache {
    window_secs: i64,
    seen: DashMap<i64, Arc<DashSet<String>>>,
}

impl DedupCache {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            seen: DashMap::new(),
        }
    }

    /// True when `target` was already recorded for this conversation inside
    /// the window. A fresh target is recorded and scheduled to expire; a
    /// duplicate does not extend the original expiry.
    ///
    /// Expiry runs as a spawned timer, so a positive window requires a tokio
    /// runtime.
    pub fn should_suppress(&self, conversation_id: i64, target: &str) -> bool {
        let set = self
            .seen
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(DashSet::new()))
            .clone();

        if set.contains(target) {
            return true;
        }
        if self.window_secs <= 0 {
            set.clear();
            set.insert(target.to_string());
            return false;
        }
        set.insert(target.to_string());

        let window = Duration::from_secs(self.window_secs as u64);
        let expiring = target.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            set.remove(&expiring);
        });
        false
    }
}
