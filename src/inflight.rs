use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// A replay currently running.
#[derive(Clone, Debug, Serialize)]
pub struct InflightEntry {
    pub id: Uuid,
    pub template: String,
    pub started_at: DateTime<Utc>,
}

/// Tracks running replays. Entries leave the registry when their guard
/// drops, so a cancelled or panicking replay never lingers.
#[derive(Clone, Default)]
pub struct InflightRegistry {
    entries: Arc<DashMap<Uuid, InflightEntry>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, template: &str) -> InflightGuard {
        let entry = InflightEntry {
            id: Uuid::new_v4(),
            template: template.to_string(),
            started_at: Utc::now(),
        };
        let id = entry.id;
        self.entries.insert(id, entry);
        InflightGuard {
            id,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Running replays, oldest first.
    pub fn snapshot(&self) -> Vec<InflightEntry> {
        let mut entries: Vec<InflightEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct InflightGuard {
    id: Uuid,
    entries: Arc<DashMap<Uuid, InflightEntry>>,
}

impl InflightGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.entries.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_remove_their_entry_on_drop() {
        let registry = InflightRegistry::new();
        let first = registry.begin("weather");
        let second = registry.begin("quotes");
        assert_eq!(registry.len(), 2);
        let mut names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.template)
            .collect();
        names.sort();
        assert_eq!(names, vec!["quotes".to_string(), "weather".to_string()]);

        drop(first);
        let remaining = registry.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id());

        drop(second);
        assert!(registry.is_empty());
    }
}
