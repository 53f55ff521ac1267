//! Coach persona cache
//!
//! Personas are keyed by coach id. An entry is served only while the
//! coach's knowledge rows are unchanged; the revision check is one
//! projection-only read, and a changed revision triggers a reload. The
//! least recently used coach is evicted once `capacity` is exceeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use super::CoachPersona;
use crate::db::{Collection, Filter, FindOptions, RecordStore, StoreError};

/// Fingerprint of a coach's knowledge rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaRevision {
    pub rows: usize,
    pub latest_update: Option<String>,
}

struct Entry {
    revision: PersonaRevision,
    persona: Arc<CoachPersona>,
    last_used: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

pub struct PersonaCache {
    capacity: usize,
    state: Mutex<State>,
}

impl PersonaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
        }
    }

    async fn revision(
        store: &dyn RecordStore,
        coach_id: &str,
    ) -> Result<PersonaRevision, StoreError> {
        let rows = store
            .find_many(
                Collection::CoachKnowledge,
                &[Filter::eq("coach_id", coach_id)],
                FindOptions::new().select(&["updated_at"]),
            )
            .await?;
        let latest_update = rows
            .iter()
            .filter_map(|row| row.get("updated_at").and_then(Value::as_str))
            .max()
            .map(str::to_string);
        Ok(PersonaRevision {
            rows: rows.len(),
            latest_update,
        })
    }

    async fn load(store: &dyn RecordStore, coach_id: &str) -> Result<CoachPersona, StoreError> {
        let rows = store
            .find_many(
                Collection::CoachKnowledge,
                &[Filter::eq("coach_id", coach_id)],
                FindOptions::new().select(&["key", "value"]),
            )
            .await?;
        let mut persona = CoachPersona::default();
        for row in &rows {
            if let (Some(key), Some(value)) = (
                row.get("key").and_then(Value::as_str),
                row.get("value").and_then(Value::as_str),
            ) {
                persona.apply(key, value);
            }
        }
        Ok(persona)
    }

    /// Persona for `coach_id`, reloading when its rows changed
    pub async fn get_or_load(
        &self,
        store: &dyn RecordStore,
        coach_id: &str,
    ) -> Result<Arc<CoachPersona>, StoreError> {
        let revision = Self::revision(store, coach_id).await?;

        if let Ok(mut state) = self.state.lock() {
            state.tick += 1;
            let tick = state.tick;
            let cached = state
                .entries
                .get_mut(coach_id)
                .filter(|entry| entry.revision == revision)
                .map(|entry| {
                    entry.last_used = tick;
                    Arc::clone(&entry.persona)
                });
            if let Some(persona) = cached {
                state.hits += 1;
                return Ok(persona);
            }
            state.misses += 1;
        }

        debug!("Loading persona for coach {}", coach_id);
        let persona = Arc::new(Self::load(store, coach_id).await?);

        if let Ok(mut state) = self.state.lock() {
            state.tick += 1;
            let tick = state.tick;
            state.entries.insert(
                coach_id.to_string(),
                Entry {
                    revision,
                    persona: Arc::clone(&persona),
                    last_used: tick,
                },
            );
            while state.entries.len() > self.capacity {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        state.entries.remove(&id);
                    }
                    None => break,
                }
            }
        }

        Ok(persona)
    }

    /// Drop a coach's entry, forcing a reload on next use
    pub fn invalidate(&self, coach_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.remove(coach_id);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        self.state
            .lock()
            .map(|s| (s.hits, s.misses))
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Row};
    use serde_json::json;
    use tempfile::TempDir;

    fn knowledge(coach_id: &str, key: &str, value: &str, updated_at: &str) -> Row {
        let mut row = Row::new();
        row.insert("coach_id".into(), json!(coach_id));
        row.insert("key".into(), json!(key));
        row.insert("value".into(), json!(value));
        row.insert("updated_at".into(), json!(updated_at));
        row
    }

    #[tokio::test]
    async fn test_hit_then_invalidate_on_change() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
        let store = db.store();
        let cache = PersonaCache::new(4);

        store
            .upsert(
                Collection::CoachKnowledge,
                knowledge("c1", "voice_tone", "Rolig", "2024-01-01T00:00:00.000Z"),
                &["coach_id", "key"],
            )
            .await
            .unwrap();

        let first = cache.get_or_load(&store, "c1").await.unwrap();
        let second = cache.get_or_load(&store, "c1").await.unwrap();
        assert_eq!(first.voice_tone, "Rolig");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (1, 1));

        store
            .upsert(
                Collection::CoachKnowledge,
                knowledge("c1", "voice_tone", "Energisk", "2024-02-01T00:00:00.000Z"),
                &["coach_id", "key"],
            )
            .await
            .unwrap();

        let reloaded = cache.get_or_load(&store, "c1").await.unwrap();
        assert_eq!(reloaded.voice_tone, "Energisk");
        assert_eq!(cache.stats(), (1, 2));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
        let store = db.store();
        let cache = PersonaCache::new(2);

        cache.get_or_load(&store, "a").await.unwrap();
        cache.get_or_load(&store, "b").await.unwrap();
        cache.get_or_load(&store, "a").await.unwrap();
        cache.get_or_load(&store, "c").await.unwrap();

        assert_eq!(cache.len(), 2);
        // "b" was least recently used, so loading it again is a miss
        let (_, misses_before) = cache.stats();
        cache.get_or_load(&store, "b").await.unwrap();
        assert_eq!(cache.stats().1, misses_before + 1);
    }
}
