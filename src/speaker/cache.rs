//! Process-wide read-through cache of enrolled voice embeddings.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type Embedding = Arc<Vec<f32>>;

/// Embeddings keyed by external user id.
///
/// Outlives individual sessions. Entries are loaded on first use and only
/// replaced by a new enrollment; misses are not cached so a user who enrolls
/// later is picked up by their next session.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Embedding>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<Embedding> {
        self.entries.read().get(user_id).cloned()
    }

    /// Return the cached embedding, or load and cache it.
    ///
    /// The loader runs without the lock held; if two sessions race on a cold
    /// entry the first stored value wins.
    pub fn get_or_load<E>(
        &self,
        user_id: &str,
        load: impl FnOnce() -> Result<Option<Vec<f32>>, E>,
    ) -> Result<Option<Embedding>, E> {
        if let Some(hit) = self.get(user_id) {
            return Ok(Some(hit));
        }

        let Some(loaded) = load()? else {
            return Ok(None);
        };

        let mut entries = self.entries.write();
        let entry = entries
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(loaded));
        Ok(Some(entry.clone()))
    }

    /// Store a freshly enrolled embedding, replacing any previous one.
    pub fn insert(&self, user_id: &str, embedding: Vec<f32>) -> Embedding {
        let embedding = Arc::new(embedding);
        self.entries
            .write()
            .insert(user_id.to_string(), embedding.clone());
        embedding
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
