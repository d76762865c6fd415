//! The in-memory key→record map and its residency bookkeeping.

use std::collections::HashMap;

use bytes::Bytes;

use crate::location::Location;

/// What the index knows about one live key.
///
/// `payload` is the materialised value, present only if the residency
/// policy admitted it, kept as a refcounted [`Bytes`] so a resident
/// payload can be handed back from `Get`/`Browse` without recopying it on
/// every read. `location` is where the value can be re-read from disk if
/// `payload` is absent; it is `None` only for an entry written in
/// *nosync* mode that has not yet survived a compaction (§9 open question).
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub payload: Option<Bytes>,
    pub location: Option<Location>,
}

impl IndexEntry {
    pub fn resident(value: Bytes, location: Location) -> Self {
        Self {
            payload: Some(value),
            location: Some(location),
        }
    }

    pub fn on_disk(location: Location) -> Self {
        Self {
            payload: None,
            location: Some(location),
        }
    }

    pub fn in_memory_only(value: Bytes) -> Self {
        Self {
            payload: Some(value),
            location: None,
        }
    }
}

/// The live key→entry map. Holds exactly one entry per live key (invariant 1
/// of the data model): deletes remove the entry outright rather than
/// tombstoning it in memory.
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<u64, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: u64) -> Option<&IndexEntry> {
        self.entries.get(&key)
    }

    /// Applies a log "add" entry's effect, per the table in §4.3: insert if
    /// absent, update `location` and `payload` in place if present.
    pub fn apply_add(&mut self, key: u64, payload: Option<Bytes>, location: Location) {
        self.entries.insert(key, IndexEntry {
            payload,
            location: Some(location),
        });
    }

    /// Applies a log "delete" entry's effect: remove if present, no-op if absent.
    pub fn apply_del(&mut self, key: u64) {
        self.entries.remove(&key);
    }

    /// Upserts a key from a `put`, without touching its on-disk location —
    /// callers set `location` separately once the log append (if any) lands.
    pub fn upsert(&mut self, key: u64, entry: IndexEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: u64) -> Option<IndexEntry> {
        self.entries.remove(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_add_then_del_is_absent() {
        let mut idx = Index::new();
        idx.apply_add(1, Some(Bytes::from(vec![1, 2])), Location::Log(4));
        assert!(idx.get(1).is_some());
        idx.apply_del(1);
        assert!(idx.get(1).is_none());
    }

    #[test]
    fn apply_del_on_absent_key_is_noop() {
        let mut idx = Index::new();
        idx.apply_del(42);
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn apply_add_updates_in_place() {
        let mut idx = Index::new();
        idx.apply_add(1, Some(Bytes::from(vec![1])), Location::Log(4));
        idx.apply_add(1, Some(Bytes::from(vec![2])), Location::Log(40));
        let entry = idx.get(1).unwrap();
        assert_eq!(entry.payload.as_deref(), Some(&[2][..]));
        assert_eq!(entry.location, Some(Location::Log(40)));
        assert_eq!(idx.len(), 1);
    }
}
