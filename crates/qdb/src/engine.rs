//! Public operations, recovery, compaction, and mutex/nosync discipline.
//!
//! [`Engine`] is a thin, cheaply-clonable handle around a mutex-protected
//! [`State`]. Every public operation takes that mutex for its duration
//! except [`Engine::defrag`], which hands the rewrite to a detached
//! worker thread and returns once the worker has been spawned — see §9 for
//! why a `Condvar`-guarded `compacting` flag stands in for the reference
//! design's "transfer the held lock into a goroutine" trick.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use bytes::Bytes;

use crate::config::EngineOptions;
use crate::error::EngineError;
use crate::index::{Index, IndexEntry};
use crate::location::Location;
use crate::log::Log;
use crate::snapshot;

const SNAPSHOT_SLOTS: [&str; 2] = ["qdb.0", "qdb.1"];
const LOG_NAME: &str = "qdb.log";

/// Where the engine is in its lifecycle, per §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Loaded,
    Closed,
}

struct State {
    phase: Phase,
    active_slot: u8,
    sequence: u32,
    index: Index,
    log: Option<Log>,
    snapshot_file: Option<File>,
    options: EngineOptions,
    nosync: bool,
    dirty: bool,
    compacting: bool,
}

struct Shared {
    dir: PathBuf,
    state: Mutex<State>,
    compaction_done: Condvar,
}

/// An embedded key/value store rooted at a directory, per §1/§6.
///
/// Cloning an `Engine` yields another handle to the same underlying store
/// (same mutex, same files) — the clone exists so `defrag()` can hand a
/// handle to its background worker without the caller losing access to
/// the original.
#[derive(Clone)]
pub struct Engine(Arc<Shared>);

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("dir", &self.0.dir).finish()
    }
}

impl Engine {
    /// Opens `dir`, creating it if missing. Returns a handle in the
    /// not-yet-loaded state; recovery runs lazily on first use, or
    /// eagerly if the caller invokes [`Engine::load`].
    pub fn open(dir: impl Into<PathBuf>, options: EngineOptions) -> Result<Self, EngineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| EngineError::Directory {
            path: dir.clone(),
            source,
        })?;

        let state = State {
            phase: Phase::Fresh,
            active_slot: 0,
            sequence: 0,
            index: Index::new(),
            log: None,
            snapshot_file: None,
            options,
            nosync: false,
            dirty: false,
            compacting: false,
        };

        Ok(Self(Arc::new(Shared {
            dir,
            state: Mutex::new(state),
            compaction_done: Condvar::new(),
        })))
    }

    /// Triggers recovery if it has not already run. A no-op once the
    /// engine is loaded. Recovery failures surface here; operations that
    /// trigger recovery implicitly (§4.5's `none surfaced` column) instead
    /// log them via `tracing::error!` and proceed with whatever state was
    /// recovered.
    pub fn load(&self) -> Result<(), EngineError> {
        let mut state = self.0.state.lock().expect("engine mutex poisoned");
        assert_ne!(state.phase, Phase::Closed, "operating on a closed engine");
        if state.phase == Phase::Fresh {
            Self::recover(&self.0.dir, &mut state)?;
            state.phase = Phase::Loaded;
        }
        Ok(())
    }

    /// Returns the number of live keys.
    pub fn count(&self) -> usize {
        let state = self.lock_for_op();
        state.index.len()
    }

    /// Returns the value for `key`, if it is live.
    pub fn get(&self, key: u64) -> Option<Bytes> {
        let mut state = self.lock_for_op();
        let entry = state.index.get(key)?.clone();
        match Self::load_value(&mut state, &entry) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(key, %error, "failed to read value from disk");
                None
            }
        }
    }

    /// Upserts `key` to `value`. In sync mode this appends to the log
    /// first; in nosync mode it only marks the engine dirty (§4.5).
    pub fn put(&self, key: u64, value: impl Into<Bytes>) {
        let value: Bytes = value.into();
        let mut state = self.lock_for_op();
        if state.nosync {
            // No location exists yet for this write, so the payload must
            // stay resident regardless of the residency policy — there is
            // nowhere else to read it from until the next compaction (§9).
            state.index.upsert(key, IndexEntry::in_memory_only(value));
            state.dirty = true;
            return;
        }

        let admit = state.options.admit(&value);
        match Self::append_add(&self.0.dir, &mut state, key, &value) {
            Ok(offset) => {
                let entry = if admit {
                    IndexEntry::resident(value, Location::Log(offset))
                } else {
                    IndexEntry::on_disk(Location::Log(offset))
                };
                state.index.upsert(key, entry);
            }
            Err(error) => {
                tracing::error!(key, %error, "failed to append put to log, keeping in memory only");
                state.index.upsert(key, IndexEntry::in_memory_only(value));
                state.dirty = true;
            }
        }
    }

    /// Removes `key`. In sync mode this appends a tombstone to the log
    /// before removing the in-memory entry.
    pub fn del(&self, key: u64) {
        let mut state = self.lock_for_op();
        if state.nosync {
            state.index.remove(key);
            state.dirty = true;
            return;
        }

        match Self::append_del(&self.0.dir, &mut state, key) {
            Ok(()) => {
                state.index.remove(key);
            }
            Err(error) => {
                tracing::error!(key, %error, "failed to append delete to log, removing in memory only");
                state.index.remove(key);
                state.dirty = true;
            }
        }
    }

    /// Iterates all live records, stopping early if `visitor` returns
    /// `false`. The index is unchanged by a `browse` call.
    pub fn browse(&self, mut visitor: impl FnMut(u64, &[u8]) -> bool) {
        let mut state = self.lock_for_op();
        let keys: Vec<u64> = state.index.iter().map(|(key, _)| *key).collect();
        for key in keys {
            let Some(entry) = state.index.get(key).cloned() else {
                continue;
            };
            let value = match Self::load_value(&mut state, &entry) {
                Ok(value) => value,
                Err(error) => {
                    tracing::error!(key, %error, "failed to read value during browse");
                    continue;
                }
            };
            if !visitor(key, &value) {
                break;
            }
        }
    }

    /// Switches to deferred-durability mode: subsequent `put`/`del` calls
    /// only update memory and mark the engine dirty.
    pub fn no_sync(&self) {
        let mut state = self.lock_for_op();
        state.nosync = true;
    }

    /// Leaves nosync mode and makes the current state durable: compacts
    /// if dirty, otherwise fsyncs the open log if one exists (§4.5).
    pub fn sync(&self) -> Result<(), EngineError> {
        let mut state = self.lock_for_op();
        state.nosync = false;
        if state.dirty {
            Self::compact_locked(&self.0.dir, &mut state)?;
        } else if let Some(log) = state.log.as_mut() {
            log.sync()?;
        }
        Ok(())
    }

    /// If a log exists, hands a compaction pass to a background worker
    /// and returns `true`. Returns `false` if there is nothing to compact
    /// or a compaction is already running.
    pub fn defrag(&self) -> bool {
        let mut state = self.lock_for_op();
        if state.log.is_none() || state.compacting {
            return false;
        }
        state.compacting = true;
        drop(state);

        let shared = Arc::clone(&self.0);
        thread::spawn(move || {
            let mut state = shared.state.lock().expect("engine mutex poisoned");
            if let Err(error) = Self::compact_locked(&shared.dir, &mut state) {
                tracing::error!(%error, "background compaction failed");
            }
            state.compacting = false;
            shared.compaction_done.notify_all();
        });
        true
    }

    /// Syncs then releases open files and drops the index. Further
    /// operations on this handle (or any clone of it) are a programmer
    /// error.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut state = self.lock_for_op();
        state.nosync = false;
        if state.dirty {
            Self::compact_locked(&self.0.dir, &mut state)?;
        } else if let Some(log) = state.log.as_mut() {
            log.sync()?;
        }
        state.log = None;
        state.snapshot_file = None;
        state.index.clear();
        state.phase = Phase::Closed;
        Ok(())
    }

    /// Locks the engine, running recovery if this is the first operation
    /// and waiting out any in-flight compaction, per §5's ordering rules.
    fn lock_for_op(&self) -> MutexGuard<'_, State> {
        let mut state = self.0.state.lock().expect("engine mutex poisoned");
        assert_ne!(state.phase, Phase::Closed, "operating on a closed engine");
        if state.phase == Phase::Fresh {
            if let Err(error) = Self::recover(&self.0.dir, &mut state) {
                tracing::error!(%error, "recovery failed, continuing with partial state");
            }
            state.phase = Phase::Loaded;
        }
        while state.compacting {
            state = self.0.compaction_done.wait(state).expect("engine mutex poisoned");
        }
        state
    }

    /// Fuses the newer snapshot with its extending log into `state`, per
    /// §4.5 *Recovery on load*.
    fn recover(dir: &Path, state: &mut State) -> Result<(), EngineError> {
        let path0 = dir.join(SNAPSHOT_SLOTS[0]);
        let path1 = dir.join(SNAPSHOT_SLOTS[1]);
        let probe0 = snapshot::probe(&path0)?;
        let probe1 = snapshot::probe(&path1)?;

        let chosen = match (probe0, probe1) {
            (Some(p0), Some(p1)) => {
                if snapshot::is_newer(p0.sequence, p1.sequence) {
                    remove_if_exists(&path1)?;
                    Some((0u8, p0))
                } else {
                    remove_if_exists(&path0)?;
                    Some((1u8, p1))
                }
            }
            (Some(p0), None) => Some((0u8, p0)),
            (None, Some(p1)) => Some((1u8, p1)),
            (None, None) => None,
        };

        let (active_slot, sequence, mut index, snapshot_file) = match chosen {
            Some((slot, probe)) => {
                let path = if slot == 0 { &path0 } else { &path1 };
                let index = snapshot::scan(path, probe.file_len, |v| state.options.admit(v))?;
                let file = File::open(path)?;
                (slot, probe.sequence, index, Some(file))
            }
            None => (0u8, 0u32, Index::new(), None),
        };

        let log_path = dir.join(LOG_NAME);
        let mut log = Log::open(&log_path, sequence)?;
        if let Some(log) = log.as_mut() {
            log.replay(&mut index, |v| state.options.admit(v))?;
        }

        tracing::info!(
            active_slot,
            sequence,
            keys = index.len(),
            log_open = log.is_some(),
            "recovered engine state"
        );

        state.active_slot = active_slot;
        state.sequence = sequence;
        state.index = index;
        state.log = log;
        state.snapshot_file = snapshot_file;
        Ok(())
    }

    /// Resolves an index entry to owned bytes, reading from the snapshot
    /// or log on disk if the payload is not resident, per §4.4 *Read
    /// path*.
    fn load_value(state: &mut State, entry: &IndexEntry) -> io::Result<Bytes> {
        if let Some(payload) = &entry.payload {
            return Ok(payload.clone());
        }
        match entry.location {
            Some(Location::Snapshot(offset)) => {
                let file = state
                    .snapshot_file
                    .as_mut()
                    .expect("on-disk snapshot location without an open snapshot file");
                snapshot::read_value(file, offset).map(Bytes::from)
            }
            Some(Location::Log(offset)) => {
                let log = state
                    .log
                    .as_mut()
                    .expect("on-disk log location without an open log");
                log.read_value(offset).map(Bytes::from)
            }
            None => unreachable!("an index entry without a payload always has a location"),
        }
    }

    /// Appends a `put` to the log, lazily creating it if this is the
    /// first write since open, per §4.3 *Append*.
    fn append_add(dir: &Path, state: &mut State, key: u64, value: &[u8]) -> io::Result<u64> {
        let log = Self::log_or_create(dir, state)?;
        log.append_add(key, value)
    }

    /// Appends a tombstone for `key`, lazily creating the log if needed.
    fn append_del(dir: &Path, state: &mut State, key: u64) -> io::Result<()> {
        let log = Self::log_or_create(dir, state)?;
        log.append_del(key)?;
        Ok(())
    }

    /// Returns the open log, creating a fresh one headed by the current
    /// `sequence` if none is open yet.
    fn log_or_create<'a>(dir: &Path, state: &'a mut State) -> io::Result<&'a mut Log> {
        if state.log.is_none() {
            let log = Log::create(&dir.join(LOG_NAME), state.sequence)?;
            state.log = Some(log);
        }
        Ok(state.log.as_mut().expect("just ensured"))
    }

    /// Writes a new snapshot reflecting the current index to the opposite
    /// slot, retires the old snapshot and log, and advances `sequence`
    /// and `active_slot`, per §4.2 *Write*.
    fn compact_locked(dir: &Path, state: &mut State) -> Result<(), EngineError> {
        let start = Instant::now();
        let new_slot: u8 = if state.active_slot == 0 { 1 } else { 0 };
        let new_sequence = state.sequence.wrapping_add(1);
        let new_path = dir.join(SNAPSHOT_SLOTS[new_slot as usize]);

        let keys: Vec<u64> = state.index.iter().map(|(key, _)| *key).collect();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let entry = state.index.get(key).expect("key from iter").clone();
            let value = Self::load_value(state, &entry)?;
            values.push((key, value));
        }

        let offsets = snapshot::write(
            &new_path,
            new_sequence,
            values.iter().map(|(key, value)| (*key, value.to_vec())),
        )?;

        let old_snapshot_path = dir.join(SNAPSHOT_SLOTS[state.active_slot as usize]);
        remove_if_exists(&old_snapshot_path)?;
        state.log = None;
        crate::log::delete(&dir.join(LOG_NAME))?;

        let new_file = File::open(&new_path)?;
        let mut new_index = Index::new();
        for ((key, value), (_, offset)) in values.into_iter().zip(offsets) {
            let location = Location::Snapshot(offset);
            let entry = if state.options.admit(&value) {
                IndexEntry::resident(value, location)
            } else {
                IndexEntry::on_disk(location)
            };
            new_index.upsert(key, entry);
        }

        let live_keys = new_index.len();
        state.index = new_index;
        state.active_slot = new_slot;
        state.sequence = new_sequence;
        state.snapshot_file = Some(new_file);
        state.dirty = false;

        tracing::info!(
            new_slot,
            sequence = new_sequence,
            keys = live_keys,
            elapsed_ms = start.elapsed().as_millis(),
            "compaction complete"
        );
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
