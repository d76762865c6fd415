//! Where a record's bytes live on disk, once they are not resident in memory.

/// The on-disk home of a record: either the authoritative snapshot file or
/// the append log extending it.
///
/// The reference design packs this into the sign bit of a single `i64`
/// (negative = log, non-negative = snapshot). This crate keeps the two
/// sources as distinct enum variants instead — the thing worth preserving is
/// the semantic distinction between "snapshot" and "log", not the packing
/// trick used to encode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Byte offset of the record's framing within the active snapshot file.
    Snapshot(u64),
    /// Byte offset of the entry's framing within the append log.
    Log(u64),
}
