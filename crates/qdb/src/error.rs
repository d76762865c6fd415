//! The public error type.
//!
//! Recovery-time corruption (bad trailer, stale log header, CRC mismatch,
//! short read) is handled locally per §7 and never reaches this type —
//! only the failures that `open`/`sync`/`defrag` can legitimately surface
//! at the API boundary do.

/// Errors surfaced by [`crate::Engine`]'s fallible operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("failed to create or access directory {path}")]
    Directory {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error writing snapshot")]
    Io(#[from] std::io::Error),
}
