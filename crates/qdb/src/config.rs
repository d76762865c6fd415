//! Engine configuration surface (§11).
//!
//! There is no configuration file to load here — `qdb` is an embedded
//! library, not a standalone process, so there is nothing resembling a
//! project-level TOML to parse. The entire surface is the two residency
//! knobs named in §6, exposed as a small builder.

use std::sync::Arc;

/// A caller-supplied predicate deciding whether a value's bytes should be
/// kept resident in memory. Consulted only when `never_keep_in_mem` is false.
pub type KeepInMemPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Configuration consumed by [`crate::Engine::open`].
#[derive(Clone, Default)]
pub struct EngineOptions {
    never_keep_in_mem: bool,
    keep_in_mem: Option<KeepInMemPredicate>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces every payload to stay on disk; `Get` always re-reads.
    pub fn never_keep_in_mem(mut self, never: bool) -> Self {
        self.never_keep_in_mem = never;
        self
    }

    /// Sets a per-record residency predicate, consulted on load and replay.
    pub fn keep_in_mem(mut self, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.keep_in_mem = Some(Arc::new(predicate));
        self
    }

    /// Decides whether `value` should be admitted into memory, per §4.4:
    /// never if `never_keep_in_mem`, else the predicate if one is set, else
    /// always.
    pub fn admit(&self, value: &[u8]) -> bool {
        if self.never_keep_in_mem {
            return false;
        }
        match &self.keep_in_mem {
            Some(pred) => pred(value),
            None => true,
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("never_keep_in_mem", &self.never_keep_in_mem)
            .field("keep_in_mem", &self.keep_in_mem.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admits_everything() {
        let opts = EngineOptions::new();
        assert!(opts.admit(b"anything"));
    }

    #[test]
    fn never_keep_in_mem_admits_nothing() {
        let opts = EngineOptions::new().never_keep_in_mem(true);
        assert!(!opts.admit(b"anything"));
    }

    #[test]
    fn predicate_decides_per_value() {
        let opts = EngineOptions::new().keep_in_mem(|v| v.len() < 4);
        assert!(opts.admit(b"ab"));
        assert!(!opts.admit(b"abcdef"));
    }

    #[test]
    fn never_keep_in_mem_overrides_predicate() {
        let opts = EngineOptions::new()
            .never_keep_in_mem(true)
            .keep_in_mem(|_| true);
        assert!(!opts.admit(b"x"));
    }
}
