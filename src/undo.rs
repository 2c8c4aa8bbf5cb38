//! Single-use undo handles for reversible operations.
//!
//! The ledger lives for the process lifetime only; entries are not persisted
//! across restarts. Each entry is consumed at most once: `consume` removes it
//! on lookup even if the caller then fails to apply the inverse.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::tokens::urlsafe_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    Move,
}

#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub kind: UndoKind,
    /// Where the affected item sits now.
    pub current: PathBuf,
    /// Where it was before the operation.
    pub original: PathBuf,
}

/// Process-wide map of undo token to inverse operation. Owned by the serving
/// context and injected into handlers, never a global.
#[derive(Debug, Default)]
pub struct UndoLedger {
    entries: Mutex<HashMap<String, UndoEntry>>,
}

impl UndoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inverse of an operation and hand back its one-shot token.
    pub fn register(&self, kind: UndoKind, current: PathBuf, original: PathBuf) -> String {
        let token = urlsafe_token(16);
        let entry = UndoEntry { kind, current, original };
        self.entries.lock().insert(token.clone(), entry);
        token
    }

    /// Remove and return the entry for `token`. The removal is unconditional:
    /// a second consume of the same token always comes back `None`, and two
    /// concurrent consumers can never both receive the entry. The lock is held
    /// only for the map operation, never across filesystem work.
    pub fn consume(&self, token: &str) -> Option<UndoEntry> {
        self.entries.lock().remove(token)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn consume_is_at_most_once() {
        let ledger = UndoLedger::new();
        let token = ledger.register(
            UndoKind::Move,
            Path::new("/tmp/current").to_path_buf(),
            Path::new("/tmp/original").to_path_buf(),
        );
        let first = ledger.consume(&token);
        assert!(first.is_some());
        assert_eq!(first.unwrap().kind, UndoKind::Move);
        assert!(ledger.consume(&token).is_none());
    }

    #[test]
    fn unknown_token_is_none() {
        let ledger = UndoLedger::new();
        assert!(ledger.consume("nope").is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn entries_are_tracked_until_consumed() {
        let ledger = UndoLedger::new();
        let t1 = ledger.register(UndoKind::Move, "/a".into(), "/b".into());
        let _t2 = ledger.register(UndoKind::Move, "/c".into(), "/d".into());
        assert_eq!(ledger.len(), 2);
        ledger.consume(&t1);
        assert_eq!(ledger.len(), 1);
    }
}
