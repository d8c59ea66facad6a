//! Per-document parse cache entries

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use folio_core::Fingerprint;

/// Cached parse state for one document name.
///
/// Entries are shared between the worker thread (which completes them)
/// and the UI side (which submits and reads them). The lock is only held
/// for field updates, never across a parse.
#[derive(Debug)]
pub struct ParseEntry {
    name: String,
    state: Mutex<EntryState>,
}

#[derive(Debug, Default)]
struct EntryState {
    fingerprint: Option<Fingerprint>,
    parsing_done: bool,
    /// `None` once done means the parser failed on this content.
    parsed: Option<Bytes>,
}

impl ParseEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(EntryState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a submission of content with `fingerprint`.
    ///
    /// Returns `false` when the entry is already done for identical
    /// content, in which case nothing changes. Otherwise the entry is
    /// invalidated and `true` is returned: the caller must enqueue a parse.
    pub fn submit(&self, fingerprint: Fingerprint) -> bool {
        let mut state = self.state();
        if state.parsing_done && state.fingerprint == Some(fingerprint) {
            return false;
        }
        state.fingerprint = Some(fingerprint);
        state.parsing_done = false;
        state.parsed = None;
        true
    }

    /// Store the parse result for content with `fingerprint`.
    ///
    /// Results for content that has since been resubmitted with a
    /// different fingerprint are dropped; returns whether the result was
    /// stored.
    pub fn complete(&self, fingerprint: Fingerprint, parsed: Option<Bytes>) -> bool {
        let mut state = self.state();
        if state.fingerprint != Some(fingerprint) {
            return false;
        }
        state.parsing_done = true;
        state.parsed = parsed;
        true
    }

    pub fn is_done(&self) -> bool {
        self.state().parsing_done
    }

    /// Fingerprint of the most recent submission.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.state().fingerprint
    }

    /// Byte length of the most recent submission.
    pub fn last_length(&self) -> Option<usize> {
        self.state().fingerprint.map(|f| f.len())
    }

    /// Parsed output, available once parsing is done.
    ///
    /// A failed parse yields an empty body so that waiting requests are
    /// still answered.
    pub fn parsed_data(&self) -> Option<Bytes> {
        let state = self.state();
        if !state.parsing_done {
            return None;
        }
        Some(state.parsed.clone().unwrap_or_default())
    }

    /// Whether the last completed parse failed.
    pub fn failed(&self) -> bool {
        let state = self.state();
        state.parsing_done && state.parsed.is_none()
    }
}
