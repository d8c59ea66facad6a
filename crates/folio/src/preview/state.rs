//! Toggle state and single-shot timers used by the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// UI toggles the orchestrator consults.
///
/// Owned by whoever presents the controls; shared with the orchestrator,
/// which reads them and occasionally forces one back (auto reload while
/// live styling is open, split mode after a split request).
#[derive(Debug)]
pub struct Toggles {
    visible: AtomicBool,
    auto_reload: AtomicBool,
    sync_to_editor: AtomicBool,
    split: AtomicBool,
    live_css_visible: AtomicBool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            visible: AtomicBool::new(true),
            auto_reload: AtomicBool::new(true),
            sync_to_editor: AtomicBool::new(true),
            split: AtomicBool::new(false),
            live_css_visible: AtomicBool::new(false),
        }
    }
}

macro_rules! toggle {
    ($field:ident, $setter:ident) => {
        pub fn $field(&self) -> bool {
            self.$field.load(Ordering::SeqCst)
        }

        pub fn $setter(&self, value: bool) {
            self.$field.store(value, Ordering::SeqCst);
        }
    };
}

impl Toggles {
    pub fn new() -> Self {
        Self::default()
    }

    toggle!(visible, set_visible);
    toggle!(auto_reload, set_auto_reload);
    toggle!(sync_to_editor, set_sync_to_editor);
    toggle!(split, set_split);
    toggle!(live_css_visible, set_live_css_visible);
}

/// A restartable single-shot timer driven by the owner's event loop.
///
/// The owner asks for [`deadline`](Self::deadline), sleeps until then and
/// calls [`fire`](Self::fire).
#[derive(Debug, Default, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// (Re)start the timer so that it fires `after` from `now`.
    pub fn start(&mut self, now: Instant, after: Duration) {
        self.at = Some(now + after);
    }

    pub fn stop(&mut self) {
        self.at = None;
    }

    pub fn is_active(&self) -> bool {
        self.at.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.at
    }

    /// Whether the timer has expired at `now`. An expired timer stops.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if at <= now => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}
