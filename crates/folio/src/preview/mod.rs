//! Preview orchestrator.
//!
//! [`Preview`] decides when the current document is re-parsed and
//! reloaded, keeps the view on the right virtual URL, follows the editor
//! cursor and runs the split-mode state machine. It is driven by a single
//! event loop (see `bridge::http::session`) which owns it, calls its
//! methods as UI events arrive and calls [`Preview::on_timer`] whenever
//! [`Preview::next_deadline`] passes.

mod state;
mod view;

use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_core::{Workspace, href_fragment, media, name_to_url};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;

use crate::config::{FontSettings, PreviewConfig};
use crate::worker::ParseWorker;

pub use state::{Deadline, Toggles};
pub use view::{RecordingView, View, ViewCall};

/// Notifications for the rest of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PreviewEvent {
    /// The parser could not be started; carries its error report.
    WorkerLaunchFailed { details: String },
    RefreshStarting,
    Refreshed,
    /// Auto reload was switched off while live styling is open.
    CannotDisableAutoReload,
    /// A link into another document was clicked. No fragment means the top.
    LinkClicked {
        name: String,
        fragment: Option<String>,
    },
    /// The user clicked an element; the editor should go to `lnum`.
    SyncRequested { name: String, lnum: Option<u32> },
    /// Split mode was switched on and the view should enter it.
    SplitStartRequested,
    /// Split `name` at the clicked location.
    SplitRequested {
        name: String,
        loc: Value,
        totals: Value,
    },
    /// A split was requested on an element that cannot be split on.
    InvalidSplitLocation { message: String },
}

/// A cursor position to sync the view to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcelineAddress {
    pub name: String,
    pub lnum: Option<u32>,
    /// Tag path to the element, outermost first.
    pub tags: Vec<String>,
}

pub struct Preview<V: View> {
    view: V,
    worker: Arc<ParseWorker>,
    workspace: Arc<Workspace>,
    toggles: Arc<Toggles>,
    events: UnboundedSender<PreviewEvent>,
    current_name: Option<String>,
    refresh_interval: Duration,
    refresh_timer: Deadline,
    sync_delay: Duration,
    sync_timer: Deadline,
    sync_request: Option<SourcelineAddress>,
}

impl<V: View> Preview<V> {
    pub fn new(
        view: V,
        worker: Arc<ParseWorker>,
        workspace: Arc<Workspace>,
        toggles: Arc<Toggles>,
        config: &PreviewConfig,
        events: UnboundedSender<PreviewEvent>,
    ) -> Self {
        Self {
            view,
            worker,
            workspace,
            toggles,
            events,
            current_name: None,
            refresh_interval: config.refresh_interval(),
            refresh_timer: Deadline::default(),
            sync_delay: config.sync_delay(),
            sync_timer: Deadline::default(),
            sync_request: None,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn toggles(&self) -> &Arc<Toggles> {
        &self.toggles
    }

    /// Document being previewed.
    pub fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    /// Virtual URL for `name`.
    pub fn name_to_url(&self, name: &str) -> Url {
        name_to_url(name)
    }

    fn emit(&self, event: PreviewEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for preview events");
        }
    }

    // ========================================================================
    // Showing and refreshing
    // ========================================================================

    /// Switch the preview to `name`. Returns whether the document changed.
    pub fn show(&mut self, name: &str) -> bool {
        if self.current_name.as_deref() == Some(name) {
            return false;
        }
        self.refresh_timer.stop();
        self.current_name = Some(name.to_string());
        self.report_worker_launch_error();
        self.worker.add_request(name);
        let url = self.name_to_url(name);
        self.view.set_url(&url);
        true
    }

    /// Re-parse the current document if it changed and reload the view.
    pub fn refresh(&mut self) {
        let Some(name) = self.current_name.clone() else {
            return;
        };
        self.refresh_timer.stop();
        self.report_worker_launch_error();
        self.worker.add_request(&name);

        let url = self.name_to_url(&name);
        self.emit(PreviewEvent::RefreshStarting);
        if self.view.url() != Some(&url) {
            // The view was pointed elsewhere, e.g. the container was swapped
            self.view.set_url(&url);
        } else {
            self.view.reload();
        }
        self.emit(PreviewEvent::Refreshed);
    }

    /// Show the placeholder page and forget the current document.
    pub fn clear(&mut self) {
        self.view.clear();
        self.current_name = None;
    }

    /// The edited book was replaced: drop every cached parse.
    pub fn container_changed(&mut self) {
        self.worker.clear();
        if self.current_name.is_some() {
            self.refresh();
        }
    }

    /// Whether a change to `names` can show up in the current document.
    ///
    /// Other documents never do; stylesheets, images and fonts might.
    pub fn affected_by(&self, names: &[String]) -> bool {
        let Some(current) = self.current_name.as_deref() else {
            return false;
        };
        let container = self.workspace.container();
        names.iter().any(|name| {
            name == current
                || !container
                    .mime_type(name)
                    .is_some_and(|m| media::is_document(&m))
        })
    }

    /// Arm the refresh timer, if the preview is in a state that wants one.
    pub fn start_refresh_timer(&mut self, now: Instant) {
        if self.toggles.live_css_visible()
            || (self.toggles.visible() && self.toggles.auto_reload())
        {
            self.refresh_timer.start(now, self.refresh_interval);
        }
    }

    pub fn stop_refresh_timer(&mut self) {
        self.refresh_timer.stop();
    }

    pub fn refresh_timer_active(&self) -> bool {
        self.refresh_timer.is_active()
    }

    pub fn auto_reload_toggled(&mut self, checked: bool, now: Instant) {
        let mut checked = checked;
        if self.toggles.live_css_visible() && !checked {
            self.toggles.set_auto_reload(true);
            checked = true;
            self.emit(PreviewEvent::CannotDisableAutoReload);
        } else {
            self.toggles.set_auto_reload(checked);
        }
        if checked {
            self.start_refresh_timer(now);
        }
    }

    pub fn visibility_changed(&mut self, visible: bool) {
        self.toggles.set_visible(visible);
        if visible {
            self.refresh();
        }
    }

    pub fn live_css_toggled(&mut self, visible: bool, now: Instant) {
        self.toggles.set_live_css_visible(visible);
        if visible {
            self.toggles.set_auto_reload(true);
            self.start_refresh_timer(now);
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.refresh_timer.deadline(), self.sync_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever timers have expired at `now`.
    pub fn on_timer(&mut self, now: Instant) {
        if self.refresh_timer.fire(now) {
            self.refresh();
        }
        if self.sync_timer.fire(now) {
            self.sync_now(now);
        }
    }

    // ========================================================================
    // Cursor sync
    // ========================================================================

    /// The editor cursor moved. The view follows after a short debounce.
    pub fn sync_to_editor(&mut self, address: SourcelineAddress, now: Instant) {
        self.sync_request = Some(address);
        self.sync_timer.start(now, self.sync_delay);
    }

    fn sync_now(&mut self, now: Instant) {
        if !self.toggles.sync_to_editor() {
            return;
        }
        let Some(request) = self.sync_request.as_ref() else {
            return;
        };
        if self.refresh_timer.is_active() || self.current_name.as_deref() != Some(&request.name) {
            // Wait for the pending refresh, or for the document to be shown
            self.sync_timer.start(now, self.sync_delay);
            return;
        }
        let Some(request) = self.sync_request.take() else {
            return;
        };
        if let Some(lnum) = request.lnum {
            let tags: Vec<String> = request.tags.iter().map(|t| t.to_lowercase()).collect();
            self.view.go_to_sourceline_address(lnum, &tags);
        }
    }

    /// Something was clicked in the view.
    pub fn request_sync(&mut self, tag: &str, href: Option<&str>, lnum: Option<u32>) {
        let Some(current) = self.current_name.clone() else {
            return;
        };
        if tag.eq_ignore_ascii_case("a")
            && let Some(href) = href.filter(|h| !h.is_empty())
        {
            let container = self.workspace.container();
            let name = if href.starts_with('#') {
                Some(current.clone())
            } else {
                container.href_to_name(href, &current)
            };
            let fragment = href_fragment(href);

            if name.as_deref() == Some(current.as_str()) {
                self.view.go_to_anchor(fragment.unwrap_or(""), lnum);
                return;
            }
            if let Some(name) = name
                && container.exists(&name)
                && container
                    .mime_type(&name)
                    .is_some_and(|m| media::is_document(&m))
            {
                self.emit(PreviewEvent::LinkClicked {
                    name,
                    fragment: fragment.map(str::to_string),
                });
                return;
            }
        }
        self.emit(PreviewEvent::SyncRequested {
            name: current,
            lnum,
        });
    }

    // ========================================================================
    // Split mode
    // ========================================================================

    pub fn split_toggled(&mut self, checked: bool) {
        self.toggles.set_split(checked);
        if checked {
            self.emit(PreviewEvent::SplitStartRequested);
        } else {
            self.view.split_mode(false);
        }
    }

    pub fn do_start_split(&mut self) {
        self.view.split_mode(true);
    }

    pub fn stop_split(&mut self) {
        if self.toggles.split() {
            self.split_toggled(false);
        }
    }

    /// A page finished loading. Split mode survives reloads.
    pub fn load_finished(&mut self, ok: bool) {
        if self.toggles.split() {
            if ok {
                self.do_start_split();
            } else {
                self.stop_split();
            }
        }
    }

    /// The user picked a split point while in split mode.
    pub fn request_split(&mut self, loc: Value, totals: Value) {
        self.stop_split();
        if is_empty_location(&loc) || is_empty_location(&totals) {
            self.emit(PreviewEvent::InvalidSplitLocation {
                message: "Cannot split on the body tag".to_string(),
            });
            return;
        }
        if let Some(name) = self.current_name.clone() {
            self.emit(PreviewEvent::SplitRequested { name, loc, totals });
        }
    }

    // ========================================================================
    // Settings and errors
    // ========================================================================

    pub fn apply_settings(&mut self, fonts: &FontSettings) {
        self.view.apply_fonts(&fonts.resolve());
    }

    /// Surface the parser launch error, once.
    pub fn report_worker_launch_error(&mut self) {
        if let Some(details) = self.worker.take_launch_error() {
            warn!("Preview parser is unavailable");
            self.emit(PreviewEvent::WorkerLaunchFailed { details });
        }
    }
}

fn is_empty_location(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{BufferOverlay, MemoryContainer};
    use serde_json::json;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    struct Harness {
        preview: Preview<RecordingView>,
        worker: Arc<ParseWorker>,
        events: UnboundedReceiver<PreviewEvent>,
    }

    impl Harness {
        fn events(&mut self) -> Vec<PreviewEvent> {
            let mut out = Vec::new();
            while let Ok(e) = self.events.try_recv() {
                out.push(e);
            }
            out
        }
    }

    fn harness() -> Harness {
        let container = MemoryContainer::new()
            .add("text/ch1.xhtml", media::XHTML_MIME, "<p id=\"a\">one</p>")
            .add("text/ch2.xhtml", media::XHTML_MIME, "<p>two</p>")
            .add("images/cover.jpg", "image/jpeg", vec![0xff, 0xd8]);
        let workspace = Arc::new(Workspace::new(
            Arc::new(container),
            Arc::new(BufferOverlay::new()),
        ));
        let worker = Arc::new(ParseWorker::new(Arc::clone(&workspace), Duration::ZERO));
        let (tx, rx) = unbounded_channel();
        let preview = Preview::new(
            RecordingView::new(),
            Arc::clone(&worker),
            workspace,
            Arc::new(Toggles::new()),
            &PreviewConfig::default(),
            tx,
        );
        Harness {
            preview,
            worker,
            events: rx,
        }
    }

    #[test]
    fn test_show_switches_once() {
        let mut h = harness();
        assert!(h.preview.show("text/ch1.xhtml"));
        assert!(!h.preview.show("text/ch1.xhtml"));
        assert_eq!(h.worker.queued(), 1);
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::SetUrl(name_to_url("text/ch1.xhtml"))]
        );
    }

    #[test]
    fn test_refresh_reloads_in_place() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();

        h.preview.refresh();
        assert_eq!(h.preview.view_mut().take_calls(), vec![ViewCall::Reload]);
        assert_eq!(
            h.events(),
            vec![PreviewEvent::RefreshStarting, PreviewEvent::Refreshed]
        );
    }

    #[test]
    fn test_refresh_renavigates_when_url_differs() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().url = None;
        h.preview.view_mut().take_calls();

        h.preview.refresh();
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::SetUrl(name_to_url("text/ch1.xhtml"))]
        );
    }

    #[test]
    fn test_container_changed_reparses_current_document() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();
        let before = h.worker.entry("text/ch1.xhtml").unwrap();

        h.preview.container_changed();

        let after = h.worker.entry("text/ch1.xhtml").unwrap();
        assert!(!Arc::ptr_eq(&before, &after), "cache entry was not dropped");
        assert_eq!(h.worker.queued(), 2);
        assert_eq!(h.preview.view_mut().take_calls(), vec![ViewCall::Reload]);
        assert_eq!(
            h.events(),
            vec![PreviewEvent::RefreshStarting, PreviewEvent::Refreshed]
        );
    }

    #[test]
    fn test_container_changed_without_document() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.clear();
        h.preview.view_mut().take_calls();

        h.preview.container_changed();
        assert!(h.worker.entry("text/ch1.xhtml").is_none());
        assert!(h.preview.view_mut().take_calls().is_empty());
    }

    #[test]
    fn test_affected_by_current_document_and_assets() {
        let mut h = harness();
        assert!(!h.preview.affected_by(&["text/ch1.xhtml".into()]));

        h.preview.show("text/ch1.xhtml");
        assert!(h.preview.affected_by(&["text/ch1.xhtml".into()]));
        assert!(!h.preview.affected_by(&["text/ch2.xhtml".into()]));
        assert!(h.preview.affected_by(&["images/cover.jpg".into()]));
        assert!(h.preview.affected_by(&["styles/new.css".into()]));
    }

    #[test]
    fn test_refresh_without_document_is_noop() {
        let mut h = harness();
        h.preview.refresh();
        assert!(h.preview.view_mut().take_calls().is_empty());
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_clear_forgets_document() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.clear();
        assert_eq!(h.preview.current_name(), None);
        assert!(h.preview.show("text/ch1.xhtml"));
    }

    #[test]
    fn test_refresh_timer_needs_visible_and_auto_reload() {
        let mut h = harness();
        let now = Instant::now();
        h.preview.toggles().set_auto_reload(false);
        h.preview.start_refresh_timer(now);
        assert!(!h.preview.refresh_timer_active());

        h.preview.toggles().set_live_css_visible(true);
        h.preview.start_refresh_timer(now);
        assert!(h.preview.refresh_timer_active());
    }

    #[test]
    fn test_refresh_timer_fires_refresh() {
        let mut h = harness();
        let now = Instant::now();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();

        h.preview.start_refresh_timer(now);
        let deadline = h.preview.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_secs(2));

        h.preview.on_timer(now + Duration::from_secs(1));
        assert!(h.preview.view_mut().take_calls().is_empty());

        h.preview.on_timer(deadline);
        assert_eq!(h.preview.view_mut().take_calls(), vec![ViewCall::Reload]);
        assert!(h.preview.next_deadline().is_none());
    }

    #[test]
    fn test_show_stops_refresh_timer() {
        let mut h = harness();
        h.preview.start_refresh_timer(Instant::now());
        h.preview.show("text/ch2.xhtml");
        assert!(!h.preview.refresh_timer_active());
    }

    #[test]
    fn test_cannot_disable_auto_reload_with_live_css() {
        let mut h = harness();
        h.preview.toggles().set_live_css_visible(true);
        h.preview.auto_reload_toggled(false, Instant::now());
        assert!(h.preview.toggles().auto_reload());
        assert!(h.preview.refresh_timer_active());
        assert_eq!(h.events(), vec![PreviewEvent::CannotDisableAutoReload]);
    }

    #[test]
    fn test_sync_is_debounced() {
        let mut h = harness();
        let now = Instant::now();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();

        let address = |lnum| SourcelineAddress {
            name: "text/ch1.xhtml".into(),
            lnum: Some(lnum),
            tags: vec!["HTML".into(), "Body".into(), "p".into()],
        };
        h.preview.sync_to_editor(address(3), now);
        h.preview.sync_to_editor(address(4), now + Duration::from_millis(50));

        h.preview.on_timer(now + Duration::from_millis(120));
        assert!(h.preview.view_mut().take_calls().is_empty());

        h.preview.on_timer(now + Duration::from_millis(150));
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::GoToSourceline(
                4,
                vec!["html".into(), "body".into(), "p".into()]
            )]
        );
    }

    #[test]
    fn test_sync_waits_for_refresh_and_current_document() {
        let mut h = harness();
        let now = Instant::now();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();

        h.preview.sync_to_editor(
            SourcelineAddress {
                name: "text/ch2.xhtml".into(),
                lnum: Some(1),
                tags: vec![],
            },
            now,
        );
        let later = now + Duration::from_millis(100);
        h.preview.on_timer(later);
        assert!(h.preview.view_mut().take_calls().is_empty());
        // Re-deferred, not dropped
        assert_eq!(
            h.preview.next_deadline(),
            Some(later + Duration::from_millis(100))
        );

        h.preview.show("text/ch2.xhtml");
        h.preview.view_mut().take_calls();
        h.preview.on_timer(later + Duration::from_millis(100));
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::GoToSourceline(1, vec![])]
        );
    }

    #[test]
    fn test_sync_disabled() {
        let mut h = harness();
        let now = Instant::now();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();
        h.preview.toggles().set_sync_to_editor(false);
        h.preview.sync_to_editor(
            SourcelineAddress {
                name: "text/ch1.xhtml".into(),
                lnum: Some(1),
                tags: vec![],
            },
            now,
        );
        h.preview.on_timer(now + Duration::from_secs(1));
        assert!(h.preview.view_mut().take_calls().is_empty());
    }

    #[test]
    fn test_request_sync_same_document_anchor() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();
        h.preview.request_sync("a", Some("#a"), Some(7));
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::GoToAnchor("a".into(), Some(7))]
        );
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_request_sync_other_document_link() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.request_sync("a", Some("ch2.xhtml#sec"), Some(7));
        h.preview.request_sync("A", Some("ch2.xhtml"), None);
        assert_eq!(
            h.events(),
            vec![
                PreviewEvent::LinkClicked {
                    name: "text/ch2.xhtml".into(),
                    fragment: Some("sec".into()),
                },
                PreviewEvent::LinkClicked {
                    name: "text/ch2.xhtml".into(),
                    fragment: None,
                },
            ]
        );
    }

    #[test]
    fn test_request_sync_falls_back_to_editor_sync() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        // Link to an image, link to nowhere, plain element
        h.preview
            .request_sync("a", Some("../images/cover.jpg"), Some(2));
        h.preview.request_sync("a", Some("missing.xhtml"), Some(3));
        h.preview.request_sync("p", None, Some(4));
        assert_eq!(
            h.events(),
            vec![
                PreviewEvent::SyncRequested {
                    name: "text/ch1.xhtml".into(),
                    lnum: Some(2)
                },
                PreviewEvent::SyncRequested {
                    name: "text/ch1.xhtml".into(),
                    lnum: Some(3)
                },
                PreviewEvent::SyncRequested {
                    name: "text/ch1.xhtml".into(),
                    lnum: Some(4)
                },
            ]
        );
    }

    #[test]
    fn test_split_flow() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.view_mut().take_calls();

        h.preview.split_toggled(true);
        assert_eq!(h.events(), vec![PreviewEvent::SplitStartRequested]);
        h.preview.do_start_split();
        h.preview.load_finished(true);
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::SplitMode(true), ViewCall::SplitMode(true)]
        );

        h.preview.request_split(json!([0, 2, 1]), json!([1, 3, 4]));
        assert!(!h.preview.toggles().split());
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::SplitMode(false)]
        );
        assert_eq!(
            h.events(),
            vec![PreviewEvent::SplitRequested {
                name: "text/ch1.xhtml".into(),
                loc: json!([0, 2, 1]),
                totals: json!([1, 3, 4]),
            }]
        );
    }

    #[test]
    fn test_split_on_body_rejected() {
        let mut h = harness();
        h.preview.show("text/ch1.xhtml");
        h.preview.request_split(json!([]), json!([]));
        assert_eq!(
            h.events(),
            vec![PreviewEvent::InvalidSplitLocation {
                message: "Cannot split on the body tag".into()
            }]
        );
    }

    #[test]
    fn test_failed_load_leaves_split_mode() {
        let mut h = harness();
        h.preview.split_toggled(true);
        h.preview.load_finished(false);
        assert!(!h.preview.toggles().split());
        assert_eq!(
            h.preview.view_mut().take_calls(),
            vec![ViewCall::SplitMode(false)]
        );
    }

    #[test]
    fn test_apply_settings_resolves_family() {
        let mut h = harness();
        let fonts = FontSettings {
            standard_family: Some(crate::config::StandardFamily::Mono),
            ..FontSettings::default()
        };
        h.preview.apply_settings(&fonts);
        let calls = h.preview.view_mut().take_calls();
        let [ViewCall::ApplyFonts(resolved)] = calls.as_slice() else {
            panic!("unexpected calls: {calls:?}");
        };
        assert_eq!(resolved.standard_family, "Liberation Mono");
    }

    #[test]
    fn test_launch_error_reported_once() {
        let mut h = harness();
        let failing: crate::worker::Launcher = Box::new(|| eyre::bail!("parser missing"));
        h.worker.start(failing).unwrap();
        h.worker.join();

        h.preview.show("text/ch1.xhtml");
        h.preview.refresh();
        let failures: Vec<_> = h
            .events()
            .into_iter()
            .filter(|e| matches!(e, PreviewEvent::WorkerLaunchFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        let PreviewEvent::WorkerLaunchFailed { details } = &failures[0] else {
            unreachable!()
        };
        assert!(details.contains("parser missing"));
    }
}
