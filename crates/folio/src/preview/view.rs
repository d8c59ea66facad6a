//! The renderer seen from the orchestrator.

use url::Url;

use crate::config::ResolvedFonts;

/// A browser view showing virtual preview URLs.
///
/// Implementations drive a real renderer; the orchestrator never looks at
/// page content, it only navigates and issues commands.
pub trait View {
    /// URL currently loaded, if any.
    fn url(&self) -> Option<&Url>;

    /// Navigate to `url`.
    fn set_url(&mut self, url: &Url);

    /// Reload the current page and everything it references.
    fn reload(&mut self);

    /// Show the placeholder page.
    fn clear(&mut self);

    /// Scroll to an element id. `lnum` is the source line of the link that
    /// was followed, used when the anchor cannot be found.
    fn go_to_anchor(&mut self, anchor: &str, lnum: Option<u32>);

    /// Scroll to the element starting at `lnum`, disambiguated by the tag
    /// path leading to it (lowercased, outermost first).
    fn go_to_sourceline_address(&mut self, lnum: u32, tags: &[String]);

    /// Enter or leave split mode.
    fn split_mode(&mut self, enabled: bool);

    fn apply_fonts(&mut self, fonts: &ResolvedFonts);
}

/// A view that records every command. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingView {
    pub url: Option<Url>,
    pub calls: Vec<ViewCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewCall {
    SetUrl(Url),
    Reload,
    Clear,
    GoToAnchor(String, Option<u32>),
    GoToSourceline(u32, Vec<String>),
    SplitMode(bool),
    ApplyFonts(ResolvedFonts),
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return and forget the recorded calls.
    pub fn take_calls(&mut self) -> Vec<ViewCall> {
        std::mem::take(&mut self.calls)
    }
}

impl View for RecordingView {
    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn set_url(&mut self, url: &Url) {
        self.url = Some(url.clone());
        self.calls.push(ViewCall::SetUrl(url.clone()));
    }

    fn reload(&mut self) {
        self.calls.push(ViewCall::Reload);
    }

    fn clear(&mut self) {
        self.url = None;
        self.calls.push(ViewCall::Clear);
    }

    fn go_to_anchor(&mut self, anchor: &str, lnum: Option<u32>) {
        self.calls.push(ViewCall::GoToAnchor(anchor.to_string(), lnum));
    }

    fn go_to_sourceline_address(&mut self, lnum: u32, tags: &[String]) {
        self.calls.push(ViewCall::GoToSourceline(lnum, tags.to_vec()));
    }

    fn split_mode(&mut self, enabled: bool) {
        self.calls.push(ViewCall::SplitMode(enabled));
    }

    fn apply_fonts(&mut self, fonts: &ResolvedFonts) {
        self.calls.push(ViewCall::ApplyFonts(fonts.clone()));
    }
}
