//! A [`View`] implemented by the browser page served at `/`.
//!
//! Commands are broadcast to every connected page over the WebSocket. The
//! page shows preview documents in an iframe under `/preview/`, which maps
//! one to one onto the virtual scheme.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;
use url::Url;

use crate::config::ResolvedFonts;
use crate::preview::{PreviewEvent, View};

/// HTTP path prefix under which virtual URLs are served.
pub const PREVIEW_PREFIX: &str = "/preview";

/// Messages from the server to the browser page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewCommand {
    Navigate { path: String },
    Reload,
    Clear,
    GoToAnchor { anchor: String, lnum: Option<u32> },
    GoToSourceline { lnum: u32, tags: Vec<String> },
    SplitMode { enabled: bool },
    Fonts { fonts: ResolvedFonts },
    Event { event: PreviewEvent },
}

/// Messages from the browser page to the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    LoadFinished {
        ok: bool,
    },
    RequestSync {
        tag: String,
        #[serde(default)]
        href: Option<String>,
        #[serde(default)]
        lnum: Option<u32>,
    },
    RequestSplit {
        loc: Value,
        totals: Value,
    },
}

/// What a freshly connected page needs to catch up.
#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub path: Option<String>,
    pub fonts: Option<ResolvedFonts>,
    pub split: bool,
}

impl ViewSnapshot {
    /// Commands that bring a new page to the current state.
    pub fn replay(&self) -> Vec<ViewCommand> {
        let mut commands = Vec::new();
        if let Some(fonts) = &self.fonts {
            commands.push(ViewCommand::Fonts {
                fonts: fonts.clone(),
            });
        }
        match &self.path {
            Some(path) => commands.push(ViewCommand::Navigate { path: path.clone() }),
            None => commands.push(ViewCommand::Clear),
        }
        if self.split {
            commands.push(ViewCommand::SplitMode { enabled: true });
        }
        commands
    }
}

/// Browser page path for a virtual URL.
pub fn url_to_path(url: &Url) -> String {
    format!("{PREVIEW_PREFIX}{}", url.path())
}

pub struct BrowserView {
    url: Option<Url>,
    tx: broadcast::Sender<ViewCommand>,
    snapshot: Arc<Mutex<ViewSnapshot>>,
}

impl BrowserView {
    pub fn new(tx: broadcast::Sender<ViewCommand>, snapshot: Arc<Mutex<ViewSnapshot>>) -> Self {
        Self {
            url: None,
            tx,
            snapshot,
        }
    }

    pub fn send(&self, command: ViewCommand) {
        // No connected page is fine: it catches up from the snapshot
        if self.tx.send(command).is_err() {
            trace!("No browser connected");
        }
    }

    fn update(&self, f: impl FnOnce(&mut ViewSnapshot)) {
        f(&mut self.snapshot.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl View for BrowserView {
    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn set_url(&mut self, url: &Url) {
        self.url = Some(url.clone());
        let path = url_to_path(url);
        self.update(|s| s.path = Some(path.clone()));
        self.send(ViewCommand::Navigate { path });
    }

    fn reload(&mut self) {
        self.send(ViewCommand::Reload);
    }

    fn clear(&mut self) {
        self.url = None;
        self.update(|s| s.path = None);
        self.send(ViewCommand::Clear);
    }

    fn go_to_anchor(&mut self, anchor: &str, lnum: Option<u32>) {
        self.send(ViewCommand::GoToAnchor {
            anchor: anchor.to_string(),
            lnum,
        });
    }

    fn go_to_sourceline_address(&mut self, lnum: u32, tags: &[String]) {
        self.send(ViewCommand::GoToSourceline {
            lnum,
            tags: tags.to_vec(),
        });
    }

    fn split_mode(&mut self, enabled: bool) {
        self.update(|s| s.split = enabled);
        self.send(ViewCommand::SplitMode { enabled });
    }

    fn apply_fonts(&mut self, fonts: &ResolvedFonts) {
        self.update(|s| s.fonts = Some(fonts.clone()));
        self.send(ViewCommand::Fonts {
            fonts: fonts.clone(),
        });
    }
}
