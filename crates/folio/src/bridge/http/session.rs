//! The session loop: the single owner of the [`Preview`].
//!
//! HTTP handlers, WebSocket clients and the file watcher never touch the
//! orchestrator directly. They send [`SessionCommand`]s and this loop
//! applies them one at a time, between firing the orchestrator's timers.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::FontSettings;
use crate::preview::{Preview, PreviewEvent, SourcelineAddress, View};
use crate::watcher::WatcherEvent;

use super::view::ClientMessage;

/// Requests to the session loop.
#[derive(Debug)]
pub enum SessionCommand {
    Show(String),
    Refresh,
    Clear,
    /// An editor buffer was opened, edited or closed.
    BufferChanged(String),
    /// The book was reopened; cached parses are stale.
    ContainerChanged,
    /// The editor cursor moved.
    Cursor(SourcelineAddress),
    Client(ClientMessage),
    Toggles(ToggleChange),
    ApplySettings(FontSettings),
    Status(oneshot::Sender<SessionStatus>),
}

/// Toggle updates; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToggleChange {
    pub visible: Option<bool>,
    pub auto_reload: Option<bool>,
    pub sync_to_editor: Option<bool>,
    pub split: Option<bool>,
    pub live_css: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub current: Option<String>,
    pub refresh_pending: bool,
    pub visible: bool,
    pub auto_reload: bool,
    pub sync_to_editor: bool,
    pub split: bool,
    pub live_css: bool,
}

/// Sink for preview events once the session has acted on them.
pub type EventSink = Box<dyn FnMut(&PreviewEvent) + Send>;

pub struct Session<V: View> {
    preview: Preview<V>,
    commands: UnboundedReceiver<SessionCommand>,
    events: UnboundedReceiver<PreviewEvent>,
    watcher: Option<UnboundedReceiver<WatcherEvent>>,
    sink: EventSink,
}

impl<V: View> Session<V> {
    pub fn new(
        preview: Preview<V>,
        commands: UnboundedReceiver<SessionCommand>,
        events: UnboundedReceiver<PreviewEvent>,
        sink: EventSink,
    ) -> Self {
        Self {
            preview,
            commands,
            events,
            watcher: None,
            sink,
        }
    }

    pub fn with_watcher(mut self, watcher: UnboundedReceiver<WatcherEvent>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Run until every command sender is gone. Returns the preview.
    pub async fn run(mut self) -> Preview<V> {
        loop {
            let deadline = self.preview.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let watcher_rx = self.watcher.as_mut();
            let watcher = async move {
                match watcher_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("Session closed");
                        break;
                    };
                    self.handle(command, Instant::now());
                }
                Some(event) = self.events.recv() => {
                    self.on_event(event);
                }
                Some(event) = watcher => {
                    match event {
                        WatcherEvent::FilesChanged(names) => {
                            if self.preview.affected_by(&names) {
                                self.preview.start_refresh_timer(Instant::now());
                            } else {
                                debug!(?names, "Changes do not touch the current document");
                            }
                        }
                    }
                }
                () = timer => {
                    self.preview.on_timer(Instant::now());
                }
            }
        }
        self.preview
    }

    fn handle(&mut self, command: SessionCommand, now: Instant) {
        match command {
            SessionCommand::Show(name) => {
                self.preview.show(&name);
            }
            SessionCommand::Refresh => self.preview.refresh(),
            SessionCommand::Clear => self.preview.clear(),
            SessionCommand::BufferChanged(name) => {
                debug!(document = %name, "Editor buffer changed");
                self.preview.start_refresh_timer(now);
            }
            SessionCommand::ContainerChanged => {
                info!("Container changed, discarding cached parses");
                self.preview.container_changed();
            }
            SessionCommand::Cursor(address) => self.preview.sync_to_editor(address, now),
            SessionCommand::Client(message) => self.on_client(message),
            SessionCommand::Toggles(change) => self.apply_toggles(change, now),
            SessionCommand::ApplySettings(fonts) => self.preview.apply_settings(&fonts),
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn on_client(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::LoadFinished { ok } => {
                if !ok {
                    warn!("Preview page failed to load");
                }
                self.preview.load_finished(ok);
            }
            ClientMessage::RequestSync { tag, href, lnum } => {
                self.preview.request_sync(&tag, href.as_deref(), lnum);
            }
            ClientMessage::RequestSplit { loc, totals } => {
                self.preview.request_split(loc, totals);
            }
        }
    }

    fn apply_toggles(&mut self, change: ToggleChange, now: Instant) {
        if let Some(live_css) = change.live_css {
            self.preview.live_css_toggled(live_css, now);
        }
        if let Some(auto_reload) = change.auto_reload {
            self.preview.auto_reload_toggled(auto_reload, now);
        }
        if let Some(sync) = change.sync_to_editor {
            self.preview.toggles().set_sync_to_editor(sync);
        }
        if let Some(split) = change.split {
            self.preview.split_toggled(split);
        }
        if let Some(visible) = change.visible {
            self.preview.visibility_changed(visible);
        }
    }

    fn on_event(&mut self, event: PreviewEvent) {
        match &event {
            PreviewEvent::SplitStartRequested => self.preview.do_start_split(),
            PreviewEvent::LinkClicked { name, .. } => {
                // No separate editor here: following a link shows the target
                self.preview.show(name);
            }
            PreviewEvent::WorkerLaunchFailed { details } => {
                warn!("Parser failed to start:\n{}", details);
            }
            PreviewEvent::InvalidSplitLocation { message } => {
                info!("Split rejected: {}", message);
            }
            PreviewEvent::SplitRequested { name, .. } => {
                info!(document = %name, "Split requested");
            }
            PreviewEvent::SyncRequested { name, lnum } => {
                debug!(document = %name, ?lnum, "Editor sync requested");
            }
            PreviewEvent::CannotDisableAutoReload => {
                info!("Auto reload stays on while live styling is open");
            }
            PreviewEvent::RefreshStarting | PreviewEvent::Refreshed => {}
        }
        (self.sink)(&event);
    }

    fn status(&self) -> SessionStatus {
        let toggles = self.preview.toggles();
        SessionStatus {
            current: self.preview.current_name().map(str::to_string),
            refresh_pending: self.preview.refresh_timer_active(),
            visible: toggles.visible(),
            auto_reload: toggles.auto_reload(),
            sync_to_editor: toggles.sync_to_editor(),
            split: toggles.split(),
            live_css: toggles.live_css_visible(),
        }
    }
}

/// Sender side of a session, as held by request handlers.
#[derive(Clone)]
pub struct SessionHandle {
    tx: UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(tx: UnboundedSender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Send a command. Returns false once the session has stopped.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub async fn status(&self) -> Option<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionCommand::Status(tx)) {
            return None;
        }
        rx.await.ok()
    }
}
