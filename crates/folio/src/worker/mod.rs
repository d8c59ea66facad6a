//! Background parse worker.
//!
//! Editors produce a burst of change notifications for every keystroke,
//! but only the latest content matters for the preview. The worker keeps a
//! per-document [`ParseEntry`] that remembers the fingerprint of the last
//! submitted content, so unchanged documents are never parsed twice, and a
//! single thread that drains its queue once per coalescing window and
//! parses only the newest request in each batch.
//!
//! ```text
//! add_request(name) ──► queue ──► [sleep window] ──► drain batch
//!                                                     │
//!                         highest seq ◄───────────────┘
//!                              │
//!                      ParseBackend::parse ──► ParseEntry::complete
//! ```

mod entry;
pub mod process;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use eyre::{Result, WrapErr};
use folio_core::{Fingerprint, Workspace};
use folio_proto::HANDSHAKE_DOCUMENT;
use tracing::{debug, error, info, warn};

pub use entry::ParseEntry;
pub use process::{Launcher, ParseBackend, ParseResult, ParserProcess};

/// Items consumed by the worker thread.
pub enum QueueItem {
    Parse(ParseRequest),
    Shutdown,
}

/// One queued parse.
pub struct ParseRequest {
    /// Strictly increasing across the worker's lifetime.
    pub seq: u64,
    pub entry: Arc<ParseEntry>,
    /// Fingerprint of `data`, checked again when the result is stored.
    pub fingerprint: Fingerprint,
    pub data: String,
}

struct Shared {
    workspace: Arc<Workspace>,
    entries: RwLock<HashMap<String, Arc<ParseEntry>>>,
    next_seq: AtomicU64,
    /// Items sent but not yet drained by the worker thread.
    queued: AtomicUsize,
    launch_error: Mutex<Option<String>>,
    coalesce_window: Duration,
}

/// The background parse worker.
///
/// Constructed once per preview session and shared (behind an `Arc`) by
/// the content provider and the preview orchestrator.
pub struct ParseWorker {
    shared: Arc<Shared>,
    tx: Sender<QueueItem>,
    rx: Mutex<Option<Receiver<QueueItem>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ParseWorker {
    /// Create a stopped worker. Requests may be queued before [`start`](Self::start).
    pub fn new(workspace: Arc<Workspace>, coalesce_window: Duration) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            shared: Arc::new(Shared {
                workspace,
                entries: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                queued: AtomicUsize::new(0),
                launch_error: Mutex::new(None),
                coalesce_window,
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            thread: Mutex::new(None),
        }
    }

    /// Start the worker thread, launching the parser on it.
    ///
    /// Launch and handshake failures do not fail this call: they are kept
    /// for [`take_launch_error`](Self::take_launch_error).
    pub fn start(&self, launcher: Launcher) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| eyre::eyre!("Parse worker already started"))?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("parse-worker".into())
            .spawn(move || worker_loop(shared, rx, launcher))
            .wrap_err("Failed to spawn parse worker thread")?;

        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Submit the current content of `name` for parsing.
    ///
    /// Returns whether a parse was queued. Content identical to what is
    /// already parsed queues nothing.
    pub fn add_request(&self, name: &str) -> bool {
        let data = match self.shared.workspace.raw_data(name) {
            Ok(data) => data,
            Err(e) => {
                warn!("Cannot read {} for parsing: {:?}", name, e);
                return false;
            }
        };
        let fingerprint = data.fingerprint();

        let entry = {
            let mut entries = self
                .shared
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                entries
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(ParseEntry::new(name))),
            )
        };

        if !entry.submit(fingerprint) {
            debug!(document = name, "Content unchanged, not reparsing");
            return false;
        }

        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(document = name, seq, ?fingerprint, "Queueing parse");
        self.send(QueueItem::Parse(ParseRequest {
            seq,
            entry,
            fingerprint,
            data: data.into_text(),
        }));
        true
    }

    /// Parsed output for `name`, if a parse of its latest content finished.
    ///
    /// Never blocks on parse work.
    pub fn get_data(&self, name: &str) -> Option<Bytes> {
        self.entry(name)?.parsed_data()
    }

    /// The cache entry for `name`, if one was ever submitted.
    pub fn entry(&self, name: &str) -> Option<Arc<ParseEntry>> {
        self.shared
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Ask the worker thread to stop the parser and exit.
    pub fn shutdown(&self) {
        self.send(QueueItem::Shutdown);
    }

    /// Forget every cache entry.
    pub fn clear(&self) {
        self.shared
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The launch error, if any. Returns it only once.
    pub fn take_launch_error(&self) -> Option<String> {
        self.shared
            .launch_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether the worker thread is running.
    pub fn is_alive(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of items queued and not yet drained by the worker thread.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to exit. Call after [`shutdown`](Self::shutdown).
    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Parse worker thread panicked");
        }
    }

    fn send(&self, item: QueueItem) {
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            debug!("Parse worker has exited, dropping queue item");
        }
    }
}

impl Drop for ParseWorker {
    fn drop(&mut self) {
        self.send(QueueItem::Shutdown);
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<QueueItem>, launcher: Launcher) {
    let mut backend = match launch(launcher) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to launch parser: {:?}", e);
            *shared
                .launch_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(format!("{e:?}"));
            return;
        }
    };
    info!("Parse worker ready");

    loop {
        thread::sleep(shared.coalesce_window);

        let Ok(first) = rx.recv() else {
            debug!("All producers gone, stopping parse worker");
            break;
        };
        let mut batch = vec![first];
        batch.extend(rx.try_iter());
        shared.queued.fetch_sub(batch.len(), Ordering::SeqCst);

        if batch.iter().any(|item| matches!(item, QueueItem::Shutdown)) {
            debug!(discarded = batch.len() - 1, "Shutdown requested");
            break;
        }

        if let Some(request) = latest(batch) {
            process(backend.as_mut(), request);
        }
    }

    backend.shutdown();
    info!("Parse worker stopped");
}

/// Launch the backend and check that it can parse a trivial document.
fn launch(launcher: Launcher) -> Result<Box<dyn ParseBackend>> {
    let mut backend = launcher()?;
    match backend
        .parse(HANDSHAKE_DOCUMENT)
        .wrap_err("Parser handshake failed")?
    {
        Ok(_) => Ok(backend),
        Err(tb) => {
            backend.shutdown();
            eyre::bail!("Parser handshake failed: {}", tb)
        }
    }
}

/// Keep only the request with the highest sequence number.
fn latest(batch: Vec<QueueItem>) -> Option<ParseRequest> {
    let dropped = batch.len().saturating_sub(1);
    let request = batch
        .into_iter()
        .filter_map(|item| match item {
            QueueItem::Parse(request) => Some(request),
            QueueItem::Shutdown => None,
        })
        .max_by_key(|request| request.seq);
    if dropped > 0 {
        debug!(dropped, "Coalesced parse requests");
    }
    request
}

fn process(backend: &mut dyn ParseBackend, request: ParseRequest) {
    let name = request.entry.name();
    let outcome = match backend.parse(&request.data) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Parser transport failed for {}: {:?}", name, e);
            return;
        }
    };

    let parsed = match outcome {
        Ok(html) => Some(Bytes::from(html)),
        Err(tb) => {
            warn!("Parser failed for {}:\n{}", name, tb);
            None
        }
    };

    if request.entry.complete(request.fingerprint, parsed) {
        debug!(document = name, seq = request.seq, "Parse stored");
    } else {
        debug!(
            document = name,
            seq = request.seq,
            "Content changed during parse, result dropped"
        );
    }
}
