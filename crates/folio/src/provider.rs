//! Content provider for the virtual preview scheme.
//!
//! Every fetch the renderer makes under `folio://preview/` lands here.
//! Assets (images, stylesheets, fonts) are answered straight from the
//! workspace. Documents are answered with the worker's parsed output, which
//! may not exist yet: those requests are parked in a pending table and a
//! short polling task answers them as soon as the worker has a result.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::http::Method;
use bytes::Bytes;
use folio_core::{Workspace, is_preview_url, media, path_to_name};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};
use url::Url;

use crate::worker::ParseWorker;

/// A renderer fetch for a virtual URL.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
}

impl ResourceRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }
}

/// Why a fetch could not be answered with content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// Anything but GET.
    Denied,
    /// Wrong host, or a name the container does not have.
    NotFound,
    /// Reading the content failed.
    Failed,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Denied => write!(f, "request denied"),
            RequestError::NotFound => write!(f, "not found"),
            RequestError::Failed => write!(f, "request failed"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Content for a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub media_type: String,
    pub body: Bytes,
}

pub type ReplyResult = Result<Reply, RequestError>;

struct PendingRequest {
    media_type: &'static str,
    reply: oneshot::Sender<ReplyResult>,
}

struct Inner {
    worker: Arc<ParseWorker>,
    workspace: Arc<Workspace>,
    pending: Mutex<HashMap<String, Vec<PendingRequest>>>,
    /// Set while a polling task is scheduled. Only changed with `pending` locked.
    polling: AtomicBool,
    poll_interval: Duration,
}

/// Answers renderer fetches for the virtual scheme.
#[derive(Clone)]
pub struct ContentProvider {
    inner: Arc<Inner>,
}

impl ContentProvider {
    pub fn new(worker: Arc<ParseWorker>, workspace: Arc<Workspace>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                worker,
                workspace,
                pending: Mutex::new(HashMap::new()),
                polling: AtomicBool::new(false),
                poll_interval,
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Vec<PendingRequest>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a fetch. The reply arrives on the returned receiver.
    ///
    /// Asset and error replies are sent before this returns; document
    /// replies are sent by the polling task. Dropping the receiver cancels
    /// the fetch. Must be called from within a tokio runtime.
    pub fn request_started(&self, request: ResourceRequest) -> oneshot::Receiver<ReplyResult> {
        let (tx, rx) = oneshot::channel();

        if request.method != Method::GET {
            debug!(method = %request.method, url = %request.url, "Denied non-GET request");
            let _ = tx.send(Err(RequestError::Denied));
            return rx;
        }

        if !is_preview_url(&request.url) {
            debug!(url = %request.url, "Request for unknown host");
            let _ = tx.send(Err(RequestError::NotFound));
            return rx;
        }

        let container = self.inner.workspace.container();
        let name = match path_to_name(request.url.path()) {
            Some(name) if container.has_name(&name) => name,
            _ => {
                debug!(url = %request.url, "Request for missing document");
                let _ = tx.send(Err(RequestError::NotFound));
                return rx;
            }
        };

        let declared = container
            .mime_type(&name)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| media::OCTET_STREAM.to_string());

        if media::is_document(&declared) {
            trace!(document = %name, "Waiting for parsed output");
            let mut pending = self.pending();
            pending.entry(name).or_default().push(PendingRequest {
                media_type: media::XHTML_MIME,
                reply: tx,
            });
            if !self.inner.polling.swap(true, Ordering::SeqCst) {
                self.spawn_polling();
            }
            return rx;
        }

        let reply = match self.inner.workspace.raw_data(&name) {
            Ok(data) => Ok(Reply {
                media_type: media::canonical_asset_type(&declared).to_string(),
                body: Bytes::from(data.into_bytes()),
            }),
            Err(e) => {
                error!("Failed to read {}: {:?}", name, e);
                Err(RequestError::Failed)
            }
        };
        let _ = tx.send(reply);
        rx
    }

    /// Accept a fetch and wait for its reply.
    pub async fn fetch(&self, request: ResourceRequest) -> ReplyResult {
        self.request_started(request)
            .await
            .unwrap_or(Err(RequestError::Failed))
    }

    /// Answer every pending request whose document has parsed output.
    ///
    /// Returns whether requests are still pending afterwards.
    pub fn check_for_parse(&self) -> bool {
        let mut pending = self.pending();
        self.answer_ready(&mut pending);
        !pending.is_empty()
    }

    fn answer_ready(&self, pending: &mut HashMap<String, Vec<PendingRequest>>) {
        pending.retain(|name, requests| {
            let Some(body) = self.inner.worker.get_data(name) else {
                return true;
            };
            for request in requests.drain(..) {
                let reply = Reply {
                    media_type: request.media_type.to_string(),
                    body: body.clone(),
                };
                if request.reply.send(Ok(reply)).is_err() {
                    trace!(document = %name, "Request went away before its reply");
                }
            }
            debug!(document = %name, "Answered pending requests");
            false
        });
    }

    fn spawn_polling(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                {
                    let mut pending = this.pending();
                    this.answer_ready(&mut pending);
                    if pending.is_empty() {
                        this.inner.polling.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                tokio::time::sleep(this.inner.poll_interval).await;
            }
        });
    }

    /// Names with requests waiting for parsed output.
    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every pending request. Their receivers see the fetch fail.
    pub fn clear(&self) {
        self.pending().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{BufferOverlay, MemoryContainer, name_to_url};

    fn provider() -> (ContentProvider, Arc<ParseWorker>) {
        let container = MemoryContainer::new()
            .add("ch1.xhtml", media::XHTML_MIME, "<p>hi</p>")
            .add("style.css", "text/css", "p { color: red }")
            .add("blob", "", vec![1u8, 2, 3]);
        let workspace = Arc::new(Workspace::new(
            Arc::new(container),
            Arc::new(BufferOverlay::new()),
        ));
        let worker = Arc::new(ParseWorker::new(Arc::clone(&workspace), Duration::ZERO));
        let provider = ContentProvider::new(
            Arc::clone(&worker),
            workspace,
            Duration::from_millis(1),
        );
        (provider, worker)
    }

    #[tokio::test]
    async fn test_non_get_denied() {
        let (provider, _) = provider();
        let reply = provider
            .fetch(ResourceRequest {
                method: Method::POST,
                url: name_to_url("style.css"),
            })
            .await;
        assert_eq!(reply, Err(RequestError::Denied));
    }

    #[tokio::test]
    async fn test_wrong_host_not_found() {
        let (provider, _) = provider();
        let url = Url::parse("folio://elsewhere/style.css").unwrap();
        assert_eq!(
            provider.fetch(ResourceRequest::get(url)).await,
            Err(RequestError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_missing_name_not_found() {
        let (provider, _) = provider();
        assert_eq!(
            provider
                .fetch(ResourceRequest::get(name_to_url("nope.css")))
                .await,
            Err(RequestError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_asset_answered_immediately() {
        let (provider, worker) = provider();
        let mut rx = provider.request_started(ResourceRequest::get(name_to_url("style.css")));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.media_type, "text/css");
        assert_eq!(&reply.body[..], b"p { color: red }");
        assert_eq!(worker.queued(), 0);
        assert!(worker.entry("style.css").is_none());
    }

    #[tokio::test]
    async fn test_undeclared_type_is_octet_stream() {
        let (provider, _) = provider();
        let reply = provider
            .fetch(ResourceRequest::get(name_to_url("blob")))
            .await
            .unwrap();
        assert_eq!(reply.media_type, media::OCTET_STREAM);
        assert_eq!(&reply.body[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_document_is_deferred() {
        let (provider, _) = provider();
        let mut rx = provider.request_started(ResourceRequest::get(name_to_url("ch1.xhtml")));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(provider.pending_names(), vec!["ch1.xhtml"]);
        assert!(provider.check_for_parse());
    }

    #[tokio::test]
    async fn test_clear_fails_pending_requests() {
        let (provider, _) = provider();
        let rx = provider.request_started(ResourceRequest::get(name_to_url("ch1.xhtml")));
        provider.clear();
        assert!(rx.await.is_err());
        assert!(provider.pending_names().is_empty());
    }
}
