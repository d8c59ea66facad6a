//! Integration tests for the content provider against a running worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{book, fake_parser, parsed};
use folio::provider::{ContentProvider, ResourceRequest};
use folio::worker::ParseWorker;
use folio_core::{BufferOverlay, Workspace, media, name_to_url};

fn started() -> (ContentProvider, Arc<ParseWorker>, Arc<BufferOverlay>, Arc<Workspace>) {
    let (workspace, buffers) = book();
    let worker = Arc::new(ParseWorker::new(
        Arc::clone(&workspace),
        Duration::from_millis(10),
    ));
    let (launcher, _log) = fake_parser();
    worker.start(launcher).unwrap();
    let provider = ContentProvider::new(
        Arc::clone(&worker),
        Arc::clone(&workspace),
        Duration::from_millis(2),
    );
    (provider, worker, buffers, workspace)
}

async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn test_document_answered_after_parse() {
    let (provider, worker, _buffers, _workspace) = started();
    worker.add_request("text/ch1.xhtml");

    let reply = within(provider.fetch(ResourceRequest::get(name_to_url("text/ch1.xhtml"))))
        .await
        .unwrap();
    assert_eq!(reply.media_type, media::XHTML_MIME);
    assert_eq!(&reply.body[..], parsed("<p>one</p>").as_bytes());
    assert!(provider.pending_names().is_empty());
}

#[tokio::test]
async fn test_request_waits_for_later_submission() {
    let (provider, worker, buffers, _workspace) = started();
    let rx = provider.request_started(ResourceRequest::get(name_to_url("text/ch2.xhtml")));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.pending_names(), vec!["text/ch2.xhtml"]);

    buffers.open("text/ch2.xhtml", "<p>two, unsaved</p>");
    worker.add_request("text/ch2.xhtml");

    let reply = within(rx).await.unwrap().unwrap();
    assert_eq!(&reply.body[..], parsed("<p>two, unsaved</p>").as_bytes());
}

#[tokio::test]
async fn test_every_waiting_request_is_answered() {
    let (provider, worker, _buffers, _workspace) = started();
    let url = name_to_url("text/ch1.xhtml");
    let first = provider.request_started(ResourceRequest::get(url.clone()));
    let second = provider.request_started(ResourceRequest::get(url.clone()));
    let abandoned = provider.request_started(ResourceRequest::get(url));
    drop(abandoned);

    worker.add_request("text/ch1.xhtml");

    let first = within(first).await.unwrap().unwrap();
    let second = within(second).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(&first.body[..], parsed("<p>one</p>").as_bytes());

    // Polling stops once nothing is pending
    assert!(!provider.check_for_parse());
}

#[tokio::test]
async fn test_requests_for_other_documents_keep_waiting() {
    let (provider, worker, _buffers, _workspace) = started();
    let ch1 = provider.request_started(ResourceRequest::get(name_to_url("text/ch1.xhtml")));
    let _ch2 = provider.request_started(ResourceRequest::get(name_to_url("text/ch2.xhtml")));

    worker.add_request("text/ch1.xhtml");
    within(ch1).await.unwrap().unwrap();

    assert_eq!(provider.pending_names(), vec!["text/ch2.xhtml"]);
    assert!(provider.check_for_parse());
}

#[tokio::test]
async fn test_assets_skip_the_worker() {
    let (provider, worker, _buffers, _workspace) = started();

    let mut rx = provider.request_started(ResourceRequest::get(name_to_url("images/cover.jpg")));
    let cover = rx.try_recv().unwrap().unwrap();
    assert_eq!(cover.media_type, "image/jpeg");
    assert_eq!(&cover.body[..], &[0xff, 0xd8, 0xff]);

    let font = provider
        .fetch(ResourceRequest::get(name_to_url("fonts/body.otf")))
        .await
        .unwrap();
    assert_eq!(font.media_type, "application/x-font-ttf");

    let css = provider
        .fetch(ResourceRequest::get(name_to_url("styles/main.css")))
        .await
        .unwrap();
    assert_eq!(css.media_type, "text/css");

    assert!(worker.entry("images/cover.jpg").is_none());
    assert!(worker.entry("styles/main.css").is_none());
    assert_eq!(worker.queued(), 0);
}

#[tokio::test]
async fn test_open_buffer_served_for_assets() {
    let (provider, _worker, buffers, _workspace) = started();
    buffers.open("styles/main.css", "p { margin: 1em }");

    let css = provider
        .fetch(ResourceRequest::get(name_to_url("styles/main.css")))
        .await
        .unwrap();
    assert_eq!(&css.body[..], b"p { margin: 1em }");
}
