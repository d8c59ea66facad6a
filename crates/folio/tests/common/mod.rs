//! Common test utilities.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use folio::worker::{Launcher, ParseBackend, ParseResult};
use folio_core::{BufferOverlay, MemoryContainer, Workspace, media};

/// Documents containing this marker make the fake parser's transport fail.
pub const TRANSPORT_FAILURE: &str = "<!-- drop -->";

/// Documents containing this marker make the fake parser report an error.
pub const PARSE_FAILURE: &str = "<!-- broken -->";

/// What the fake parser has been asked to do, shared with the test.
#[derive(Default)]
pub struct ParserLog {
    pub parsed: Mutex<Vec<String>>,
    pub shutdowns: AtomicUsize,
}

impl ParserLog {
    pub fn parsed(&self) -> Vec<String> {
        self.parsed.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// An in-process parser that wraps its input and records every call.
pub struct FakeParser {
    log: Arc<ParserLog>,
    fail_handshake: bool,
}

impl ParseBackend for FakeParser {
    fn parse(&mut self, data: &str) -> eyre::Result<ParseResult> {
        self.log.parsed.lock().unwrap().push(data.to_string());
        if data.contains(TRANSPORT_FAILURE) {
            eyre::bail!("parser went away");
        }
        if data.contains(PARSE_FAILURE) || (self.fail_handshake && data == "<p></p>") {
            return Ok(Err("Traceback: cannot parse".to_string()));
        }
        Ok(Ok(format!("<parsed>{data}</parsed>")))
    }

    fn shutdown(&mut self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A launcher for a [`FakeParser`], plus the log it writes to.
pub fn fake_parser() -> (Launcher, Arc<ParserLog>) {
    fake_parser_with(false)
}

/// A launcher whose parser rejects the launch handshake.
pub fn fake_parser_failing_handshake() -> (Launcher, Arc<ParserLog>) {
    fake_parser_with(true)
}

fn fake_parser_with(fail_handshake: bool) -> (Launcher, Arc<ParserLog>) {
    let log = Arc::new(ParserLog::default());
    let parser = FakeParser {
        log: Arc::clone(&log),
        fail_handshake,
    };
    let launcher: Launcher = Box::new(move || Ok(Box::new(parser) as Box<dyn ParseBackend>));
    (launcher, log)
}

/// Expected fake parser output for `data`.
pub fn parsed(data: &str) -> String {
    format!("<parsed>{data}</parsed>")
}

/// A small book: two chapters, a stylesheet, an image and a font.
pub fn book() -> (Arc<Workspace>, Arc<BufferOverlay>) {
    let container = MemoryContainer::new()
        .add("text/ch1.xhtml", media::XHTML_MIME, "<p>one</p>")
        .add("text/ch2.xhtml", media::XHTML_MIME, "<p>two</p>")
        .add("styles/main.css", "text/css", "p { margin: 0 }")
        .add("images/cover.jpg", "image/jpeg", vec![0xffu8, 0xd8, 0xff])
        .add(
            "fonts/body.otf",
            "application/vnd.ms-opentype",
            vec![0x4fu8, 0x54, 0x54, 0x4f],
        );
    let buffers = Arc::new(BufferOverlay::new());
    let workspace = Arc::new(Workspace::new(Arc::new(container), buffers.clone()));
    (workspace, buffers)
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
