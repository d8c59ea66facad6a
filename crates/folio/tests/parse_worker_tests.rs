//! Integration tests that run the folio binary as a parser process

mod common;

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use common::{book, wait_for};
use folio::parser::LINE_NUMBER_ATTRIBUTE;
use folio::worker::{ParseBackend, ParseWorker, ParserProcess};

fn folio_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_folio"))
}

#[test]
fn test_parser_process_answers_in_order() {
    let mut parser = ParserProcess::spawn(&folio_exe()).unwrap();

    let first = parser.parse("<p>one</p>\n<p>two</p>").unwrap().unwrap();
    assert!(first.contains(r#"<p data-lnum="1">one</p>"#), "{first}");
    assert!(first.contains(r#"<p data-lnum="2">two</p>"#), "{first}");

    let broken = parser.parse("<div><span></div>").unwrap();
    assert!(broken.is_err());

    // A parser error does not cost the process
    let again = parser.parse("<p>three</p>").unwrap().unwrap();
    assert!(again.contains(LINE_NUMBER_ATTRIBUTE));

    parser.shutdown();
}

#[test]
fn test_worker_with_real_parser() {
    let (workspace, buffers) = book();
    let worker = ParseWorker::new(workspace, Duration::from_millis(10));
    worker.start(ParserProcess::launcher(folio_exe())).unwrap();

    buffers.open(
        "text/ch1.xhtml",
        "<html><head><title>One</title></head>\n<body>\n<h1>One</h1>\n</body></html>",
    );
    assert!(worker.add_request("text/ch1.xhtml"));
    assert!(wait_for(|| worker.get_data("text/ch1.xhtml").is_some()));

    let output = worker.get_data("text/ch1.xhtml").unwrap();
    let output = std::str::from_utf8(&output).unwrap();
    assert!(output.contains(r#"<h1 data-lnum="3">One</h1>"#), "{output}");
    assert!(worker.take_launch_error().is_none());

    worker.shutdown();
    worker.join();
    assert!(!worker.is_alive());
}

#[test]
fn test_missing_parser_binary_is_reported() {
    let (workspace, _buffers) = book();
    let worker = ParseWorker::new(workspace, Duration::from_millis(10));
    worker
        .start(ParserProcess::launcher(PathBuf::from(
            "/nonexistent/folio-parser",
        )))
        .unwrap();
    worker.join();

    let details = worker.take_launch_error().unwrap();
    assert!(details.contains("Failed to spawn parser process"), "{details}");
}

#[test]
fn test_parse_command_prints_annotated_markup() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("chapter.xhtml");
    std::fs::write(&file, "<p>first</p>\n<p>second</p>\n").unwrap();

    let output = Command::new(folio_exe())
        .arg("parse")
        .arg(&file)
        .output()
        .expect("Failed to run folio");

    assert!(output.status.success(), "Command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#"<p data-lnum="2">second</p>"#), "{stdout}");
}

#[test]
fn test_parse_command_fails_on_broken_markup() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("broken.xhtml");
    std::fs::write(&file, "<div>\n<span>unclosed\n</div>\n").unwrap();

    let output = Command::new(folio_exe())
        .arg("parse")
        .arg(&file)
        .output()
        .expect("Failed to run folio");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.xhtml"), "{stderr}");
}
