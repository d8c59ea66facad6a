//! Protocol definitions for the folio parser process.
//!
//! The preview host spawns `folio parse-worker` and talks to it over the
//! child's stdin/stdout. Every message is one JSON object on its own line.
//! The child answers each [`Request::Parse`] with exactly one [`Response`]
//! carrying the same id, and exits after [`Request::Shutdown`] or when its
//! stdin closes.
//!
//! A parser failure is reported inside the response (`error`) rather than
//! by the child dying, so one bad document never costs a process restart.

use std::io::{BufRead, Write};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Name of the subcommand that runs the parser loop.
pub const PARSE_WORKER_COMMAND: &str = "parse-worker";

/// Document sent as the launch handshake.
pub const HANDSHAKE_DOCUMENT: &str = "<p></p>";

/// Messages from the preview host to the parser process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Parse a document.
    Parse { id: u64, data: String },
    /// Exit the parser loop.
    Shutdown,
}

/// Answer to a [`Request::Parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: u64,
    /// Serialized document on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Parser error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: String) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Write one message followed by a newline and flush.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, message).wrap_err("Failed to encode message")?;
    writer.write_all(b"\n")?;
    writer.flush().wrap_err("Failed to flush message")?;
    Ok(())
}

/// Read one message. Returns `Ok(None)` at end of stream.
///
/// Blank lines are skipped.
pub fn read_message<R: BufRead, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .wrap_err("Failed to read message")?;
        if n == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        let message = serde_json::from_str(line.trim_end())
            .wrap_err_with(|| format!("Malformed message: {}", line.trim_end()))?;
        return Ok(Some(message));
    }
}
