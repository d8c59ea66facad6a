//! The out-of-process parser.
//!
//! Parsing hand-written markup is the one place where a malformed book can
//! take the host down (deep recursion, pathological input), so it runs in
//! a child process: `folio parse-worker`. [`ParserProcess`] is the host
//! side of that conversation and [`run_parse_worker`] is the child side.

use std::io::{BufRead, BufReader, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use folio_proto::{PARSE_WORKER_COMMAND, Request, Response, read_message, write_message};
use tracing::{debug, warn};

use crate::parser;

/// Outcome of one parse: serialized output, or the parser's error text.
pub type ParseResult = std::result::Result<String, String>;

/// Something that can parse documents on behalf of the worker thread.
///
/// The outer `Result` of [`ParseBackend::parse`] is the transport: an
/// `Err` means the parser could not be reached at all. A parser that ran
/// and failed answers `Ok(Err(..))`.
pub trait ParseBackend: Send {
    fn parse(&mut self, data: &str) -> Result<ParseResult>;

    /// Stop the parser. Called once, when the worker exits.
    fn shutdown(&mut self);
}

/// Starts a parser backend on the worker thread.
pub type Launcher = Box<dyn FnOnce() -> Result<Box<dyn ParseBackend>> + Send>;

/// How long a parser process gets to exit after a shutdown request.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A running `folio parse-worker` child.
pub struct ParserProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl ParserProcess {
    /// Spawn `exe parse-worker`.
    pub fn spawn(exe: &Path) -> Result<Self> {
        let mut cmd = Command::new(exe);
        cmd.arg(PARSE_WORKER_COMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Keep terminal signals aimed at the host away from the parser
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .wrap_err_with(|| format!("Failed to spawn parser process {}", exe.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre::eyre!("Parser process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre::eyre!("Parser process has no stdout"))?;

        debug!(pid = child.id(), "Spawned parser process");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 0,
        })
    }

    /// A launcher that spawns `exe parse-worker` on the worker thread.
    pub fn launcher(exe: PathBuf) -> Launcher {
        Box::new(move || Ok(Box::new(ParserProcess::spawn(&exe)?) as Box<dyn ParseBackend>))
    }

    /// A launcher for the currently running executable.
    pub fn current_exe_launcher() -> Result<Launcher> {
        let exe = std::env::current_exe().wrap_err("Failed to locate the folio executable")?;
        Ok(Self::launcher(exe))
    }

    fn wait_for_exit(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "Parser process exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => {
                    warn!("Parser process did not exit, killing it");
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return;
                }
                Err(e) => {
                    warn!("Failed to wait for parser process: {}", e);
                    return;
                }
            }
        }
    }
}

impl ParseBackend for ParserProcess {
    fn parse(&mut self, data: &str) -> Result<ParseResult> {
        self.next_id += 1;
        let id = self.next_id;

        write_message(
            &mut self.stdin,
            &Request::Parse {
                id,
                data: data.to_string(),
            },
        )
        .wrap_err("Failed to send document to parser process")?;

        let response: Response = read_message(&mut self.stdout)
            .wrap_err("Failed to read parser response")?
            .ok_or_else(|| eyre::eyre!("Parser process closed its output"))?;

        if response.id != id {
            eyre::bail!(
                "Parser answered request {} while {} was outstanding",
                response.id,
                id
            );
        }

        match (response.result, response.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => eyre::bail!("Parser response {} carries neither result nor error", id),
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = write_message(&mut self.stdin, &Request::Shutdown) {
            debug!("Parser process already gone: {}", e);
        }
        self.wait_for_exit(EXIT_GRACE);
    }
}

impl Drop for ParserProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Child side: answer parse requests from `input` until shutdown or EOF.
pub fn run_parse_worker<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<()> {
    while let Some(request) = read_message::<_, Request>(&mut input)? {
        match request {
            Request::Parse { id, data } => {
                let response = match parse_guarded(&data) {
                    Ok(html) => Response::ok(id, html),
                    Err(e) => Response::error(id, e),
                };
                write_message(&mut output, &response)?;
            }
            Request::Shutdown => {
                debug!("Parser received shutdown");
                break;
            }
        }
    }
    Ok(())
}

/// Run the parser, turning both errors and panics into error text.
fn parse_guarded(data: &str) -> ParseResult {
    match catch_unwind(AssertUnwindSafe(|| parser::parse_html(data))) {
        Ok(Ok(html)) => Ok(html),
        Ok(Err(e)) => Err(format!("{e:?}")),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("Parser panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(input: &str) -> Vec<Response> {
        let mut output = Vec::new();
        run_parse_worker(Cursor::new(input.to_string()), &mut output).unwrap();
        let mut reader = Cursor::new(output);
        let mut responses = Vec::new();
        while let Some(r) = read_message::<_, Response>(&mut reader).unwrap() {
            responses.push(r);
        }
        responses
    }

    #[test]
    fn test_child_answers_each_request() {
        let responses = run(concat!(
            "{\"type\":\"parse\",\"id\":1,\"data\":\"<p></p>\"}\n",
            "{\"type\":\"parse\",\"id\":2,\"data\":\"<div><span>x</div>\"}\n",
        ));
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, 1);
        assert!(responses[0].result.as_deref().unwrap().contains("data-lnum"));
        assert_eq!(responses[1].id, 2);
        assert!(responses[1].result.is_none());
        assert!(responses[1].error.is_some());
    }

    #[test]
    fn test_child_stops_at_shutdown() {
        let responses = run(concat!(
            "{\"type\":\"shutdown\"}\n",
            "{\"type\":\"parse\",\"id\":1,\"data\":\"<p></p>\"}\n",
        ));
        assert!(responses.is_empty());
    }

    #[test]
    fn test_child_stops_at_eof() {
        assert!(run("").is_empty());
    }
}
