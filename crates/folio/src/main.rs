//! folio - live preview server for e-book editing
//!
//! `folio serve` previews an unpacked book in the browser and re-parses
//! documents in the background as they change. `folio parse-worker` is the
//! parser process it spawns; `folio parse` runs the parser once.

use std::io::{BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use owo_colors::OwoColorize;
use tracing::debug;

use folio::bridge::http::{self, ServeOptions};

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Live preview for e-book editing")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (FOLIO_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve a live preview of an unpacked book
    Serve {
        /// Book root (default: nearest directory with META-INF/container.xml)
        root: Option<PathBuf>,

        /// Path to config file (default: <root>/.folio/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (default: first free port from 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the preview in a browser
        #[arg(long)]
        open: bool,

        /// Document to show on startup
        #[arg(short, long, value_name = "NAME")]
        document: Option<String>,
    },

    /// Run the parser process (spawned by `serve`)
    #[command(hide = true)]
    ParseWorker,

    /// Parse one file and print the annotated XHTML
    Parse {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    match args.command {
        Command::Serve {
            root,
            config,
            port,
            open,
            document,
        } => {
            let root = match root {
                Some(root) => root,
                None => folio::find_book_root()?,
            };
            let config_path = config.unwrap_or_else(|| folio::config_path(&root));
            let config = folio::load_config_or_default(&config_path)?;
            debug!(?config, "Loaded config");

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .wrap_err("Failed to start async runtime")?;
            runtime.block_on(http::run(ServeOptions {
                root,
                config,
                port,
                open,
                document,
            }))
        }
        Command::ParseWorker => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            folio::worker::process::run_parse_worker(BufReader::new(stdin.lock()), stdout.lock())
        }
        Command::Parse { file } => {
            let raw = std::fs::read_to_string(&file)
                .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
            match folio::parser::parse_html(&raw) {
                Ok(html) => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(html.as_bytes())?;
                    stdout.write_all(b"\n")?;
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{} {}: {}", "error:".red().bold(), file.display(), e);
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Log to stderr; stdout belongs to the parser protocol and `parse` output.
fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("FOLIO_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("folio=debug,info")
            } else {
                EnvFilter::new("folio=info,warn")
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
