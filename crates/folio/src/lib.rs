//! folio library - live preview for e-book editing
//!
//! The pipeline, leaves first:
//!
//! - [`parser`] turns (X)HTML into line-annotated XHTML (run out of process)
//! - [`worker`] re-parses documents in the background, skipping unchanged
//!   content and coalescing bursts of requests
//! - [`provider`] answers renderer fetches for `folio://preview/` URLs
//! - [`preview`] decides when to refresh and keeps the view in step with
//!   the editor
//! - [`bridge`] puts a browser and an editor API on top of all of it

pub mod bridge;
pub mod config;
pub mod parser;
pub mod preview;
pub mod provider;
pub mod watcher;
pub mod worker;

use std::path::{Path, PathBuf};

use config::Config;
use eyre::{Result, WrapErr};

/// Directory under the book root holding folio's own files.
pub const FOLIO_DIR: &str = ".folio";

/// Default config location for a book.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(FOLIO_DIR).join("config.toml")
}

/// Find the book root by walking up from the current directory.
///
/// A book root holds `META-INF/container.xml` or a `.folio` directory.
/// Falls back to the current directory.
pub fn find_book_root() -> Result<PathBuf> {
    let start = std::env::current_dir().wrap_err("Failed to get current directory")?;
    let mut current = start.clone();

    loop {
        if current.join("META-INF").join("container.xml").is_file()
            || current.join(FOLIO_DIR).is_dir()
        {
            return Ok(current);
        }

        if !current.pop() {
            return Ok(start);
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        eyre::bail!(
            "Config file not found at {}\n\n\
             Create one with the settings you want to change, for example:\n\n\
             [preview]\n\
             refresh_interval = 1.0\n\n\
             [server]\n\
             port = 3000",
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .wrap_err_with(|| format!("Invalid config file: {}", path.display()))?;

    Ok(config)
}

/// Load config if it exists, otherwise return the defaults.
///
/// A file that exists but does not parse is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config(path)
}
