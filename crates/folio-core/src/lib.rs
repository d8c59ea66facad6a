//! folio-core - Document model for the folio live preview
//!
//! This crate provides the building blocks the preview pipeline reads from:
//! - [`RawContent`] and its change [`Fingerprint`]
//! - [`Container`] (the authored book) and [`EditorBuffers`] (open documents)
//! - [`Workspace`], which prefers editor buffers over the container
//! - the [`media`] tables that decide what needs parsing
//! - virtual preview URLs and href resolution
//!
//! # Features
//!
//! - `walk` - Enable [`DirContainer::names`] directory listing (brings in `ignore`)
//!
//! # In-Memory Containers (for testing)
//!
//! ```
//! use std::sync::Arc;
//! use folio_core::{BufferOverlay, MemoryContainer, RawContent, Workspace, media};
//!
//! let container = MemoryContainer::new()
//!     .add("chapter1.html", media::XHTML_MIME, "<p>hi</p>")
//!     .add("cover.jpg", "image/jpeg", vec![0xff, 0xd8]);
//! let buffers = Arc::new(BufferOverlay::new());
//! let workspace = Workspace::new(Arc::new(container), buffers.clone());
//!
//! let raw = workspace.raw_data("chapter1.html").unwrap();
//! assert_eq!(raw.fingerprint().len(), 9);
//!
//! buffers.open("chapter1.html", "<p>edited</p>");
//! assert_eq!(
//!     workspace.raw_data("chapter1.html").unwrap(),
//!     RawContent::from("<p>edited</p>")
//! );
//! ```

mod container;
mod content;
mod href;
mod manifest;
pub mod media;

pub use container::{
    BufferOverlay, Container, ContainerId, DirContainer, EditorBuffers, MemoryContainer, Workspace,
};
pub use content::{Fingerprint, RawContent};
pub use href::{
    PREVIEW_HOST, PREVIEW_SCHEME, href_fragment, href_to_name, is_preview_url, name_to_url,
    path_to_name,
};
