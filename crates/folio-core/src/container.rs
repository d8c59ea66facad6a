//! Where raw document content comes from
//!
//! A [`Container`] is the authored book on disk (or in memory for tests).
//! [`EditorBuffers`] are the documents currently open for editing; when a
//! document is open its buffer is authoritative over the container.
//! [`Workspace`] ties the two together and is what the preview pipeline
//! reads from.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use eyre::{Result, WrapErr};

use crate::content::RawContent;
use crate::href;
use crate::manifest;
use crate::media;

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an opened container.
///
/// Every container instance gets a fresh id, so reopening the same book
/// still counts as a container change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(u64);

impl ContainerId {
    pub fn next() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The authored book, read-only from the preview's point of view.
pub trait Container: Send + Sync {
    /// Identity of this container instance.
    fn id(&self) -> ContainerId;

    /// All document names, sorted.
    fn names(&self) -> Vec<String>;

    /// Whether the container knows about `name`.
    fn has_name(&self, name: &str) -> bool;

    /// Whether `name` currently exists in storage.
    fn exists(&self, name: &str) -> bool {
        self.has_name(name)
    }

    /// Declared media type of `name`, if any.
    fn mime_type(&self, name: &str) -> Option<String>;

    /// Raw content of `name`.
    fn raw_data(&self, name: &str) -> Result<RawContent>;

    /// Resolve an href found inside `base_name` to a document name.
    fn href_to_name(&self, href: &str, base_name: &str) -> Option<String> {
        href::href_to_name(href, base_name)
    }
}

/// Live editor buffers, keyed by document name.
pub trait EditorBuffers: Send + Sync {
    /// Current text of `name` if it is open for editing.
    fn raw_data(&self, name: &str) -> Option<String>;
}

// ============================================================================
// Directory container
// ============================================================================

/// A container backed by an unpacked book directory.
///
/// Names are `/`-separated paths relative to the root. Media types come
/// from the OPF manifest when the book has one, otherwise from file
/// extensions.
pub struct DirContainer {
    id: ContainerId,
    root: PathBuf,
    media_types: HashMap<String, String>,
}

impl DirContainer {
    /// Open the directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = root
            .canonicalize()
            .wrap_err_with(|| format!("Failed to open container at {}", root.display()))?;
        if !root.is_dir() {
            eyre::bail!("Container root {} is not a directory", root.display());
        }
        let media_types = manifest::read_manifest(&root)?;
        Ok(Self {
            id: ContainerId::next(),
            root,
            media_types,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a document name to a path under the root.
    ///
    /// Names that would escape the root resolve to `None`.
    pub fn name_to_path(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Map a path under the root back to a document name.
    pub fn path_to_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

impl Container for DirContainer {
    fn id(&self) -> ContainerId {
        self.id
    }

    #[cfg(feature = "walk")]
    fn names(&self) -> Vec<String> {
        use ignore::WalkBuilder;

        let walker = WalkBuilder::new(&self.root)
            .follow_links(true)
            .hidden(true)
            .git_ignore(true)
            .build();

        let mut names: Vec<String> = walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| self.path_to_name(entry.path()))
            .collect();
        names.sort();
        names
    }

    #[cfg(not(feature = "walk"))]
    fn names(&self) -> Vec<String> {
        Vec::new()
    }

    fn has_name(&self, name: &str) -> bool {
        self.name_to_path(name).is_some_and(|p| p.is_file())
    }

    fn mime_type(&self, name: &str) -> Option<String> {
        if let Some(declared) = self.media_types.get(name) {
            return Some(declared.clone());
        }
        media::guess_from_name(name).map(str::to_string)
    }

    fn raw_data(&self, name: &str) -> Result<RawContent> {
        let path = self
            .name_to_path(name)
            .ok_or_else(|| eyre::eyre!("Invalid document name: {}", name))?;
        let bytes =
            std::fs::read(&path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let is_text = self.mime_type(name).is_some_and(|m| media::is_text(&m));
        if is_text {
            Ok(RawContent::Bytes(bytes).into_text().into())
        } else {
            Ok(RawContent::Bytes(bytes))
        }
    }
}

// ============================================================================
// In-memory container
// ============================================================================

/// In-memory container (useful for testing)
pub struct MemoryContainer {
    id: ContainerId,
    files: HashMap<String, (String, RawContent)>,
}

impl MemoryContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self {
            id: ContainerId::next(),
            files: HashMap::new(),
        }
    }

    /// Add a document with an explicit media type
    pub fn add(
        mut self,
        name: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<RawContent>,
    ) -> Self {
        self.files
            .insert(name.into(), (media_type.into(), content.into()));
        self
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Container for MemoryContainer {
    fn id(&self) -> ContainerId {
        self.id
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }

    fn has_name(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn mime_type(&self, name: &str) -> Option<String> {
        self.files.get(name).map(|(m, _)| m.clone())
    }

    fn raw_data(&self, name: &str) -> Result<RawContent> {
        self.files
            .get(name)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| eyre::eyre!("No such document: {}", name))
    }
}

// ============================================================================
// Editor buffer overlay
// ============================================================================

/// Editor buffers held in memory, updated as the editor reports changes.
#[derive(Default)]
pub struct BufferOverlay {
    buffers: RwLock<HashMap<String, String>>,
}

impl BufferOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` is open with the given text (also used for edits).
    pub fn open(&self, name: impl Into<String>, text: impl Into<String>) {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), text.into());
    }

    /// Record that `name` is no longer open. Returns whether it was.
    pub fn close(&self, name: &str) -> bool {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Names of all open buffers.
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl EditorBuffers for BufferOverlay {
    fn raw_data(&self, name: &str) -> Option<String> {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// The container being edited plus the open editor buffers.
pub struct Workspace {
    container: RwLock<Arc<dyn Container>>,
    buffers: Arc<dyn EditorBuffers>,
}

impl Workspace {
    pub fn new(container: Arc<dyn Container>, buffers: Arc<dyn EditorBuffers>) -> Self {
        Self {
            container: RwLock::new(container),
            buffers,
        }
    }

    /// The current container.
    pub fn container(&self) -> Arc<dyn Container> {
        self.container
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new container. Returns whether its identity changed.
    pub fn set_container(&self, container: Arc<dyn Container>) -> bool {
        let mut current = self
            .container
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = current.id() != container.id();
        *current = container;
        changed
    }

    /// Raw content of `name`, preferring the editor buffer when one is open.
    pub fn raw_data(&self, name: &str) -> Result<RawContent> {
        if let Some(text) = self.buffers.raw_data(name) {
            return Ok(RawContent::Text(text));
        }
        self.container().raw_data(name)
    }
}
