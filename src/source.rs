//! Where documents come from
//!
//! A path is resolved by asking, in order, for a known server configuration
//! that is already parsed, for an open workspace model, and finally for a
//! file on disk. Open models hand out a [`ReadLease`] that is released when
//! the owning context is disposed.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::document::{ConfigDocument, LoadError};
use crate::error::{ContextCreationError, DocumentResult};
use crate::server::ServerInfo;

/// Read lock on an open model; released exactly once, on drop
#[derive(Debug)]
pub struct ReadLease {
    readers: Arc<AtomicUsize>,
}

impl ReadLease {
    fn acquire(readers: &Arc<AtomicUsize>) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        Self {
            readers: Arc::clone(readers),
        }
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How a document was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Parsed configuration of a known server
    KnownConfig,
    /// Live model of a file open in the workspace
    OpenModel,
    /// Loaded from disk for this run only
    FileSystem,
    /// In-memory document with no backing file
    Detached,
}

/// A document handed to the validator, plus whatever it borrowed
#[derive(Debug)]
pub struct SourceDocument {
    pub document: Arc<ConfigDocument>,
    pub uri: Option<PathBuf>,
    pub kind: SourceKind,
    pub lease: Option<ReadLease>,
}

impl SourceDocument {
    /// Scratch document with no backing resource
    pub fn detached(document: ConfigDocument) -> Self {
        Self {
            document: Arc::new(document),
            uri: None,
            kind: SourceKind::Detached,
            lease: None,
        }
    }

    /// Already-parsed document for a file
    pub fn parsed(document: Arc<ConfigDocument>, uri: impl Into<PathBuf>) -> Self {
        Self {
            document,
            uri: Some(normalize_path(&uri.into())),
            kind: SourceKind::KnownConfig,
            lease: None,
        }
    }

    /// Load a file straight from disk
    pub fn load(path: &Path) -> Result<Self, ContextCreationError> {
        let path = normalize_path(path);
        let document = ConfigDocument::load(&path).map_err(|err| match err {
            LoadError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ContextCreationError::NotFound {
                    location: path.display().to_string(),
                }
            }
            LoadError::Io(e) => ContextCreationError::Unreadable {
                path: path.clone(),
                details: e.to_string(),
            },
            LoadError::Document(source) => ContextCreationError::Malformed {
                path: path.clone(),
                source,
            },
        })?;
        Ok(Self {
            document: Arc::new(document),
            uri: Some(path),
            kind: SourceKind::FileSystem,
            lease: None,
        })
    }
}

/// Capability for locating documents managed outside the file system
pub trait DocumentProvider: Send + Sync {
    /// An already-parsed configuration of a known server
    fn known_config(&self, uri: &Path) -> Option<Arc<ConfigDocument>>;

    /// A live model for a file open in the workspace, with a read lease
    fn open_model(&self, uri: &Path) -> Option<SourceDocument>;

    /// Resolve `uri` through known configs, open models, then the file system
    fn open(&self, uri: &Path) -> Result<SourceDocument, ContextCreationError> {
        let uri = normalize_path(uri);
        if let Some(document) = self.known_config(&uri) {
            debug!(uri = %uri.display(), "reusing known configuration");
            return Ok(SourceDocument::parsed(document, uri));
        }
        if let Some(source) = self.open_model(&uri) {
            debug!(uri = %uri.display(), "using open workspace model");
            return Ok(source);
        }
        SourceDocument::load(&uri)
    }

    /// Whether `uri` can be opened without touching the file system
    fn contains(&self, uri: &Path) -> bool {
        self.known_config(uri).is_some() || self.open_model(uri).is_some()
    }
}

struct OpenModel {
    document: Arc<ConfigDocument>,
    readers: Arc<AtomicUsize>,
}

/// In-process registry of known configurations and open models
#[derive(Default)]
pub struct Workspace {
    known: RwLock<HashMap<PathBuf, Arc<ConfigDocument>>>,
    models: RwLock<HashMap<PathBuf, OpenModel>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let known = self.known.read().map(|k| k.len()).unwrap_or_default();
        let models = self.models.read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("Workspace")
            .field("known", &known)
            .field("models", &models)
            .finish()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the parsed configuration of a known server
    pub fn add_known_config(&self, uri: &Path, document: ConfigDocument) {
        if let Ok(mut known) = self.known.write() {
            known.insert(normalize_path(uri), Arc::new(document));
        }
    }

    /// Open an editor model for `uri` with unsaved `content`
    pub fn open_editor(&self, uri: &Path, content: &str) -> DocumentResult<()> {
        let document = ConfigDocument::parse(content)?;
        if let Ok(mut models) = self.models.write() {
            models.insert(
                normalize_path(uri),
                OpenModel {
                    document: Arc::new(document),
                    readers: Arc::new(AtomicUsize::new(0)),
                },
            );
        }
        Ok(())
    }

    /// Number of outstanding read leases on the model for `uri`
    pub fn readers(&self, uri: &Path) -> usize {
        self.models
            .read()
            .ok()
            .and_then(|models| {
                models
                    .get(&normalize_path(uri))
                    .map(|m| m.readers.load(Ordering::SeqCst))
            })
            .unwrap_or(0)
    }
}

impl DocumentProvider for Workspace {
    fn known_config(&self, uri: &Path) -> Option<Arc<ConfigDocument>> {
        self.known.read().ok()?.get(uri).cloned()
    }

    fn open_model(&self, uri: &Path) -> Option<SourceDocument> {
        let models = self.models.read().ok()?;
        let model = models.get(uri)?;
        Some(SourceDocument {
            document: Arc::clone(&model.document),
            uri: Some(uri.to_path_buf()),
            kind: SourceKind::OpenModel,
            lease: Some(ReadLease::acquire(&model.readers)),
        })
    }
}

/// Provider that only knows the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemProvider;

impl DocumentProvider for FileSystemProvider {
    fn known_config(&self, _uri: &Path) -> Option<Arc<ConfigDocument>> {
        None
    }

    fn open_model(&self, _uri: &Path) -> Option<SourceDocument> {
        None
    }
}

/// Lexically normalize a path, resolving `.` and `..` without touching the disk
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Candidate files for an include location whose variables are already resolved
///
/// Relative locations resolve against the including file's directory, then
/// against the shared configuration directory of the owning server.
pub fn include_candidates(
    location: &str,
    base_dir: Option<&Path>,
    server: Option<&ServerInfo>,
) -> Vec<PathBuf> {
    let location = Path::new(location.trim());
    if location.is_absolute() {
        return vec![normalize_path(location)];
    }
    let mut candidates = Vec::new();
    if let Some(base) = base_dir {
        candidates.push(normalize_path(&base.join(location)));
    }
    if let Some(shared) = server.and_then(ServerInfo::shared_config_dir) {
        candidates.push(normalize_path(&shared.join(location)));
    }
    if candidates.is_empty() {
        candidates.push(normalize_path(location));
    }
    candidates
}
