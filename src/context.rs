//! Validation context chain
//!
//! One context exists per document reached during a single validation: the
//! top-level document, each include target and each dropin. Contexts live in
//! an arena and point at their parent by handle, mirroring the include graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::diagnostic::Anchor;
use crate::document::{ConfigDocument, ElementId};
use crate::source::{ReadLease, SourceDocument, SourceKind};

/// Handle to a context inside one [`ContextArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(usize);

impl ContextId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What to do when an included element collides with one already merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConflictPolicy {
    #[default]
    Merge,
    Replace,
    Ignore,
}

impl ConflictPolicy {
    /// Parse an `onConflict` attribute value; anything unrecognized merges
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("replace") => ConflictPolicy::Replace,
            Some(v) if v.eq_ignore_ascii_case("ignore") => ConflictPolicy::Ignore,
            _ => ConflictPolicy::Merge,
        }
    }
}

#[derive(Debug)]
pub struct ValidationContext {
    uri: Option<PathBuf>,
    document: Arc<ConfigDocument>,
    kind: SourceKind,
    lease: Option<ReadLease>,
    parent: Option<ContextId>,
    policy: ConflictPolicy,
    /// Include element in the parent document that pulled this context in
    include_element: Option<ElementId>,
    disposed: bool,
}

impl ValidationContext {
    pub fn uri(&self) -> Option<&Path> {
        self.uri.as_deref()
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn include_element(&self) -> Option<ElementId> {
        self.include_element
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// How a child context is attached to its parent
#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    pub parent: ContextId,
    pub policy: ConflictPolicy,
    pub include_element: Option<ElementId>,
}

/// Every context of one validation run plus the URIs already visited,
/// each mapped to the context created for it
#[derive(Debug, Default)]
pub struct ContextArena {
    contexts: Vec<ValidationContext>,
    visited: HashMap<PathBuf, ContextId>,
}

impl ContextArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the top-level context; its URI is marked visited
    pub fn create_top_level(&mut self, source: SourceDocument) -> ContextId {
        self.push(source, None)
    }

    pub fn create(&mut self, source: SourceDocument, attachment: Attachment) -> ContextId {
        self.push(source, Some(attachment))
    }

    fn push(&mut self, source: SourceDocument, attachment: Option<Attachment>) -> ContextId {
        let id = ContextId(self.contexts.len());
        if let Some(uri) = &source.uri {
            self.visited.entry(uri.clone()).or_insert(id);
        }
        debug!(
            context = id.0,
            uri = ?source.uri,
            parent = ?attachment.map(|a| a.parent.0),
            "created validation context"
        );
        self.contexts.push(ValidationContext {
            uri: source.uri,
            document: source.document,
            kind: source.kind,
            lease: source.lease,
            parent: attachment.map(|a| a.parent),
            policy: attachment.map(|a| a.policy).unwrap_or_default(),
            include_element: attachment.and_then(|a| a.include_element),
            disposed: false,
        });
        id
    }

    pub fn get(&self, id: ContextId) -> &ValidationContext {
        &self.contexts[id.0]
    }

    pub fn document(&self, id: ContextId) -> &ConfigDocument {
        &self.contexts[id.0].document
    }

    /// Shared handle to the document, for walks that also mutate the arena
    pub fn shared_document(&self, id: ContextId) -> Arc<ConfigDocument> {
        Arc::clone(&self.contexts[id.0].document)
    }

    pub fn ids(&self) -> impl Iterator<Item = ContextId> {
        (0..self.contexts.len()).map(ContextId)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn is_top_level(&self, id: ContextId) -> bool {
        self.contexts[id.0].parent.is_none()
    }

    /// `id` followed by each of its ancestors up to the top level
    pub fn ancestors(&self, id: ContextId) -> impl Iterator<Item = ContextId> + '_ {
        std::iter::successors(Some(id), |current| self.contexts[current.0].parent)
    }

    /// The ancestor of `id` that is a direct include (or dropin) of the top
    /// level document; `None` for the top level itself
    pub fn top_level_include(&self, id: ContextId) -> Option<ContextId> {
        self.ancestors(id)
            .find(|ancestor| {
                self.contexts[ancestor.0]
                    .parent
                    .is_some_and(|parent| self.is_top_level(parent))
            })
    }

    pub fn lowest_common_ancestor(&self, a: ContextId, b: ContextId) -> ContextId {
        let of_a: Vec<ContextId> = self.ancestors(a).collect();
        self.ancestors(b)
            .find(|candidate| of_a.contains(candidate))
            .unwrap_or_else(|| of_a.last().copied().unwrap_or(a))
    }

    /// Whether an override of a value set in `original` by `current` is
    /// worth reporting to the user looking at the top-level document
    pub fn emit_message(&self, original: ContextId, current: ContextId) -> bool {
        if self.is_top_level(original) || self.is_top_level(current) {
            return true;
        }
        if original == current {
            return false;
        }
        let shared = match (self.top_level_include(original), self.top_level_include(current)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        trace!(original = original.0, current = current.0, shared, "override message check");
        !shared
    }

    /// Context created for `uri` earlier in this run
    pub fn visited_by(&self, uri: &Path) -> Option<ContextId> {
        self.visited.get(uri).copied()
    }

    pub fn is_visited(&self, uri: &Path) -> bool {
        self.visited.contains_key(uri)
    }

    /// Anchor at `element` of the document in `id`
    pub fn anchor(&self, id: ContextId, element: ElementId, attribute: Option<&str>) -> Anchor {
        let document = self.document(id);
        let node = document.element(element);
        let attribute = attribute.and_then(|name| node.attribute(name));
        Anchor {
            uri: self.contexts[id.0].uri.clone(),
            locator: document.locator(element),
            element: node.name.clone(),
            attribute: attribute.map(|a| a.name.clone()),
            span: attribute.map_or(node.span, |a| a.value_span),
        }
    }

    /// Anchor the user can act on from the top-level document: nodes that
    /// came from an include are attributed to the include element that
    /// pulled their file in
    pub fn user_anchor(&self, id: ContextId, element: ElementId, attribute: Option<&str>) -> Anchor {
        if !self.is_top_level(id)
            && let Some(include) = self.top_level_include(id)
            && let Some(element) = self.contexts[include.0].include_element
            && let Some(parent) = self.contexts[include.0].parent
        {
            return self.anchor(parent, element, Some("location"));
        }
        self.anchor(id, element, attribute)
    }

    /// Short human-readable location such as `db.xml:12`
    pub fn describe(&self, id: ContextId, element: ElementId) -> String {
        let file = self.contexts[id.0]
            .uri
            .as_deref()
            .and_then(Path::file_name)
            .map_or_else(|| "<memory>".to_string(), |n| n.to_string_lossy().into_owned());
        format!("{}:{}", file, self.document(id).element(element).span.line)
    }

    /// Release whatever the context borrowed from its document source.
    /// Disposing twice is a no-op.
    pub fn dispose(&mut self, id: ContextId) {
        let context = &mut self.contexts[id.0];
        if context.disposed {
            return;
        }
        context.disposed = true;
        if let Some(lease) = context.lease.take() {
            debug!(context = id.0, "released document lease");
            drop(lease);
        }
    }

    /// Release every outstanding lease
    pub fn dispose_all(&mut self) {
        for id in 0..self.contexts.len() {
            self.dispose(ContextId(id));
        }
    }
}

impl Drop for ContextArena {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
