//! Merge engine
//!
//! Builds the effective configuration by walking a document, splicing in
//! includes and dropins, and applying the conflict policy whenever two files
//! declare the same element. Every included file is first merged on its own
//! into a scratch tree; only that resolved form is spliced into the parent,
//! so `onConflict="replace"` swaps whole subtrees.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::context::{Attachment, ConflictPolicy, ContextArena, ContextId};
use crate::diagnostic::{Diagnostic, DiagnosticSink, QuickFixDescriptor, QuickFixKind, Severity};
use crate::document::{ConfigDocument, ElementId};
use crate::error::{ContextCreationError, Result, ValidationError};
use crate::messages;
use crate::schema::ElementDecl;
use crate::server::DropinKind;
use crate::source::{include_candidates, normalize_path};
use crate::validator::Collaborators;
use crate::variables::{VariableLayer, VariableSet};

pub const INCLUDE: &str = "include";
pub const VARIABLE: &str = "variable";
pub const FEATURE_MANAGER: &str = "featureManager";
pub const FEATURE: &str = "feature";

/// Include chains deeper than this abort the run
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// Handle to a node inside one [`MergeTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MergeNodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct MergeAttribute {
    pub name: String,
    /// Value after variable substitution
    pub value: String,
    /// Value as written
    pub raw: String,
    /// Context that last set the value
    pub context: ContextId,
    /// Element of that context's document carrying the attribute
    pub source: ElementId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeNode {
    pub name: String,
    pub attributes: Vec<MergeAttribute>,
    pub text: Option<String>,
    /// Context that contributed the node
    pub context: ContextId,
    /// Element in the contributing context's document
    pub source: ElementId,
    /// Source element, present only for nodes from the top-level document
    pub original: Option<ElementId>,
    children: Vec<MergeNodeId>,
    parent: Option<MergeNodeId>,
}

impl MergeNode {
    pub fn attribute(&self, name: &str) -> Option<&MergeAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attribute(name).map(|a| a.value.as_str())
    }

    pub fn parent(&self) -> Option<MergeNodeId> {
        self.parent
    }

    fn shallow_copy(&self) -> Self {
        Self {
            children: Vec::new(),
            parent: None,
            ..self.clone()
        }
    }
}

/// The effective configuration after applying include and dropin precedence
#[derive(Debug, Clone)]
pub struct MergeTree {
    nodes: Vec<MergeNode>,
    root: MergeNodeId,
}

impl MergeTree {
    fn new(mut root: MergeNode) -> Self {
        root.children.clear();
        root.parent = None;
        Self {
            nodes: vec![root],
            root: MergeNodeId(0),
        }
    }

    pub fn root(&self) -> MergeNodeId {
        self.root
    }

    pub fn node(&self, id: MergeNodeId) -> &MergeNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: MergeNodeId) -> &mut MergeNode {
        &mut self.nodes[id.0]
    }

    pub fn children(&self, id: MergeNodeId) -> impl Iterator<Item = MergeNodeId> + '_ {
        self.nodes[id.0].children.iter().copied()
    }

    pub fn children_named<'a>(
        &'a self,
        id: MergeNodeId,
        name: &'a str,
    ) -> impl Iterator<Item = MergeNodeId> + 'a {
        self.children(id).filter(move |c| self.node(*c).name == name)
    }

    /// First node reached by following child names from the root
    pub fn find(&self, path: &[&str]) -> Option<MergeNodeId> {
        path.iter()
            .try_fold(self.root, |current, name| self.children_named(current, name).next())
    }

    /// Live nodes in document order, root first
    pub fn descendants(&self) -> impl Iterator<Item = MergeNodeId> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
            Some(next)
        })
    }

    pub fn len(&self) -> usize {
        self.descendants().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn append(&mut self, parent: MergeNodeId, mut node: MergeNode) -> MergeNodeId {
        let id = MergeNodeId(self.nodes.len());
        node.children.clear();
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    fn detach(&mut self, id: MergeNodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    fn copy_subtree(&mut self, source: &MergeTree, from: MergeNodeId, parent: MergeNodeId) -> MergeNodeId {
        let top = self.append(parent, source.node(from).shallow_copy());
        let mut pending = vec![(from, top)];
        while let Some((src, dst)) = pending.pop() {
            for child in source.children(src) {
                let copy = self.append(dst, source.node(child).shallow_copy());
                pending.push((child, copy));
            }
        }
        top
    }
}

/// Walks documents of one validation run and produces the merge tree
pub struct MergeEngine<'a, 'r> {
    services: Collaborators<'a>,
    arena: &'r mut ContextArena,
    variables: &'r mut VariableSet,
    sink: &'r mut dyn DiagnosticSink,
}

impl<'a, 'r> MergeEngine<'a, 'r> {
    pub fn new(
        services: Collaborators<'a>,
        arena: &'r mut ContextArena,
        variables: &'r mut VariableSet,
        sink: &'r mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            services,
            arena,
            variables,
            sink,
        }
    }

    /// Merge the top-level context and everything it pulls in
    pub fn run(&mut self, top: ContextId) -> Result<MergeTree> {
        self.build(top, 0)
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        trace!(severity = %diagnostic.severity, message = %diagnostic.message, "merge diagnostic");
        self.sink.report(diagnostic);
    }

    fn build(&mut self, ctx: ContextId, depth: usize) -> Result<MergeTree> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ValidationError::Internal {
                uri: self.uri_string(ctx),
                details: format!("include nesting exceeds {MAX_INCLUDE_DEPTH} levels"),
            });
        }
        let schema = self.services.schema;
        let document = self.arena.shared_document(ctx);
        let root = document.root();
        let root_decl = schema.root_declaration(&document.element(root).name);

        let mut tree = MergeTree::new(self.lift_node(ctx, &document, root));
        let mut staging = MergeTree::new(self.lift_node(ctx, &document, root));

        let dropins = depth == 0 && self.dropins_enabled(ctx);
        if dropins {
            self.merge_dropins(ctx, DropinKind::Defaults, &mut tree, root_decl, depth)?;
        }

        for child in document.children(root) {
            let element = document.element(child);
            if element.name == INCLUDE {
                self.process_include(ctx, &document, child, &mut tree, root_decl, depth)?;
                continue;
            }
            if element.name == VARIABLE {
                self.declare_variable(&document, child);
            }
            let staged = self.lift(ctx, &document, child, &mut staging);
            let target = tree.root();
            self.merge_node(&staging, staged, &mut tree, target, root_decl, ConflictPolicy::Merge);
        }

        if dropins {
            self.merge_dropins(ctx, DropinKind::Overrides, &mut tree, root_decl, depth)?;
        }
        Ok(tree)
    }

    fn uri_string(&self, ctx: ContextId) -> String {
        self.arena
            .get(ctx)
            .uri()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
    }

    fn declare_variable(&mut self, document: &ConfigDocument, element: ElementId) {
        let node = document.element(element);
        let Some(name) = node.attribute_value("name") else {
            return;
        };
        if let Some(value) = node.attribute_value("value") {
            self.variables.insert(name, value, VariableLayer::Document);
        } else if let Some(default) = node.attribute_value("defaultValue") {
            self.variables.insert(name, default, VariableLayer::DocumentDefault);
        }
    }

    fn lift_node(&self, ctx: ContextId, document: &ConfigDocument, element: ElementId) -> MergeNode {
        let source = document.element(element);
        let attributes = source
            .attributes
            .iter()
            .map(|attr| MergeAttribute {
                name: attr.name.clone(),
                value: if attr.value.contains("${") {
                    self.variables.resolve(&attr.value, None).resolved
                } else {
                    attr.value.clone()
                },
                raw: attr.value.clone(),
                context: ctx,
                source: element,
            })
            .collect();
        MergeNode {
            name: source.name.clone(),
            attributes,
            text: source.text().map(str::to_string),
            context: ctx,
            source: element,
            original: self.arena.is_top_level(ctx).then_some(element),
            children: Vec::new(),
            parent: None,
        }
    }

    /// Copy a document subtree into the staging tree
    fn lift(
        &self,
        ctx: ContextId,
        document: &ConfigDocument,
        element: ElementId,
        staging: &mut MergeTree,
    ) -> MergeNodeId {
        let top = staging.append(staging.root(), self.lift_node(ctx, document, element));
        let mut pending = vec![(element, top)];
        while let Some((source, target)) = pending.pop() {
            for child in document.children(source) {
                let id = staging.append(target, self.lift_node(ctx, document, child));
                pending.push((child, id));
            }
        }
        top
    }

    fn merge_node(
        &mut self,
        source: &MergeTree,
        incoming: MergeNodeId,
        target: &mut MergeTree,
        parent: MergeNodeId,
        parent_decl: Option<&'a ElementDecl>,
        policy: ConflictPolicy,
    ) {
        let schema = self.services.schema;
        let node = source.node(incoming);
        let Some(parent_decl) = parent_decl else {
            target.copy_subtree(source, incoming, parent);
            return;
        };
        let Some(decl) = schema.element_declaration(parent_decl, &node.name) else {
            self.unrecognized_element(node, parent_decl);
            return;
        };
        if decl.is_atomic() {
            self.merge_atomic(node, target, parent);
            return;
        }

        let parent_is_root = parent == target.root();
        let existing = find_match(node, target, parent, decl, parent_is_root);
        let policy = if node.name == FEATURE_MANAGER {
            ConflictPolicy::Merge
        } else {
            policy
        };

        let Some(existing) = existing else {
            let copy = target.append(parent, node.shallow_copy());
            self.merge_children(source, incoming, target, copy, decl);
            return;
        };

        match policy {
            ConflictPolicy::Ignore => {
                trace!(element = %node.name, "ignoring conflicting declaration");
            }
            ConflictPolicy::Replace => {
                let old = target.node(existing);
                if self.arena.emit_message(old.context, node.context) {
                    let message = messages::element_replaced(
                        &node.name,
                        &self.arena.describe(old.context, old.source),
                        &self.arena.describe(node.context, node.source),
                    );
                    let anchor = self.arena.user_anchor(node.context, node.source, None);
                    self.report(Diagnostic::new(
                        Severity::Info,
                        message,
                        anchor,
                        QuickFixDescriptor::none(),
                    ));
                }
                target.detach(existing);
                let copy = target.append(parent, node.shallow_copy());
                self.merge_children(source, incoming, target, copy, decl);
            }
            ConflictPolicy::Merge => {
                self.merge_attributes(node, target, existing);
                self.merge_children(source, incoming, target, existing, decl);
            }
        }
    }

    fn merge_children(
        &mut self,
        source: &MergeTree,
        from: MergeNodeId,
        target: &mut MergeTree,
        into: MergeNodeId,
        decl: &'a ElementDecl,
    ) {
        for child in source.children(from) {
            self.merge_node(source, child, target, into, Some(decl), ConflictPolicy::Merge);
        }
    }

    fn unrecognized_element(&mut self, node: &MergeNode, parent_decl: &ElementDecl) {
        if !self.arena.is_top_level(node.context) {
            return;
        }
        let ignored = self
            .arena
            .get(node.context)
            .uri()
            .is_some_and(|uri| self.services.filter.is_ignore_element(uri, &node.name));
        if ignored {
            return;
        }
        let candidates = self.services.schema.child_names(parent_decl);
        let best = self.services.matcher.best_match(
            &node.name,
            candidates.iter().map(String::as_str),
            &[],
        );
        let anchor = self.arena.anchor(node.context, node.source, None);
        self.report(Diagnostic::new(
            Severity::Warning,
            messages::unrecognized_element(&node.name),
            anchor,
            QuickFixDescriptor::new(QuickFixKind::UnrecognizedElement).with_best_match(best),
        ));
    }

    fn value_key(&self, node: &MergeNode) -> String {
        let text = node.text.as_deref().unwrap_or_default();
        if node.name == FEATURE {
            self.services
                .features
                .canonical_name(text)
                .unwrap_or_else(|| text.to_string())
                .to_ascii_lowercase()
        } else {
            text.to_string()
        }
    }

    /// Leaf values merge by value equality
    fn merge_atomic(&mut self, node: &MergeNode, target: &mut MergeTree, parent: MergeNodeId) {
        let key = self.value_key(node);
        let duplicate = target
            .children_named(parent, &node.name)
            .find(|c| self.value_key(target.node(*c)) == key);

        let Some(existing) = duplicate else {
            target.append(parent, node.shallow_copy());
            return;
        };
        let old = target.node(existing);
        if self.arena.emit_message(old.context, node.context) {
            let message = messages::duplicate_value(
                &node.name,
                node.text.as_deref().unwrap_or_default(),
                &self.arena.describe(old.context, old.source),
            );
            let anchor = self.arena.user_anchor(node.context, node.source, None);
            self.report(Diagnostic::new(
                Severity::Info,
                message,
                anchor,
                QuickFixDescriptor::none(),
            ));
        }
        let stamped = target.node_mut(existing);
        stamped.context = node.context;
        stamped.source = node.source;
        stamped.original = node.original;
    }

    fn merge_attributes(&mut self, node: &MergeNode, target: &mut MergeTree, existing: MergeNodeId) {
        for attr in &node.attributes {
            let previous = target.node(existing).attribute(&attr.name).cloned();
            match previous {
                None => target.node_mut(existing).attributes.push(attr.clone()),
                Some(previous) => {
                    if previous.value != attr.value
                        && self.arena.emit_message(previous.context, attr.context)
                    {
                        let message = messages::attribute_override(
                            &attr.name,
                            &node.name,
                            &previous.value,
                            &self.arena.describe(previous.context, previous.source),
                            &attr.value,
                            &self.arena.describe(attr.context, attr.source),
                        );
                        let anchor = self.arena.user_anchor(attr.context, attr.source, Some(&attr.name));
                        self.report(Diagnostic::new(
                            Severity::Info,
                            message,
                            anchor,
                            QuickFixDescriptor::none(),
                        ));
                    }
                    if let Some(slot) = target
                        .node_mut(existing)
                        .attributes
                        .iter_mut()
                        .find(|a| a.name == attr.name)
                    {
                        *slot = attr.clone();
                    }
                }
            }
        }
    }

    fn process_include(
        &mut self,
        ctx: ContextId,
        document: &ConfigDocument,
        include: ElementId,
        tree: &mut MergeTree,
        root_decl: Option<&'a ElementDecl>,
        depth: usize,
    ) -> Result<()> {
        let element = document.element(include);
        let Some(raw) = element.attribute_value("location").filter(|l| !l.trim().is_empty()) else {
            return Ok(());
        };
        let optional = element
            .attribute_value("optional")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let policy = ConflictPolicy::parse(element.attribute_value("onConflict"));
        let location = self.variables.resolve(raw, None).resolved;

        let base_dir = self.arena.get(ctx).uri().and_then(Path::parent).map(Path::to_path_buf);
        let candidates = include_candidates(&location, base_dir.as_deref(), self.services.server);
        let provider = self.services.provider;
        let target = candidates
            .iter()
            .find(|c| provider.contains(c) || c.is_file())
            .cloned();

        let Some(target) = target else {
            let missing = ContextCreationError::NotFound {
                location: location.clone(),
            };
            self.include_failed(ctx, include, &location, &missing, optional);
            return Ok(());
        };

        if let Some(previous) = self.arena.visited_by(&target) {
            debug!(include = %target.display(), "include already processed");
            if self.arena.emit_message(previous, ctx) {
                let anchor = self.arena.user_anchor(ctx, include, Some("location"));
                self.report(Diagnostic::new(
                    Severity::Info,
                    messages::already_included(&location),
                    anchor,
                    QuickFixDescriptor::none(),
                ));
            }
            return Ok(());
        }

        let source = match provider.open(&target) {
            Ok(source) => source,
            Err(err) => {
                self.include_failed(ctx, include, &location, &err, optional);
                return Ok(());
            }
        };
        debug!(include = %target.display(), ?policy, depth, "processing include");
        let child = self.arena.create(
            source,
            Attachment {
                parent: ctx,
                policy,
                include_element: Some(include),
            },
        );
        let included = self.build(child, depth + 1);
        self.arena.dispose(child);
        let included = included?;
        self.splice(&included, tree, root_decl, policy);
        Ok(())
    }

    fn include_failed(
        &mut self,
        ctx: ContextId,
        include: ElementId,
        location: &str,
        error: &ContextCreationError,
        optional: bool,
    ) {
        if !self.arena.is_top_level(ctx) {
            debug!(%error, "nested include target unavailable");
            return;
        }
        let anchor = self.arena.anchor(ctx, include, Some("location"));
        let diagnostic = match error {
            ContextCreationError::NotFound { .. } => Diagnostic::new(
                if optional { Severity::Info } else { Severity::Error },
                if optional {
                    messages::optional_include_not_found(location)
                } else {
                    messages::include_not_found(location)
                },
                anchor,
                QuickFixDescriptor::new(QuickFixKind::IncludeNotFound),
            ),
            other => Diagnostic::new(
                Severity::Error,
                messages::include_unreadable(location, &other.to_string()),
                anchor,
                QuickFixDescriptor::none(),
            ),
        };
        self.report(diagnostic);
    }

    fn splice(
        &mut self,
        included: &MergeTree,
        tree: &mut MergeTree,
        root_decl: Option<&'a ElementDecl>,
        policy: ConflictPolicy,
    ) {
        let target = tree.root();
        for child in included.children(included.root()) {
            self.merge_node(included, child, tree, target, root_decl, policy);
        }
    }

    fn dropins_enabled(&self, ctx: ContextId) -> bool {
        match (self.services.server, self.arena.get(ctx).uri()) {
            (Some(server), Some(uri)) => server.is_root_config(uri),
            _ => false,
        }
    }

    fn merge_dropins(
        &mut self,
        ctx: ContextId,
        kind: DropinKind,
        tree: &mut MergeTree,
        root_decl: Option<&'a ElementDecl>,
        depth: usize,
    ) -> Result<()> {
        let Some(server) = self.services.server else {
            return Ok(());
        };
        for path in dropin_files(&server.dropins_dir(kind)) {
            if self.arena.is_visited(&path) {
                continue;
            }
            let source = match self.services.provider.open(&path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(dropin = %path.display(), %err, "skipping unreadable dropin");
                    let root = self.arena.document(ctx).root();
                    let anchor = self.arena.anchor(ctx, root, None);
                    self.report(Diagnostic::new(
                        Severity::Error,
                        messages::dropin_unreadable(&path.display().to_string(), &err.to_string()),
                        anchor,
                        QuickFixDescriptor::none(),
                    ));
                    continue;
                }
            };
            debug!(dropin = %path.display(), ?kind, "processing dropin");
            let child = self.arena.create(
                source,
                Attachment {
                    parent: ctx,
                    policy: ConflictPolicy::Merge,
                    include_element: None,
                },
            );
            let merged = self.build(child, depth + 1);
            self.arena.dispose(child);
            let merged = merged?;
            self.splice(&merged, tree, root_decl, ConflictPolicy::Merge);
        }
        Ok(())
    }
}

/// Configuration files of a dropins directory in alphabetical order
fn dropin_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        })
        .map(|path| normalize_path(&path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Find the node in `parent` that `node` collides with
fn find_match(
    node: &MergeNode,
    target: &MergeTree,
    parent: MergeNodeId,
    decl: &ElementDecl,
    parent_is_root: bool,
) -> Option<MergeNodeId> {
    if decl.is_singleton() && !parent_is_root {
        return None;
    }
    let key_attribute = if node.name == VARIABLE {
        Some("name")
    } else {
        decl.identity_attribute().map(|a| a.name.as_str())
    };
    let key = key_attribute.and_then(|attr| node.attribute_value(attr).map(|v| (attr, v)));

    match key {
        Some((attr, value)) => target
            .children_named(parent, &node.name)
            .find(|c| target.node(*c).attribute_value(attr) == Some(value)),
        None if parent_is_root => target.children_named(parent, &node.name).find(|c| {
            key_attribute.is_none_or(|attr| target.node(*c).attribute_value(attr).is_none())
        }),
        None => None,
    }
}
