//! Rule engine and validation entry point
//!
//! [`ConfigValidator::validate`] runs four passes over one top-level
//! document: merge (includes, dropins, conflict policy), id indexing, the
//! per-element and per-attribute rules for the top-level document, and the
//! whole-configuration checks against the merged tree. Every recoverable
//! problem becomes a [`Diagnostic`]; only an aborted run returns `Err`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, error};

use crate::checks::{self, enabled_features};
use crate::context::{ContextArena, ContextId};
use crate::diagnostic::{
    CANDIDATE_FEATURES, Diagnostic, DiagnosticSink, QuickFixDescriptor, QuickFixKind, Severity,
};
use crate::document::{Attribute, ConfigDocument, Element, ElementId};
use crate::error::{Result, ValidationError};
use crate::features::{FeatureAuthority, FeatureCatalog, family_of};
use crate::fuzzy::FuzzyMatcher;
use crate::ignore_filter::IgnoreFilter;
use crate::merge::{FEATURE, FEATURE_MANAGER, MergeEngine, MergeTree};
use crate::messages;
use crate::password::{PasswordPolicy, PasswordStatus, RuntimePasswordPolicy};
use crate::schema::{AttributeDecl, ElementDecl, PASSWORD_HASH_TYPE, SchemaAuthority, SchemaCatalog};
use crate::server::{ServerBehaviour, ServerInfo};
use crate::source::{DocumentProvider, FileSystemProvider, SourceDocument};
use crate::variables::{
    OperandErrorKind, ResolvedValueInfo, VariableAuthority, VariableLayer, VariableOverlay,
    VariableProvider, VariableSet, resolve,
};

static DURATION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn duration_pattern() -> &'static Regex {
    DURATION_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(\.\d+)?(d|h|m|s|ms))+$").expect("duration pattern is valid")
    })
}

/// A plain millisecond count or a sequence such as `1h30m` or `2.5s`
pub fn is_valid_duration(value: &str) -> bool {
    let value = value.trim();
    value.parse::<i64>().is_ok() || duration_pattern().is_match(value)
}

/// Borrowed view of everything a validation run consults
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub schema: &'a dyn SchemaAuthority,
    pub features: &'a dyn FeatureAuthority,
    pub passwords: &'a dyn PasswordPolicy,
    pub provider: &'a dyn DocumentProvider,
    pub server: Option<&'a ServerInfo>,
    pub behaviour: Option<&'a dyn ServerBehaviour>,
    pub filter: &'a IgnoreFilter,
    pub matcher: FuzzyMatcher,
}

/// Owned collaborators, shareable across concurrent runs
#[derive(Clone)]
pub struct ValidatorServices {
    pub schema: Arc<dyn SchemaAuthority + Send + Sync>,
    pub features: Arc<dyn FeatureAuthority + Send + Sync>,
    pub passwords: Arc<dyn PasswordPolicy + Send + Sync>,
    pub provider: Arc<dyn DocumentProvider>,
    pub server: Option<ServerInfo>,
    pub behaviour: Option<Arc<dyn ServerBehaviour + Send + Sync>>,
    pub filter: Arc<IgnoreFilter>,
    pub matcher: FuzzyMatcher,
    pub runtime_variables: Vec<(String, String)>,
    pub user_variables: Vec<(String, String)>,
    pub variable_providers: Vec<Arc<dyn VariableProvider>>,
}

impl Default for ValidatorServices {
    fn default() -> Self {
        Self {
            schema: Arc::new(SchemaCatalog::builtin()),
            features: Arc::new(FeatureCatalog::builtin()),
            passwords: Arc::new(RuntimePasswordPolicy::default()),
            provider: Arc::new(FileSystemProvider),
            server: None,
            behaviour: None,
            filter: Arc::new(IgnoreFilter::new()),
            matcher: FuzzyMatcher::default(),
            runtime_variables: Vec::new(),
            user_variables: Vec::new(),
            variable_providers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ValidatorServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorServices")
            .field("server", &self.server)
            .field("filter", &self.filter)
            .field("matcher", &self.matcher)
            .field("runtime_variables", &self.runtime_variables)
            .finish_non_exhaustive()
    }
}

impl ValidatorServices {
    pub fn with_server(mut self, server: ServerInfo) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_behaviour(mut self, behaviour: Arc<dyn ServerBehaviour + Send + Sync>) -> Self {
        self.behaviour = Some(behaviour);
        self
    }

    pub fn with_filter(mut self, filter: IgnoreFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn with_passwords(mut self, passwords: Arc<dyn PasswordPolicy + Send + Sync>) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.runtime_variables.push((name.into(), value.into()));
        self
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            schema: self.schema.as_ref(),
            features: self.features.as_ref(),
            passwords: self.passwords.as_ref(),
            provider: self.provider.as_ref(),
            server: self.server.as_ref(),
            behaviour: self
                .behaviour
                .as_deref()
                .map(|b| b as &dyn ServerBehaviour),
            filter: &self.filter,
            matcher: self.matcher,
        }
    }

    /// Variables known before any document is read
    pub fn base_variables(&self) -> VariableSet {
        match &self.server {
            Some(server) => VariableSet::for_server(
                server,
                &self.runtime_variables,
                &self.user_variables,
                &self.variable_providers,
            ),
            None => {
                let mut set = VariableSet::new();
                for (name, value) in &self.runtime_variables {
                    set.insert(name, value, VariableLayer::Runtime);
                }
                for (name, value) in &self.user_variables {
                    set.insert(name, value, VariableLayer::UserDirectory);
                }
                set
            }
        }
    }
}

/// What a completed run leaves behind besides its diagnostics
#[derive(Debug, Clone)]
pub struct ValidationRun {
    pub tree: MergeTree,
    /// Documents reached, the top-level one included
    pub documents: usize,
    pub variables: VariableSet,
}

/// One validation call; holds no state between calls
pub struct ConfigValidator<'s> {
    services: &'s ValidatorServices,
}

impl<'s> ConfigValidator<'s> {
    pub fn new(services: &'s ValidatorServices) -> Self {
        Self { services }
    }

    /// Validate the file at `path`, opened through the document provider
    pub fn validate_path(&self, path: &Path, sink: &mut dyn DiagnosticSink) -> Result<ValidationRun> {
        let source = self
            .services
            .provider
            .open(path)
            .map_err(|err| ValidationError::MissingDocument {
                details: err.to_string(),
            })?;
        self.validate(source, sink)
    }

    /// Validate an in-memory document with no backing file
    pub fn validate_document(
        &self,
        document: ConfigDocument,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ValidationRun> {
        self.validate(SourceDocument::detached(document), sink)
    }

    pub fn validate(&self, source: SourceDocument, sink: &mut dyn DiagnosticSink) -> Result<ValidationRun> {
        let uri = source.uri.clone();
        let mut arena = ContextArena::new();
        let top = arena.create_top_level(source);
        let mut variables = self.services.base_variables();

        let outcome = self.run(&mut arena, top, &mut variables, sink);
        let documents = arena.len();
        arena.dispose_all();

        match outcome {
            Ok(tree) => {
                debug!(uri = ?uri, documents, merged = tree.len(), "validation finished");
                Ok(ValidationRun {
                    tree,
                    documents,
                    variables,
                })
            }
            Err(err) => {
                error!(uri = ?uri, error = %err, "validation aborted");
                Err(err)
            }
        }
    }

    fn run(
        &self,
        arena: &mut ContextArena,
        top: ContextId,
        variables: &mut VariableSet,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<MergeTree> {
        let services = self.services.collaborators();
        let document = arena.shared_document(top);
        let root = document.root();
        let root_name = &document.element(root).name;
        let root_decl = services.schema.root_declaration(root_name);
        if root_decl.is_none() {
            sink.report(Diagnostic::new(
                Severity::Error,
                messages::unrecognized_root(root_name),
                arena.anchor(top, root, None),
                QuickFixDescriptor::none(),
            ));
        }

        let tree = MergeEngine::new(services, arena, variables, sink).run(top)?;
        let Some(root_decl) = root_decl else {
            return Ok(tree);
        };

        let index = IdIndex::build(&tree, services.server);
        let enabled = enabled_features(&tree, services.features);
        let mut rules = RuleChecker {
            services,
            arena,
            variables,
            document: &document,
            top,
            index: &index,
            enabled: &enabled,
            sink,
        };
        rules.check_duplicate_ids();
        rules.check_element(root, root_decl, true);

        checks::run_all(services, arena, &tree, top, sink);
        Ok(tree)
    }
}

/// Ids declared anywhere in the merged configuration, per element type
#[derive(Debug, Default, Clone)]
pub struct IdIndex {
    ids: HashMap<String, BTreeSet<String>>,
}

impl IdIndex {
    pub fn build(tree: &MergeTree, server: Option<&ServerInfo>) -> Self {
        let mut index = Self::default();
        for id in tree.descendants() {
            let node = tree.node(id);
            if let Some(value) = node.attribute_value("id") {
                index.insert(&node.name, value);
            }
        }
        for synthetic in server.map(ServerInfo::all_synthetic_ids).unwrap_or_default() {
            index.insert(&synthetic.element, &synthetic.id);
        }
        index
    }

    fn insert(&mut self, element: &str, id: &str) {
        self.ids
            .entry(element.to_string())
            .or_default()
            .insert(id.to_string());
    }

    /// Whether `id` exists for any of `types`; an empty list accepts any type
    pub fn contains(&self, types: &[String], id: &str) -> bool {
        if types.is_empty() {
            return self.ids.values().any(|ids| ids.contains(id));
        }
        types
            .iter()
            .any(|t| self.ids.get(t).is_some_and(|ids| ids.contains(id)))
    }

    pub fn ids_for(&self, types: &[String]) -> Vec<String> {
        let mut ids: BTreeSet<&String> = BTreeSet::new();
        for (element, declared) in &self.ids {
            if types.is_empty() || types.contains(element) {
                ids.extend(declared);
            }
        }
        ids.into_iter().cloned().collect()
    }
}

/// Simple type used for variable formatting and type checks
fn expected_type(decl: &AttributeDecl) -> Option<&str> {
    matches!(decl.data_type.as_str(), "int" | "long" | "short" | "boolean").then_some(decl.data_type.as_str())
}

/// Tokens of a reference list with their byte offsets
fn reference_tokens(value: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in value.char_indices() {
        if c == ',' || c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push((s, &value[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push((s, &value[s..]));
    }
    tokens
}

/// Per-element and per-attribute rules for the top-level document
struct RuleChecker<'a, 'r> {
    services: Collaborators<'a>,
    arena: &'r ContextArena,
    variables: &'r VariableSet,
    document: &'r ConfigDocument,
    top: ContextId,
    index: &'r IdIndex,
    enabled: &'r [String],
    sink: &'r mut dyn DiagnosticSink,
}

impl<'a, 'r> RuleChecker<'a, 'r> {
    fn warn(&mut self, element: ElementId, attribute: Option<&str>, message: String, fix: QuickFixDescriptor) {
        self.emit(Severity::Warning, element, attribute, message, fix);
    }

    fn emit(
        &mut self,
        severity: Severity,
        element: ElementId,
        attribute: Option<&str>,
        message: String,
        fix: QuickFixDescriptor,
    ) {
        let anchor = self.arena.anchor(self.top, element, attribute);
        self.sink.report(Diagnostic::new(severity, message, anchor, fix));
    }

    fn uri(&self) -> Option<&'r Path> {
        self.arena.get(self.top).uri()
    }

    fn check_duplicate_ids(&mut self) {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let document = self.document;
        for id in document.descendants() {
            let element = document.element(id);
            let Some(value) = element.attribute_value("id") else {
                continue;
            };
            if !seen.insert((element.name.as_str(), value)) {
                self.warn(
                    id,
                    Some("id"),
                    messages::duplicate_id(value, &element.name),
                    QuickFixDescriptor::none(),
                );
            }
        }
    }

    fn check_element(&mut self, root: ElementId, root_decl: &'a ElementDecl, is_root: bool) {
        let schema = self.services.schema;
        let document = self.document;
        let mut pending: Vec<(ElementId, &'a ElementDecl, bool)> = vec![(root, root_decl, is_root)];
        while let Some((id, decl, at_root)) = pending.pop() {
            let element = document.element(id);
            for attribute in &element.attributes {
                self.check_attribute(id, element, decl, attribute);
            }
            if decl.name == FEATURE && document.parent(id).is_some_and(|p| document.element(p).name == FEATURE_MANAGER) {
                self.check_feature(id, element);
            }
            for child in document.children(id).collect::<Vec<_>>().into_iter().rev() {
                let child_element = document.element(child);
                let Some(child_decl) = schema.element_declaration(decl, &child_element.name) else {
                    continue;
                };
                if at_root {
                    self.check_availability(child, child_decl);
                }
                pending.push((child, child_decl, false));
            }
        }
    }

    fn check_availability(&mut self, id: ElementId, decl: &ElementDecl) {
        if decl.enabling_features.is_empty() {
            return;
        }
        let features = self.services.features;
        let available = decl
            .enabling_features
            .iter()
            .any(|f| features.enables(self.enabled, family_of(f)));
        if available {
            return;
        }
        self.warn(
            id,
            None,
            messages::unavailable_element(&decl.name, &decl.enabling_features),
            QuickFixDescriptor::new(QuickFixKind::UnavailableElement)
                .with_extension(CANDIDATE_FEATURES, decl.enabling_features.join(",")),
        );
    }

    fn check_feature(&mut self, id: ElementId, element: &Element) {
        let Some(token) = element.text().map(str::trim).filter(|t| !t.is_empty()) else {
            return;
        };
        let features = self.services.features;
        match features.canonical_name(token) {
            None => {
                let names = features.feature_names();
                let best = self
                    .services
                    .matcher
                    .best_match(token, names.iter().map(String::as_str), &[]);
                self.warn(
                    id,
                    None,
                    messages::unrecognized_feature(token),
                    QuickFixDescriptor::new(QuickFixKind::UnrecognizedFeature).with_best_match(best),
                );
            }
            Some(canonical) => {
                if let Some(replacement) = features.superseded_by(&canonical) {
                    self.emit(
                        Severity::Info,
                        id,
                        None,
                        messages::superseded_feature(token, &replacement),
                        QuickFixDescriptor::new(QuickFixKind::SupersededFeature)
                            .with_best_match(Some(replacement)),
                    );
                }
            }
        }
    }

    fn check_attribute(&mut self, id: ElementId, element: &Element, decl: &ElementDecl, attribute: &Attribute) {
        let name = attribute.name.as_str();
        if name.starts_with("xmlns") || name.contains(':') {
            return;
        }
        let Some(attr_decl) = self.services.schema.attribute_declaration(decl, name) else {
            self.unknown_attribute(id, element, decl, name);
            return;
        };

        let mut overlay = VariableOverlay::new(self.variables);
        for other in &element.attributes {
            if other.name != attribute.name && !other.value.contains("${") {
                overlay = overlay.with(other.name.clone(), other.value.clone());
            }
        }
        let expected = expected_type(attr_decl);
        let info = resolve(&overlay, &attribute.value, expected);

        if attr_decl.required && info.fully_resolved && info.resolved.trim().is_empty() {
            self.warn(
                id,
                Some(name),
                messages::required_attribute_empty(name, &element.name),
                QuickFixDescriptor::none(),
            );
        }
        if attr_decl.is_password() && !attribute.value.is_empty() && !info.has_references {
            self.check_password(id, attr_decl, attribute);
        }
        if attr_decl.is_reference() {
            self.check_references(id, element, attr_decl, attribute, &overlay);
        }
        self.check_variables(id, name, &info, &overlay, expected);

        if !info.fully_resolved {
            return;
        }
        if attr_decl.is_duration() {
            if !info.resolved.trim().is_empty() && !is_valid_duration(&info.resolved) {
                self.warn(
                    id,
                    Some(name),
                    messages::invalid_duration(&info.resolved, name),
                    QuickFixDescriptor::none(),
                );
            }
        } else if !attr_decl.is_reference()
            && let Err(details) = self.services.schema.validate_literal(attr_decl, &info.resolved)
        {
            self.warn(
                id,
                Some(name),
                messages::invalid_value(&info.resolved, name, &details),
                QuickFixDescriptor::none(),
            );
        }
    }

    fn unknown_attribute(&mut self, id: ElementId, element: &Element, decl: &ElementDecl, name: &str) {
        if self
            .uri()
            .is_some_and(|uri| self.services.filter.is_ignore_attribute(uri, &element.name, name))
        {
            return;
        }
        let best = self.services.matcher.best_match(
            name,
            decl.attributes.iter().map(|a| a.name.as_str()),
            &[name],
        );
        let severity = if decl.extra_properties && best.is_none() {
            Severity::Info
        } else {
            Severity::Warning
        };
        self.emit(
            severity,
            id,
            Some(name),
            messages::unrecognized_attribute(name, &element.name),
            QuickFixDescriptor::new(QuickFixKind::UnrecognizedProperty).with_best_match(best),
        );
    }

    fn check_password(&mut self, id: ElementId, decl: &AttributeDecl, attribute: &Attribute) {
        let name = attribute.name.as_str();
        let hash_allowed = decl.data_type == PASSWORD_HASH_TYPE;
        let (message, kind) = match self.services.passwords.check(&attribute.value, hash_allowed) {
            PasswordStatus::Acceptable => return,
            PasswordStatus::PlainText => (messages::plain_text_password(name), QuickFixKind::PlainTextPassword),
            PasswordStatus::UnsupportedAes => (messages::unsupported_aes(name), QuickFixKind::None),
            PasswordStatus::UnsupportedHash => (messages::unsupported_hash(name), QuickFixKind::None),
            PasswordStatus::UnsupportedCustom { algorithm } => {
                (messages::unsupported_custom(name, &algorithm), QuickFixKind::None)
            }
        };
        self.warn(id, Some(name), message, QuickFixDescriptor::new(kind));
    }

    fn check_references(
        &mut self,
        id: ElementId,
        element: &Element,
        decl: &AttributeDecl,
        attribute: &Attribute,
        variables: &dyn VariableAuthority,
    ) {
        let name = attribute.name.as_str();
        let value = attribute.value.as_str();
        let mut seen: HashSet<&str> = HashSet::new();

        for (offset, token) in reference_tokens(value) {
            if token.contains("${") {
                let expanded = resolve(variables, token, None);
                if !expanded.fully_resolved {
                    continue;
                }
                let variable = token.trim_start_matches("${").trim_end_matches('}').trim();
                for (_, target) in reference_tokens(&expanded.resolved) {
                    if !self.index.contains(&decl.references, target) {
                        self.warn(
                            id,
                            Some(name),
                            messages::undefined_expanded_reference(target, name, variable),
                            QuickFixDescriptor::none(),
                        );
                    }
                }
                continue;
            }
            if !seen.insert(token) {
                self.warn(
                    id,
                    Some(name),
                    messages::duplicate_reference(token, name),
                    QuickFixDescriptor::none(),
                );
                continue;
            }
            if !self.index.contains(&decl.references, token) {
                let candidates = self.index.ids_for(&decl.references);
                let best = self
                    .services
                    .matcher
                    .best_match(token, candidates.iter().map(String::as_str), &[]);
                self.warn(
                    id,
                    Some(name),
                    messages::undefined_reference(token, name),
                    QuickFixDescriptor::new(QuickFixKind::FactoryIdNotFound)
                        .with_best_match(best)
                        .with_reference(token, value[..offset].chars().count()),
                );
            }
        }

        if decl.is_singleton_reference()
            && !value.trim().is_empty()
            && let Some(nested) = decl.nested_element_name()
            && self.document.children_named(id, nested).next().is_some()
        {
            self.warn(
                id,
                Some(name),
                messages::reference_and_nested(name, nested, &element.name),
                QuickFixDescriptor::none(),
            );
        }
    }

    fn check_variables(
        &mut self,
        id: ElementId,
        name: &str,
        info: &ResolvedValueInfo,
        variables: &dyn VariableAuthority,
        expected: Option<&str>,
    ) {
        if info.undefined.is_empty() && info.operand_errors.is_empty() && info.type_mismatch.is_none() {
            return;
        }
        let candidates = variables.names_for_type(expected);
        let matcher = self.services.matcher;
        let suggest = |reference: &str| matcher.best_match(reference, candidates.iter().map(String::as_str), &[]);

        for undefined in &info.undefined {
            self.warn(
                id,
                Some(name),
                messages::undefined_variable(&undefined.name),
                QuickFixDescriptor::new(QuickFixKind::UndefinedVariable)
                    .with_best_match(suggest(&undefined.name))
                    .with_reference(undefined.name.clone(), undefined.offset),
            );
        }
        for operand in &info.operand_errors {
            let (message, fix) = match operand.kind {
                OperandErrorKind::Missing => (
                    messages::missing_operand(operand.side),
                    QuickFixDescriptor::none(),
                ),
                OperandErrorKind::Undefined => (
                    messages::undefined_operand(operand.side, &operand.operand),
                    QuickFixDescriptor::new(QuickFixKind::UndefinedVariable)
                        .with_best_match(suggest(&operand.operand)),
                ),
                OperandErrorKind::Invalid => (
                    messages::invalid_operand(operand.side, &operand.operand),
                    QuickFixDescriptor::none(),
                ),
            };
            self.warn(
                id,
                Some(name),
                message,
                fix.with_reference(operand.operand.clone(), operand.offset),
            );
        }
        if let Some(mismatch) = &info.type_mismatch {
            self.warn(
                id,
                Some(name),
                messages::type_mismatch(&mismatch.variable, &mismatch.expected, &mismatch.value),
                QuickFixDescriptor::none(),
            );
        }
    }
}
