use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use validate_server_xml::config::EnvProvider;
use validate_server_xml::server::ModuleSyncIssue;
use validate_server_xml::{
    ConfigDocument, Diagnostic, DiagnosticSink, DocumentProvider, MergeTree, PublishedModule,
    QuickFixKind, ServerBehaviour, Severity, SourceDocument, Workspace,
};

/// Sink that can be cloned into a run and inspected afterwards
#[derive(Clone, Default)]
pub struct RecordingSink {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.diagnostics()
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn with_kind(&self, kind: QuickFixKind) -> Vec<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .filter(|d| d.fix.kind == kind)
            .collect()
    }

    pub fn containing(&self, needle: &str) -> Vec<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .filter(|d| d.message.contains(needle))
            .collect()
    }

    pub fn clear(&self) {
        self.diagnostics.lock().unwrap().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }
}

/// Workspace wrapper counting how often each capability is consulted
#[derive(Default)]
pub struct CountingWorkspace {
    inner: Workspace,
    known_lookups: AtomicUsize,
    model_lookups: AtomicUsize,
}

impl CountingWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_known_config(&self, uri: &Path, content: &str) {
        self.inner
            .add_known_config(uri, ConfigDocument::parse(content).unwrap());
    }

    pub fn open_editor(&self, uri: &Path, content: &str) {
        self.inner.open_editor(uri, content).unwrap();
    }

    /// Outstanding read leases on the editor model for `uri`
    pub fn readers(&self, uri: &Path) -> usize {
        self.inner.readers(uri)
    }

    pub fn known_lookups(&self) -> usize {
        self.known_lookups.load(Ordering::SeqCst)
    }

    pub fn model_lookups(&self) -> usize {
        self.model_lookups.load(Ordering::SeqCst)
    }
}

impl DocumentProvider for CountingWorkspace {
    fn known_config(&self, uri: &Path) -> Option<Arc<ConfigDocument>> {
        self.known_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.known_config(uri)
    }

    fn open_model(&self, uri: &Path) -> Option<SourceDocument> {
        self.model_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.open_model(uri)
    }
}

/// Server with a fixed module list that records every sync check
pub struct MockServerBehaviour {
    modules: Vec<PublishedModule>,
    checks: AtomicUsize,
}

impl MockServerBehaviour {
    pub fn new(modules: Vec<PublishedModule>) -> Self {
        Self {
            modules,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn module(name: &str, shared_libraries: &[&str]) -> PublishedModule {
        PublishedModule {
            name: name.to_string(),
            external: false,
            shared_libraries: shared_libraries.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn external(name: &str) -> PublishedModule {
        PublishedModule {
            name: name.to_string(),
            external: true,
            shared_libraries: Vec::new(),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl ServerBehaviour for MockServerBehaviour {
    fn published_modules(&self) -> &[PublishedModule] {
        &self.modules
    }

    fn sync_issue(&self, module: &PublishedModule, config: &MergeTree) -> Option<ModuleSyncIssue> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        validate_server_xml::DeployedModules::new(vec![module.clone()])
            .out_of_sync(config)
            .into_iter()
            .next()
    }
}

/// Environment provider backed by a map
#[derive(Default)]
pub struct MockEnvProvider {
    vars: HashMap<String, String>,
}

impl MockEnvProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl EnvProvider for MockEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}
