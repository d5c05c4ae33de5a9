//! Diagnostics and quick-fix metadata
//!
//! Every problem found by the merge engine or the rule engine becomes a
//! [`Diagnostic`] carrying a [`QuickFixDescriptor`]. The descriptor fields are
//! a stable contract for tools that apply fixes, so the fix kind is exposed both
//! by name and by ordinal.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::document::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Kind of automated correction a diagnostic supports
///
/// Ordinals are persisted by consumers; append new kinds at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QuickFixKind {
    None = 0,
    UnrecognizedElement = 1,
    UnrecognizedProperty = 2,
    UndefinedVariable = 3,
    PlainTextPassword = 4,
    FactoryIdNotFound = 5,
    UnavailableElement = 6,
    SslNoKeystore = 7,
    OutOfSyncApp = 8,
    OutOfSyncSharedLibRefMismatch = 9,
    SupersededFeature = 10,
    UnrecognizedFeature = 11,
    RemoteServerSecurePortMismatch = 12,
    IncludeNotFound = 13,
}

impl QuickFixKind {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Extension attribute set on keystore diagnostics when application security is enabled
pub const APP_SECURITY_ENABLED: &str = "appSecurityEnabled";
/// Extension attribute listing the features that would make an element available
pub const CANDIDATE_FEATURES: &str = "candidateFeatures";
/// Extension attribute naming the module of an out-of-sync diagnostic
pub const MODULE_NAME: &str = "moduleName";

/// Structured quick-fix payload attached to every diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFixDescriptor {
    pub kind: QuickFixKind,
    /// Suggested replacement; several equally good candidates are comma-joined
    pub best_match: Option<String>,
    /// Name of the anchoring element, used to re-locate the anchor
    pub element: Option<String>,
    /// Name of the anchoring attribute, if any
    pub attribute: Option<String>,
    /// Undefined variable or id referenced by the value
    pub reference: Option<String>,
    /// Character offset of `reference` within the attribute value
    pub offset: Option<usize>,
    pub extensions: BTreeMap<String, String>,
}

impl QuickFixDescriptor {
    pub fn new(kind: QuickFixKind) -> Self {
        Self {
            kind,
            best_match: None,
            element: None,
            attribute: None,
            reference: None,
            offset: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn none() -> Self {
        Self::new(QuickFixKind::None)
    }

    pub fn with_best_match(mut self, best_match: Option<String>) -> Self {
        self.best_match = best_match;
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, offset: usize) -> Self {
        self.reference = Some(name.into());
        self.offset = Some(offset);
        self
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }
}

/// Where a diagnostic points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// File the anchoring node lives in; absent for detached documents
    pub uri: Option<PathBuf>,
    /// XPath-like locator of the anchoring element
    pub locator: String,
    pub element: String,
    pub attribute: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub anchor: Anchor,
    pub fix: QuickFixDescriptor,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        anchor: Anchor,
        fix: QuickFixDescriptor,
    ) -> Self {
        let mut fix = fix;
        if fix.element.is_none() {
            fix.element = Some(anchor.element.clone());
        }
        if fix.attribute.is_none() {
            fix.attribute = anchor.attribute.clone();
        }
        Self {
            message: message.into(),
            severity,
            anchor,
            fix,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self
            .anchor
            .uri
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());
        write!(
            f,
            "{} {}:{}:{} {}",
            self.severity, location, self.anchor.span.line, self.anchor.span.column, self.message
        )
    }
}

/// Receiver of diagnostics; persistence and display are the sink's business
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Sink that keeps diagnostics in emission order
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn with_kind(&self, kind: QuickFixKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.fix.kind == kind)
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Sink whose clones all append to the same list
///
/// The reporting side can live on a worker thread while the owner keeps a
/// handle, so whatever was reported survives a worker that panics or is
/// abandoned.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far; the sink stays usable
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticSink for SharedSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
