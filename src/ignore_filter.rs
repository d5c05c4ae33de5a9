//! User-maintained suppression rules for unrecognized attributes and elements
//!
//! Rules live in a JSON store next to the validated configuration tree. Any
//! field may be the wildcard `*`; file paths may also be glob patterns.

use std::fmt;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FilterError, FilterResult};

pub const WILDCARD: &str = "*";

/// Default file name of the filter store
pub const DEFAULT_STORE_NAME: &str = ".validation-filters.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatternKind {
    UnrecognizedAttribute,
    UnrecognizedElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub path: String,
    pub element: String,
    #[serde(default = "wildcard")]
    pub attribute: String,
    pub kind: PatternKind,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

impl FilterRule {
    pub fn attribute(
        path: impl Into<String>,
        element: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            element: element.into(),
            attribute: attribute.into(),
            kind: PatternKind::UnrecognizedAttribute,
        }
    }

    pub fn element(path: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            element: element.into(),
            attribute: wildcard(),
            kind: PatternKind::UnrecognizedElement,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FilterStore {
    #[serde(default)]
    rules: Vec<FilterRule>,
}

struct CompiledRule {
    rule: FilterRule,
    paths: Option<GlobSet>,
}

impl CompiledRule {
    fn compile(rule: FilterRule) -> FilterResult<Self> {
        let paths = if rule.path == WILDCARD || !has_glob_syntax(&rule.path) {
            None
        } else {
            let invalid = |e: globset::Error| FilterError::InvalidPattern {
                pattern: rule.path.clone(),
                details: e.to_string(),
            };
            let mut builder = GlobSetBuilder::new();
            builder.add(Glob::new(&rule.path).map_err(invalid)?);
            if Path::new(&rule.path).is_relative() && !rule.path.starts_with("**") {
                builder.add(Glob::new(&format!("**/{}", rule.path)).map_err(invalid)?);
            }
            Some(builder.build().map_err(invalid)?)
        };
        Ok(Self { rule, paths })
    }

    fn matches_path(&self, resource: &Path) -> bool {
        if self.rule.path == WILDCARD {
            return true;
        }
        match &self.paths {
            Some(globs) => globs.is_match(resource),
            None => {
                let rule_path = Path::new(&self.rule.path);
                resource == rule_path || resource.ends_with(rule_path)
            }
        }
    }

    fn matches(&self, resource: &Path, element: &str, attribute: &str, kind: PatternKind) -> bool {
        self.rule.kind == kind
            && field_matches(&self.rule.element, element)
            && field_matches(&self.rule.attribute, attribute)
            && self.matches_path(resource)
    }
}

fn has_glob_syntax(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn field_matches(rule: &str, value: &str) -> bool {
    rule == WILDCARD || rule == value
}

type RefreshListener = Box<dyn Fn(&Path) + Send + Sync>;

/// Ignore-filter matcher backed by an optional JSON store
#[derive(Default)]
pub struct IgnoreFilter {
    store: Option<PathBuf>,
    rules: Vec<CompiledRule>,
    listeners: Vec<RefreshListener>,
}

impl fmt::Debug for IgnoreFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreFilter")
            .field("store", &self.store)
            .field("rules", &self.rules().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl IgnoreFilter {
    /// In-memory filter that never persists
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from `store`; a missing store yields an empty filter bound to that path
    pub fn load(store: &Path) -> FilterResult<Self> {
        let rules = if store.exists() {
            let content = std::fs::read_to_string(store).map_err(|source| FilterError::Io {
                path: store.to_path_buf(),
                source,
            })?;
            let parsed: FilterStore =
                serde_json::from_str(&content).map_err(|source| FilterError::Corrupt {
                    path: store.to_path_buf(),
                    source,
                })?;
            parsed
                .rules
                .into_iter()
                .map(CompiledRule::compile)
                .collect::<FilterResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        debug!(store = %store.display(), rules = rules.len(), "loaded ignore filters");
        Ok(Self {
            store: Some(store.to_path_buf()),
            rules,
            listeners: Vec::new(),
        })
    }

    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Register a callback invoked with the affected resource whenever rules change
    pub fn on_refresh<F>(&mut self, listener: F)
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn is_ignore_attribute(&self, resource: &Path, element: &str, attribute: &str) -> bool {
        self.rules.iter().any(|rule| {
            rule.matches(resource, element, attribute, PatternKind::UnrecognizedAttribute)
        })
    }

    pub fn is_ignore_element(&self, resource: &Path, element: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(resource, element, WILDCARD, PatternKind::UnrecognizedElement))
    }

    pub fn add_rule(&mut self, rule: FilterRule) -> FilterResult<()> {
        if self.rules().any(|existing| *existing == rule) {
            return Ok(());
        }
        let affected = PathBuf::from(&rule.path);
        self.rules.push(CompiledRule::compile(rule)?);
        self.persist()?;
        self.notify(&affected);
        Ok(())
    }

    /// Remove a rule; returns whether it was present
    pub fn remove_rule(&mut self, rule: &FilterRule) -> FilterResult<bool> {
        let before = self.rules.len();
        self.rules.retain(|compiled| compiled.rule != *rule);
        if self.rules.len() == before {
            return Ok(false);
        }
        self.persist()?;
        self.notify(Path::new(&rule.path));
        Ok(true)
    }

    fn persist(&self) -> FilterResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = FilterStore {
            rules: self.rules().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&snapshot).map_err(|source| {
            FilterError::Corrupt {
                path: store.clone(),
                source,
            }
        })?;
        std::fs::write(store, content).map_err(|source| FilterError::Io {
            path: store.clone(),
            source,
        })
    }

    fn notify(&self, resource: &Path) {
        for listener in &self.listeners {
            listener(resource);
        }
    }
}
