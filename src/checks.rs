//! Whole-configuration checks
//!
//! These run once per validation, after every include and dropin has been
//! merged, because each of them needs the complete picture: which features
//! end up enabled, whether a default keystore exists anywhere, which HTTPS
//! ports are declared and which applications are configured.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::context::{ContextArena, ContextId};
use crate::diagnostic::{
    APP_SECURITY_ENABLED, Anchor, Diagnostic, DiagnosticSink, MODULE_NAME, QuickFixDescriptor,
    QuickFixKind, Severity,
};
use crate::document::ElementId;
use crate::features::{
    APP_SECURITY_CAPABILITY, EJB_REMOTE_CAPABILITY, FeatureAuthority, FeatureConflict,
    SSL_CAPABILITY,
};
use crate::merge::{FEATURE, FEATURE_MANAGER, MergeNodeId, MergeTree};
use crate::messages;
use crate::server::ModuleSyncIssue;
use crate::validator::Collaborators;

pub const DEFAULT_SSL_CONFIG: &str = "defaultSSLConfig";
pub const DEFAULT_KEY_STORE: &str = "defaultKeyStore";
const DEFAULT_SECURE_PORT: &str = "9443";

/// Canonical names of the features enabled by the merged configuration
pub fn enabled_features(tree: &MergeTree, features: &dyn FeatureAuthority) -> Vec<String> {
    let mut enabled: Vec<String> = Vec::new();
    for manager in tree.children_named(tree.root(), FEATURE_MANAGER) {
        for feature in tree.children_named(manager, FEATURE) {
            let Some(token) = tree.node(feature).text.as_deref() else {
                continue;
            };
            if let Some(canonical) = features.canonical_name(token)
                && !enabled.contains(&canonical)
            {
                enabled.push(canonical);
            }
        }
    }
    enabled
}

/// Run every whole-configuration check against the merged tree of `top`
pub fn run_all(
    services: Collaborators<'_>,
    arena: &ContextArena,
    tree: &MergeTree,
    top: ContextId,
    sink: &mut dyn DiagnosticSink,
) {
    let enabled = enabled_features(tree, services.features);
    let mut checks = CheckContext {
        services,
        arena,
        tree,
        top,
        enabled,
        sink,
    };
    checks.feature_conflicts();
    checks.keystore();
    checks.secure_port();
    checks.module_sync();
}

struct CheckContext<'a, 'r> {
    services: Collaborators<'a>,
    arena: &'r ContextArena,
    tree: &'r MergeTree,
    top: ContextId,
    enabled: Vec<String>,
    sink: &'r mut dyn DiagnosticSink,
}

impl CheckContext<'_, '_> {
    fn report(&mut self, severity: Severity, message: String, anchor: Anchor, fix: QuickFixDescriptor) {
        self.sink.report(Diagnostic::new(severity, message, anchor, fix));
    }

    fn root_anchor(&self) -> Anchor {
        let root = self.arena.document(self.top).root();
        self.arena.anchor(self.top, root, None)
    }

    fn node_anchor(&self, node: MergeNodeId, attribute: Option<&str>) -> Anchor {
        let node = self.tree.node(node);
        self.arena.user_anchor(node.context, node.source, attribute)
    }

    /// First declaration of each canonical feature name across every
    /// document reached by this run
    fn feature_declarations(&self) -> BTreeMap<String, (ContextId, ElementId)> {
        let features = self.services.features;
        let mut declared = BTreeMap::new();
        for ctx in self.arena.ids() {
            let document = self.arena.document(ctx);
            for manager in document.children_named(document.root(), FEATURE_MANAGER) {
                for feature in document.children_named(manager, FEATURE) {
                    let Some(canonical) = document
                        .element(feature)
                        .text()
                        .and_then(|token| features.canonical_name(token))
                    else {
                        continue;
                    };
                    declared.entry(canonical).or_insert((ctx, feature));
                }
            }
        }
        declared
    }

    /// Conflicts are reported once, by the validation whose top-level
    /// document is the lowest common ancestor of both declaring files
    fn feature_conflicts(&mut self) {
        let runtime = self.services.server.and_then(|s| s.runtime.as_ref());
        let conflicts = self.services.features.conflicts(&self.enabled, runtime);
        if conflicts.is_empty() {
            return;
        }
        let declarations = self.feature_declarations();
        let mut reported: BTreeSet<(String, String, String)> = BTreeSet::new();

        for conflict in conflicts {
            let key = (
                conflict.family.clone(),
                conflict.first_root().to_string(),
                conflict.second_root().to_string(),
            );
            if reported.contains(&key) {
                continue;
            }
            let first = declarations.get(conflict.first_root()).copied();
            let second = declarations.get(conflict.second_root()).copied();
            let anchor = match (first, second) {
                (Some((a, element)), Some((b, _))) => {
                    let ancestor = self.arena.lowest_common_ancestor(a, b);
                    if !self.arena.is_top_level(ancestor) {
                        debug!(family = %conflict.family, "conflict belongs to another top-level document");
                        continue;
                    }
                    self.arena.user_anchor(a, element, None)
                }
                (Some((ctx, element)), None) | (None, Some((ctx, element))) => {
                    self.arena.user_anchor(ctx, element, None)
                }
                (None, None) => self.root_anchor(),
            };
            self.report_conflict(&conflict, anchor);
            reported.insert(key);
        }
    }

    fn report_conflict(&mut self, conflict: &FeatureConflict, anchor: Anchor) {
        self.report(
            Severity::Error,
            messages::feature_conflict(&conflict.family, &conflict.first, &conflict.second),
            anchor,
            QuickFixDescriptor::none(),
        );
    }

    fn keystore_applies(&self) -> bool {
        let Some(server) = self.services.server else {
            return true;
        };
        self.arena
            .get(self.top)
            .uri()
            .is_none_or(|uri| server.is_root_config(uri))
    }

    fn keystore(&mut self) {
        if !self.keystore_applies() {
            return;
        }
        let features = self.services.features;
        let ejb_remote = features.enables(&self.enabled, EJB_REMOTE_CAPABILITY);
        if !ejb_remote && !features.enables(&self.enabled, SSL_CAPABILITY) {
            return;
        }
        let tree = self.tree;
        let root = tree.root();

        let custom_ssl = tree
            .children_named(root, "sslDefault")
            .filter_map(|id| tree.node(id).attribute_value("sslRef"))
            .any(|reference| reference != DEFAULT_SSL_CONFIG);
        let custom_key_store = tree
            .children_named(root, "ssl")
            .map(|id| tree.node(id))
            .filter(|ssl| ssl.attribute_value("id") == Some(DEFAULT_SSL_CONFIG))
            .filter_map(|ssl| ssl.attribute_value("keyStoreRef"))
            .any(|reference| reference != DEFAULT_KEY_STORE);
        if custom_ssl || custom_key_store {
            return;
        }

        let has_default = tree
            .children_named(root, "keyStore")
            .map(|id| tree.node(id))
            .filter(|store| store.attribute_value("id") == Some(DEFAULT_KEY_STORE))
            .any(|store| store.attribute_value("password").is_some_and(|p| !p.trim().is_empty()));
        if has_default {
            return;
        }

        let app_security = features.enables(&self.enabled, APP_SECURITY_CAPABILITY);
        let (severity, message) = if app_security {
            (Severity::Error, messages::missing_keystore_and_user_registry())
        } else if ejb_remote {
            (Severity::Error, messages::missing_keystore_for_remote_ejb())
        } else {
            (Severity::Warning, messages::missing_keystore())
        };
        let anchor = match tree.children_named(root, FEATURE_MANAGER).next() {
            Some(manager) => self.node_anchor(manager, None),
            None => self.root_anchor(),
        };
        self.report(
            severity,
            message,
            anchor,
            QuickFixDescriptor::new(QuickFixKind::SslNoKeystore)
                .with_extension(APP_SECURITY_ENABLED, app_security.to_string()),
        );
    }

    fn secure_port(&mut self) {
        let Some(server) = self.services.server else {
            return;
        };
        let Some(port) = server.secure_port else {
            return;
        };
        if server.is_local() {
            return;
        }
        let tree = self.tree;
        let endpoints: Vec<(MergeNodeId, &str)> = tree
            .children_named(tree.root(), "httpEndpoint")
            .filter_map(|id| tree.node(id).attribute_value("httpsPort").map(|p| (id, p.trim())))
            .collect();
        if endpoints
            .iter()
            .any(|(_, declared)| declared.parse::<u16>() == Ok(port))
        {
            return;
        }

        let declared: Vec<String> = endpoints.iter().map(|(_, p)| p.to_string()).collect();
        let (anchor, best) = match endpoints.first() {
            Some((id, first)) => (self.node_anchor(*id, Some("httpsPort")), first.to_string()),
            None => (self.root_anchor(), DEFAULT_SECURE_PORT.to_string()),
        };
        self.report(
            Severity::Error,
            messages::secure_port_mismatch(port, &declared),
            anchor,
            QuickFixDescriptor::new(QuickFixKind::RemoteServerSecurePortMismatch)
                .with_best_match(Some(best)),
        );
    }

    fn module_sync(&mut self) {
        let Some(behaviour) = self.services.behaviour else {
            return;
        };
        for issue in behaviour.out_of_sync(self.tree) {
            let (anchor, message, kind) = match &issue {
                ModuleSyncIssue::MissingApplication { module } => (
                    self.root_anchor(),
                    messages::application_missing(module),
                    QuickFixKind::OutOfSyncApp,
                ),
                ModuleSyncIssue::SharedLibRefMismatch {
                    module,
                    application,
                    missing,
                } => (
                    self.node_anchor(*application, None),
                    messages::shared_library_mismatch(module, missing),
                    QuickFixKind::OutOfSyncSharedLibRefMismatch,
                ),
            };
            self.report(
                Severity::Warning,
                message,
                anchor,
                QuickFixDescriptor::new(kind).with_extension(MODULE_NAME, issue.module()),
            );
        }
    }
}
