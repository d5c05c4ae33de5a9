use std::path::PathBuf;
use std::sync::Arc;

use validate_server_xml::{DocumentProvider, QuickFixKind, Severity, ValidationError};

use crate::common::mocks::CountingWorkspace;
use crate::common::test_helpers::*;

#[test]
fn test_dropins_apply_in_alphabetical_order() {
    let layout = ServerLayout::new("<server/>");
    layout.dropin("overrides", "b.xml", r#"<server><executor coreThreads="2"/></server>"#);
    layout.dropin("overrides", "a.xml", r#"<server><executor coreThreads="1"/></server>"#);
    layout.dropin("overrides", "notes.txt", r#"<server><executor coreThreads="9"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(run.documents, 3);
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("2"));
    assert_eq!(sink.containing("overridden with").len(), 1);
}

#[test]
fn test_dropins_only_apply_to_the_root_configuration() {
    let layout = ServerLayout::new("<server/>");
    let other = layout.write("other.xml", r#"<server><executor coreThreads="1"/></server>"#);
    layout.dropin("overrides", "late.xml", r#"<server><executor coreThreads="5"/></server>"#);

    let (run, _) = validate_file(&layout.services(), &other);
    assert_eq!(run.documents, 1);
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("1"));
}

#[test]
fn test_missing_required_include_is_an_error() {
    let layout = ServerLayout::new(
        r#"<server>
    <include location="nowhere.xml"/>
</server>"#,
    );
    let (_, sink) = validate_file(&layout.services(), &layout.server_xml());
    let missing = sink.with_kind(QuickFixKind::IncludeNotFound);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Error);
    assert_eq!(missing[0].anchor.attribute.as_deref(), Some("location"));
    assert_eq!(missing[0].anchor.span.line, 2);
    assert!(missing[0].message.contains("nowhere.xml"));
}

#[test]
fn test_missing_optional_include_is_informational() {
    let layout = ServerLayout::new(r#"<server><include location="nowhere.xml" optional="true"/></server>"#);
    let (_, sink) = validate_file(&layout.services(), &layout.server_xml());
    let missing = sink.with_kind(QuickFixKind::IncludeNotFound);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Info);
    assert_eq!(sink.count(Severity::Error), 0);
}

#[test]
fn test_nested_missing_include_is_not_reported() {
    let layout = ServerLayout::new(r#"<server><include location="middle.xml"/></server>"#);
    layout.write("middle.xml", r#"<server><include location="nowhere.xml"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(run.documents, 2);
    assert!(sink.with_kind(QuickFixKind::IncludeNotFound).is_empty());
}

#[test]
fn test_include_location_resolves_variables_and_shared_config() {
    let layout = ServerLayout::new(
        r#"<server>
    <variable name="fragment" value="db"/>
    <include location="${fragment}.xml"/>
    <include location="common.xml"/>
</server>"#,
    );
    layout.write("db.xml", r#"<server><executor coreThreads="3"/></server>"#);
    layout.shared("common.xml", r#"<server><httpSession cookieName="SHARED"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(run.documents, 3);
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("3"));
    assert_eq!(merged_attribute(&run, &["httpSession"], "cookieName").as_deref(), Some("SHARED"));
    assert!(sink.with_kind(QuickFixKind::IncludeNotFound).is_empty());
}

#[test]
fn test_variables_from_includes_are_visible_afterwards() {
    let layout = ServerLayout::new(
        r#"<server>
    <include location="vars.xml"/>
    <executor coreThreads="${threads}"/>
</server>"#,
    );
    layout.write("vars.xml", r#"<server><variable name="threads" value="8"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::UndefinedVariable).is_empty());
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("8"));
    assert_eq!(run.variables.entry("threads").map(|e| e.value.as_str()), Some("8"));
}

#[test]
fn test_unknown_elements_in_includes_are_not_reported() {
    let layout = ServerLayout::new(r#"<server><include location="extra.xml"/></server>"#);
    layout.write("extra.xml", r#"<server><mystery/></server>"#);

    let (_, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::UnrecognizedElement).is_empty());
}

#[test]
fn test_runaway_include_chain_aborts_the_run() {
    let layout = ServerLayout::new(r#"<server><include location="level0.xml"/></server>"#);
    for level in 0..70 {
        layout.write(
            &format!("level{level}.xml"),
            &format!(r#"<server><include location="level{}.xml"/></server>"#, level + 1),
        );
    }

    let (run, _) = try_validate_file(&layout.services(), &layout.server_xml());
    assert!(matches!(run, Err(ValidationError::Internal { .. })));
}

#[test]
fn test_open_editor_model_wins_over_disk() {
    let layout = ServerLayout::new(r#"<server><include location="late.xml"/></server>"#);
    let late = layout.write("late.xml", r#"<server><executor coreThreads="1"/></server>"#);

    let workspace = Arc::new(CountingWorkspace::new());
    workspace.open_editor(&late, r#"<server><executor coreThreads="9"/></server>"#);
    let provider: Arc<dyn DocumentProvider> = workspace.clone();
    let services = layout.services().with_provider(provider);

    let (run, _) = validate_file(&services, &layout.server_xml());
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("9"));
    assert!(workspace.model_lookups() > 0);
    assert_eq!(workspace.readers(&late), 0);
}

#[test]
fn test_known_configuration_is_reused() {
    let layout = ServerLayout::new(r#"<server><executor coreThreads="1"/></server>"#);
    let workspace = Arc::new(CountingWorkspace::new());
    workspace.add_known_config(
        &layout.server_xml(),
        r#"<server><executor coreThreads="4"/></server>"#,
    );
    let provider: Arc<dyn DocumentProvider> = workspace.clone();
    let services = layout.services().with_provider(provider);

    let (run, _) = validate_file(&services, &layout.server_xml());
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("4"));
    assert!(workspace.known_lookups() > 0);
}

#[test]
fn test_duplicate_features_across_files_are_merged() {
    let layout = ServerLayout::new(
        r#"<server>
    <featureManager><feature>servlet-4.0</feature></featureManager>
    <include location="more.xml"/>
</server>"#,
    );
    layout.write(
        "more.xml",
        r#"<server><featureManager><feature>SERVLET-4.0</feature><feature>jsp-2.3</feature></featureManager></server>"#,
    );

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    let manager = run.tree.find(&["featureManager"]).unwrap();
    assert_eq!(run.tree.children_named(manager, "feature").count(), 2);
    assert_eq!(sink.containing("duplicates the value").len(), 1);
}

#[test]
fn test_id_keyed_elements_from_includes() {
    let layout = ServerLayout::new(
        r#"<server>
    <library id="shared" name="one"/>
    <include location="libs.xml"/>
</server>"#,
    );
    layout.write(
        "libs.xml",
        r#"<server><library id="shared" apiTypeVisibility="spec"/><library id="other"/></server>"#,
    );

    let (run, _) = validate_file(&layout.services(), &layout.server_xml());
    let root = run.tree.root();
    assert_eq!(run.tree.children_named(root, "library").count(), 2);
    assert_eq!(merged_attribute(&run, &["library"], "name").as_deref(), Some("one"));
    assert_eq!(
        merged_attribute(&run, &["library"], "apiTypeVisibility").as_deref(),
        Some("spec")
    );
}

#[cfg(unix)]
#[test]
fn test_relative_paths_may_climb_above_the_working_directory() {
    let layout = ServerLayout::new(
        r#"<server><include location="../../shared/config/db.xml"/></server>"#,
    );
    layout.shared("db.xml", r#"<server><executor coreThreads="2"/></server>"#);

    // from the working directory up to `/`, then down to the server
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.push(layout.server_xml().strip_prefix("/").unwrap());

    let (run, sink) = validate_file(&layout.services(), &relative);
    assert_eq!(run.documents, 2);
    assert!(sink.with_kind(QuickFixKind::IncludeNotFound).is_empty());
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("2"));
}
