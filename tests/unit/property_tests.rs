use validate_server_xml::{FuzzyMatcher, QuickFixKind, Severity, ValidatorServices};
use validate_server_xml::diagnostic::APP_SECURITY_ENABLED;

use crate::common::test_helpers::*;

const OVERRIDDEN: &str = "overridden with";
const ALREADY_INCLUDED: &str = "already included";
const DUPLICATE_VALUE: &str = "duplicates the value";

#[test]
fn test_validation_is_idempotent() {
    let layout = ServerLayout::new(
        r#"<server>
    <featureManager><feature>servlet-4.1</feature></featureManager>
    <logging maxFiles="2" maxFile="3"/>
    <include location="extra.xml"/>
    <include location="missing.xml"/>
</server>"#,
    );
    layout.write("extra.xml", r#"<server><logging maxFiles="4"/></server>"#);
    layout.dropin("overrides", "late.xml", r#"<server><logging maxFiles="6"/></server>"#);
    let services = layout.services();

    let (first_run, first) = validate_file(&services, &layout.server_xml());
    let (second_run, second) = validate_file(&services, &layout.server_xml());

    assert!(!first.diagnostics().is_empty());
    assert_eq!(first.diagnostics(), second.diagnostics());
    assert_eq!(first_run.documents, second_run.documents);
    assert_eq!(first_run.tree.len(), second_run.tree.len());
}

#[test]
fn test_include_cycle_through_top_level_terminates() {
    let layout = ServerLayout::new(
        r#"<server>
    <include location="a.xml"/>
</server>"#,
    );
    layout.write(
        "a.xml",
        r#"<server>
    <include location="server.xml"/>
    <logging maxFiles="2"/>
</server>"#,
    );

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(run.documents, 2);
    let repeated = sink.containing(ALREADY_INCLUDED);
    assert_eq!(repeated.len(), 1);
    assert_eq!(repeated[0].severity, Severity::Info);
    assert_eq!(merged_attribute(&run, &["logging"], "maxFiles").as_deref(), Some("2"));
}

#[test]
fn test_include_cycle_between_standalone_files() {
    let layout = ServerLayout::new("<server/>");
    let a = layout.write(
        "a.xml",
        r#"<server>
    <include location="b.xml"/>
</server>"#,
    );
    layout.write(
        "b.xml",
        r#"<server>
    <include location="a.xml"/>
    <executor coreThreads="4"/>
</server>"#,
    );

    let (run, sink) = validate_file(&layout.services(), &a);
    assert_eq!(run.documents, 2);
    let repeated = sink.containing(ALREADY_INCLUDED);
    assert_eq!(repeated.len(), 1);
    // reported against the include of a.xml that pulled b.xml in
    assert_eq!(repeated[0].anchor.uri.as_deref(), Some(a.as_path()));
    assert_eq!(repeated[0].anchor.attribute.as_deref(), Some("location"));
}

#[test]
fn test_merge_precedence_defaults_body_overrides() {
    let layout = ServerLayout::new(r#"<server><logging maxFiles="2"/></server>"#);
    layout.dropin("defaults", "base.xml", r#"<server><logging maxFiles="1"/></server>"#);
    layout.dropin("overrides", "final.xml", r#"<server><logging maxFiles="3"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(run.documents, 3);
    assert_eq!(merged_attribute(&run, &["logging"], "maxFiles").as_deref(), Some("3"));

    let overrides = sink.containing(OVERRIDDEN);
    assert_eq!(overrides.len(), 2);
    assert!(overrides.iter().all(|d| d.severity == Severity::Info));
    assert!(overrides[0].message.contains("'1' at base.xml"));
    assert!(overrides[0].message.contains("'2' at server.xml"));
    assert!(overrides[1].message.contains("'2' at server.xml"));
    assert!(overrides[1].message.contains("'3' at final.xml"));
}

#[test]
fn test_replace_keeps_only_the_last_version() {
    let layout = ServerLayout::new(
        r#"<server>
    <logging maxFiles="1" consoleLogLevel="INFO"/>
    <include location="late.xml" onConflict="replace"/>
</server>"#,
    );
    layout.write("late.xml", r#"<server><logging maxFileSize="20"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    let root = run.tree.root();
    assert_eq!(run.tree.children_named(root, "logging").count(), 1);
    assert_eq!(merged_attribute(&run, &["logging"], "maxFileSize").as_deref(), Some("20"));
    assert_eq!(merged_attribute(&run, &["logging"], "maxFiles"), None);
    assert_eq!(merged_attribute(&run, &["logging"], "consoleLogLevel"), None);
    assert_eq!(sink.containing("is replaced by").len(), 1);
}

#[test]
fn test_ignore_keeps_only_the_first_version() {
    let layout = ServerLayout::new(
        r#"<server>
    <logging maxFiles="1"/>
    <include location="late.xml" onConflict="IGNORE"/>
</server>"#,
    );
    layout.write("late.xml", r#"<server><logging maxFiles="7" maxFileSize="20"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(merged_attribute(&run, &["logging"], "maxFiles").as_deref(), Some("1"));
    assert_eq!(merged_attribute(&run, &["logging"], "maxFileSize"), None);
    assert!(sink.diagnostics().is_empty());
}

#[test]
fn test_default_merge_accumulates_attributes() {
    let layout = ServerLayout::new(
        r#"<server>
    <logging maxFiles="1" consoleLogLevel="INFO"/>
    <include location="late.xml"/>
</server>"#,
    );
    let late = layout.write("late.xml", r#"<server><logging maxFiles="5" maxFileSize="20"/></server>"#);

    let (run, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(merged_attribute(&run, &["logging"], "maxFiles").as_deref(), Some("5"));
    assert_eq!(merged_attribute(&run, &["logging"], "maxFileSize").as_deref(), Some("20"));
    assert_eq!(merged_attribute(&run, &["logging"], "consoleLogLevel").as_deref(), Some("INFO"));

    let logging = run.tree.find(&["logging"]).unwrap();
    let max_files = run.tree.node(logging).attribute("maxFiles").unwrap();
    assert_eq!(max_files.value, "5");

    let overrides = sink.containing(OVERRIDDEN);
    assert_eq!(overrides.len(), 1);
    // the user sees the include element, not a line of late.xml
    assert_eq!(overrides[0].anchor.uri.as_deref(), Some(layout.server_xml().as_path()));
    assert_eq!(overrides[0].anchor.attribute.as_deref(), Some("location"));
    assert_ne!(overrides[0].anchor.uri.as_deref(), Some(late.as_path()));
}

#[test]
fn test_sibling_duplicates_are_suppressed_from_a_third_file() {
    let layout = ServerLayout::new(
        r#"<server>
    <include location="a.xml"/>
    <include location="b.xml"/>
</server>"#,
    );
    let a = layout.write(
        "a.xml",
        r#"<server>
    <featureManager>
        <feature>jsp-2.3</feature>
        <feature>jsp-2.3</feature>
    </featureManager>
</server>"#,
    );
    let b = layout.write(
        "b.xml",
        r#"<server>
    <featureManager>
        <feature>cdi-2.0</feature>
        <feature>cdi-2.0</feature>
    </featureManager>
</server>"#,
    );
    let services = layout.services();

    let (_, from_main) = validate_file(&services, &layout.server_xml());
    assert!(from_main.containing(DUPLICATE_VALUE).is_empty());

    let (_, standalone_a) = validate_file(&services, &a);
    assert_eq!(standalone_a.containing(DUPLICATE_VALUE).len(), 1);

    let (_, standalone_b) = validate_file(&services, &b);
    assert_eq!(standalone_b.containing(DUPLICATE_VALUE).len(), 1);
}

#[test]
fn test_fuzzy_match_length_bounds() {
    let matcher = FuzzyMatcher::new(0.7);
    assert!(!matcher.within_bounds(10, 6));
    assert!(matcher.within_bounds(10, 7));
    assert!(matcher.within_bounds(10, 14));
    assert!(!matcher.within_bounds(10, 15));

    assert_eq!(matcher.best_match("keyStorePw", ["keySto"], &[]), None);
    assert_eq!(
        matcher.best_matches("httpEndpoint", ["httpEndpoint", "httpEndpoints", "httpEndpoin"], &[]),
        vec!["httpEndpoint".to_string()]
    );
}

#[test]
fn test_unrecognized_element_gets_a_suggestion() {
    let sink = validate_xml(r#"<server><httpEndpont id="web"/></server>"#);
    let unknown = sink.with_kind(QuickFixKind::UnrecognizedElement);
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].fix.best_match.as_deref(), Some("httpEndpoint"));
    assert_eq!(unknown[0].fix.element.as_deref(), Some("httpEndpont"));
}

#[test]
fn test_reference_integrity() {
    let sink = validate_xml(
        r#"<server>
    <featureManager><feature>jdbc-4.2</feature></featureManager>
    <library id="oracleLib"/>
    <library id="oracleLib"/>
    <library id="oracleLib"/>
    <variable name="lib" value="oracleLib"/>
    <jdbcDriver id="driver" libraryRef="oracleLb"/>
    <jdbcDriver id="viaVariable" libraryRef="${lib}"/>
</server>"#,
    );
    assert_eq!(sink.containing("declared more than once").len(), 2);

    let missing = sink.with_kind(QuickFixKind::FactoryIdNotFound);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].fix.reference.as_deref(), Some("oracleLb"));
    assert_eq!(missing[0].fix.best_match.as_deref(), Some("oracleLib"));
    assert_eq!(missing[0].anchor.attribute.as_deref(), Some("libraryRef"));
}

#[test]
fn test_missing_keystore_with_app_security() {
    let sink = validate_xml(
        r#"<server>
    <featureManager>
        <feature>ssl-1.0</feature>
        <feature>appSecurity-1.0</feature>
    </featureManager>
    <keyStore password=""/>
</server>"#,
    );
    assert_eq!(sink.count(Severity::Error), 1);
    let keystore = sink.with_kind(QuickFixKind::SslNoKeystore);
    assert_eq!(keystore.len(), 1);
    assert_eq!(keystore[0].severity, Severity::Error);
    assert_eq!(keystore[0].anchor.element, "featureManager");
    assert_eq!(keystore[0].fix.kind.ordinal(), 7);
    assert_eq!(
        keystore[0].fix.extensions.get(APP_SECURITY_ENABLED).map(String::as_str),
        Some("true")
    );
}

#[test]
fn test_custom_ssl_configuration_needs_no_default_keystore() {
    let services = ValidatorServices::default();
    let layout = ServerLayout::new(
        r#"<server>
    <featureManager><feature>ssl-1.0</feature></featureManager>
    <sslDefault sslRef="customSSL"/>
    <ssl id="customSSL" keyStoreRef="custom"/>
    <keyStore id="custom" password="{xor}Lz4sLCgwLTs="/>
</server>"#,
    );
    let (_, sink) = validate_file(&services, &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::SslNoKeystore).is_empty());
}
