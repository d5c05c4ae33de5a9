use std::sync::Arc;

use validate_server_xml::diagnostic::MODULE_NAME;
use validate_server_xml::server::RuntimeInfo;
use validate_server_xml::{
    FilterRule, IgnoreFilter, QuickFixKind, RuntimePasswordPolicy, ServerBehaviour, Severity,
    ValidatorServices,
};

use crate::common::mocks::MockServerBehaviour;
use crate::common::test_helpers::*;

#[test]
fn test_minimal_server_is_clean() {
    let sink = validate_xml(MINIMAL_SERVER);
    assert!(sink.diagnostics().is_empty(), "{:?}", sink.messages());
}

#[test]
fn test_rules_only_run_on_the_top_level_document() {
    let layout = ServerLayout::new(r#"<server><include location="secrets.xml"/></server>"#);
    let secrets = layout.write(
        "secrets.xml",
        r#"<server><authData id="db" user="app" password="secret"/></server>"#,
    );
    let services = layout.services();

    let (_, from_main) = validate_file(&services, &layout.server_xml());
    assert!(from_main.with_kind(QuickFixKind::PlainTextPassword).is_empty());

    let (_, standalone) = validate_file(&services, &secrets);
    let plain = standalone.with_kind(QuickFixKind::PlainTextPassword);
    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].severity, Severity::Warning);
}

#[test]
fn test_runtime_variables_resolve_references() {
    let layout = ServerLayout::new(r#"<server><executor coreThreads="${pool.size}"/></server>"#);

    let (_, without) = validate_file(&layout.services(), &layout.server_xml());
    let undefined = without.with_kind(QuickFixKind::UndefinedVariable);
    assert_eq!(undefined.len(), 1);
    assert_eq!(undefined[0].fix.reference.as_deref(), Some("pool.size"));

    let services = layout.services().with_variable("pool.size", "12");
    let (run, with) = validate_file(&services, &layout.server_xml());
    assert!(with.with_kind(QuickFixKind::UndefinedVariable).is_empty());
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("12"));
}

#[test]
fn test_server_location_variables_are_predefined() {
    let layout = ServerLayout::new(
        r#"<server><logging logDirectory="${server.config.dir}/logs"/><include location="${shared.config.dir}/x.xml" optional="true"/></server>"#,
    );
    let (_, sink) = validate_file(&layout.services(), &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::UndefinedVariable).is_empty());
}

#[test]
fn test_install_directory_comes_from_the_runtime() {
    let layout = ServerLayout::new(
        r#"<server><logging logDirectory="${wlp.install.dir}/logs"/></server>"#,
    );
    let (_, without) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(without.with_kind(QuickFixKind::UndefinedVariable).len(), 1);

    let server = layout.server.clone().with_runtime(RuntimeInfo {
        version: "23.0.0.3".to_string(),
        install_dir: Some(layout.root().join("wlp")),
    });
    let services = ValidatorServices::default().with_server(server);
    let (run, with) = validate_file(&services, &layout.server_xml());
    assert!(with.with_kind(QuickFixKind::UndefinedVariable).is_empty());
    let expected = format!("{}/logs", layout.root().join("wlp").display());
    assert_eq!(
        merged_attribute(&run, &["logging"], "logDirectory"),
        Some(expected)
    );
}

#[test]
fn test_password_encodings_follow_the_runtime_policy() {
    let layout = ServerLayout::new(
        r#"<server><authData id="db" user="app" password="{aes}AEmVKa+jOeA7pos+j0Ja"/></server>"#,
    );
    let (_, default_policy) = validate_file(&layout.services(), &layout.server_xml());
    assert!(default_policy.diagnostics().is_empty());

    let services = layout.services().with_passwords(Arc::new(RuntimePasswordPolicy {
        supports_aes: false,
        ..RuntimePasswordPolicy::default()
    }));
    let (_, strict) = validate_file(&services, &layout.server_xml());
    let messages = strict.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("AES"));
    assert_eq!(strict.count(Severity::Warning), 1);
}

#[test]
fn test_ignore_filter_suppresses_unknown_attributes() {
    let layout = ServerLayout::new(r#"<server><logging maxFile="3"/></server>"#);

    let (_, unfiltered) = validate_file(&layout.services(), &layout.server_xml());
    assert_eq!(unfiltered.with_kind(QuickFixKind::UnrecognizedProperty).len(), 1);

    let mut filter = IgnoreFilter::new();
    filter
        .add_rule(FilterRule::attribute("**/server.xml", "logging", "maxFile"))
        .unwrap();
    let services = layout.services().with_filter(filter);
    let (_, filtered) = validate_file(&services, &layout.server_xml());
    assert!(filtered.with_kind(QuickFixKind::UnrecognizedProperty).is_empty());
}

#[test]
fn test_ignore_filter_suppresses_unknown_elements() {
    let layout = ServerLayout::new(r#"<server><customThing/></server>"#);
    let mut filter = IgnoreFilter::new();
    filter
        .add_rule(FilterRule::element("*", "customThing"))
        .unwrap();
    let services = layout.services().with_filter(filter);
    let (_, sink) = validate_file(&services, &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::UnrecognizedElement).is_empty());
}

#[test]
fn test_feature_conflict_reported_at_common_ancestor() {
    let layout = ServerLayout::new(
        r#"<server>
    <include location="web.xml"/>
    <include location="servlet.xml"/>
</server>"#,
    );
    layout.write(
        "web.xml",
        r#"<server><featureManager><feature>jaxrs-2.1</feature></featureManager></server>"#,
    );
    layout.write(
        "servlet.xml",
        r#"<server><featureManager><feature>servlet-5.0</feature></featureManager></server>"#,
    );

    let (_, sink) = validate_file(&layout.services(), &layout.server_xml());
    let conflicts = sink.containing("servlet");
    let errors: Vec<_> = conflicts
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    // anchored at the include that brought the first declaration in
    assert_eq!(errors[0].anchor.uri.as_deref(), Some(layout.server_xml().as_path()));
}

#[test]
fn test_feature_conflict_below_an_include_belongs_to_that_include() {
    let layout = ServerLayout::new(r#"<server><include location="group.xml"/></server>"#);
    let group = layout.write(
        "group.xml",
        r#"<server>
    <include location="web.xml"/>
    <include location="servlet.xml"/>
</server>"#,
    );
    layout.write(
        "web.xml",
        r#"<server><featureManager><feature>jaxrs-2.1</feature></featureManager></server>"#,
    );
    layout.write(
        "servlet.xml",
        r#"<server><featureManager><feature>servlet-5.0</feature></featureManager></server>"#,
    );
    let services = layout.services();

    let (_, from_main) = validate_file(&services, &layout.server_xml());
    assert_eq!(from_main.count(Severity::Error), 0);

    let (_, from_group) = validate_file(&services, &group);
    assert_eq!(from_group.count(Severity::Error), 1);
}

#[test]
fn test_remote_server_secure_port_mismatch() {
    let xml = r#"<server><httpEndpoint id="defaultHttpEndpoint" httpsPort="9444"/></server>"#;
    let layout = ServerLayout::new(xml);

    let remote = layout.server.clone().with_host("remote.example.com", Some(9443));
    let services = ValidatorServices::default().with_server(remote);
    let (_, sink) = validate_file(&services, &layout.server_xml());
    let mismatch = sink.with_kind(QuickFixKind::RemoteServerSecurePortMismatch);
    assert_eq!(mismatch.len(), 1);
    assert_eq!(mismatch[0].severity, Severity::Error);
    assert_eq!(mismatch[0].fix.best_match.as_deref(), Some("9444"));
    assert_eq!(mismatch[0].anchor.attribute.as_deref(), Some("httpsPort"));

    let local = layout.server.clone().with_host("localhost", Some(9443));
    let services = ValidatorServices::default().with_server(local);
    let (_, sink) = validate_file(&services, &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::RemoteServerSecurePortMismatch).is_empty());
}

#[test]
fn test_remote_server_without_endpoint_suggests_default_port() {
    let layout = ServerLayout::new("<server/>");
    let remote = layout.server.clone().with_host("10.0.0.7", Some(9447));
    let services = ValidatorServices::default().with_server(remote);
    let (_, sink) = validate_file(&services, &layout.server_xml());
    let mismatch = sink.with_kind(QuickFixKind::RemoteServerSecurePortMismatch);
    assert_eq!(mismatch.len(), 1);
    assert_eq!(mismatch[0].fix.best_match.as_deref(), Some("9443"));
}

#[test]
fn test_published_modules_out_of_sync() {
    let layout = ServerLayout::new(
        r#"<server>
    <library id="common"/>
    <webApplication location="shop.war">
        <classloader commonLibraryRef="common"/>
    </webApplication>
    <application location="billing.ear"/>
</server>"#,
    );
    let behaviour = Arc::new(MockServerBehaviour::new(vec![
        MockServerBehaviour::module("shop", &["common"]),
        MockServerBehaviour::module("billing", &["billingLib"]),
        MockServerBehaviour::module("admin", &[]),
        MockServerBehaviour::external("legacy"),
    ]));
    let services = layout.services().with_behaviour(behaviour.clone());

    let (_, sink) = validate_file(&services, &layout.server_xml());
    assert_eq!(behaviour.checks(), 3);

    let missing = sink.with_kind(QuickFixKind::OutOfSyncApp);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].fix.extensions.get(MODULE_NAME).map(String::as_str), Some("admin"));
    assert_eq!(missing[0].severity, Severity::Warning);

    let mismatched = sink.with_kind(QuickFixKind::OutOfSyncSharedLibRefMismatch);
    assert_eq!(mismatched.len(), 1);
    assert_eq!(
        mismatched[0].fix.extensions.get(MODULE_NAME).map(String::as_str),
        Some("billing")
    );
    assert_eq!(mismatched[0].anchor.element, "application");
    assert!(mismatched[0].message.contains("billingLib"));
}

#[test]
fn test_mock_behaviour_reports_nothing_when_in_sync() {
    let layout = ServerLayout::new(r#"<server><application id="shop" location="apps/shop.war"/></server>"#);
    let behaviour = MockServerBehaviour::new(vec![MockServerBehaviour::module("shop", &[])]);
    let (run, _) = validate_file(&layout.services(), &layout.server_xml());
    assert!(behaviour.out_of_sync(&run.tree).is_empty());
}

#[test]
fn test_literal_checks() {
    let sink = validate_xml(
        r#"<server>
    <logging consoleLogLevel="LOUD" maxFiles="many"/>
    <httpSession invalidationTimeout="30m"/>
    <applicationManager startTimeout="soon"/>
</server>"#,
    );
    let messages = sink.messages();
    assert_eq!(messages.len(), 3, "{messages:?}");
    assert!(messages.iter().any(|m| m.contains("'LOUD'")));
    assert!(messages.iter().any(|m| m.contains("'many'")));
    assert!(messages.iter().any(|m| m.contains("not a valid duration")));
}

#[test]
fn test_unavailable_element_lists_enabling_features() {
    let sink = validate_xml(
        r#"<server><basicRegistry id="basic"><user name="bob" password="{xor}PTA9"/></basicRegistry></server>"#,
    );
    let unavailable = sink.with_kind(QuickFixKind::UnavailableElement);
    assert_eq!(unavailable.len(), 1);
    assert!(unavailable[0].message.contains("appSecurity-2.0"));
}

#[test]
fn test_unrecognized_root_element() {
    let sink = validate_xml("<client/>");
    assert_eq!(sink.count(Severity::Error), 1);
    assert!(sink.messages()[0].contains("<client>"));
}
