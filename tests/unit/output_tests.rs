use std::time::Duration;

use validate_server_xml::output::{format_duration, format_json};
use validate_server_xml::{
    EngineConfig, FileDiscovery, Output, OutputFormat, ValidationEngine, ValidationResults,
    ValidatorServices, VerbosityLevel,
};

use crate::common::test_helpers::*;

async fn results_for(layout: &ServerLayout) -> ValidationResults {
    let engine = ValidationEngine::new(
        ValidatorServices::default(),
        EngineConfig {
            max_concurrent_validations: 1,
            ..EngineConfig::default()
        },
    );
    engine
        .validate_path(&layout.server_xml(), &FileDiscovery::new())
        .await
        .unwrap()
}

fn broken_layout() -> ServerLayout {
    ServerLayout::new(
        r#"<server>
    <include location="gone.xml"/>
    <logging maxFile="3"/>
</server>"#,
    )
}

#[tokio::test]
async fn test_json_report_carries_quick_fix_payloads() {
    let layout = broken_layout();
    let results = results_for(&layout).await;

    let json: serde_json::Value = serde_json::from_str(&format_json(&results).unwrap()).unwrap();
    assert_eq!(json["total_files"], 1);
    assert_eq!(json["errors"], 1);
    assert_eq!(json["warnings"], 1);

    let diagnostics = json["files"][0]["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 2);
    let include = diagnostics
        .iter()
        .find(|d| d["fix"]["kind"] == "IncludeNotFound")
        .unwrap();
    assert_eq!(include["severity"], "error");
    assert_eq!(include["fix"]["ordinal"], 13);
    assert_eq!(include["attribute"], "location");
    assert_eq!(include["line"], 2);

    let property = diagnostics
        .iter()
        .find(|d| d["fix"]["kind"] == "UnrecognizedProperty")
        .unwrap();
    assert_eq!(property["attribute"], "maxFile");
    assert_eq!(property["fix"]["best_match"], "maxFiles");
}

#[tokio::test]
async fn test_human_output_lists_diagnostics_and_summary() {
    let layout = broken_layout();
    let results = results_for(&layout).await;

    let rendered = Output::new(VerbosityLevel::Normal)
        .with_colors(false)
        .render(&results)
        .unwrap();
    assert!(rendered.contains("✗ INVALID"));
    assert!(rendered.contains("ERROR"));
    assert!(rendered.contains("[fix: IncludeNotFound]"));
    assert!(rendered.contains("[fix: UnrecognizedProperty -> maxFiles]"));
    assert!(rendered.contains("Validation Summary:"));
    assert!(rendered.contains("Diagnostics: 1 error(s), 1 warning(s), 0 info"));
}

#[tokio::test]
async fn test_quiet_output_keeps_only_errors() {
    let layout = broken_layout();
    let results = results_for(&layout).await;

    let rendered = Output::new(VerbosityLevel::Quiet)
        .with_colors(false)
        .render(&results)
        .unwrap();
    assert_eq!(rendered.lines().count(), 1);
    assert!(rendered.contains("gone.xml"));
    assert!(!rendered.contains("maxFile"));
    assert!(!rendered.contains("Validation Summary"));
}

#[tokio::test]
async fn test_summary_format_for_a_clean_server() {
    let layout = ServerLayout::new(MINIMAL_SERVER);
    let results = results_for(&layout).await;

    let rendered = Output::new(VerbosityLevel::Normal)
        .with_format(OutputFormat::Summary)
        .with_colors(false)
        .render(&results)
        .unwrap();
    assert!(rendered.starts_with("Validation Summary:"));
    assert!(rendered.contains("Valid: 1"));
    assert!(rendered.contains("Success rate: 100.0%"));
    assert!(!rendered.contains("Invalid:"));
}

#[test]
fn test_duration_formatting() {
    assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    assert_eq!(format_duration(Duration::from_millis(2500)), "2.50s");
    assert_eq!(format_duration(Duration::from_secs(125)), "2m5.0s");
}
