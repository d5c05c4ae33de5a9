use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use validate_server_xml::{
    EngineConfig, FileDiscovery, ProgressCallback, ServerDefaults, Severity, ValidationEngine,
    ValidationPhase, ValidationProgress, ValidatorServices,
};

use crate::common::test_helpers::*;

fn engine(config: EngineConfig) -> ValidationEngine {
    ValidationEngine::new(ValidatorServices::default(), config)
}

fn config(threads: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_validations: threads,
        validation_timeout: Duration::from_secs(10),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_validate_path_discovers_every_server() {
    let temp_dir = TempDir::new().unwrap();
    create_server_tree(
        temp_dir.path(),
        &[
            ("alpha", MINIMAL_SERVER),
            ("beta", r#"<server><logging maxFile="2"/></server>"#),
            ("gamma", r#"<server><include location="gone.xml"/></server>"#),
        ],
    )
    .await;
    tokio::fs::write(temp_dir.path().join("usr/servers/alpha/notes.xml"), "<server/>")
        .await
        .unwrap();

    let results = engine(config(2))
        .validate_path(temp_dir.path(), &FileDiscovery::new())
        .await
        .unwrap();

    assert_eq!(results.total_files, 3);
    assert_eq!(results.valid_files, 2);
    assert_eq!(results.invalid_files, 1);
    assert_eq!(results.errors, 1);
    assert_eq!(results.warnings, 1);
    assert!(results.has_errors());
    assert!(!results.all_valid());
}

#[tokio::test]
async fn test_results_preserve_discovery_order() {
    let temp_dir = TempDir::new().unwrap();
    let paths = create_server_tree(
        temp_dir.path(),
        &[("c", "<server/>"), ("a", "<server/>"), ("b", "<server/>")],
    )
    .await;

    let results = engine(config(3))
        .validate_path(temp_dir.path(), &FileDiscovery::new())
        .await
        .unwrap();
    let mut expected = paths;
    expected.sort();
    let actual: Vec<_> = results.file_results.iter().map(|r| r.path.clone()).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_progress_callback_sees_every_file() {
    let temp_dir = TempDir::new().unwrap();
    create_server_tree(temp_dir.path(), &[("one", "<server/>"), ("two", "<server/>")]).await;

    let validated = Arc::new(AtomicUsize::new(0));
    let phases = Arc::new(Mutex::new(Vec::new()));
    let callback: ProgressCallback = {
        let validated = Arc::clone(&validated);
        let phases = Arc::clone(&phases);
        Arc::new(move |progress: ValidationProgress| {
            if progress.phase == ValidationPhase::Validation && progress.current_file.is_some() {
                validated.fetch_add(1, Ordering::SeqCst);
            }
            phases.lock().unwrap().push(progress.phase);
        })
    };

    engine(config(1))
        .validate_path_with_progress(temp_dir.path(), &FileDiscovery::new(), Some(callback))
        .await
        .unwrap();

    assert_eq!(validated.load(Ordering::SeqCst), 2);
    let phases = phases.lock().unwrap();
    assert_eq!(phases.first(), Some(&ValidationPhase::Discovery));
    assert!(phases.contains(&ValidationPhase::Validation));
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_files() {
    let temp_dir = TempDir::new().unwrap();
    let servers: Vec<(String, &str)> = (0..6)
        .map(|i| (format!("s{i}"), r#"<server><include location="gone.xml"/></server>"#))
        .collect();
    let named: Vec<(&str, &str)> = servers.iter().map(|(n, c)| (n.as_str(), *c)).collect();
    create_server_tree(temp_dir.path(), &named).await;

    let results = engine(EngineConfig {
        fail_fast: true,
        ..config(1)
    })
    .validate_path(temp_dir.path(), &FileDiscovery::new())
    .await
    .unwrap();

    assert_eq!(results.total_files, 6);
    assert!(results.invalid_files >= 1);
    assert!(results.skipped_files >= 1);
}

#[tokio::test]
async fn test_server_defaults_reach_discovered_servers() {
    let temp_dir = TempDir::new().unwrap();
    create_server_tree(
        temp_dir.path(),
        &[("remote", r#"<server><httpEndpoint id="defaultHttpEndpoint" httpsPort="9445"/></server>"#)],
    )
    .await;

    let results = engine(EngineConfig {
        server_defaults: ServerDefaults {
            host: Some("prod.example.com".to_string()),
            secure_port: Some(9443),
            ..ServerDefaults::default()
        },
        ..config(1)
    })
    .validate_path(temp_dir.path(), &FileDiscovery::new())
    .await
    .unwrap();

    assert_eq!(results.errors, 1);
    let result = &results.file_results[0];
    assert_eq!(result.count(Severity::Error), 1);
}

#[tokio::test]
async fn test_malformed_top_level_file_is_reported_as_error() {
    let temp_dir = TempDir::new().unwrap();
    create_server_tree(temp_dir.path(), &[("broken", "<server><logging></server>")]).await;

    let results = engine(config(1))
        .validate_path(temp_dir.path(), &FileDiscovery::new())
        .await
        .unwrap();

    assert_eq!(results.error_files, 1);
    assert!(results.file_results[0].status.is_error());
    assert!(results.has_errors());
}

#[tokio::test]
async fn test_single_file_and_success_rate() {
    let layout = ServerLayout::new(MINIMAL_SERVER);
    let engine = engine(config(1));
    let result = engine.validate_single_file(&layout.server_xml()).await.unwrap();
    assert!(result.status.is_valid());
    assert_eq!(result.documents, 1);

    let results = engine
        .validate_path(&layout.server_xml(), &FileDiscovery::new())
        .await
        .unwrap();
    assert_eq!(results.success_rate(), 100.0);
}
