use clap::Parser;
use tokio::fs;

use validate_server_xml::config::OutputFormatConfig;
use validate_server_xml::{Cli, ConfigError, ConfigManager, QuickFixKind};

use crate::common::mocks::MockEnvProvider;
use crate::common::test_helpers::*;

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["validate-server-xml"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[tokio::test]
async fn test_file_environment_cli_precedence() {
    let layout = ServerLayout::new("<server/>");
    let config_path = layout.root().join("tool.toml");
    fs::write(
        &config_path,
        r#"
[validation]
threads = 2
fuzzy_threshold = 0.8

[variables]
"pool.size" = "4"
"http.port" = "9080"

[output]
format = "summary"
"#,
    )
    .await
    .unwrap();

    let from_file = ConfigManager::load_from_file(&config_path).await.unwrap();
    let env = MockEnvProvider::new()
        .set("VALIDATE_SERVER_XML_THREADS", "6")
        .set("VALIDATE_SERVER_XML_FORMAT", "json")
        .set("VALIDATE_SERVER_XML_FILE_NAMES", "server.xml, defaults.xml,");
    let from_env = ConfigManager::apply_environment_overrides_with(&env, from_file).unwrap();
    assert_eq!(from_env.validation.threads, Some(6));
    assert_eq!(from_env.output.format, OutputFormatConfig::Json);
    assert_eq!(from_env.files.file_names, vec!["server.xml", "defaults.xml"]);

    let server_xml = layout.server_xml();
    let args = cli(&[
        server_xml.to_str().unwrap(),
        "--threads",
        "3",
        "--var",
        "pool.size=16",
    ]);
    let config = ConfigManager::merge_with_cli(from_env, &args);

    assert_eq!(config.validation.threads, Some(3));
    assert_eq!(config.validation.fuzzy_threshold, 0.8);
    assert_eq!(config.output.format, OutputFormatConfig::Json);
    assert_eq!(config.variables.get("pool.size").map(String::as_str), Some("16"));
    assert_eq!(config.variables.get("http.port").map(String::as_str), Some("9080"));
    assert!(ConfigManager::validate_config(&config).is_ok());
}

#[test]
fn test_invalid_environment_value_is_rejected() {
    let env = MockEnvProvider::new().set("VALIDATE_SERVER_XML_SECURE_PORT", "https");
    let result = ConfigManager::apply_environment_overrides_with(&env, Default::default());
    match result {
        Err(ConfigError::Environment(message)) => {
            assert!(message.contains("VALIDATE_SERVER_XML_SECURE_PORT"))
        }
        other => panic!("expected an environment error, got {:?}", other),
    }
}

#[test]
fn test_cli_rejects_malformed_variables() {
    let result = Cli::try_parse_from(["validate-server-xml", ".", "--var", "no-equals-sign"]);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_configured_services_drive_validation() {
    let layout = ServerLayout::new(
        r#"<server>
    <executor coreThreads="${pool.size}"/>
    <logging maxFile="3"/>
    <application location="shop.war"/>
</server>"#,
    );
    fs::write(
        layout.config_dir().join(".validation-filters.json"),
        r#"{"rules":[{"path":"server.xml","element":"logging","attribute":"maxFile","kind":"unrecognizedAttribute"}]}"#,
    )
    .await
    .unwrap();

    let config_path = layout.root().join("tool.json");
    fs::write(
        &config_path,
        format!(
            r#"{{
  "server": {{
    "config_dir": {dir:?},
    "modules": [{{ "name": "shop" }}, {{ "name": "admin" }}]
  }},
  "variables": {{ "pool.size": "12" }}
}}"#,
            dir = layout.config_dir().display().to_string()
        ),
    )
    .await
    .unwrap();
    let config = ConfigManager::load_from_file(&config_path).await.unwrap();

    let services = ConfigManager::build_services(&config, &layout.server_xml()).unwrap();
    assert!(services.server.is_some());
    assert!(services.behaviour.is_some());

    let (run, sink) = validate_file(&services, &layout.server_xml());
    assert!(sink.with_kind(QuickFixKind::UndefinedVariable).is_empty());
    assert!(sink.with_kind(QuickFixKind::UnrecognizedProperty).is_empty());
    assert_eq!(sink.with_kind(QuickFixKind::OutOfSyncApp).len(), 1);
    assert_eq!(merged_attribute(&run, &["executor"], "coreThreads").as_deref(), Some("12"));
}

#[test]
fn test_published_module_checks_can_be_disabled() {
    let layout = ServerLayout::new("<server/>");
    let mut config = validate_server_xml::Config::default();
    config.server.modules = vec![validate_server_xml::PublishedModule {
        name: "orphan".to_string(),
        external: false,
        shared_libraries: Vec::new(),
    }];
    config.validation.check_published_modules = false;

    let services = ConfigManager::build_services(&config, &layout.server_xml()).unwrap();
    assert!(services.behaviour.is_none());
    assert!(services.server.is_none());
}

#[test]
fn test_engine_and_discovery_follow_configuration() {
    let mut config = validate_server_xml::Config::default();
    config.validation.threads = Some(5);
    config.validation.timeout_seconds = 7;
    config.files.exclude_patterns = vec!["[".to_string()];

    let engine = ConfigManager::engine_config(&config);
    assert_eq!(engine.max_concurrent_validations, 5);
    assert_eq!(engine.validation_timeout.as_secs(), 7);
    assert!(ConfigManager::file_discovery(&config).is_err());
}
