use crate::cli::{Cli, OutputFormat, VerbosityLevel};
use crate::engine::EngineConfig;
use crate::features::FeatureCatalog;
use crate::file_discovery::FileDiscovery;
use crate::fuzzy::{DEFAULT_THRESHOLD, FuzzyMatcher};
use crate::ignore_filter::{DEFAULT_STORE_NAME, IgnoreFilter};
use crate::password::RuntimePasswordPolicy;
use crate::schema::SchemaCatalog;
use crate::server::{DeployedModules, PublishedModule, SERVER_XML, ServerDefaults};
use crate::validator::ValidatorServices;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "VALIDATE_SERVER_XML_";
const CONFIG_NAMES: [&str; 4] = [
    "validate-server-xml.toml",
    "validate-server-xml.json",
    ".validate-server-xml.toml",
    ".validate-server-xml.json",
];

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub catalog: CatalogConfig,
    pub server: ServerConfig,
    /// Runtime variables (name -> value)
    pub variables: BTreeMap<String, String>,
    pub filters: FilterConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of concurrent validation threads
    pub threads: Option<usize>,
    /// Skip remaining files after the first one with an error
    pub fail_fast: bool,
    pub show_progress: bool,
    /// Minimum similarity for fuzzy suggestions
    pub fuzzy_threshold: f64,
    /// Compare published modules against the configured applications
    pub check_published_modules: bool,
    /// Upper bound on one file's validation, in seconds
    pub timeout_seconds: u64,
}

/// Schema and feature catalogs; built-in ones are used when unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub schema: Option<PathBuf>,
    pub features: Option<PathBuf>,
}

/// The server owning the validated configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Fixed configuration directory; otherwise every discovered `server.xml`
    /// is its own server
    pub config_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub host: String,
    pub secure_port: Option<u16>,
    pub supports_aes: bool,
    pub supports_hash: bool,
    /// Custom password encryption algorithms installed in the runtime
    pub custom_encryption: Vec<String>,
    /// Modules the tooling has published to the server
    pub modules: Vec<PublishedModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FilterConfig {
    /// Ignore-filter store; defaults to `.validation-filters.json` beside the validated path
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormatConfig,
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// File discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File names treated as top-level configurations
    pub file_names: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
    pub max_depth: Option<usize>,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl FromStr for OutputFormatConfig {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(OutputFormatConfig::Human),
            "json" => Ok(OutputFormatConfig::Json),
            "summary" => Ok(OutputFormatConfig::Summary),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            threads: None,
            fail_fast: false,
            show_progress: false,
            fuzzy_threshold: DEFAULT_THRESHOLD,
            check_published_modules: true,
            timeout_seconds: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let policy = RuntimePasswordPolicy::default();
        Self {
            config_dir: None,
            user_dir: None,
            host: "localhost".to_string(),
            secure_port: None,
            supports_aes: policy.supports_aes,
            supports_hash: policy.supports_hash,
            custom_encryption: Vec::new(),
            modules: Vec::new(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            file_names: vec![SERVER_XML.to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            max_depth: None,
        }
    }
}

impl OutputConfig {
    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

fn env_value<T: FromStr>(env: &impl EnvProvider, name: &str) -> Result<Option<T>> {
    let key = format!("{}{}", ENV_PREFIX, name);
    match env.get(&key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, raw))),
        None => Ok(None),
    }
}

fn env_list(env: &impl EnvProvider, name: &str) -> Option<Vec<String>> {
    env.get(&format!("{}{}", ENV_PREFIX, name)).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), "loading configuration file");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in the current directory, then the user config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validate-server-xml");
            for name in &CONFIG_NAMES {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply `VALIDATE_SERVER_XML_*` overrides from a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(threads) = env_value(env, "THREADS")? {
            config.validation.threads = Some(threads);
        }
        if let Some(fail_fast) = env_value(env, "FAIL_FAST")? {
            config.validation.fail_fast = fail_fast;
        }
        if let Some(threshold) = env_value(env, "FUZZY_THRESHOLD")? {
            config.validation.fuzzy_threshold = threshold;
        }
        if let Some(check) = env_value(env, "CHECK_PUBLISHED_MODULES")? {
            config.validation.check_published_modules = check;
        }

        if let Some(schema) = env_value(env, "SCHEMA")? {
            config.catalog.schema = Some(schema);
        }
        if let Some(features) = env_value(env, "FEATURES")? {
            config.catalog.features = Some(features);
        }

        if let Some(config_dir) = env_value(env, "SERVER_DIR")? {
            config.server.config_dir = Some(config_dir);
        }
        if let Some(user_dir) = env_value(env, "USER_DIR")? {
            config.server.user_dir = Some(user_dir);
        }
        if let Some(host) = env_value(env, "HOST")? {
            config.server.host = host;
        }
        if let Some(port) = env_value(env, "SECURE_PORT")? {
            config.server.secure_port = Some(port);
        }

        if let Some(filters) = env_value(env, "FILTERS")? {
            config.filters.path = Some(filters);
        }

        if let Some(verbose) = env_value(env, "VERBOSE")? {
            config.output.verbose = verbose;
        }
        if let Some(quiet) = env_value(env, "QUIET")? {
            config.output.quiet = quiet;
        }
        if let Some(format) = env_value(env, "FORMAT")? {
            config.output.format = format;
        }

        if let Some(file_names) = env_list(env, "FILE_NAMES") {
            config.files.file_names = file_names;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if cli.fail_fast {
            config.validation.fail_fast = true;
        }
        if cli.progress {
            config.validation.show_progress = true;
        }
        if let Some(threshold) = cli.fuzzy_threshold {
            config.validation.fuzzy_threshold = threshold;
        }

        if cli.schema.is_some() {
            config.catalog.schema = cli.schema.clone();
        }
        if cli.features.is_some() {
            config.catalog.features = cli.features.clone();
        }

        if cli.server_dir.is_some() {
            config.server.config_dir = cli.server_dir.clone();
        }
        if cli.user_dir.is_some() {
            config.server.user_dir = cli.user_dir.clone();
        }
        for (name, value) in &cli.variables {
            config.variables.insert(name.clone(), value.clone());
        }
        if cli.filters.is_some() {
            config.filters.path = cli.filters.clone();
        }

        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        if !cli.file_names.is_empty() {
            config.files.file_names = cli.file_names.clone();
        }
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        config
    }

    /// Merge two configurations (second takes precedence for set values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.fail_fast = override_config.validation.fail_fast;
        base.validation.show_progress = override_config.validation.show_progress;
        base.validation.fuzzy_threshold = override_config.validation.fuzzy_threshold;
        base.validation.check_published_modules = override_config.validation.check_published_modules;
        base.validation.timeout_seconds = override_config.validation.timeout_seconds;

        if override_config.catalog.schema.is_some() {
            base.catalog.schema = override_config.catalog.schema;
        }
        if override_config.catalog.features.is_some() {
            base.catalog.features = override_config.catalog.features;
        }

        let server = override_config.server;
        if server.config_dir.is_some() {
            base.server.config_dir = server.config_dir;
        }
        if server.user_dir.is_some() {
            base.server.user_dir = server.user_dir;
        }
        if server.secure_port.is_some() {
            base.server.secure_port = server.secure_port;
        }
        base.server.host = server.host;
        base.server.supports_aes = server.supports_aes;
        base.server.supports_hash = server.supports_hash;
        if !server.custom_encryption.is_empty() {
            base.server.custom_encryption = server.custom_encryption;
        }
        if !server.modules.is_empty() {
            base.server.modules = server.modules;
        }

        base.variables.extend(override_config.variables);
        if override_config.filters.path.is_some() {
            base.filters.path = override_config.filters.path;
        }

        base.output.format = override_config.output.format;
        base.output.verbose = override_config.output.verbose;
        base.output.quiet = override_config.output.quiet;

        if !override_config.files.file_names.is_empty() {
            base.files.file_names = override_config.files.file_names;
        }
        if !override_config.files.include_patterns.is_empty() {
            base.files.include_patterns = override_config.files.include_patterns;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }
        if override_config.files.max_depth.is_some() {
            base.files.max_depth = override_config.files.max_depth;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        let threshold = config.validation.fuzzy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "Fuzzy threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if config.validation.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.file_names.is_empty() {
            return Err(ConfigError::Validation(
                "At least one configuration file name must be specified".to_string(),
            ));
        }
        for name in &config.files.file_names {
            if name.contains('/') || name.contains('\\') {
                return Err(ConfigError::Validation(format!(
                    "File name must not contain a path separator: {}",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(num_cpus::get)
    }

    /// Ignore-filter store used when validating `target`
    pub fn filter_store(config: &Config, target: &Path) -> PathBuf {
        config.filters.path.clone().unwrap_or_else(|| {
            let dir = if target.is_file() {
                target.parent().unwrap_or(Path::new("."))
            } else {
                target
            };
            dir.join(DEFAULT_STORE_NAME)
        })
    }

    /// Collaborators for validating `target` under `config`
    pub fn build_services(config: &Config, target: &Path) -> crate::error::Result<ValidatorServices> {
        let mut services = ValidatorServices::default();

        if let Some(path) = &config.catalog.schema {
            services.schema = Arc::new(SchemaCatalog::load(path)?);
        }
        if let Some(path) = &config.catalog.features {
            services.features = Arc::new(FeatureCatalog::load(path)?);
        }

        services.passwords = Arc::new(RuntimePasswordPolicy {
            supports_aes: config.server.supports_aes,
            supports_hash: config.server.supports_hash,
            custom_algorithms: config.server.custom_encryption.clone(),
        });
        services.matcher = FuzzyMatcher::new(config.validation.fuzzy_threshold);
        services.filter = Arc::new(IgnoreFilter::load(&Self::filter_store(config, target))?);
        services.runtime_variables = config
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if let Some(config_dir) = &config.server.config_dir {
            services.server = Some(Self::server_defaults(config).server_for(config_dir));
        }
        if config.validation.check_published_modules && !config.server.modules.is_empty() {
            services.behaviour = Some(Arc::new(DeployedModules::new(config.server.modules.clone())));
        }

        Ok(services)
    }

    pub fn server_defaults(config: &Config) -> ServerDefaults {
        ServerDefaults {
            user_dir: config.server.user_dir.clone(),
            host: Some(config.server.host.clone()),
            secure_port: config.server.secure_port,
            runtime: None,
        }
    }

    pub fn engine_config(config: &Config) -> EngineConfig {
        EngineConfig {
            max_concurrent_validations: Self::get_thread_count(config),
            validation_timeout: std::time::Duration::from_secs(config.validation.timeout_seconds),
            fail_fast: config.validation.fail_fast,
            show_progress: config.validation.show_progress,
            server_defaults: Self::server_defaults(config),
        }
    }

    pub fn file_discovery(config: &Config) -> crate::error::Result<FileDiscovery> {
        FileDiscovery::new()
            .with_file_names(config.files.file_names.clone())
            .with_max_depth(config.files.max_depth)
            .with_include_patterns(config.files.include_patterns.clone())?
            .with_exclude_patterns(config.files.exclude_patterns.clone())
    }
}
