//! # validate-server-xml Library
//!
//! Merges a Liberty `server.xml` with its includes and configuration dropins
//! into one effective configuration and validates it against a schema
//! catalog, a feature catalog and the owning server. Problems are reported as
//! [`Diagnostic`]s carrying quick-fix metadata; many files can be validated
//! concurrently through the [`ValidationEngine`].

pub mod checks;
pub mod cli;
pub mod config;
pub mod context;
pub mod diagnostic;
pub mod document;
pub mod engine;
pub mod error;
pub mod error_reporter;
pub mod features;
pub mod file_discovery;
pub mod fuzzy;
pub mod ignore_filter;
pub mod merge;
pub mod messages;
pub mod output;
pub mod password;
pub mod schema;
pub mod server;
pub mod source;
pub mod validator;
pub mod variables;

pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use context::{ConflictPolicy, ContextArena, ContextId};
pub use diagnostic::{
    Anchor, CollectingSink, Diagnostic, DiagnosticSink, QuickFixDescriptor, QuickFixKind, Severity,
    SharedSink,
};
pub use document::{ConfigDocument, ElementId, Span};
pub use engine::{
    EngineConfig, FileValidationResult, ProgressCallback, ValidationEngine, ValidationPhase,
    ValidationProgress, ValidationResults, ValidationStatus,
};
pub use error::{ContextCreationError, DocumentError, ValidationError};
pub use error_reporter::ErrorReporter;
pub use features::{FeatureAuthority, FeatureCatalog};
pub use file_discovery::{DiscoveryStats, FileDiscovery};
pub use fuzzy::FuzzyMatcher;
pub use ignore_filter::{FilterRule, IgnoreFilter};
pub use merge::{MergeEngine, MergeNodeId, MergeTree};
pub use output::Output;
pub use password::{PasswordPolicy, RuntimePasswordPolicy};
pub use schema::{SchemaAuthority, SchemaCatalog};
pub use server::{DeployedModules, PublishedModule, ServerBehaviour, ServerDefaults, ServerInfo};
pub use source::{DocumentProvider, FileSystemProvider, SourceDocument, Workspace};
pub use validator::{ConfigValidator, ValidationRun, ValidatorServices};
pub use variables::{VariableAuthority, VariableLayer, VariableSet};
