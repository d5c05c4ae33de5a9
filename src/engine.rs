//! Concurrent validation of many server configurations
//!
//! Every discovered file is an independent top-level validation. A run owns
//! all of its scratch state, so runs share nothing but the read-only
//! collaborators and execute in parallel on blocking worker threads:
//! - **Async I/O**: file discovery
//! - **Blocking CPU work**: merging and rule checks, one `spawn_blocking` task per file
//! - **Bounded concurrency**: a semaphore caps the number of runs in flight
//! - **Aggregation**: `futures::try_join_all` collects every task

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diagnostic::{Diagnostic, Severity, SharedSink};
use crate::error::{Result, ValidationError};
use crate::file_discovery::FileDiscovery;
use crate::server::{SERVER_XML, ServerDefaults};
use crate::validator::{ConfigValidator, ValidatorServices};

/// Orchestration settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of concurrent validations
    pub max_concurrent_validations: usize,
    /// Upper bound on one file's validation
    pub validation_timeout: Duration,
    /// Skip remaining files once one has an error
    pub fail_fast: bool,
    pub show_progress: bool,
    /// Applied to discovered `server.xml` files when no explicit server is configured
    pub server_defaults: ServerDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
            validation_timeout: Duration::from_secs(30),
            fail_fast: false,
            show_progress: false,
            server_defaults: ServerDefaults::default(),
        }
    }
}

/// Outcome of validating one top-level file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// No diagnostics at all
    Valid,
    /// Only warnings and informational diagnostics
    Warnings { count: usize },
    /// At least one ERROR diagnostic
    Invalid { error_count: usize },
    /// The run aborted
    Error { message: String },
    /// Not validated (fail-fast)
    Skipped { reason: String },
}

impl ValidationStatus {
    fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        let errors = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        if errors > 0 {
            ValidationStatus::Invalid {
                error_count: errors,
            }
        } else if diagnostics.is_empty() {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Warnings {
                count: diagnostics.len(),
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid | ValidationStatus::Warnings { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationStatus::Skipped { .. })
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub duration: Duration,
    /// Diagnostics in emission order; kept even when the run aborted
    pub diagnostics: Vec<Diagnostic>,
    /// Documents reached through includes and dropins, the file itself included
    pub documents: usize,
}

impl FileValidationResult {
    pub fn completed(path: PathBuf, diagnostics: Vec<Diagnostic>, documents: usize, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::from_diagnostics(&diagnostics),
            duration,
            diagnostics,
            documents,
        }
    }

    pub fn error(path: PathBuf, error: ValidationError, diagnostics: Vec<Diagnostic>, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            duration,
            diagnostics,
            documents: 0,
        }
    }

    pub fn skipped(path: PathBuf, reason: String) -> Self {
        Self {
            path,
            status: ValidationStatus::Skipped { reason },
            duration: Duration::ZERO,
            diagnostics: Vec::new(),
            documents: 0,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Progress update for validation
#[derive(Debug, Clone)]
pub struct ValidationProgress {
    pub current_file: Option<PathBuf>,
    pub completed: usize,
    pub total: usize,
    pub phase: ValidationPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Discovery,
    Validation,
    Aggregation,
    Complete,
}

/// Aggregated results of validating multiple files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResults {
    pub total_files: usize,
    /// Files without ERROR diagnostics
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub file_results: Vec<FileValidationResult>,
}

impl ValidationResults {
    /// Aggregate individual file results into summary
    pub fn aggregate(file_results: Vec<FileValidationResult>) -> Self {
        let total_files = file_results.len();
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;
        let mut skipped_files = 0;
        let mut total_duration = Duration::ZERO;

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid | ValidationStatus::Warnings { .. } => valid_files += 1,
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
                ValidationStatus::Skipped { .. } => skipped_files += 1,
            }
            total_duration += result.duration;
        }

        let count = |severity| file_results.iter().map(|r| r.count(severity)).sum();
        let errors = count(Severity::Error);
        let warnings = count(Severity::Warning);
        let infos = count(Severity::Info);

        let average_duration = if total_files > 0 {
            total_duration / total_files as u32
        } else {
            Duration::ZERO
        };

        Self {
            total_files,
            valid_files,
            invalid_files,
            error_files,
            skipped_files,
            errors,
            warnings,
            infos,
            total_duration,
            average_duration,
            file_results,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files && self.total_files > 0
    }

    /// Any ERROR diagnostic or aborted run
    pub fn has_errors(&self) -> bool {
        self.error_files > 0 || self.invalid_files > 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Progress callback type for validation updates
pub type ProgressCallback = Arc<dyn Fn(ValidationProgress) + Send + Sync>;

/// Runs one [`ConfigValidator`] per file on the blocking pool
pub struct ValidationEngine {
    services: Arc<ValidatorServices>,
    config: EngineConfig,
}

impl ValidationEngine {
    pub fn new(services: ValidatorServices, config: EngineConfig) -> Self {
        Self {
            services: Arc::new(services),
            config,
        }
    }

    /// Validate every configuration file under `path`
    pub async fn validate_path(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
    ) -> Result<ValidationResults> {
        self.validate_path_with_progress(path, file_discovery, None)
            .await
    }

    pub async fn validate_path_with_progress(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ValidationResults> {
        let started = Instant::now();
        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: 0,
                total: 0,
                phase: ValidationPhase::Discovery,
            });
        }

        let files = file_discovery.discover_files(path).await?;
        debug!(files = files.len(), elapsed = ?started.elapsed(), "discovery finished");
        if files.is_empty() {
            return Ok(ValidationResults::aggregate(Vec::new()));
        }

        let results = self
            .validate_files_with_progress(files, progress_callback.clone())
            .await?;

        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: results.len(),
                total: results.len(),
                phase: ValidationPhase::Aggregation,
            });
        }
        let aggregated = ValidationResults::aggregate(results);
        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: aggregated.total_files,
                total: aggregated.total_files,
                phase: ValidationPhase::Complete,
            });
        }
        Ok(aggregated)
    }

    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        self.validate_files_with_progress(files, None).await
    }

    pub async fn validate_files_with_progress(
        &self,
        files: Vec<PathBuf>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let total_files = files.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations.max(1),
        ));

        let tasks: Vec<_> = files
            .into_iter()
            .map(|file_path| {
                let services = Arc::new(self.services_for(&file_path));
                let semaphore = Arc::clone(&semaphore);
                let timeout = self.config.validation_timeout;
                let fail_fast = self.config.fail_fast;
                let progress_callback = progress_callback.clone();
                let completed = Arc::clone(&completed);
                let failed = Arc::clone(&failed);

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        ValidationError::Concurrency {
                            details: "validation semaphore closed".to_string(),
                        }
                    })?;

                    let result = if fail_fast && failed.load(Ordering::SeqCst) {
                        FileValidationResult::skipped(
                            file_path.clone(),
                            "an earlier file failed validation".to_string(),
                        )
                    } else {
                        Self::validate_with_timeout(file_path.clone(), services, timeout).await
                    };
                    if result.status.is_invalid() || result.status.is_error() {
                        failed.store(true, Ordering::SeqCst);
                    }

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(ValidationProgress {
                            current_file: Some(file_path),
                            completed: done,
                            total: total_files,
                            phase: ValidationPhase::Validation,
                        });
                    }
                    Ok::<FileValidationResult, ValidationError>(result)
                })
            })
            .collect();

        let task_results = try_join_all(tasks)
            .await
            .map_err(|e| ValidationError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;

        task_results.into_iter().collect()
    }

    /// Validate one file on the calling task's runtime
    pub async fn validate_single_file(&self, file_path: &Path) -> Result<FileValidationResult> {
        let services = Arc::new(self.services_for(file_path));
        Ok(Self::validate_with_timeout(file_path.to_path_buf(), services, self.config.validation_timeout).await)
    }

    pub fn services(&self) -> &ValidatorServices {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Collaborators for one file; discovered `server.xml` files get their own server
    fn services_for(&self, file_path: &Path) -> ValidatorServices {
        let mut services = ValidatorServices::clone(&self.services);
        let is_server_xml = file_path.file_name().is_some_and(|name| name == SERVER_XML);
        if services.server.is_none()
            && is_server_xml
            && let Some(config_dir) = file_path.parent()
        {
            services.server = Some(self.config.server_defaults.server_for(config_dir));
        }
        services
    }

    async fn validate_with_timeout(
        file_path: PathBuf,
        services: Arc<ValidatorServices>,
        timeout: Duration,
    ) -> FileValidationResult {
        let worker_path = file_path.clone();
        Self::run_guarded(file_path, timeout, move |sink| {
            ConfigValidator::new(&services)
                .validate_path(&worker_path, sink)
                .map(|run| run.documents)
        })
        .await
    }

    /// Run `work` on a blocking thread, keeping its diagnostics if it panics or times out
    async fn run_guarded<F>(file_path: PathBuf, timeout: Duration, work: F) -> FileValidationResult
    where
        F: FnOnce(&mut SharedSink) -> Result<usize> + Send + 'static,
    {
        let started = Instant::now();
        let sink = SharedSink::new();
        let mut worker_sink = sink.clone();
        let task = tokio::task::spawn_blocking(move || work(&mut worker_sink));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(documents))) => {
                FileValidationResult::completed(file_path, sink.snapshot(), documents, started.elapsed())
            }
            Ok(Ok(Err(err))) => FileValidationResult::error(file_path, err, sink.snapshot(), started.elapsed()),
            Ok(Err(join)) => FileValidationResult::error(
                file_path,
                ValidationError::Concurrency {
                    details: format!("Join error: {}", join),
                },
                sink.snapshot(),
                started.elapsed(),
            ),
            Err(_) => {
                warn!(file = %file_path.display(), ?timeout, "validation timed out");
                FileValidationResult::error(
                    file_path,
                    ValidationError::Concurrency {
                        details: format!("Validation timeout after {:?}", timeout),
                    },
                    sink.snapshot(),
                    timeout,
                )
            }
        }
    }
}
