//! Rendering of validation results
//!
//! Three forms: human-readable lines (coloured when stdout is a terminal), a
//! counts-only summary, and JSON carrying every diagnostic with its quick-fix
//! payload.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::diagnostic::{Diagnostic, QuickFixKind, Severity};
use crate::engine::{FileValidationResult, ValidationResults, ValidationStatus};

/// Output formatter for validation results
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            format: OutputFormat::Human,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn severity_color(severity: Severity) -> &'static str {
        match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Info => "36",
        }
    }

    /// Render `results` in the configured format
    pub fn render(&self, results: &ValidationResults) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Human => Ok(self.format_results(results)),
            OutputFormat::Summary => Ok(self.format_summary(results)),
            OutputFormat::Json => format_json(results),
        }
    }

    pub fn format_results(&self, results: &ValidationResults) -> String {
        let mut output = String::new();

        match self.verbosity {
            VerbosityLevel::Quiet => {
                for file_result in &results.file_results {
                    for diagnostic in file_result
                        .diagnostics
                        .iter()
                        .filter(|d| d.severity == Severity::Error)
                    {
                        output.push_str(&self.format_diagnostic(diagnostic));
                        output.push('\n');
                    }
                    if let ValidationStatus::Error { .. } = file_result.status {
                        output.push_str(&self.format_file_result(file_result));
                        output.push('\n');
                    }
                }
            }
            VerbosityLevel::Normal | VerbosityLevel::Verbose | VerbosityLevel::Debug => {
                for file_result in &results.file_results {
                    if self.verbosity >= VerbosityLevel::Verbose || !file_result.status.is_valid()
                    {
                        output.push_str(&self.format_file_result(file_result));
                        output.push('\n');
                    }
                    for diagnostic in &file_result.diagnostics {
                        output.push_str("  ");
                        output.push_str(&self.format_diagnostic(diagnostic));
                        output.push('\n');
                    }
                }
                output.push_str(&self.format_summary(results));
            }
        }

        output
    }

    /// `SEVERITY path:line:col message [fix: kind -> suggestion]`
    pub fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let mut line = format!(
            "{} {}:{}:{} {}",
            self.colorize(&diagnostic.severity.to_string(), Self::severity_color(diagnostic.severity)),
            display_uri(diagnostic.anchor.uri.as_deref()),
            diagnostic.anchor.span.line,
            diagnostic.anchor.span.column,
            diagnostic.message
        );
        if diagnostic.fix.kind != QuickFixKind::None {
            match &diagnostic.fix.best_match {
                Some(best_match) => {
                    line.push_str(&format!(" [fix: {:?} -> {}]", diagnostic.fix.kind, best_match))
                }
                None => line.push_str(&format!(" [fix: {:?}]", diagnostic.fix.kind)),
            }
        }
        line
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let mut line = match &result.status {
            ValidationStatus::Valid => {
                format!("{}  {}", self.colorize("✓ VALID", "32"), path_display)
            }
            ValidationStatus::Warnings { count } => format!(
                "{}  {} - {} diagnostic{}",
                self.colorize("✓ VALID", "32"),
                path_display,
                count,
                if *count == 1 { "" } else { "s" }
            ),
            ValidationStatus::Invalid { error_count } => format!(
                "{}  {} - {} error{}",
                self.colorize("✗ INVALID", "31"),
                path_display,
                error_count,
                if *error_count == 1 { "" } else { "s" }
            ),
            ValidationStatus::Error { message } => format!(
                "{}  {} - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                message
            ),
            ValidationStatus::Skipped { reason } => format!(
                "{}  {} - {}",
                self.colorize("- SKIPPED", "36"),
                path_display,
                reason
            ),
        };

        if self.verbosity >= VerbosityLevel::Verbose {
            line.push_str(&format!(
                " ({}, {} document{})",
                format_duration(result.duration),
                result.documents,
                if result.documents == 1 { "" } else { "s" }
            ));
        }
        line
    }

    pub fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Aborted:", "33"),
                results.error_files
            ));
        }
        if results.skipped_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_files
            ));
        }

        output.push_str(&format!(
            "  Diagnostics: {} error(s), {} warning(s), {} info\n",
            results.errors, results.warnings, results.infos
        ));
        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str(&format!(
                "  Average per file: {}\n",
                format_duration(results.average_duration)
            ));
        }

        output
    }
}

fn display_uri(uri: Option<&Path>) -> String {
    uri.map(|p| p.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string())
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    total_files: usize,
    valid_files: usize,
    invalid_files: usize,
    error_files: usize,
    skipped_files: usize,
    errors: usize,
    warnings: usize,
    infos: usize,
    duration_ms: u128,
    files: Vec<JsonFile<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonFile<'a> {
    path: &'a Path,
    status: &'a ValidationStatus,
    documents: usize,
    duration_ms: u128,
    diagnostics: Vec<JsonDiagnostic<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonDiagnostic<'a> {
    severity: Severity,
    message: &'a str,
    file: Option<&'a PathBuf>,
    line: u32,
    column: u32,
    locator: &'a str,
    element: &'a str,
    attribute: Option<&'a str>,
    fix: JsonFix<'a>,
}

#[derive(Debug, Serialize)]
struct JsonFix<'a> {
    kind: QuickFixKind,
    ordinal: u8,
    best_match: Option<&'a str>,
    element: Option<&'a str>,
    attribute: Option<&'a str>,
    reference: Option<&'a str>,
    offset: Option<usize>,
    extensions: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a Diagnostic> for JsonDiagnostic<'a> {
    fn from(diagnostic: &'a Diagnostic) -> Self {
        let fix = &diagnostic.fix;
        Self {
            severity: diagnostic.severity,
            message: &diagnostic.message,
            file: diagnostic.anchor.uri.as_ref(),
            line: diagnostic.anchor.span.line,
            column: diagnostic.anchor.span.column,
            locator: &diagnostic.anchor.locator,
            element: &diagnostic.anchor.element,
            attribute: diagnostic.anchor.attribute.as_deref(),
            fix: JsonFix {
                kind: fix.kind,
                ordinal: fix.kind.ordinal(),
                best_match: fix.best_match.as_deref(),
                element: fix.element.as_deref(),
                attribute: fix.attribute.as_deref(),
                reference: fix.reference.as_deref(),
                offset: fix.offset,
                extensions: &fix.extensions,
            },
        }
    }
}

/// Pretty-printed JSON report of every file and diagnostic
pub fn format_json(results: &ValidationResults) -> serde_json::Result<String> {
    let report = JsonReport {
        total_files: results.total_files,
        valid_files: results.valid_files,
        invalid_files: results.invalid_files,
        error_files: results.error_files,
        skipped_files: results.skipped_files,
        errors: results.errors,
        warnings: results.warnings,
        infos: results.infos,
        duration_ms: results.total_duration.as_millis(),
        files: results
            .file_results
            .iter()
            .map(|file| JsonFile {
                path: &file.path,
                status: &file.status,
                documents: file.documents,
                duration_ms: file.duration.as_millis(),
                diagnostics: file.diagnostics.iter().map(JsonDiagnostic::from).collect(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
