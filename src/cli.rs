use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show errors
    Quiet,
    /// Show every diagnostic and the summary
    #[default]
    Normal,
    /// Also show per-file timings and document counts
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// How validation results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per diagnostic followed by a summary
    #[default]
    Human,
    /// Machine-readable diagnostics including quick-fix payloads
    Json,
    /// Counts only
    Summary,
}

/// Merge and validate Liberty server configurations
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-server-xml")]
#[command(about = "Merge server.xml with its includes and dropins and validate the effective configuration")]
#[command(version)]
pub struct Cli {
    /// Server configuration file, or a directory to scan for them
    #[arg(help = "Configuration file or directory to validate")]
    pub path: PathBuf,

    /// File names treated as top-level configurations (comma-separated)
    #[arg(
        short = 'n',
        long = "file-names",
        value_delimiter = ',',
        help = "File names to discover when scanning a directory (e.g., 'server.xml')"
    )]
    pub file_names: Vec<String>,

    /// Number of concurrent validation threads
    #[arg(
        short = 't',
        long = "threads",
        help = "Number of concurrent validation threads"
    )]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    #[arg(short = 'f', long = "format", value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Tool configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Schema catalog replacing the built-in one
    #[arg(long = "schema")]
    pub schema: Option<PathBuf>,

    /// Feature catalog replacing the built-in one
    #[arg(long = "features")]
    pub features: Option<PathBuf>,

    /// Configuration directory of the server owning PATH
    #[arg(long = "server-dir")]
    pub server_dir: Option<PathBuf>,

    /// Liberty user directory (`${wlp.user.dir}`)
    #[arg(long = "user-dir")]
    pub user_dir: Option<PathBuf>,

    /// Runtime variable definition, repeatable
    #[arg(
        long = "var",
        value_name = "NAME=VALUE",
        value_parser = parse_variable,
        action = clap::ArgAction::Append
    )]
    pub variables: Vec<(String, String)>,

    /// Ignore-filter store
    #[arg(long = "filters")]
    pub filters: Option<PathBuf>,

    /// Minimum similarity for suggestions, in (0, 1]
    #[arg(long = "fuzzy-threshold")]
    pub fuzzy_threshold: Option<f64>,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Show progress indicators
    #[arg(long = "progress")]
    pub progress: bool,

    /// Skip remaining files after the first one with an error
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,
}

/// Parse a `NAME=VALUE` variable definition
pub fn parse_variable(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{}'", raw));
    }
    Ok((name.to_string(), value.to_string()))
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if let Some(dir) = &self.server_dir
            && !dir.is_dir()
        {
            return Err(format!("Server directory does not exist: {}", dir.display()));
        }
        Ok(())
    }

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
