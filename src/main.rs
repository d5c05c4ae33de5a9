use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use validate_server_xml::{
    Cli, ConfigManager, ErrorReporter, Output, ProgressCallback, ValidationEngine, ValidationPhase,
    VerbosityLevel,
};

fn default_log_filter(verbosity: VerbosityLevel) -> &'static str {
    match verbosity {
        VerbosityLevel::Quiet => "validate_server_xml=error",
        VerbosityLevel::Normal => "validate_server_xml=warn",
        VerbosityLevel::Verbose => "validate_server_xml=info",
        VerbosityLevel::Debug => "validate_server_xml=debug",
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(cli.verbosity()).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let reporter = ErrorReporter::new(cli.verbosity());
    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return Ok(ExitCode::FAILURE);
    }

    let config = match ConfigManager::load_config(&cli).await {
        Ok(config) => config,
        Err(err) => {
            reporter.report_config_error(&err);
            return Ok(ExitCode::FAILURE);
        }
    };
    debug!(?config, "effective configuration");

    let verbosity = config.output.verbosity();
    let reporter = ErrorReporter::new(verbosity).with_timestamps(verbosity >= VerbosityLevel::Verbose);

    let services = match ConfigManager::build_services(&config, &cli.path) {
        Ok(services) => services,
        Err(err) => {
            reporter.report_validation_error(&err);
            return Ok(ExitCode::FAILURE);
        }
    };
    let discovery = match ConfigManager::file_discovery(&config) {
        Ok(discovery) => discovery,
        Err(err) => {
            reporter.report_validation_error(&err);
            return Ok(ExitCode::FAILURE);
        }
    };
    let engine = ValidationEngine::new(services, ConfigManager::engine_config(&config));

    let progress: Option<ProgressCallback> = config.validation.show_progress.then(|| {
        let progress_reporter = ErrorReporter::new(verbosity);
        Arc::new(move |update: validate_server_xml::ValidationProgress| {
            if update.phase == ValidationPhase::Validation {
                progress_reporter.report_progress(
                    update.completed,
                    update.total,
                    update.current_file.as_deref(),
                );
            }
        }) as ProgressCallback
    });

    let results = match engine
        .validate_path_with_progress(&cli.path, &discovery, progress)
        .await
    {
        Ok(results) => results,
        Err(err) => {
            reporter.report_validation_error(&err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let output = Output::new(verbosity).with_format(config.output.format.into());
    let rendered = output
        .render(&results)
        .context("failed to render validation results")?;
    if rendered.ends_with('\n') {
        print!("{}", rendered);
    } else {
        println!("{}", rendered);
    }

    if results.has_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
