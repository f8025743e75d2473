//! Command handlers
//!
//! Each handler prints its own output and returns the exit code; errors
//! bubble up to `main` where they are mapped by [`crate::errors::exit_code`].

use crate::cli::{DiagnoseArgs, OutputFormat};
use crate::errors::{CliError, EXIT_SUCCESS};
use crate::output;
use anyhow::{Context, Result};
use dms_doctor::{DiagnosticSession, DoctorConfig, TelemetryBundle};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Read a telemetry bundle from disk
pub fn load_bundle(path: &Path) -> Result<TelemetryBundle> {
    let content = fs::read_to_string(path).map_err(|source| CliError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    let bundle: TelemetryBundle = serde_json::from_str(&content).map_err(|source| CliError::ParseInput {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), payloads = bundle.payloads.len(), "bundle loaded");
    Ok(bundle)
}

/// Command-line overrides on top of the file configuration
pub fn apply_overrides(config: &mut DoctorConfig, args: &DiagnoseArgs) -> Result<()> {
    if let Some(min_confidence) = args.min_confidence {
        if !min_confidence.is_finite() || !(0.0..=1.0).contains(&min_confidence) {
            return Err(CliError::InvalidArgument(format!(
                "--min-confidence must be within [0, 1], got {}",
                min_confidence
            ))
            .into());
        }
        config.min_confidence = min_confidence;
    }
    if let Some(max_hypotheses) = args.max_hypotheses {
        if max_hypotheses == 0 {
            return Err(CliError::InvalidArgument("--max-hypotheses must be at least 1".to_string()).into());
        }
        config.max_hypotheses = max_hypotheses;
    }
    Ok(())
}

/// `dmsctl diagnose`
pub async fn diagnose(mut config: DoctorConfig, args: &DiagnoseArgs) -> Result<i32> {
    apply_overrides(&mut config, args)?;
    let bundle = load_bundle(&args.input)?;

    let mut request = bundle.request;
    if let Some(task) = &args.task {
        request.task_id = task.clone();
    }

    let mut session = DiagnosticSession::new(request, &config).context("cannot start diagnosis")?;
    session.ingest(&bundle.payloads);

    let diagnosis = if args.parallel {
        session.diagnose_parallel().await?
    } else {
        session.diagnose()?
    };
    info!(
        verdict = %diagnosis.report.verdict,
        causes = diagnosis.report.causes.len(),
        "report ready"
    );

    let color = args.format == OutputFormat::Text && output::use_color();
    print!("{}", output::render_report(&diagnosis.report, args.format, color)?);
    Ok(EXIT_SUCCESS)
}

/// `dmsctl rules`
pub fn rules(config: &DoctorConfig, json: bool) -> Result<i32> {
    let rule_set = config.resolve_rule_set()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rule_set.to_library())?);
    } else {
        print!("{}", output::render_rules(&rule_set, output::use_color()));
    }
    Ok(EXIT_SUCCESS)
}

/// `dmsctl check-config`
pub fn check_config(config: &DoctorConfig) -> Result<i32> {
    let rule_set = config.resolve_rule_set()?;
    println!(
        "[OK] configuration valid: {} rules, {} causes",
        rule_set.len(),
        rule_set.causes().count()
    );
    println!();
    print!("{}", config.to_toml()?);
    Ok(EXIT_SUCCESS)
}
