//! Error codes and exit status for dmsctl
//!
//! Codes follow sysexits(3) where one fits.

use dms_doctor::DoctorError;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for success, inconclusive diagnoses included
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Exit code when the telemetry bundle cannot be read or parsed (EX_DATAERR)
pub const EXIT_INVALID_INPUT: i32 = 65;

/// Exit code when every telemetry fetch failed or returned nothing (EX_NOINPUT)
pub const EXIT_NO_EVIDENCE: i32 = 66;

/// Exit code for configuration and rule library errors (EX_CONFIG)
pub const EXIT_CONFIG_ERROR: i32 = 78;

/// Failures that belong to the CLI rather than the engine
#[derive(Error, Debug)]
pub enum CliError {
    #[error("cannot read input {}: {source}", .path.display())]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid telemetry bundle {}: {source}", .path.display())]
    ParseInput {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Map an error chain to a process exit code
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return match cli {
                CliError::ReadInput { .. } | CliError::ParseInput { .. } => EXIT_INVALID_INPUT,
                CliError::InvalidArgument(_) => EXIT_CONFIG_ERROR,
            };
        }
        if let Some(doctor) = cause.downcast_ref::<DoctorError>() {
            return doctor_exit_code(doctor);
        }
    }
    EXIT_GENERAL_ERROR
}

fn doctor_exit_code(err: &DoctorError) -> i32 {
    match err {
        DoctorError::NoEvidenceCollected { .. } => EXIT_NO_EVIDENCE,
        e if e.is_configuration() => EXIT_CONFIG_ERROR,
        DoctorError::Json(_) => EXIT_INVALID_INPUT,
        _ => EXIT_GENERAL_ERROR,
    }
}
