//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// DMS Doctor CLI
#[derive(Parser, Debug)]
#[command(name = "dmsctl")]
#[command(about = "Root-cause diagnosis for DMS replication tasks", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $DMS_DOCTOR_CONFIG and defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Diagnose a task from a telemetry bundle
    Diagnose(DiagnoseArgs),

    /// List causes and rules of the active library
    Rules {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[derive(clap::Args, Debug)]
pub struct DiagnoseArgs {
    /// Telemetry bundle (JSON): task_id, optional window, payloads
    #[arg(long, short)]
    pub input: PathBuf,

    /// Override the bundle's task id
    #[arg(long)]
    pub task: Option<String>,

    /// Reporting floor (0.0 - 1.0)
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Maximum causes in the report
    #[arg(long)]
    pub max_hypotheses: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Evaluate rules on parallel workers
    #[arg(long)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Markdown,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_diagnose() {
        let cli = Cli::parse_from([
            "dmsctl",
            "diagnose",
            "--input",
            "bundle.json",
            "--format",
            "markdown",
            "--min-confidence",
            "0.5",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Diagnose(args) => {
                assert_eq!(args.input, PathBuf::from("bundle.json"));
                assert_eq!(args.format, OutputFormat::Markdown);
                assert_eq!(args.min_confidence, Some(0.5));
                assert!(!args.parallel);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_config() {
        let cli = Cli::parse_from(["dmsctl", "check-config", "--config", "doctor.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("doctor.toml")));
        assert!(matches!(cli.command, Commands::CheckConfig));
    }
}
