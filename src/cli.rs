use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "remedy",
    about = "Remedy - vulnerability risk prioritization and safe dependency remediation",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Write JSON results to this file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Worker threads for bulk assessment (0 = auto-detect)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Python interpreter used to drive pip
    #[arg(long, global = true)]
    pub python: Option<String>,

    /// Upper bound for one restore strategy, in seconds
    #[arg(long, global = true)]
    pub strategy_timeout: Option<u64>,

    /// Enable verbose logging of all operations
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Score every vulnerability in a scan, highest risk first
    Assess {
        /// JSON array of vulnerabilities, or a scan report
        input: PathBuf,
    },

    /// Group vulnerabilities by priority and summarise them
    Prioritize {
        /// JSON array of vulnerabilities, or a scan report
        input: PathBuf,
    },

    /// Compare scan reports over time
    Trends {
        /// Scan report files, or files holding arrays of reports
        #[arg(required = true)]
        reports: Vec<PathBuf>,
    },

    /// Show the risk profile the assessor uses for a package
    Profile { package: String },

    /// Classify a restore or install error message
    AnalyzeError {
        message: String,

        /// Packages that failed, comma separated
        #[arg(long, value_delimiter = ',')]
        packages: Vec<String>,
    },

    /// Snapshot the current environment into a persistent backup directory
    Backup,

    /// Restore the environment from a backup directory
    Restore {
        backup: PathBuf,

        /// Keep the backup directory after restoring
        #[arg(long)]
        keep: bool,
    },

    /// Upgrade a package, rolling back if the install or the test command fails
    Upgrade {
        package: String,
        version: String,

        /// Shell command that must succeed after the upgrade
        #[arg(long)]
        test_command: Option<String>,
    },

    /// Apply the recommended fix for one vulnerability from a scan
    Fix {
        /// JSON array of vulnerabilities, or a scan report
        input: PathBuf,

        /// Vulnerability id to fix
        #[arg(long)]
        id: String,

        /// Shell command that must succeed after the upgrade
        #[arg(long)]
        test_command: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Assess { .. } => "assess",
            Command::Prioritize { .. } => "prioritize",
            Command::Trends { .. } => "trends",
            Command::Profile { .. } => "profile",
            Command::AnalyzeError { .. } => "analyze-error",
            Command::Backup => "backup",
            Command::Restore { .. } => "restore",
            Command::Upgrade { .. } => "upgrade",
            Command::Fix { .. } => "fix",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "remedy",
            "restore",
            "/tmp/remedy_backup_x",
            "--keep",
            "--strategy-timeout",
            "60",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        assert_eq!(args.strategy_timeout, Some(60));
        assert!(matches!(args.command, Command::Restore { keep: true, .. }));
    }

    #[test]
    fn test_analyze_error_packages() {
        let args = Args::try_parse_from([
            "remedy",
            "analyze-error",
            "Connection refused",
            "--packages",
            "requests,urllib3",
        ])
        .unwrap();
        match args.command {
            Command::AnalyzeError { message, packages } => {
                assert_eq!(message, "Connection refused");
                assert_eq!(packages, vec!["requests", "urllib3"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_trends_requires_reports() {
        assert!(Args::try_parse_from(["remedy", "trends"]).is_err());
    }
}
