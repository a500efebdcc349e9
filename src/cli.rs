//! Command-line interface definitions.
//!
//! The CLI stays thin on purpose: everything that shapes a run lives in
//! the YAML configuration file, and the flags here only say where that
//! file is and optionally redirect the output directories.

use clap::Parser;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Default config.yaml in the working directory
/// nvd_watch
///
/// # Explicit config and redirected outputs
/// nvd_watch -c /etc/nvd_watch.yaml --json-dir /var/lib/nvd_watch/json
/// ```
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "NVD_WATCH_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Override the configured directory for structured JSON dumps
    #[arg(long)]
    pub json_dir: Option<String>,

    /// Override the configured directory for human-readable reports
    #[arg(long)]
    pub report_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["nvd_watch"]);
        assert_eq!(cli.config, "config.yaml");
        assert!(cli.json_dir.is_none());
        assert!(cli.report_dir.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "nvd_watch",
            "-c",
            "/etc/nvd_watch.yaml",
            "--json-dir",
            "/tmp/json",
            "--report-dir",
            "/tmp/result",
        ]);
        assert_eq!(cli.config, "/etc/nvd_watch.yaml");
        assert_eq!(cli.json_dir.as_deref(), Some("/tmp/json"));
        assert_eq!(cli.report_dir.as_deref(), Some("/tmp/result"));
    }
}
