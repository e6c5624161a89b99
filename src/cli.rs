// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `tracewatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tracewatch",
    version,
    about = "Detect newly created trace events and run a workflow once per event.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Tracewatch.toml` in the current working directory. The
    /// default file may be absent, in which case built-in defaults and
    /// `TRACEWATCH_*` environment overrides apply.
    #[arg(long, value_name = "PATH", default_value = "Tracewatch.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRACEWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the configured change sources and run until Ctrl-C.
    Run,

    /// Claim and dispatch one event by id, wait for its workflow and print
    /// the outcome.
    Trigger {
        /// Event id as stored (e.g. `evt-42`).
        id: String,
    },

    /// Validate the config and print the effective settings.
    Check,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_with_global_flags() {
        let args = CliArgs::try_parse_from([
            "tracewatch",
            "--config",
            "conf/T.toml",
            "--log-level",
            "debug",
            "trigger",
            "evt-1",
        ])
        .unwrap();

        assert_eq!(args.config, "conf/T.toml");
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, Command::Trigger { ref id } if id == "evt-1"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["tracewatch"]).is_err());
        let args = CliArgs::try_parse_from(["tracewatch", "check"]).unwrap();
        assert_eq!(args.config, "Tracewatch.toml");
        assert!(matches!(args.command, Command::Check));
    }
}
