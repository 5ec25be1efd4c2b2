//! Command-line interface for the tab list host.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments. Every option overrides the matching config file setting.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Override for the scheduler tick interval in milliseconds
    pub tick_ms: Option<u64>,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("tablist")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Tab list synchronization host: renders templates and streams updates per player")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("tablist.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("tick-ms")
                    .short('t')
                    .long("tick-ms")
                    .value_name("MILLIS")
                    .help("Scheduler tick interval in milliseconds")
                    .value_parser(clap::value_parser!(u64)),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tablist.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            tick_ms: matches.get_one::<u64>("tick-ms").copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(CliArgs::command().get_matches_from(args))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["tablist"]);
        assert_eq!(args.config_path, PathBuf::from("tablist.toml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert_eq!(args.tick_ms, None);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&["tablist", "-c", "net.toml", "--log-level", "debug", "--json-logs", "--tick-ms", "25"]);
        assert_eq!(args.config_path, PathBuf::from("net.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.tick_ms, Some(25));
    }

    #[test]
    fn test_rejects_non_numeric_tick() {
        let result = CliArgs::command().try_get_matches_from(["tablist", "--tick-ms", "fast"]);
        assert!(result.is_err());
    }
}
