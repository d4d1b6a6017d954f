//! Minimal CLI parsing for run overrides.

use std::env;
use std::time::Duration;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Run a single scan and exit
    pub once: bool,
    pub dry_run: bool,
    pub interval_override: Option<Duration>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--once" => options.once = true,
                "--dry-run" => options.dry_run = true,
                "--interval" => {
                    if let Some(value) = args.next() {
                        options.interval_override = parse_secs(&value);
                    }
                }
                _ if arg.starts_with("--interval=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.interval_override = parse_secs(value);
                    }
                }
                _ => {}
            }
        }
        options
    }
}

fn parse_secs(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_flags() {
        assert_eq!(parse(&[]), CliOptions::default());
        let options = parse(&["--once", "--dry-run"]);
        assert!(options.once);
        assert!(options.dry_run);
    }

    #[test]
    fn test_interval_forms() {
        assert_eq!(parse(&["--interval", "60"]).interval_override, Some(Duration::from_secs(60)));
        assert_eq!(parse(&["--interval=120"]).interval_override, Some(Duration::from_secs(120)));
        assert_eq!(parse(&["--interval", "often"]).interval_override, None);
        assert_eq!(parse(&["--interval"]).interval_override, None);
    }

    #[test]
    fn test_unknown_arguments_are_ignored() {
        assert_eq!(parse(&["--verbose", "extra"]), CliOptions::default());
    }
}
