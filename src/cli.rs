//! CLI argument definitions using clap derive macros.

use clap::Parser;

use zurl_core::config::CLI_DEFAULT_TIMEOUT_SECS;

/// Poll an HTTP endpoint until its response meets an expectation.
///
/// Exactly one of --expect-statuscode, --expect-header or --expect-json must be
/// given. Exits 0 once the expectation is met and 1 otherwise.
#[derive(Parser, Debug)]
#[command(name = "zurl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Request method (only GET can be retried)
    #[arg(short, long, default_value = "GET")]
    pub method: String,

    /// Target URL
    #[arg(long)]
    pub url: String,

    /// Retries after the first attempt (0 = keep retrying until matched)
    #[arg(short, long, default_value_t = 0)]
    pub retry: u32,

    /// Seconds to wait between attempts
    #[arg(short, long, default_value_t = 1)]
    pub interval: u64,

    /// Request header as KEY=VALUE (repeatable)
    #[arg(long = "add-header", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub add_header: Vec<(String, String)>,

    /// Query parameter as KEY=VALUE (repeatable)
    #[arg(long = "add-query", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub add_query: Vec<(String, String)>,

    /// Expected response status code
    #[arg(short = 's', long = "expect-statuscode")]
    pub expect_statuscode: Option<u16>,

    /// Expected response header as NAME=VALUE (repeatable)
    #[arg(long = "expect-header", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    pub expect_header: Vec<(String, String)>,

    /// Expected JSON body value as PATH=VALUE (repeatable)
    #[arg(long = "expect-json", value_name = "PATH=VALUE", value_parser = parse_key_val)]
    pub expect_json: Vec<(String, String)>,

    /// Trace requests (DNS, connection, timing) at debug level
    #[arg(short, long)]
    pub debug: bool,

    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = CLI_DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

/// Splits `KEY=VALUE` at the first `=`. The value may be empty.
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const URL: [&str; 3] = ["zurl", "--url", "https://example.com"];

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(URL.iter().chain(extra).copied())
    }

    #[test]
    fn test_cli_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.method, "GET");
        assert_eq!(args.url, "https://example.com");
        assert_eq!(args.retry, 0);
        assert_eq!(args.interval, 1);
        assert_eq!(args.timeout, 3600);
        assert!(args.expect_statuscode.is_none());
        assert!(args.add_header.is_empty());
        assert!(!args.debug);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_url_is_required() {
        let err = Args::try_parse_from(["zurl"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_short_flags() {
        let args = parse(&["-m", "post", "-r", "5", "-i", "2", "-s", "200", "-d", "-vv"]).unwrap();
        assert_eq!(args.method, "post");
        assert_eq!(args.retry, 5);
        assert_eq!(args.interval, 2);
        assert_eq!(args.expect_statuscode, Some(200));
        assert!(args.debug);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_repeatable_key_value_flags() {
        let args = parse(&[
            "--add-header",
            "A=a",
            "--add-header",
            "Authorization=Bearer x=y",
            "--add-query",
            "b=",
            "--expect-json",
            "args.a=1",
        ])
        .unwrap();
        assert_eq!(
            args.add_header,
            vec![
                ("A".to_string(), "a".to_string()),
                ("Authorization".to_string(), "Bearer x=y".to_string())
            ]
        );
        assert_eq!(args.add_query, vec![("b".to_string(), String::new())]);
        assert_eq!(args.expect_json, vec![("args.a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_cli_malformed_key_value_rejected() {
        let err = parse(&["--expect-header", "no-equals-sign"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let err = parse(&["--add-query", "=value"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_status_code_must_be_numeric() {
        let err = parse(&["-s", "ok"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["zurl", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["zurl", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
