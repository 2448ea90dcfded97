mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "fdrelay",
    version,
    about = "Relay named channels received as file descriptors"
)]
struct Cli {
    /// Output format for relay events (stdout).
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). FDRELAY_LOG takes precedence when set.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relay_subcommand_with_defaults() {
        let cli = Cli::try_parse_from(["fdrelay", "relay"]).expect("relay args should parse");

        let Command::Relay(args) = cli.command else {
            panic!("expected relay command");
        };
        assert_eq!(args.fd, 0);
        assert!(args.bind.is_none());
        assert_eq!(args.channels, ["parent"]);
        assert_eq!(args.reply_prefix, "pong ");
        assert_eq!(args.shutdown_keyword, "exit");
    }

    #[test]
    fn parses_channel_list() {
        let cli = Cli::try_parse_from(["fdrelay", "relay", "--channels", "parent,logs"])
            .expect("channel list should parse");
        let Command::Relay(args) = cli.command else {
            panic!("expected relay command");
        };
        assert_eq!(args.channels, ["parent", "logs"]);
    }

    #[test]
    fn rejects_fd_together_with_bind() {
        let err = Cli::try_parse_from([
            "fdrelay",
            "relay",
            "--fd",
            "3",
            "--bind",
            "/tmp/fdrelay.sock",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_version_subcommand() {
        let cli = Cli::try_parse_from(["fdrelay", "version", "--extended"])
            .expect("version args should parse");
        assert!(matches!(cli.command, Command::Version(args) if args.extended));
    }
}
