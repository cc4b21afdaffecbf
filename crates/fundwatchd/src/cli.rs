use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fundwatch_config::ExtractionProviderKind;
use fundwatch_infer::ProviderOverrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Args)]
pub struct ServeArgs {
    #[arg(long, help = "Address to bind the HTTP server to (overrides server.bind)")]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run the scheduler, the run worker and the HTTP trigger server
    Serve(ServeArgs),
    /// Run the pipeline once in the foreground and print the result
    RunOnce,
    /// Print a summary of the current snapshot
    Status,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Scheduled funding data ingestion daemon")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .fundwatch/config.toml and the snapshot"
    )]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(long, global = true, value_parser = parse_extraction_provider)]
    pub extraction_provider: Option<ExtractionProviderKind>,

    #[arg(long, global = true)]
    pub extraction_model: Option<String>,

    #[arg(long, global = true)]
    pub extraction_endpoint: Option<String>,

    #[arg(long, global = true)]
    pub extraction_api_key_env: Option<String>,
}

impl Cli {
    pub fn provider_overrides(&self) -> ProviderOverrides {
        ProviderOverrides {
            provider: self.extraction_provider,
            model: self.extraction_model.clone(),
            endpoint: self.extraction_endpoint.clone(),
            api_key_env: self.extraction_api_key_env.clone(),
        }
    }
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_extraction_provider(value: &str) -> Result<ExtractionProviderKind, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use fundwatch_config::ExtractionProviderKind;

    use super::{Cli, Commands, LogFormat};

    #[test]
    fn no_subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from(["fundwatchd"]).expect("bare invocation should parse");

        assert!(cli.command.is_none());
        assert_eq!(cli.log_format, LogFormat::Human);
        assert_eq!(cli.workspace.to_str(), Some("."));
    }

    #[test]
    fn serve_accepts_bind_and_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fundwatchd",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--workspace",
            "/srv/site",
            "--log-format",
            "json",
        ])
        .expect("serve flags should parse");

        match &cli.command {
            Some(Commands::Serve(args)) => assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000")),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.log_format.as_str(), "json");
        assert_eq!(cli.workspace.to_str(), Some("/srv/site"));
    }

    #[test]
    fn run_once_collects_provider_overrides() {
        let cli = Cli::try_parse_from([
            "fundwatchd",
            "--extraction-provider",
            "markup",
            "--extraction-model",
            "m1",
            "run-once",
        ])
        .expect("run-once should parse");

        assert_eq!(cli.command, Some(Commands::RunOnce));
        let overrides = cli.provider_overrides();
        assert_eq!(overrides.provider, Some(ExtractionProviderKind::Markup));
        assert_eq!(overrides.model.as_deref(), Some("m1"));
        assert_eq!(overrides.endpoint, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["fundwatchd", "--log-format", "xml"]).is_err());
        assert!(Cli::try_parse_from(["fundwatchd", "--extraction-provider", "gpt"]).is_err());
    }
}
