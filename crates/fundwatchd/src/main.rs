use anyhow::{Context, Result};
use fundwatch_config::{
    apply_env_overrides, config_path, ensure_workspace_config, load_workspace_config,
    validate_config,
};
use fundwatchd::cli::{Cli, Commands, LogFormat, ServeArgs, parse_cli};
use fundwatchd::daemon;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tower_http=info";

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);
    run(cli)
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Human => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;
    let overrides = cli.provider_overrides();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Serve(ServeArgs::default()));

    let config = match command {
        Commands::Status => load_workspace_config(&workspace),
        _ => ensure_workspace_config(&workspace),
    }
    .with_context(|| {
        format!(
            "failed to load workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    let config = apply_env_overrides(config, |name| std::env::var(name).ok());
    for warning in validate_config(&config) {
        eprintln!(
            "FUNDWATCH config warning [{}]: {}",
            warning.code, warning.message
        );
    }

    if let Commands::Status = command {
        return match daemon::snapshot_summary(&workspace, &config)? {
            Some(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                Ok(())
            }
            None => {
                eprintln!("no snapshot at {}", config.storage.snapshot_path);
                std::process::exit(1);
            }
        };
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match command {
        Commands::RunOnce => {
            let result = runtime.block_on(daemon::run_once(&workspace, &config, overrides))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve(args) => {
            runtime.block_on(daemon::serve(&workspace, config, overrides, args.bind))
        }
        Commands::Status => Ok(()),
    }
}
