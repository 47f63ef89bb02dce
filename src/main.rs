use anyhow::Result;
use clap::{CommandFactory, Parser};
use keyshift::app::{ShiftOptions, run_info, run_ratio, run_shift};
use keyshift::cli::{Cli, Commands, ConfigAction};
use keyshift::config::Config;
use keyshift::output::render_error;
use keyshift::stretch::ShiftParams;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!("keyshift {}", keyshift::version_string());

    if let Err(e) = run(cli).await {
        render_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-q`/`-v` pick the keyshift level.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("keyshift={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Shift {
            input,
            output,
            semitones,
            tempo,
            timeout,
            force,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_shift(
                config,
                ShiftOptions {
                    input,
                    output,
                    params: ShiftParams::new(semitones, tempo),
                    timeout,
                    force,
                    quiet: cli.quiet,
                },
            )
            .await?;
        }
        Commands::Info { input } => {
            run_info(&input).await?;
        }
        Commands::Ratio { semitones } => {
            run_ratio(semitones)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keyshift", &mut std::io::stdout());
        }
    }
    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/keyshift/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
