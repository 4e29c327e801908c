mod cli;
mod commands;
mod error;
mod output;

use clap::{CommandFactory, Parser, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use myhome_config::Config;

use crate::cli::{Cli, Command, GlobalOpts, LogFormat, OutputFormat};
use crate::error::CliError;
use crate::output::Printer;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The daemon narrates at info; client commands stay quiet.
    let default_level = match cli.command {
        Command::Daemon(_) => "info",
        _ => "warn",
    };
    let guard = init_tracing(&cli.global, default_level);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
}

fn init_tracing(global: &GlobalOpts, default_level: &str) -> Option<WorkerGuard> {
    let level = match global.verbose {
        0 => default_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match &global.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "myhome.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(global.log_dir.is_none())
        .with_writer(writer);
    match global.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    guard
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "myhome", &mut std::io::stdout());
            Ok(())
        }

        // Config commands must work when the file is missing or broken.
        Command::Config(args) => commands::config_cmd::handle(args, &global),

        command => {
            let cfg = load(&global)?;
            match command {
                Command::Daemon(args) => commands::daemon::run(args, &cfg).await,
                other => {
                    let printer = printer(&global, &cfg)?;
                    tracing::debug!(command = ?other, "dispatching command");
                    commands::dispatch(other, &cfg, &global, printer).await
                }
            }
        }
    }
}

/// The config file and `MYHOME_*` environment, then command-line overrides.
fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = myhome_config::load_config(global.config.as_deref())?;
    if let Some(broker) = &global.broker {
        cfg.mqtt_broker.clone_from(broker);
    }
    Ok(cfg)
}

fn printer(global: &GlobalOpts, cfg: &Config) -> Result<Printer, CliError> {
    let format = match global.output {
        Some(format) => format,
        None => OutputFormat::from_str(&cfg.output, true).map_err(|reason| CliError::Validation {
            field: "output".into(),
            reason,
        })?,
    };
    Ok(Printer {
        format,
        color: output::should_color(global.color),
        quiet: global.quiet,
    })
}
