mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use captive_core::{
    FileTransfer, Orchestrator, RestFileTransfer, RestTransport, SimulatedDevice, Transport,
};

use crate::cli::{Cli, Command, LogFormat};
use crate::commands::Context;
use crate::config::ProfileDirectory;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a router
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "captive", &mut std::io::stdout());
            Ok(())
        }

        cmd => {
            let cfg = captive_config::load_config()?;
            let engine = captive_config::engine_config(&cfg)?;

            let sim = cli.global.dry_run.then(SimulatedDevice::router);
            let (transport, files): (Arc<dyn Transport>, Arc<dyn FileTransfer>) = match sim {
                Some(ref device) => (Arc::new(device.clone()), Arc::new(device.clone())),
                None => (
                    Arc::new(RestTransport),
                    Arc::new(
                        engine
                            .transfer_timeout
                            .map(RestFileTransfer::new)
                            .unwrap_or_default(),
                    ),
                ),
            };
            let save_to = (!cli.global.dry_run).then(config::config_path);
            let directory = Arc::new(ProfileDirectory::new(cfg.clone(), &cli.global, save_to));
            let orchestrator = Orchestrator::new(engine, transport, files, directory);

            // First Ctrl-C cancels and lets open sessions close; the second exits.
            let on_interrupt = orchestrator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, closing the router session (Ctrl-C again to exit)");
                    on_interrupt.shutdown();
                    if tokio::signal::ctrl_c().await.is_ok() {
                        std::process::exit(error::exit_code::INTERRUPTED);
                    }
                }
            });

            let ctx = Context {
                orchestrator,
                config: cfg,
                global: &cli.global,
            };
            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &ctx).await?;

            if let Some(device) = sim {
                commands::print_dry_run(&device, &cli.global);
            }
            Ok(())
        }
    }
}
