//! Command dispatch: bridges CLI args -> orchestrator calls -> output formatting.

pub mod access;
pub mod config_cmd;
pub mod portal;
pub mod provision;
pub mod util;

use captive_config::Config;
use captive_core::{DeviceConfig, Orchestrator, SimulatedDevice};

use crate::cli::{Command, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

/// What every router-bound handler needs.
pub struct Context<'a> {
    pub orchestrator: Orchestrator,
    pub config: Config,
    pub global: &'a GlobalOpts,
}

impl Context<'_> {
    /// The active profile's router, with CLI overrides applied.
    pub fn device(&self) -> Result<(String, DeviceConfig), CliError> {
        config::resolve_device(self.global, &self.config)
    }
}

/// Dispatch a router-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context<'_>) -> Result<(), CliError> {
    match cmd {
        Command::Provision(args) => provision::handle(ctx, args).await,
        Command::Allocate(args) => access::allocate(ctx, args).await,
        Command::Admit(args) => access::admit(ctx, args).await,
        Command::Grant(args) => access::grant(ctx, args).await,
        Command::Revoke(args) => access::revoke(ctx, args).await,
        Command::Sweep(args) => access::sweep(ctx, args).await,
        Command::Clients => access::clients(ctx).await,
        Command::PaymentRedirect(args) => access::payment_redirect(ctx, args).await,
        Command::Publish(args) => portal::handle(ctx, args).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Print the commands the in-memory router received.
pub fn print_dry_run(device: &SimulatedDevice, global: &GlobalOpts) {
    let commands = device.commands();
    let text = format!(
        "# dry run: {} command(s), {} mutating\n{}",
        commands.len(),
        device.mutations().len(),
        commands.join("\n")
    );
    output::print_output(&text, global.quiet);
}
