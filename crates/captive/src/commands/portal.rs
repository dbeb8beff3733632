//! `captive publish`: upload the captive-portal pages.

use crate::cli::PublishArgs;
use crate::error::CliError;

use super::{Context, util};

pub async fn handle(ctx: &Context<'_>, args: PublishArgs) -> Result<(), CliError> {
    let files = captive_core::PortalFile::load_dir(&args.dir).await?;
    if files.is_empty() {
        return Err(CliError::Validation {
            field: "dir".into(),
            reason: format!("no files in {}", args.dir.display()),
        });
    }
    let (_, device) = ctx.device()?;
    let names: Vec<String> = files.iter().map(|f| f.name().to_owned()).collect();

    util::with_spinner(
        format!("Publishing {} file(s) to {}", names.len(), device.url),
        ctx.global,
        ctx.orchestrator.publish_on(&device, files),
    )
    .await?;

    if !ctx.global.quiet {
        for name in &names {
            eprintln!("  uploaded {name}");
        }
    }
    Ok(())
}
