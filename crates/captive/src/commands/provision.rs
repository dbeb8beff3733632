//! `captive provision`: topology, optional registration and portal upload.

use captive_core::{PortalFile, ProvisionReport};

use crate::cli::ProvisionArgs;
use crate::error::CliError;
use crate::output;

use super::{Context, util};

pub async fn handle(ctx: &Context<'_>, args: ProvisionArgs) -> Result<(), CliError> {
    let (profile, device) = ctx.device()?;

    // Load pages first so a bad directory fails before the router is touched.
    let portal = match args.portal {
        Some(ref dir) => Some(PortalFile::load_dir(dir).await?),
        None => None,
    };

    let message = format!("Provisioning {}", device.url);
    let report: ProvisionReport = match args.building {
        Some(ref building) => {
            let name = args.name.as_deref().unwrap_or(&profile);
            let provisioned = util::with_spinner(
                message,
                ctx.global,
                ctx.orchestrator.provision_router(building, name, &device),
            )
            .await?;
            if !ctx.global.quiet {
                eprintln!(
                    "Registered router {} for building '{building}'",
                    provisioned.router.id
                );
            }
            provisioned.report
        }
        None => {
            util::with_spinner(message, ctx.global, ctx.orchestrator.provision_device(&device))
                .await?
        }
    };

    let color = output::should_color(&ctx.global.color);
    output::print_output(
        &output::render_report(&ctx.global.output, &report, color),
        ctx.global.quiet,
    );
    for failed in report.advisory_failures() {
        tracing::warn!(step = %failed.step, status = %failed.status, "advisory step failed");
    }

    if let Some(files) = portal {
        let count = files.len();
        util::with_spinner(
            format!("Publishing {count} portal file(s)"),
            ctx.global,
            ctx.orchestrator.publish_on(&device, files),
        )
        .await?;
        if !ctx.global.quiet {
            eprintln!("Published {count} portal file(s)");
        }
    }
    Ok(())
}
