use anyhow::{Context, Result};
use clap::Args;
use timegate_clock::ClockSync;

use crate::cli::context::CliContext;
use crate::cli::output::print_structured;

#[derive(Args, Clone, Debug, Default)]
pub struct ClockArgs {
    /// Number of samples to take
    #[arg(long, default_value_t = 1)]
    pub samples: u32,
}

pub async fn cmd_clock(args: ClockArgs, ctx: &CliContext) -> Result<()> {
    let clock_config = &ctx.config().clock;
    let source = clock_config
        .build_source()
        .context("invalid clock configuration")?;
    let clock = ClockSync::new(source, clock_config.threshold_ms);

    let mut last_err = None;
    for _ in 0..args.samples.max(1) {
        if let Err(err) = clock.sync_once().await {
            last_err = Some(err);
        }
    }

    let status = clock.status();
    if !print_structured(ctx.output(), &status)? {
        println!("source:      {}", clock_config.time_url);
        println!("offset_ms:   {}", status.offset_ms);
        println!("synced:      {}", status.synced);
        match status.last_synced_at {
            Some(at) => println!("last_synced: {}", at.to_rfc3339()),
            None => println!("last_synced: never"),
        }
        if let Some(error) = &status.last_error {
            println!("last_error:  {error}");
        }
    }

    // only fail when no sample succeeded
    match (status.last_synced_at, last_err) {
        (None, Some(err)) => Err(err).context("clock sync failed"),
        _ => Ok(()),
    }
}
