use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::Args;
use serde::Serialize;

use crate::cli::context::CliContext;
use crate::cli::output::print_structured;

#[derive(Args, Clone, Debug)]
pub struct NextTriggerArgs {
    /// How many upcoming instants to list
    #[arg(long, default_value_t = 5)]
    pub count: usize,
}

impl Default for NextTriggerArgs {
    fn default() -> Self {
        Self { count: 5 }
    }
}

#[derive(Debug, Serialize)]
struct UpcomingTrigger {
    utc: DateTime<Utc>,
    local: DateTime<FixedOffset>,
}

pub fn cmd_next_trigger(args: NextTriggerArgs, ctx: &CliContext) -> Result<()> {
    let trigger = &ctx.config().trigger;
    let rule = trigger
        .build_rule()
        .context("invalid trigger configuration")?;
    let tz = trigger.tz().context("invalid trigger configuration")?;

    let instants: Vec<UpcomingTrigger> =
        timegate_scheduler::upcoming(rule.as_ref(), Utc::now(), args.count)
            .into_iter()
            .map(|utc| UpcomingTrigger {
                utc,
                local: utc.with_timezone(&tz),
            })
            .collect();

    if print_structured(ctx.output(), &instants)? {
        return Ok(());
    }

    println!("rule: {}", rule.describe());
    if instants.is_empty() {
        println!("no upcoming trigger instants");
    }
    for instant in &instants {
        println!("{}  ({})", instant.utc.to_rfc3339(), instant.local.to_rfc3339());
    }
    Ok(())
}
