use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::context::CliContext;
use crate::cli::output::print_structured;

#[derive(Debug, Serialize)]
struct ConfigSummary {
    path: String,
    time_url: String,
    rule: String,
    profiles: Vec<String>,
    targets: Vec<String>,
    metrics_port: u16,
}

pub fn cmd_check_config(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    config
        .validate()
        .with_context(|| format!("{} is invalid", ctx.config_path().display()))?;

    let rule = config
        .trigger
        .build_rule()
        .context("invalid trigger configuration")?;
    let summary = ConfigSummary {
        path: ctx.config_path().display().to_string(),
        time_url: config.clock.time_url.clone(),
        rule: rule.describe(),
        profiles: config.profiles.keys().cloned().collect(),
        targets: config
            .targets
            .iter()
            .map(|t| format!("{} -> {}", t.id, t.profile))
            .collect(),
        metrics_port: config.metrics_port,
    };

    if !print_structured(ctx.output(), &summary)? {
        println!("configuration OK: {}", summary.path);
        println!("  time source:  {}", summary.time_url);
        println!("  trigger rule: {}", summary.rule);
        println!("  profiles:     {}", summary.profiles.join(", "));
        println!("  targets:      {}", summary.targets.join(", "));
        match summary.metrics_port {
            0 => println!("  metrics:      disabled"),
            port => println!("  metrics:      :{port}/metrics"),
        }
    }
    Ok(())
}
