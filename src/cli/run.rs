use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use browser_driver::stub::StubDriver;
use browser_driver::BrowserDriver;
use clap::Args;
use timegate_core_types::{StatusEvent, TargetId};
use timegate_event_bus::{EventBus, StatusBus, StatusSink};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::output::{print_json_line, print_structured};
use crate::config::{AppConfig, DriverKind};
use crate::orchestrator::Orchestrator;

const STATUS_BUS_CAPACITY: usize = 1024;

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Comma-separated target ids; defaults to every configured target
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    config.validate()?;

    let targets = resolve_targets(&args, config)?;
    let driver = build_driver(config);
    let bus = StatusBus::new(STATUS_BUS_CAPACITY);
    let sink: Arc<dyn StatusSink> = bus.clone();

    let printer_stop = CancellationToken::new();
    let printer = spawn_printer(bus.subscribe(), printer_stop.clone());

    let orchestrator = Orchestrator::build(config, driver, sink)?;
    orchestrator.start_clock();

    for (id, ack) in orchestrator.registry.start(&targets).await {
        info!(target_id = %id, ?ack, "start requested");
    }

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(secs, "run duration elapsed");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received Ctrl+C");
                }
            }
        }
        None => {
            info!("running until Ctrl+C");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "failed to listen for Ctrl+C");
            }
        }
    }

    let status = orchestrator.registry.status();
    orchestrator.shutdown().await;

    printer_stop.cancel();
    if let Err(err) = printer.await {
        warn!(?err, "status printer task failed");
    }

    if !print_structured(ctx.output(), &status)? {
        for (id, snapshot) in &status {
            println!(
                "{:<16} {:<32} retries={} {}",
                id.as_str(),
                snapshot.state.as_str(),
                snapshot.retry_counter,
                snapshot.last_message
            );
        }
    }
    Ok(())
}

fn resolve_targets(args: &RunArgs, config: &AppConfig) -> Result<Vec<TargetId>> {
    let targets: Vec<TargetId> = if args.targets.is_empty() {
        config.targets.iter().map(|t| t.id.clone()).collect()
    } else {
        args.targets
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(TargetId::from)
            .collect()
    };
    if targets.is_empty() {
        bail!("no targets: pass --targets or declare targets in the configuration");
    }
    Ok(targets)
}

fn build_driver(config: &AppConfig) -> Arc<dyn BrowserDriver> {
    match config.driver {
        DriverKind::Stub => StubDriver::permissive(),
    }
}

/// Writes every status event as one JSON line until `stop`, then drains what
/// is left in the channel.
fn spawn_printer(
    mut rx: broadcast::Receiver<StatusEvent>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                recv = rx.recv() => match recv {
                    Ok(event) => emit_line(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "status printer lagged"),
                    Err(RecvError::Closed) => return,
                },
                _ = stop.cancelled() => break,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(event) => emit_line(&event),
                Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "status printer lagged"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    })
}

fn emit_line(event: &StatusEvent) {
    if let Err(err) = print_json_line(event) {
        warn!(?err, "failed to print status event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timegate_process::{SiteProfile, TargetConfig};

    fn config_with_targets(ids: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config
            .profiles
            .insert("clinic".into(), SiteProfile::new("https://clinic.example/"));
        for id in ids {
            config.targets.push(TargetConfig::new(*id, "clinic"));
        }
        config
    }

    #[test]
    fn explicit_targets_win_over_config() {
        let config = config_with_targets(&["alice", "bob"]);
        let args = RunArgs {
            targets: vec!["bob".into(), " ".into()],
            duration_secs: None,
        };
        let targets = resolve_targets(&args, &config).unwrap();
        assert_eq!(targets, vec![TargetId::from("bob")]);
    }

    #[test]
    fn configured_targets_are_the_default() {
        let config = config_with_targets(&["alice", "bob"]);
        let targets = resolve_targets(&RunArgs::default(), &config).unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn no_targets_at_all_is_an_error() {
        let config = AppConfig::default();
        assert!(resolve_targets(&RunArgs::default(), &config).is_err());
    }

    #[tokio::test]
    async fn printer_drains_after_stop() {
        let bus = StatusBus::new(16);
        let stop = CancellationToken::new();
        let printer = spawn_printer(bus.subscribe(), stop.clone());
        bus.emit(StatusEvent::new(
            TargetId::from("alice"),
            timegate_core_types::ProcessState::Starting,
            "session acquired",
        ));
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), printer)
            .await
            .unwrap()
            .unwrap();
    }
}
