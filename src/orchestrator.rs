//! Explicit construction and teardown of the runtime services.

use std::sync::Arc;

use anyhow::{Context, Result};
use browser_driver::BrowserDriver;
use timegate_clock::{ClockSync, ClockView};
use timegate_event_bus::StatusSink;
use timegate_process::ProcessRegistry;
use timegate_scheduler::TriggerScheduler;
use tracing::info;

use crate::config::AppConfig;

pub struct Orchestrator {
    pub clock: Arc<ClockSync>,
    pub trigger: Arc<TriggerScheduler>,
    pub registry: Arc<ProcessRegistry>,
    config: AppConfig,
}

impl Orchestrator {
    /// Wires clock, trigger and registry together. Nothing is started.
    pub fn build(
        config: &AppConfig,
        driver: Arc<dyn BrowserDriver>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let source = config
            .clock
            .build_source()
            .context("invalid clock configuration")?;
        let clock = ClockSync::new(source, config.clock.threshold_ms);
        Self::with_clock(config, clock, driver, sink)
    }

    /// Same as [`Orchestrator::build`] with a caller-provided clock.
    pub fn with_clock(
        config: &AppConfig,
        clock: Arc<ClockSync>,
        driver: Arc<dyn BrowserDriver>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        let rule = config
            .trigger
            .build_rule()
            .context("invalid trigger configuration")?;
        let params = config
            .trigger
            .params()
            .context("invalid trigger configuration")?;
        let view: Arc<dyn ClockView> = clock.clone();
        let trigger = TriggerScheduler::new(rule, view, params);
        let registry = ProcessRegistry::new(
            driver,
            trigger.clone(),
            sink,
            config.process.clone(),
            config.catalog(),
        )
        .context("invalid profiles or targets")?;

        Ok(Self {
            clock,
            trigger,
            registry,
            config: config.clone(),
        })
    }

    /// Starts the periodic clock sync.
    pub fn start_clock(&self) -> bool {
        self.clock
            .start(self.config.clock.interval(), self.config.clock.threshold_ms)
    }

    /// Stops every process, then the trigger chain, then the clock loop.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.trigger.shutdown().await;
        self.clock.shutdown().await;
        info!("orchestrator stopped");
    }
}
