use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use action_flow::StepRunner;
use action_locator::{CandidateLocator, ElementResolver};
use browser_driver::{BrowserDriver, LoadState, NavigateOptions};
use dashmap::DashMap;
use popup_watcher::PopupWatcher;
use timegate_core_types::{ProcessState, StatusEvent, StatusLevel, TargetId};
use timegate_event_bus::StatusSink;
use timegate_scheduler::TriggerScheduler;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::errors::ProcessError;
use crate::metrics;
use crate::model::{ProcessSnapshot, StartAck, StopAck, StopOptions};
use crate::pacing::Pacer;
use crate::process::{AutomationProcess, ProcessContext, ProcessHandle};
use crate::profile::{Catalog, TargetConfig};

/// Owns every automation process, at most one active per target.
///
/// `start` and `stop` on the same id are serialised through a per-id lock;
/// different ids never wait on each other.
pub struct ProcessRegistry {
    ctx: Arc<ProcessContext>,
    sink: Arc<dyn StatusSink>,
    catalog: Catalog,
    targets: HashMap<TargetId, TargetConfig>,
    processes: Arc<DashMap<TargetId, Arc<ProcessHandle>>>,
    locks: DashMap<TargetId, Arc<AsyncMutex<()>>>,
    next_run: AtomicU64,
}

impl ProcessRegistry {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        trigger: Arc<TriggerScheduler>,
        sink: Arc<dyn StatusSink>,
        config: ProcessConfig,
        catalog: Catalog,
    ) -> Result<Arc<Self>, ProcessError> {
        catalog.validate()?;
        let targets = catalog
            .targets
            .iter()
            .map(|target| (target.id.clone(), target.clone()))
            .collect();

        let resolver: Arc<dyn ElementResolver> = Arc::new(CandidateLocator::new(driver.clone()));
        let runner = StepRunner::new(driver.clone(), resolver.clone()).with_reload_options(
            NavigateOptions {
                wait_until: LoadState::DomContentLoaded,
                timeout: config.navigation_timeout(),
            },
        );
        let popups = PopupWatcher::new(driver.clone())
            .with_load_timeout(config.load_timeout())
            .with_close_poll(config.cancel_poll());
        let pacer = Pacer::new(
            Duration::from_millis(config.pacing_min_ms),
            Duration::from_millis(config.pacing_max_ms),
        );
        let processes = Arc::new(DashMap::new());

        Ok(Arc::new(Self {
            ctx: Arc::new(ProcessContext {
                driver,
                resolver,
                runner,
                popups,
                trigger,
                pacer,
                config,
                processes: Arc::clone(&processes),
            }),
            sink,
            catalog,
            targets,
            processes,
            locks: DashMap::new(),
            next_run: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.ctx.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Configured target ids, in catalog order.
    pub fn target_ids(&self) -> Vec<TargetId> {
        self.catalog
            .targets
            .iter()
            .map(|target| target.id.clone())
            .collect()
    }

    fn key_lock(&self, id: &TargetId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn entry(&self, id: &TargetId) -> Option<Arc<ProcessHandle>> {
        self.processes.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Starts a process per id. A session launch failure rejects that id
    /// before this call returns.
    pub async fn start(&self, ids: &[TargetId]) -> Vec<(TargetId, StartAck)> {
        let mut acks = Vec::with_capacity(ids.len());
        for id in ids {
            let ack = self.start_one(id).await;
            acks.push((id.clone(), ack));
        }
        acks
    }

    async fn start_one(&self, id: &TargetId) -> StartAck {
        // Unknown ids never get a lock entry.
        let Some(target) = self.targets.get(id) else {
            warn!(target_id = %id, "start rejected; unknown target");
            return StartAck::Rejected(ProcessError::UnknownTarget(id.to_string()).to_string());
        };
        let lock = self.key_lock(id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.entry(id) {
            if existing.state().is_active() {
                debug!(target_id = %id, state = %existing.state(), "start ignored; already active");
                return StartAck::AlreadyActive;
            }
            // terminal leftovers are replaced by the new run
            self.processes.remove(id);
        }

        let Some(profile) = self.catalog.profiles.get(&target.profile) else {
            let err = ProcessError::UnknownProfile {
                target: id.to_string(),
                profile: target.profile.clone(),
            };
            return StartAck::Rejected(err.to_string());
        };

        let session = match self.ctx.driver.launch().await {
            Ok(session) => session,
            Err(err) => {
                let err = ProcessError::Launch(err);
                warn!(target_id = %id, error = %err, "start rejected");
                self.sink.emit(
                    StatusEvent::new(id.clone(), ProcessState::Error, err.to_string())
                        .with_level(StatusLevel::Error),
                );
                return StartAck::Rejected(err.to_string());
            }
        };

        let run_id = self.next_run.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(ProcessHandle::new(
            id.clone(),
            run_id,
            session,
            Arc::clone(&self.sink),
        ));
        handle.transition(ProcessState::Starting, StatusLevel::Info, "session acquired");
        self.processes.insert(id.clone(), Arc::clone(&handle));
        metrics::record_start();

        let process = AutomationProcess::new(
            Arc::clone(&self.ctx),
            Arc::clone(&handle),
            profile.clone(),
            target,
        );
        handle.attach_task(tokio::spawn(process.run()));

        if self.ctx.trigger.arm(None) {
            debug!("trigger armed by first start");
        }
        info!(target_id = %id, run_id, "process started");
        StartAck::Started
    }

    pub async fn stop(&self, ids: &[TargetId], opts: StopOptions) -> Vec<(TargetId, StopAck)> {
        let mut acks = Vec::with_capacity(ids.len());
        for id in ids {
            let ack = self.stop_one(id, opts).await;
            acks.push((id.clone(), ack));
        }
        acks
    }

    async fn stop_one(&self, id: &TargetId, opts: StopOptions) -> StopAck {
        if !self.targets.contains_key(id) {
            debug!(target_id = %id, "stop ignored; unknown target");
            return StopAck::NotFound;
        }
        let lock = self.key_lock(id);
        let _guard = lock.lock().await;

        let Some(handle) = self.entry(id) else {
            return StopAck::NotFound;
        };
        if handle.state().is_terminal() {
            let run_id = handle.run_id();
            self.processes
                .remove_if(id, |_, entry| entry.run_id() == run_id);
            info!(target_id = %id, state = %handle.state(), "terminal process removed");
            return StopAck::Removed;
        }
        handle.request_stop(opts.close_session);
        info!(target_id = %id, close_session = opts.close_session, "stop requested");
        StopAck::Stopping
    }

    /// Snapshot of every registered process.
    pub fn status(&self) -> BTreeMap<TargetId, ProcessSnapshot> {
        self.processes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    pub fn snapshot(&self, id: &TargetId) -> Option<ProcessSnapshot> {
        self.entry(id).map(|handle| handle.snapshot())
    }

    pub fn handle(&self, id: &TargetId) -> Option<Arc<ProcessHandle>> {
        self.entry(id)
    }

    pub fn active_count(&self) -> usize {
        self.processes
            .iter()
            .filter(|entry| entry.value().state().is_active())
            .count()
    }

    /// Cancels every process and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ProcessHandle>> = self
            .processes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in &handles {
            if handle.state().is_active() {
                handle.request_stop(true);
            }
        }
        for handle in handles {
            if let Some(task) = handle.take_task() {
                if let Err(err) = task.await {
                    warn!(target_id = %handle.id(), ?err, "process task ended abnormally");
                }
            }
        }
        info!("process registry shut down");
    }
}
