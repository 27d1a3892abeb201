//! ---
//! cvl_section: "05-dm"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Polled scheduler for machine bring-up."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! Machine provisioning is decoupled from the lifecycle machine's thread: a
//! background task polls every pending configurator once per tick until it
//! reports completion or fails.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::watch;

use caravel_model::InstanceStatus;

use crate::mirror::StatusMirror;

/// One machine being brought up by a target handler.
///
/// `configure` must not block: it performs one incremental step and reports
/// whether bring-up is complete. `close` releases whatever the handler holds
/// for the machine; the scheduler guarantees it is called at most once.
pub trait MachineConfigurator: Send {
    /// Identifier of the machine being configured.
    fn machine_id(&self) -> &str;

    /// One non-blocking configuration step; `Ok(true)` when done.
    fn configure(&mut self) -> anyhow::Result<bool>;

    /// Release resources held for the machine.
    fn close(&mut self);
}

struct PendingMachine {
    application: String,
    root_path: String,
    configurator: Box<dyn MachineConfigurator>,
}

/// Polls pending machine configurators and tracks cancellations.
///
/// Cancellation marks a machine id; the mark is consulted and cleared on the
/// next tick, closing the in-flight configurator exactly once. A fatal
/// configuration error marks the associated root instance `PROBLEM` in the
/// status mirror.
pub struct TargetScheduler {
    mirror: Arc<StatusMirror>,
    pending: Vec<PendingMachine>,
    cancelled: IndexSet<String>,
}

impl TargetScheduler {
    pub fn new(mirror: Arc<StatusMirror>) -> Self {
        Self {
            mirror,
            pending: Vec::new(),
            cancelled: IndexSet::new(),
        }
    }

    /// Add a machine to the pending set.
    pub fn schedule(
        &mut self,
        application: impl Into<String>,
        root_path: impl Into<String>,
        configurator: Box<dyn MachineConfigurator>,
    ) {
        let machine = PendingMachine {
            application: application.into(),
            root_path: root_path.into(),
            configurator,
        };
        tracing::info!(
            machine = %machine.configurator.machine_id(),
            application = %machine.application,
            root = %machine.root_path,
            "machine scheduled"
        );
        self.pending.push(machine);
    }

    /// Mark a machine id as cancelled; consulted on the next tick.
    pub fn cancel(&mut self, machine_id: impl Into<String>) {
        self.cancelled.insert(machine_id.into());
    }

    /// Machines still pending configuration.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Poll every pending configurator once.
    pub fn tick(&mut self) {
        let cancelled = std::mem::take(&mut self.cancelled);
        let mirror = &self.mirror;
        self.pending.retain_mut(|machine| {
            let id = machine.configurator.machine_id().to_owned();
            if cancelled.contains(&id) {
                tracing::info!(machine = %id, "machine bring-up cancelled");
                machine.configurator.close();
                return false;
            }
            match machine.configurator.configure() {
                Ok(false) => true,
                Ok(true) => {
                    tracing::info!(machine = %id, "machine bring-up complete");
                    false
                }
                Err(err) => {
                    tracing::warn!(machine = %id, error = %err, "machine bring-up failed");
                    mirror.record(
                        &machine.application,
                        &machine.root_path,
                        InstanceStatus::Problem,
                    );
                    machine.configurator.close();
                    false
                }
            }
        });
    }

    /// Close every pending configurator, used on shutdown.
    pub fn close_all(&mut self) {
        for machine in &mut self.pending {
            machine.configurator.close();
        }
        self.pending.clear();
    }

    /// Poll the scheduler on an interval until `shutdown` flips to true.
    pub async fn run(
        scheduler: Arc<Mutex<Self>>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    scheduler.lock().tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        scheduler.lock().close_all();
    }
}
