//! ---
//! cvl_section: "03-plugins"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Scriptable in-memory plugin with failure injection."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Mutex;

use indexmap::IndexSet;

use caravel_model::{ImportBinding, Instance, InstanceStatus};

use crate::{Plugin, PluginError, Result};

/// Plugin operations, used for call recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginOp {
    Initialize,
    Deploy,
    Start,
    Stop,
    Undeploy,
    Update,
}

/// In-memory plugin that records calls and fails on demand.
///
/// Tests (and the simulation mode of the daemon) use it in place of a real
/// recipe executor: `fail_on` arms a failure for one operation on one
/// instance path, which stays armed until disarmed.
pub struct ScriptedPlugin {
    name: String,
    calls: Mutex<Vec<(PluginOp, String)>>,
    failures: Mutex<IndexSet<(PluginOp, String)>>,
}

impl ScriptedPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(IndexSet::new()),
        }
    }

    /// Arm a failure for one operation on one instance path.
    pub fn fail_on(&self, op: PluginOp, path: &str) {
        self.failures
            .lock()
            .expect("failures poisoned")
            .insert((op, path.to_owned()));
    }

    /// Disarm a previously armed failure.
    pub fn succeed_on(&self, op: PluginOp, path: &str) {
        self.failures
            .lock()
            .expect("failures poisoned")
            .shift_remove(&(op, path.to_owned()));
    }

    /// All observed calls, in invocation order.
    pub fn calls(&self) -> Vec<(PluginOp, String)> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    /// Number of calls of one operation against one path.
    pub fn call_count(&self, op: PluginOp, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(o, p)| *o == op && p == path)
            .count()
    }

    fn run(&self, op: PluginOp, instance: &Instance) -> Result<()> {
        let path = instance.path();
        self.calls
            .lock()
            .expect("calls poisoned")
            .push((op, path.clone()));
        let armed = self
            .failures
            .lock()
            .expect("failures poisoned")
            .contains(&(op, path.clone()));
        if armed {
            return Err(PluginError::OperationFailed(format!(
                "scripted failure for {:?} on {}",
                op, path
            )));
        }
        Ok(())
    }
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, instance: &Instance) -> Result<()> {
        self.run(PluginOp::Initialize, instance)
    }

    fn deploy(&self, instance: &Instance) -> Result<()> {
        self.run(PluginOp::Deploy, instance)
    }

    fn start(&self, instance: &Instance) -> Result<()> {
        self.run(PluginOp::Start, instance)
    }

    fn stop(&self, instance: &Instance) -> Result<()> {
        self.run(PluginOp::Stop, instance)
    }

    fn undeploy(&self, instance: &Instance) -> Result<()> {
        self.run(PluginOp::Undeploy, instance)
    }

    fn update(
        &self,
        instance: &Instance,
        _changed_import: Option<&ImportBinding>,
        _trigger_status: InstanceStatus,
    ) -> Result<()> {
        self.run(PluginOp::Update, instance)
    }
}
