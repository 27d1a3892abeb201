//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Dependency resolver deciding the consequence of import changes."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! Decides what a change in an instance's bound imports means for its status.

use caravel_model::variables::required_import_prefixes;
use caravel_model::{Application, Component, ImportBinding, Instance, InstanceStatus};

use crate::lifecycle::LifecycleMachine;

/// Why the resolver is being invoked.
///
/// `ForcedStart` marks the call `start()` makes once it has determined that
/// all required imports are already bound; a failed start from that path
/// reverts to `DEPLOYED_STOPPED`. `ImportChange` marks every call triggered
/// by an actual import mutation and reverts to the prior status instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportsTrigger {
    /// An import was added, removed, or changed.
    ImportChange,
    /// `start()` determined imports are complete and forces the transition.
    ForcedStart,
}

/// True when every *required* imported prefix has at least one binding.
///
/// Optional imports never block a start.
pub fn has_all_required_imports(instance: &Instance, component: &Component) -> bool {
    required_import_prefixes(component)
        .iter()
        .all(|prefix| instance.imports.get(*prefix).is_some_and(|b| !b.is_empty()))
}

/// Required prefixes without any current binding, in declaration order.
pub fn missing_required_prefixes(instance: &Instance, component: &Component) -> Vec<String> {
    required_import_prefixes(component)
        .iter()
        .filter(|prefix| {
            !instance
                .imports
                .get(**prefix)
                .is_some_and(|bindings| !bindings.is_empty())
        })
        .map(|prefix| (*prefix).to_owned())
        .collect()
}

impl LifecycleMachine {
    /// Decide the consequence of an import-set change for one instance.
    ///
    /// `changed_import` is the specific binding that changed, or `None` to
    /// re-evaluate from scratch; `trigger_status` is the status of the
    /// instance whose change triggered the call, passed through to the
    /// plugin's update hook.
    pub fn update_state_from_imports(
        &self,
        app: &mut Application,
        path: &str,
        changed_import: Option<&ImportBinding>,
        trigger_status: InstanceStatus,
        trigger: ImportsTrigger,
    ) {
        let Some(instance) = app.instances.get(path) else {
            tracing::warn!(instance = %path, "import change for unknown instance");
            return;
        };
        let current = instance.status;
        let Some((plugin, component)) = self.plugin_for(app, path) else {
            return;
        };
        let Some(instance) = app.instances.get(path) else {
            return;
        };
        let has_all = has_all_required_imports(instance, &component);
        tracing::debug!(
            instance = %path,
            status = %current,
            has_all_required_imports = has_all,
            trigger = ?trigger,
            "resolving import change"
        );

        if has_all {
            if current == InstanceStatus::Unresolved || trigger == ImportsTrigger::ForcedStart {
                let revert = match trigger {
                    ImportsTrigger::ForcedStart => InstanceStatus::DeployedStopped,
                    ImportsTrigger::ImportChange => current,
                };
                self.start_from_imports(app, path, plugin, &component, revert);
            } else if current == InstanceStatus::DeployedStarted {
                // In-place reconfiguration, no status transition.
                if let Err(err) = plugin.update(instance, changed_import, trigger_status) {
                    tracing::warn!(instance = %path, error = %err, "plugin update failed");
                }
            } else {
                tracing::debug!(instance = %path, status = %current, "imports complete, nothing to do");
            }
        } else if current == InstanceStatus::DeployedStarted {
            tracing::info!(instance = %path, "required import lost, stopping");
            self.stop_instance(app, path, true);
        } else {
            tracing::debug!(instance = %path, status = %current, "imports incomplete, nothing to do");
        }
    }
}
