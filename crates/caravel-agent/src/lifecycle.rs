//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Instance lifecycle state machine."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! The lifecycle state machine driving instances between stable states.
//!
//! Class invariant: no code path leaves an instance in a transitional status
//! (`DEPLOYING`, `STARTING`, `STOPPING`, `UNDEPLOYING`). Every operation
//! either reaches a stable status or reverts to the pre-operation one before
//! returning, and every status change is mirrored to the deployment manager
//! in the order it occurred.

use std::sync::Arc;

use anyhow::Context;
use caravel_model::variables::resolved_exports;
use caravel_model::{Application, Component, InstanceStatus};
use caravel_msg::{ListenCommand, MessagingClient, TargetState};
use caravel_plugin::{Plugin, PluginRegistry};

use crate::resolver::{missing_required_prefixes, ImportsTrigger};
use crate::resources::InstanceResources;

/// Drives the status of instances in one application subtree.
///
/// All operations are synchronous and are only ever invoked from the single
/// message-processing thread of the owning agent; operational failures are
/// logged and translated into safe-state reversions, never propagated.
pub struct LifecycleMachine {
    plugins: Arc<PluginRegistry>,
    messaging: Arc<dyn MessagingClient>,
    resources: InstanceResources,
}

impl LifecycleMachine {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        messaging: Arc<dyn MessagingClient>,
        resources: InstanceResources,
    ) -> Self {
        Self {
            plugins,
            messaging,
            resources,
        }
    }

    pub(crate) fn messaging(&self) -> &dyn MessagingClient {
        self.messaging.as_ref()
    }

    /// Drive one instance towards a requested stable state.
    ///
    /// Dispatch is keyed on the *current* status: a transitional or `PROBLEM`
    /// status maps to an inert handler, so a concurrent second request is a
    /// logged no-op instead of a broken invariant.
    pub fn change_instance_state(&self, app: &mut Application, path: &str, target: TargetState) {
        let Some(current) = app.instances.get(path).map(|i| i.status) else {
            tracing::warn!(instance = %path, "state change requested for unknown instance");
            return;
        };
        tracing::info!(instance = %path, current = %current, target = ?target, "state change requested");
        match current {
            InstanceStatus::NotDeployed => match target {
                TargetState::NotDeployed => {}
                TargetState::DeployedStopped => self.deploy(app, path),
                TargetState::DeployedStarted => {
                    self.deploy(app, path);
                    let deployed = app
                        .instances
                        .get(path)
                        .is_some_and(|i| i.status == InstanceStatus::DeployedStopped);
                    if deployed {
                        self.start(app, path);
                    }
                }
            },
            InstanceStatus::DeployedStopped => match target {
                TargetState::NotDeployed => self.undeploy(app, path),
                TargetState::DeployedStopped => {}
                TargetState::DeployedStarted => self.start(app, path),
            },
            InstanceStatus::DeployedStarted => match target {
                TargetState::NotDeployed => {
                    self.stop(app, path);
                    self.undeploy(app, path);
                }
                TargetState::DeployedStopped => self.stop(app, path),
                TargetState::DeployedStarted => {}
            },
            InstanceStatus::Unresolved => match target {
                TargetState::NotDeployed => self.undeploy(app, path),
                TargetState::DeployedStopped => {
                    tracing::debug!(instance = %path, "no transition from UNRESOLVED to DEPLOYED_STOPPED");
                }
                TargetState::DeployedStarted => {
                    // Start only goes through the imports path from here.
                    self.update_state_from_imports(
                        app,
                        path,
                        None,
                        current,
                        ImportsTrigger::ImportChange,
                    );
                }
            },
            InstanceStatus::WaitingForAncestor => match target {
                TargetState::NotDeployed => self.undeploy(app, path),
                TargetState::DeployedStopped => {
                    tracing::debug!(instance = %path, "no transition from WAITING_FOR_ANCESTOR to DEPLOYED_STOPPED");
                }
                TargetState::DeployedStarted => self.start(app, path),
            },
            other => {
                tracing::info!(instance = %path, status = %other, "state change ignored in this status");
            }
        }
    }

    /// Install an instance on the machine.
    ///
    /// Skipped unless the instance is `NOT_DEPLOYED` and its parent, if any,
    /// is itself deployed. Reverts to `NOT_DEPLOYED` on any failure.
    pub fn deploy(&self, app: &mut Application, path: &str) {
        let Some(instance) = app.instances.get(path) else {
            tracing::warn!(instance = %path, "deploy requested for unknown instance");
            return;
        };
        if instance.status != InstanceStatus::NotDeployed {
            tracing::debug!(instance = %path, status = %instance.status, "deploy skipped");
            return;
        }
        if let Some(parent_path) = instance.parent.clone() {
            let parent_status = app.instances.get(&parent_path).map(|p| p.status);
            let parent_deployed = matches!(
                parent_status,
                Some(
                    InstanceStatus::DeployedStarted
                        | InstanceStatus::DeployedStopped
                        | InstanceStatus::Unresolved
                        | InstanceStatus::WaitingForAncestor
                )
            );
            if !parent_deployed {
                tracing::info!(
                    instance = %path,
                    parent = %parent_path,
                    parent_status = ?parent_status,
                    "deploy skipped, parent is not deployed"
                );
                return;
            }
        }
        let Some((plugin, component)) = self.plugin_for(app, path) else {
            return;
        };

        self.apply(app, path, InstanceStatus::Deploying);
        match self.run_deploy_steps(app, path, plugin.as_ref(), &component) {
            Ok(()) => self.apply(app, path, InstanceStatus::DeployedStopped),
            Err(err) => {
                tracing::warn!(instance = %path, error = %err, "deploy failed, reverting");
                self.apply(app, path, InstanceStatus::NotDeployed);
            }
        }
    }

    fn run_deploy_steps(
        &self,
        app: &Application,
        path: &str,
        plugin: &dyn Plugin,
        component: &Component,
    ) -> anyhow::Result<()> {
        self.resources.delete_instance_resources(&app.name, path)?;
        self.resources
            .copy_instance_resources(&app.name, path, &component.name)?;
        let instance = app
            .instances
            .get(path)
            .with_context(|| format!("instance {} vanished during deploy", path))?;
        plugin.initialize(instance)?;
        plugin.deploy(instance)?;
        Ok(())
    }

    /// Start a deployed instance.
    ///
    /// Parks the instance in `WAITING_FOR_ANCESTOR` when the parent is itself
    /// unresolved or waiting; otherwise goes through the dependency resolver,
    /// ending either `DEPLOYED_STARTED` or `UNRESOLVED` plus an export
    /// request for the missing prefixes.
    pub fn start(&self, app: &mut Application, path: &str) {
        let Some(instance) = app.instances.get(path) else {
            tracing::warn!(instance = %path, "start requested for unknown instance");
            return;
        };
        let current = instance.status;
        if !matches!(
            current,
            InstanceStatus::DeployedStopped | InstanceStatus::WaitingForAncestor
        ) {
            tracing::debug!(instance = %path, status = %current, "start skipped");
            return;
        }
        if let Some(parent_path) = instance.parent.clone() {
            let parent_status = app.instances.get(&parent_path).map(|p| p.status);
            if parent_status != Some(InstanceStatus::DeployedStarted) {
                if matches!(
                    parent_status,
                    Some(InstanceStatus::Unresolved | InstanceStatus::WaitingForAncestor)
                ) {
                    tracing::info!(instance = %path, parent = %parent_path, "parking until ancestor starts");
                    self.apply(app, path, InstanceStatus::WaitingForAncestor);
                } else {
                    tracing::info!(
                        instance = %path,
                        parent = %parent_path,
                        parent_status = ?parent_status,
                        "start skipped, parent is not started"
                    );
                }
                return;
            }
        }
        let Some((_, component)) = self.plugin_for(app, path) else {
            return;
        };
        let Some(instance) = app.instances.get(path) else {
            return;
        };
        let missing = missing_required_prefixes(instance, &component);
        if missing.is_empty() {
            self.update_state_from_imports(app, path, None, current, ImportsTrigger::ForcedStart);
        } else {
            self.apply(app, path, InstanceStatus::Unresolved);
            tracing::info!(instance = %path, prefixes = ?missing, "imports incomplete, requesting exports");
            if let Err(err) = self.messaging.request_exports(&app.name, &missing) {
                tracing::warn!(instance = %path, error = %err, "export request failed");
            }
        }
    }

    /// Stop a started instance and every started descendant.
    pub fn stop(&self, app: &mut Application, path: &str) {
        let Some(instance) = app.instances.get(path) else {
            tracing::warn!(instance = %path, "stop requested for unknown instance");
            return;
        };
        if instance.status != InstanceStatus::DeployedStarted {
            tracing::debug!(instance = %path, status = %instance.status, "stop skipped");
            return;
        }
        self.stop_instance(app, path, false);
    }

    /// Shared stop routine used by explicit stops and import losses.
    ///
    /// Walks the subtree leaf-first, retracts exports of every started
    /// member, then invokes the plugin once on the operation root. Plugin
    /// failures are swallowed so a broken recipe cannot wedge the subtree.
    /// The final status is decided per member afterwards: `DEPLOYED_STOPPED`
    /// for an explicit stop; for an import loss, `UNRESOLVED` on the target
    /// and `WAITING_FOR_ANCESTOR` on swept descendants.
    pub(crate) fn stop_instance(
        &self,
        app: &mut Application,
        path: &str,
        due_to_imports_change: bool,
    ) {
        let mut members = app.instances.collect_subtree(path);
        members.reverse();

        for member in &members {
            let Some(instance) = app.instances.get(member) else {
                continue;
            };
            if instance.status != InstanceStatus::DeployedStarted {
                continue;
            }
            let component_name = instance.component.clone();
            self.apply(app, member, InstanceStatus::Stopping);
            if let Err(err) =
                self.messaging
                    .listen_to_requests(ListenCommand::Stop, &app.name, member)
            {
                tracing::warn!(instance = %member, error = %err, "could not stop listening");
            }
            if let Err(err) = self.messaging.unpublish_exports(
                &app.name,
                member,
                &component_name,
                InstanceStatus::Stopping,
            ) {
                tracing::warn!(instance = %member, error = %err, "unpublish failed");
            }
        }

        // The plugin is expected to stop its own children recursively.
        if let Some((plugin, _)) = self.plugin_for(app, path) {
            if let Some(instance) = app.instances.get(path) {
                if let Err(err) = plugin.stop(instance) {
                    tracing::warn!(instance = %path, error = %err, "plugin stop failed, proceeding anyway");
                }
            }
        }

        let mut decided = Vec::new();
        for member in &members {
            let Some(instance) = app.instances.get(member) else {
                continue;
            };
            if !matches!(
                instance.status,
                InstanceStatus::Stopping | InstanceStatus::Unresolved
            ) {
                continue;
            }
            let final_status = if !due_to_imports_change {
                InstanceStatus::DeployedStopped
            } else if member == path {
                InstanceStatus::Unresolved
            } else {
                InstanceStatus::WaitingForAncestor
            };
            decided.push((member.clone(), final_status));
        }
        for (member, status) in decided {
            self.apply(app, &member, status);
        }
    }

    /// Remove an instance and its descendants from the machine.
    ///
    /// Status bookkeeping runs leaf-first over the whole subtree while the
    /// plugin call targets only the operation root; the plugin is assumed to
    /// undeploy its own children recursively. On any failure the subtree is
    /// left `DEPLOYED_STOPPED` (fail safe: assume still installed).
    pub fn undeploy(&self, app: &mut Application, path: &str) {
        let Some(instance) = app.instances.get(path) else {
            tracing::warn!(instance = %path, "undeploy requested for unknown instance");
            return;
        };
        if !matches!(
            instance.status,
            InstanceStatus::DeployedStopped
                | InstanceStatus::Unresolved
                | InstanceStatus::WaitingForAncestor
        ) {
            tracing::debug!(instance = %path, status = %instance.status, "undeploy skipped");
            return;
        }

        let mut members = app.instances.collect_subtree(path);
        members.reverse();

        for member in &members {
            let Some(instance) = app.instances.get(member) else {
                continue;
            };
            if instance.status == InstanceStatus::NotDeployed {
                continue;
            }
            let component_name = instance.component.clone();
            self.apply(app, member, InstanceStatus::Undeploying);
            if let Err(err) =
                self.messaging
                    .listen_to_requests(ListenCommand::Stop, &app.name, member)
            {
                tracing::warn!(instance = %member, error = %err, "could not stop listening");
            }
            if let Err(err) = self.messaging.unpublish_exports(
                &app.name,
                member,
                &component_name,
                InstanceStatus::Undeploying,
            ) {
                tracing::warn!(instance = %member, error = %err, "unpublish failed");
            }
        }

        let final_status = match self.run_undeploy_steps(app, path, &members) {
            Ok(()) => InstanceStatus::NotDeployed,
            Err(err) => {
                tracing::warn!(instance = %path, error = %err, "undeploy failed, assuming still installed");
                InstanceStatus::DeployedStopped
            }
        };

        let mut decided = Vec::new();
        for member in &members {
            let Some(instance) = app.instances.get(member) else {
                continue;
            };
            if instance.status == InstanceStatus::Undeploying {
                decided.push(member.clone());
            }
        }
        for member in decided {
            self.apply(app, &member, final_status);
        }
    }

    fn run_undeploy_steps(
        &self,
        app: &Application,
        path: &str,
        members: &[String],
    ) -> anyhow::Result<()> {
        let (plugin, _) = self
            .plugin_for(app, path)
            .with_context(|| format!("no plugin for instance {}", path))?;
        let instance = app
            .instances
            .get(path)
            .with_context(|| format!("instance {} vanished during undeploy", path))?;
        plugin.undeploy(instance)?;
        for member in members {
            self.resources.delete_instance_resources(&app.name, member)?;
        }
        Ok(())
    }

    /// The start-from-imports sequence: the only path into `DEPLOYED_STARTED`.
    ///
    /// On success publishes exports, starts answering export requests, and
    /// re-attempts `start` on every direct child parked in
    /// `WAITING_FOR_ANCESTOR`. On failure reverts to `revert_status`.
    pub(crate) fn start_from_imports(
        &self,
        app: &mut Application,
        path: &str,
        plugin: Arc<dyn Plugin>,
        component: &Component,
        revert_status: InstanceStatus,
    ) {
        self.apply(app, path, InstanceStatus::Starting);
        let started = match app.instances.get(path) {
            Some(instance) => plugin.start(instance),
            None => {
                tracing::warn!(instance = %path, "instance vanished during start");
                return;
            }
        };
        match started {
            Ok(()) => {
                self.apply(app, path, InstanceStatus::DeployedStarted);
                if let Some(instance) = app.instances.get(path) {
                    let variables = resolved_exports(instance, component);
                    if let Err(err) = self.messaging.publish_exports(
                        &app.name,
                        path,
                        &component.name,
                        InstanceStatus::DeployedStarted,
                        variables,
                    ) {
                        tracing::warn!(instance = %path, error = %err, "export publish failed");
                    }
                }
                if let Err(err) =
                    self.messaging
                        .listen_to_requests(ListenCommand::Start, &app.name, path)
                {
                    tracing::warn!(instance = %path, error = %err, "could not start listening");
                }
                self.resume_waiting_children(app, path);
            }
            Err(err) => {
                tracing::warn!(instance = %path, error = %err, "plugin start failed, reverting");
                self.apply(app, path, revert_status);
            }
        }
    }

    /// Re-attempt `start` on direct children parked in `WAITING_FOR_ANCESTOR`.
    fn resume_waiting_children(&self, app: &mut Application, path: &str) {
        let children: Vec<String> = app
            .instances
            .get(path)
            .map(|i| i.children.iter().cloned().collect())
            .unwrap_or_default();
        for child in children {
            let waiting = app
                .instances
                .get(&child)
                .is_some_and(|c| c.status == InstanceStatus::WaitingForAncestor);
            if waiting {
                tracing::info!(instance = %child, parent = %path, "ancestor started, resuming");
                self.start(app, &child);
            }
        }
    }

    /// Resolve the plugin and component definition for an instance.
    pub(crate) fn plugin_for(
        &self,
        app: &Application,
        path: &str,
    ) -> Option<(Arc<dyn Plugin>, Component)> {
        let instance = app.instances.get(path)?;
        let Some(component) = app.graphs.find_component(&instance.component) else {
            tracing::warn!(instance = %path, component = %instance.component, "component not found in graphs");
            return None;
        };
        match self.plugins.find(&component.installer_name) {
            Ok(plugin) => Some((plugin, component.clone())),
            Err(err) => {
                tracing::warn!(instance = %path, error = %err, "no plugin for installer");
                None
            }
        }
    }

    /// Set an instance's status and mirror the change to the DM, in order.
    pub(crate) fn apply(&self, app: &mut Application, path: &str, status: InstanceStatus) {
        let Some(instance) = app.instances.get_mut(path) else {
            return;
        };
        instance.status = status;
        tracing::info!(instance = %path, status = %status, "instance status changed");
        if let Err(err) = self.messaging.notify_instance_changed(&app.name, path, status) {
            tracing::warn!(instance = %path, error = %err, "status notification failed");
        }
    }
}
