//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Agent message loop over one application subtree."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;

use caravel_model::variables::{import_prefixes, resolved_exports, variable_prefix};
use caravel_model::{Application, ImportBinding, InstanceStatus};
use caravel_msg::{
    ChangeInstanceState, ExportsPublished, ExportsRequested, ExportsUnpublished, Message,
    MessagePayload, MessagingClient, Transport,
};
use caravel_plugin::PluginRegistry;

use crate::lifecycle::LifecycleMachine;
use crate::resolver::ImportsTrigger;
use crate::resources::InstanceResources;

/// One agent: an owned application subtree plus its message-processing loop.
///
/// Messages are processed strictly one at a time; the lifecycle machine and
/// the dependency resolver run synchronously on this path and operational
/// errors never escape it. Export publishes reach other agents through the
/// bus; for instances hosted on this same agent the runtime replays the
/// equivalent publish locally after each message (the bus does not loop
/// messages back to their sender).
pub struct AgentRuntime {
    application: Application,
    machine: LifecycleMachine,
    inbox: Arc<dyn Transport>,
}

impl AgentRuntime {
    pub fn new(
        application: Application,
        plugins: Arc<PluginRegistry>,
        messaging: Arc<dyn MessagingClient>,
        resources: InstanceResources,
        inbox: Arc<dyn Transport>,
    ) -> Self {
        Self {
            application,
            machine: LifecycleMachine::new(plugins, messaging, resources),
            inbox,
        }
    }

    /// The application subtree this agent owns.
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Mutable access to the owned subtree, for setup and tests.
    pub fn application_mut(&mut self) -> &mut Application {
        &mut self.application
    }

    /// Drain and process every message currently queued in the inbox.
    ///
    /// Returns the number of processed messages so polling loops can tell
    /// whether the pass did any work.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Some(message) = self.inbox.recv() {
            self.process_message(message);
            processed += 1;
        }
        processed
    }

    /// Process one inbound message.
    pub fn process_message(&mut self, message: Message) {
        tracing::debug!(kind = message.kind(), id = %message.id, "processing message");
        let before = self.statuses();
        self.process_payload(&message.payload);
        self.replay_local_exports(before);
    }

    fn process_payload(&mut self, payload: &MessagePayload) {
        match payload {
            MessagePayload::ChangeInstanceState(msg) => self.handle_change_state(msg),
            MessagePayload::ExportsPublished(msg) => self.handle_exports_published(msg),
            MessagePayload::ExportsUnpublished(msg) => self.handle_exports_unpublished(msg),
            MessagePayload::ExportsRequested(msg) => self.handle_exports_requested(msg),
            MessagePayload::InstanceChanged(_) => {
                tracing::debug!("status notification ignored by agent");
            }
        }
    }

    fn owns_application(&self, application: &str) -> bool {
        if application == self.application.name {
            return true;
        }
        tracing::debug!(application = %application, "message for another application ignored");
        false
    }

    fn handle_change_state(&mut self, msg: &ChangeInstanceState) {
        if !self.owns_application(&msg.application) {
            return;
        }
        self.machine
            .change_instance_state(&mut self.application, &msg.instance_path, msg.target);
    }

    fn handle_exports_published(&mut self, msg: &ExportsPublished) {
        if !self.owns_application(&msg.application) {
            return;
        }
        let mut by_prefix: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
        for (name, value) in &msg.variables {
            by_prefix
                .entry(variable_prefix(name).to_owned())
                .or_default()
                .insert(name.clone(), value.clone());
        }
        for path in self.application.instances.paths() {
            if path == msg.exporting_path {
                continue;
            }
            let Some(instance) = self.application.instances.get(&path) else {
                continue;
            };
            let Some(component) = self.application.graphs.find_component(&instance.component)
            else {
                continue;
            };
            let matching: Vec<String> = import_prefixes(component)
                .iter()
                .filter(|prefix| by_prefix.contains_key(**prefix))
                .map(|prefix| (*prefix).to_owned())
                .collect();
            if matching.is_empty() {
                continue;
            }
            let mut last_binding = None;
            if let Some(instance) = self.application.instances.get_mut(&path) {
                for prefix in &matching {
                    let binding = ImportBinding {
                        exporting_path: msg.exporting_path.clone(),
                        component: msg.component.clone(),
                        variables: by_prefix[prefix].clone(),
                    };
                    instance.bind_import(prefix, binding.clone());
                    last_binding = Some(binding);
                }
            }
            tracing::info!(
                instance = %path,
                exporter = %msg.exporting_path,
                prefixes = ?matching,
                "imports bound"
            );
            self.machine.update_state_from_imports(
                &mut self.application,
                &path,
                last_binding.as_ref(),
                msg.exporter_status,
                ImportsTrigger::ImportChange,
            );
        }
    }

    fn handle_exports_unpublished(&mut self, msg: &ExportsUnpublished) {
        if !self.owns_application(&msg.application) {
            return;
        }
        for path in self.application.instances.paths() {
            if path == msg.exporting_path {
                continue;
            }
            let removed = match self.application.instances.get_mut(&path) {
                Some(instance) => instance.unbind_exporter(&msg.exporting_path),
                None => continue,
            };
            if removed.is_empty() {
                continue;
            }
            tracing::info!(
                instance = %path,
                exporter = %msg.exporting_path,
                "imports unbound"
            );
            self.machine.update_state_from_imports(
                &mut self.application,
                &path,
                removed.first(),
                msg.exporter_status,
                ImportsTrigger::ImportChange,
            );
        }
    }

    fn handle_exports_requested(&mut self, msg: &ExportsRequested) {
        if !self.owns_application(&msg.application) {
            return;
        }
        for path in self.application.instances.paths() {
            let Some(instance) = self.application.instances.get(&path) else {
                continue;
            };
            if instance.status != InstanceStatus::DeployedStarted {
                continue;
            }
            if !self
                .machine
                .messaging()
                .is_listening(&self.application.name, &path)
            {
                continue;
            }
            let Some(component) = self.application.graphs.find_component(&instance.component)
            else {
                continue;
            };
            let exports_match = component
                .export_prefixes()
                .iter()
                .any(|prefix| msg.prefixes.iter().any(|p| p == prefix));
            if !exports_match {
                continue;
            }
            let variables = resolved_exports(instance, component);
            let component_name = component.name.clone();
            tracing::info!(instance = %path, "republishing exports on request");
            if let Err(err) = self.machine.messaging().publish_exports(
                &self.application.name,
                &path,
                &component_name,
                InstanceStatus::DeployedStarted,
                variables,
            ) {
                tracing::warn!(instance = %path, error = %err, "export republish failed");
            }
        }
    }

    fn statuses(&self) -> IndexMap<String, InstanceStatus> {
        self.application
            .instances
            .iter()
            .map(|(path, instance)| (path.clone(), instance.status))
            .collect()
    }

    /// Replay export publishes and retractions for local importers.
    ///
    /// Compares statuses before and after a message and feeds the same
    /// publish/unpublish events a remote agent would have received back into
    /// the local handlers, repeating until no further status moves.
    fn replay_local_exports(&mut self, mut before: IndexMap<String, InstanceStatus>) {
        // Each sweep can only move a bounded number of instances, so the
        // iteration count is capped by the tree size.
        for _ in 0..self.application.instances.len() + 1 {
            let after = self.statuses();
            let mut events = Vec::new();
            for (path, status) in &after {
                let prior = before.get(path).copied();
                let was_started = prior == Some(InstanceStatus::DeployedStarted);
                let is_started = *status == InstanceStatus::DeployedStarted;
                if is_started == was_started {
                    continue;
                }
                let Some(instance) = self.application.instances.get(path) else {
                    continue;
                };
                let Some(component) = self.application.graphs.find_component(&instance.component)
                else {
                    continue;
                };
                if is_started {
                    events.push(MessagePayload::ExportsPublished(ExportsPublished {
                        application: self.application.name.clone(),
                        exporting_path: path.clone(),
                        component: component.name.clone(),
                        exporter_status: *status,
                        variables: resolved_exports(instance, component),
                    }));
                } else {
                    events.push(MessagePayload::ExportsUnpublished(ExportsUnpublished {
                        application: self.application.name.clone(),
                        exporting_path: path.clone(),
                        component: component.name.clone(),
                        exporter_status: *status,
                    }));
                }
            }
            if events.is_empty() {
                return;
            }
            before = after;
            for event in &events {
                self.process_payload(event);
            }
        }
        tracing::warn!("local export replay did not settle, giving up for this message");
    }
}
