//! ---
//! cvl_section: "05-dm"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "DM command routing and notification intake."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use caravel_msg::{
    ChangeInstanceState, Message, MessageBus, MessagePayload, Result, TargetState, Transport,
};

use crate::mirror::StatusMirror;

/// The deployment manager's command and notification side.
///
/// Commands are routed to the agent owning the targeted root instance;
/// notifications coming back update the [`StatusMirror`]. The DM never
/// mutates instance state itself.
pub struct DmRuntime {
    mirror: Arc<StatusMirror>,
    bus: Arc<MessageBus>,
    inbox: Arc<dyn Transport>,
    // (application, root instance path) -> agent endpoint
    agents: Mutex<IndexMap<(String, String), String>>,
}

impl DmRuntime {
    pub fn new(mirror: Arc<StatusMirror>, bus: Arc<MessageBus>, inbox: Arc<dyn Transport>) -> Self {
        Self {
            mirror,
            bus,
            inbox,
            agents: Mutex::new(IndexMap::new()),
        }
    }

    /// The status mirror fed by this runtime.
    pub fn mirror(&self) -> &Arc<StatusMirror> {
        &self.mirror
    }

    /// Declare which agent endpoint owns a root instance.
    pub fn register_agent(
        &self,
        application: impl Into<String>,
        root_path: impl Into<String>,
        endpoint: impl Into<String>,
    ) {
        let key = (application.into(), root_path.into());
        let endpoint = endpoint.into();
        tracing::info!(application = %key.0, root = %key.1, endpoint = %endpoint, "agent registered");
        self.agents.lock().insert(key, endpoint);
    }

    /// Ask the owning agent to drive an instance towards a target state.
    pub fn request_state(
        &self,
        application: &str,
        instance_path: &str,
        target: TargetState,
    ) -> Result<()> {
        let root = root_of(instance_path);
        let endpoint = {
            let agents = self.agents.lock();
            agents
                .get(&(application.to_owned(), root.clone()))
                .cloned()
        };
        let Some(endpoint) = endpoint else {
            tracing::warn!(application = %application, root = %root, "no agent registered for root");
            return Err(caravel_msg::MessagingError::UnknownEndpoint(root));
        };
        tracing::info!(
            application = %application,
            instance = %instance_path,
            target = ?target,
            endpoint = %endpoint,
            "state change requested"
        );
        let message = Message::new(MessagePayload::ChangeInstanceState(ChangeInstanceState {
            application: application.to_owned(),
            instance_path: instance_path.to_owned(),
            target,
        }));
        self.bus.send_to(&endpoint, message)
    }

    /// Drain queued notifications into the mirror.
    ///
    /// Returns the number of processed messages.
    pub fn pump(&self) -> usize {
        let mut processed = 0;
        while let Some(message) = self.inbox.recv() {
            match message.payload {
                MessagePayload::InstanceChanged(changed) => {
                    tracing::debug!(
                        application = %changed.application,
                        instance = %changed.instance_path,
                        status = %changed.status,
                        "status mirrored"
                    );
                    self.mirror
                        .record(&changed.application, &changed.instance_path, changed.status);
                }
                _ => {
                    tracing::debug!("non-notification message ignored by DM");
                }
            }
            processed += 1;
        }
        processed
    }
}

/// Root instance path of a path, e.g. `/vm/tomcat` -> `/vm`.
fn root_of(instance_path: &str) -> String {
    match instance_path
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
    {
        Some(first) => format!("/{}", first),
        None => instance_path.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_model::InstanceStatus;
    use caravel_msg::{InMemoryTransport, InstanceChanged};

    #[test]
    fn root_paths_are_extracted() {
        assert_eq!(root_of("/vm/tomcat/webapp"), "/vm");
        assert_eq!(root_of("/vm"), "/vm");
    }

    #[test]
    fn commands_reach_the_owning_agent() {
        let bus = Arc::new(MessageBus::new());
        let agent_inbox = Arc::new(InMemoryTransport::new());
        bus.register("agent-vm", agent_inbox.clone());
        let dm_inbox = Arc::new(InMemoryTransport::new());
        let dm = DmRuntime::new(Arc::new(StatusMirror::new()), bus, dm_inbox);
        dm.register_agent("lamp", "/vm", "agent-vm");

        dm.request_state("lamp", "/vm/tomcat", TargetState::DeployedStarted)
            .expect("routed");
        let received = agent_inbox.recv().expect("agent got the command");
        assert_eq!(received.kind(), "change_instance_state");

        let err = dm
            .request_state("lamp", "/other", TargetState::NotDeployed)
            .unwrap_err();
        assert!(matches!(err, caravel_msg::MessagingError::UnknownEndpoint(_)));
    }

    #[test]
    fn notifications_update_the_mirror() {
        let dm_inbox = Arc::new(InMemoryTransport::new());
        let mirror = Arc::new(StatusMirror::new());
        let dm = DmRuntime::new(mirror.clone(), Arc::new(MessageBus::new()), dm_inbox.clone());

        dm_inbox
            .send(Message::new(MessagePayload::InstanceChanged(
                InstanceChanged {
                    application: "lamp".into(),
                    instance_path: "/vm".into(),
                    status: InstanceStatus::DeployedStarted,
                },
            )))
            .expect("queued");

        assert_eq!(dm.pump(), 1);
        assert_eq!(
            mirror.status_of("lamp", "/vm"),
            Some(InstanceStatus::DeployedStarted)
        );
    }
}
