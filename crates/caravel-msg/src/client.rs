//! ---
//! cvl_section: "02-messaging"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Agent-facing messaging client contract and bus-backed implementation."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};

use caravel_model::InstanceStatus;

use crate::transport::MessageBus;
use crate::types::{
    ExportsPublished, ExportsRequested, ExportsUnpublished, InstanceChanged, Message,
    MessagePayload,
};
use crate::Result;

/// Well-known endpoint name of the deployment manager on the bus.
pub const DM_ENDPOINT: &str = "dm";

/// Whether an instance starts or stops listening for export requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenCommand {
    /// Begin answering export requests for this instance.
    Start,
    /// Stop answering export requests for this instance.
    Stop,
}

/// Outbound messaging operations the lifecycle machine relies on.
///
/// Implementations must be cheap to call from the single-threaded
/// message-processing path; delivery is fire-and-forget from the caller's
/// point of view.
pub trait MessagingClient: Send + Sync {
    /// Mirror a status change to the deployment manager.
    fn notify_instance_changed(
        &self,
        application: &str,
        instance_path: &str,
        status: InstanceStatus,
    ) -> Result<()>;

    /// Publish the instance's exported variables to all other agents.
    fn publish_exports(
        &self,
        application: &str,
        exporting_path: &str,
        component: &str,
        exporter_status: InstanceStatus,
        variables: IndexMap<String, String>,
    ) -> Result<()>;

    /// Retract previously published exports.
    fn unpublish_exports(
        &self,
        application: &str,
        exporting_path: &str,
        component: &str,
        exporter_status: InstanceStatus,
    ) -> Result<()>;

    /// Ask other agents to republish exports for the given prefixes.
    fn request_exports(&self, application: &str, prefixes: &[String]) -> Result<()>;

    /// Start or stop answering export requests on behalf of an instance.
    fn listen_to_requests(
        &self,
        command: ListenCommand,
        application: &str,
        instance_path: &str,
    ) -> Result<()>;

    /// True when the instance currently answers export requests.
    fn is_listening(&self, application: &str, instance_path: &str) -> bool;
}

/// [`MessagingClient`] implementation backed by a shared [`MessageBus`].
pub struct BusClient {
    bus: Arc<MessageBus>,
    endpoint: String,
    listening: Mutex<IndexSet<(String, String)>>,
}

impl BusClient {
    /// Create a client sending from the named endpoint.
    pub fn new(bus: Arc<MessageBus>, endpoint: impl Into<String>) -> Self {
        Self {
            bus,
            endpoint: endpoint.into(),
            listening: Mutex::new(IndexSet::new()),
        }
    }

    /// Endpoint name this client sends from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MessagingClient for BusClient {
    fn notify_instance_changed(
        &self,
        application: &str,
        instance_path: &str,
        status: InstanceStatus,
    ) -> Result<()> {
        let message = Message::new(MessagePayload::InstanceChanged(InstanceChanged {
            application: application.to_owned(),
            instance_path: instance_path.to_owned(),
            status,
        }));
        self.bus.send_to(DM_ENDPOINT, message)
    }

    fn publish_exports(
        &self,
        application: &str,
        exporting_path: &str,
        component: &str,
        exporter_status: InstanceStatus,
        variables: IndexMap<String, String>,
    ) -> Result<()> {
        let message = Message::new(MessagePayload::ExportsPublished(ExportsPublished {
            application: application.to_owned(),
            exporting_path: exporting_path.to_owned(),
            component: component.to_owned(),
            exporter_status,
            variables,
        }));
        self.bus.broadcast_from(&self.endpoint, message);
        Ok(())
    }

    fn unpublish_exports(
        &self,
        application: &str,
        exporting_path: &str,
        component: &str,
        exporter_status: InstanceStatus,
    ) -> Result<()> {
        let message = Message::new(MessagePayload::ExportsUnpublished(ExportsUnpublished {
            application: application.to_owned(),
            exporting_path: exporting_path.to_owned(),
            component: component.to_owned(),
            exporter_status,
        }));
        self.bus.broadcast_from(&self.endpoint, message);
        Ok(())
    }

    fn request_exports(&self, application: &str, prefixes: &[String]) -> Result<()> {
        let message = Message::new(MessagePayload::ExportsRequested(ExportsRequested {
            application: application.to_owned(),
            prefixes: prefixes.to_vec(),
        }));
        self.bus.broadcast_from(&self.endpoint, message);
        Ok(())
    }

    fn listen_to_requests(
        &self,
        command: ListenCommand,
        application: &str,
        instance_path: &str,
    ) -> Result<()> {
        let key = (application.to_owned(), instance_path.to_owned());
        let mut listening = self.listening.lock().expect("listening poisoned");
        match command {
            ListenCommand::Start => {
                listening.insert(key);
            }
            ListenCommand::Stop => {
                listening.shift_remove(&key);
            }
        }
        Ok(())
    }

    fn is_listening(&self, application: &str, instance_path: &str) -> bool {
        let listening = self.listening.lock().expect("listening poisoned");
        listening.contains(&(application.to_owned(), instance_path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryTransport, Transport};

    #[test]
    fn notifications_go_to_the_dm_endpoint() {
        let bus = Arc::new(MessageBus::new());
        let dm = Arc::new(InMemoryTransport::new());
        let other = Arc::new(InMemoryTransport::new());
        bus.register(DM_ENDPOINT, dm.clone());
        bus.register("agent-b", other.clone());

        let client = BusClient::new(bus, "agent-a");
        client
            .notify_instance_changed("lamp", "/vm", InstanceStatus::Deploying)
            .expect("notify succeeds");

        let received = dm.recv().expect("dm received");
        assert_eq!(received.kind(), "instance_changed");
        assert!(other.recv().is_none());
    }

    #[test]
    fn listen_commands_toggle_the_listening_set() {
        let client = BusClient::new(Arc::new(MessageBus::new()), "agent-a");
        assert!(!client.is_listening("lamp", "/vm/mysql"));
        client
            .listen_to_requests(ListenCommand::Start, "lamp", "/vm/mysql")
            .unwrap();
        assert!(client.is_listening("lamp", "/vm/mysql"));
        client
            .listen_to_requests(ListenCommand::Stop, "lamp", "/vm/mysql")
            .unwrap();
        assert!(!client.is_listening("lamp", "/vm/mysql"));
    }
}
