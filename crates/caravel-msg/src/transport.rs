//! ---
//! cvl_section: "02-messaging"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Transport seam and the in-memory message bus."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::{Message, MessagingError, Result};

/// Transport abstraction used by all messaging backends.
///
/// One transport value is one endpoint's inbox: the DM owns one, every agent
/// owns one. Concrete network backends are out of scope here; they only need
/// to satisfy this trait.
pub trait Transport: Send + Sync {
    /// Send a message into the transport.
    fn send(&self, msg: Message) -> Result<()>;
    /// Receive the next message from the transport, if available.
    fn recv(&self) -> Option<Message>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// In-memory transport backed by a mutex protected queue.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages, used by polling loops and tests.
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("queue poisoned").len()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, msg: Message) -> Result<()> {
        let mut guard = self.queue.lock().expect("queue poisoned");
        guard.push_back(msg);
        Ok(())
    }

    fn recv(&self) -> Option<Message> {
        let mut guard = self.queue.lock().expect("queue poisoned");
        guard.pop_front()
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Named registry of endpoints sharing one logical bus.
///
/// Routing is point-to-point (`send_to`) or broadcast to every endpoint
/// except the sender (`broadcast_from`), which is how export publishes reach
/// all other agents.
#[derive(Default)]
pub struct MessageBus {
    endpoints: Mutex<IndexMap<String, Arc<dyn Transport>>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint inbox under a stable name.
    pub fn register(&self, name: impl Into<String>, transport: Arc<dyn Transport>) {
        let mut endpoints = self.endpoints.lock().expect("endpoints poisoned");
        endpoints.insert(name.into(), transport);
    }

    /// Deliver a message to one named endpoint.
    pub fn send_to(&self, name: &str, msg: Message) -> Result<()> {
        let endpoints = self.endpoints.lock().expect("endpoints poisoned");
        let transport = endpoints
            .get(name)
            .ok_or_else(|| MessagingError::UnknownEndpoint(name.to_owned()))?;
        transport.send(msg)
    }

    /// Deliver a message to every endpoint except the sender.
    ///
    /// Per-endpoint failures are logged and do not abort delivery to the
    /// remaining endpoints.
    pub fn broadcast_from(&self, sender: &str, msg: Message) {
        let endpoints = self.endpoints.lock().expect("endpoints poisoned");
        for (name, transport) in endpoints.iter() {
            if name == sender {
                continue;
            }
            if let Err(err) = transport.send(msg.clone()) {
                tracing::warn!(endpoint = %name, error = %err, "bus delivery failed");
            }
        }
    }

    /// Names of all registered endpoints, in registration order.
    pub fn endpoint_names(&self) -> Vec<String> {
        let endpoints = self.endpoints.lock().expect("endpoints poisoned");
        endpoints.keys().cloned().collect()
    }
}
