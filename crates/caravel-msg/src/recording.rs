//! ---
//! cvl_section: "02-messaging"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Recording messaging client for lifecycle tests."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Mutex;

use indexmap::{IndexMap, IndexSet};

use caravel_model::InstanceStatus;

use crate::client::{ListenCommand, MessagingClient};
use crate::Result;

/// One observed messaging call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `notify_instance_changed` was invoked.
    Notified {
        /// Instance path.
        path: String,
        /// Reported status.
        status: InstanceStatus,
    },
    /// `publish_exports` was invoked.
    Published {
        /// Exporting instance path.
        path: String,
    },
    /// `unpublish_exports` was invoked.
    Unpublished {
        /// Exporting instance path.
        path: String,
    },
    /// `request_exports` was invoked.
    Requested {
        /// Missing import prefixes.
        prefixes: Vec<String>,
    },
    /// `listen_to_requests` was invoked with `Start`.
    ListenStarted {
        /// Instance path.
        path: String,
    },
    /// `listen_to_requests` was invoked with `Stop`.
    ListenStopped {
        /// Instance path.
        path: String,
    },
}

/// Messaging client that records every call instead of delivering it.
///
/// Used by lifecycle and resolver tests to assert on notification order
/// without wiring a bus.
#[derive(Default)]
pub struct RecordingClient {
    events: Mutex<Vec<ClientEvent>>,
    listening: Mutex<IndexSet<(String, String)>>,
}

impl RecordingClient {
    /// Create an empty recording client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything observed so far, in call order.
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().expect("events poisoned").clone()
    }

    /// Statuses notified for one instance path, in call order.
    pub fn notifications_for(&self, path: &str) -> Vec<InstanceStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Notified { path: p, status } if p == path => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().expect("events poisoned").clear();
    }

    fn record(&self, event: ClientEvent) {
        self.events.lock().expect("events poisoned").push(event);
    }
}

impl MessagingClient for RecordingClient {
    fn notify_instance_changed(
        &self,
        _application: &str,
        instance_path: &str,
        status: InstanceStatus,
    ) -> Result<()> {
        self.record(ClientEvent::Notified {
            path: instance_path.to_owned(),
            status,
        });
        Ok(())
    }

    fn publish_exports(
        &self,
        _application: &str,
        exporting_path: &str,
        _component: &str,
        _exporter_status: InstanceStatus,
        _variables: IndexMap<String, String>,
    ) -> Result<()> {
        self.record(ClientEvent::Published {
            path: exporting_path.to_owned(),
        });
        Ok(())
    }

    fn unpublish_exports(
        &self,
        _application: &str,
        exporting_path: &str,
        _component: &str,
        _exporter_status: InstanceStatus,
    ) -> Result<()> {
        self.record(ClientEvent::Unpublished {
            path: exporting_path.to_owned(),
        });
        Ok(())
    }

    fn request_exports(&self, _application: &str, prefixes: &[String]) -> Result<()> {
        self.record(ClientEvent::Requested {
            prefixes: prefixes.to_vec(),
        });
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
                self.record(ClientEvent::ListenStarted {
                    path: instance_path.to_owned(),
                });
            }
            ListenCommand::Stop => {
                listening.shift_remove(&key);
                self.record(ClientEvent::ListenStopped {
                    path: instance_path.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn is_listening(&self, application: &str, instance_path: &str) -> bool {
        let listening = self.listening.lock().expect("listening poisoned");
        listening.contains(&(application.to_owned(), instance_path.to_owned()))
    }
}
