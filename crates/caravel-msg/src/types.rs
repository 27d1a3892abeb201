//! ---
//! cvl_section: "02-messaging"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Message envelope and payload schema."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use caravel_model::InstanceStatus;

/// Schema version broadcast alongside every message payload.
pub const SCHEMA_VERSION: u16 = 1;

/// Message envelope describing the payload carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    /// DM request to drive an instance towards a target state.
    ChangeInstanceState(ChangeInstanceState),
    /// Agent notification that an instance status changed.
    InstanceChanged(InstanceChanged),
    /// Exported variables published by a started instance.
    ExportsPublished(ExportsPublished),
    /// Retraction of previously published exports.
    ExportsUnpublished(ExportsUnpublished),
    /// Broadcast asking other agents who exports the given prefixes.
    ExportsRequested(ExportsRequested),
}

/// Unified message structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Version of the schema used by the payload.
    pub schema_version: u16,
    /// Timestamp when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Actual payload carried by the message.
    pub payload: MessagePayload,
}

impl Message {
    /// Construct a new message envelope around the provided payload.
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Convenience accessor returning the payload kind as a static string.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            MessagePayload::ChangeInstanceState(_) => "change_instance_state",
            MessagePayload::InstanceChanged(_) => "instance_changed",
            MessagePayload::ExportsPublished(_) => "exports_published",
            MessagePayload::ExportsUnpublished(_) => "exports_unpublished",
            MessagePayload::ExportsRequested(_) => "exports_requested",
        }
    }
}

/// Stable states an operator can request for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// Fully removed from the machine.
    NotDeployed,
    /// Installed but not running.
    DeployedStopped,
    /// Installed and running.
    DeployedStarted,
}

/// DM command driving one instance towards a target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInstanceState {
    /// Application the instance belongs to.
    pub application: String,
    /// Path of the targeted instance.
    pub instance_path: String,
    /// Requested stable state.
    pub target: TargetState,
}

/// Agent notification mirrored into the DM status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceChanged {
    /// Application the instance belongs to.
    pub application: String,
    /// Path of the instance whose status changed.
    pub instance_path: String,
    /// New status of the instance.
    pub status: InstanceStatus,
}

/// Exported variables made available to importing instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsPublished {
    /// Application the exporter belongs to.
    pub application: String,
    /// Path of the exporting instance.
    pub exporting_path: String,
    /// Component name of the exporting instance.
    pub component: String,
    /// Status of the exporter when the message was sent; passed through to
    /// the importer's plugin update hook.
    pub exporter_status: InstanceStatus,
    /// Exported variable values, full names mapped to values.
    #[serde(default)]
    pub variables: IndexMap<String, String>,
}

/// Retraction of previously published exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsUnpublished {
    /// Application the exporter belongs to.
    pub application: String,
    /// Path of the exporting instance.
    pub exporting_path: String,
    /// Component name of the exporting instance.
    pub component: String,
    /// Status of the exporter when the message was sent.
    pub exporter_status: InstanceStatus,
}

/// Broadcast asking exporters of the listed prefixes to republish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsRequested {
    /// Application the requesting instance belongs to.
    pub application: String,
    /// Import prefixes the requester still misses.
    pub prefixes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_preserves_payloads() {
        let payload = MessagePayload::InstanceChanged(InstanceChanged {
            application: "lamp".into(),
            instance_path: "/vm/tomcat".into(),
            status: InstanceStatus::DeployedStarted,
        });
        let message = Message::new(payload.clone());
        let json = serde_json::to_string(&message).expect("serialize json");
        let roundtrip: Message = serde_json::from_str(&json).expect("deserialize json");
        assert_eq!(roundtrip.kind(), "instance_changed");
        assert_eq!(roundtrip.payload, payload);
    }

    #[test]
    fn exports_published_defaults_missing_variables() {
        let json = r#"{
            "application": "lamp",
            "exporting_path": "/vm/mysql",
            "component": "mysql",
            "exporter_status": "DEPLOYED_STARTED"
        }"#;
        let exports: ExportsPublished = serde_json::from_str(json).expect("parse exports");
        assert!(exports.variables.is_empty());
    }
}
