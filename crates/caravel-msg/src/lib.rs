//! ---
//! cvl_section: "02-messaging"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Message schema and transport abstractions."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Typed messages exchanged between the deployment manager and its agents,
//! the pluggable [`Transport`] seam, and the [`MessagingClient`] contract the
//! lifecycle machine talks to. Wire serialization of concrete network
//! backends is out of scope; the in-memory bus is the reference
//! implementation used by tests and single-process deployments.

pub mod client;
pub mod recording;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors surfaced by transports and the message bus.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Raised when a transport backend is not implemented.
    #[error("messaging backend not implemented: {0}")]
    Unimplemented(&'static str),
    /// Raised when addressing an endpoint the bus does not know.
    #[error("unknown messaging endpoint: {0}")]
    UnknownEndpoint(String),
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use client::{BusClient, ListenCommand, MessagingClient, DM_ENDPOINT};
pub use recording::{ClientEvent, RecordingClient};
pub use transport::{InMemoryTransport, MessageBus, Transport};
pub use types::{
    ChangeInstanceState, ExportsPublished, ExportsRequested, ExportsUnpublished, InstanceChanged,
    Message, MessagePayload, TargetState, SCHEMA_VERSION,
};
