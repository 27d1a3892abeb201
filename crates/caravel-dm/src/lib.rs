//! ---
//! cvl_section: "05-dm"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Deployment manager crate."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! The deployment manager side of the platform.
//!
//! The DM never touches instance state directly: it sends state-change
//! commands to the owning agents, mirrors the status notifications they send
//! back, and schedules machine bring-up through pluggable target handlers.

pub mod mirror;
pub mod runtime;
pub mod targets;

pub use mirror::StatusMirror;
pub use runtime::DmRuntime;
pub use targets::{MachineConfigurator, TargetScheduler};
