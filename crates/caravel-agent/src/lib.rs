//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Agent crate: lifecycle machine, resolver, resources, runtime."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! The agent side of the deployment platform.
//!
//! An agent owns one application subtree and drives its instances through
//! the lifecycle state machine, reacting to DM commands and to export
//! publishes from other agents. Everything runs on one message-processing
//! thread per agent; plugin invocations block that thread by design.

pub mod lifecycle;
pub mod resolver;
pub mod resources;
pub mod runtime;

pub use lifecycle::LifecycleMachine;
pub use resolver::{has_all_required_imports, missing_required_prefixes, ImportsTrigger};
pub use resources::InstanceResources;
pub use runtime::AgentRuntime;
