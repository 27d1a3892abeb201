//! ---
//! cvl_section: "06-configuration"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Shared configuration and logging utilities."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! Shared primitives for the Caravel orchestrator workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the deployment manager, the agents, and the daemon binary.

pub mod config;
pub mod logging;

pub use config::{
    AgentConfig, AppConfig, DmConfig, LoadedAppConfig, LoggingConfig, MessagingConfig,
};
pub use logging::{init_tracing, LogFormat};
