//! ---
//! cvl_section: "03-plugins"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Plugin capability contract and registry."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! The plugin seam between the lifecycle state machine and concrete
//! deployment recipes. A plugin handles every component whose
//! `installer_name` matches its own name. All calls are blocking and may
//! take arbitrary wall-clock time; the agent accepts this as a throughput
//! bound, not a correctness risk.

pub mod scripted;

use std::sync::Arc;

use indexmap::IndexMap;

use caravel_model::{ImportBinding, Instance, InstanceStatus};

/// Shared result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors raised by deployment recipes.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A recipe step failed.
    #[error("plugin operation failed: {0}")]
    OperationFailed(String),
    /// No plugin is registered for the requested installer.
    #[error("no plugin registered for installer {0}")]
    UnknownInstaller(String),
    /// Wrapper for IO errors encountered while executing a recipe.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deployment recipe executor for one installer family.
pub trait Plugin: Send + Sync {
    /// Installer name this plugin handles.
    fn name(&self) -> &str;

    /// Prepare plugin-specific state for an instance before first use.
    fn initialize(&self, instance: &Instance) -> Result<()>;

    /// Install the instance on the machine.
    fn deploy(&self, instance: &Instance) -> Result<()>;

    /// Start the installed instance.
    fn start(&self, instance: &Instance) -> Result<()>;

    /// Stop the running instance. The plugin is expected to stop its own
    /// children recursively.
    fn stop(&self, instance: &Instance) -> Result<()>;

    /// Remove the instance from the machine, recursively.
    fn undeploy(&self, instance: &Instance) -> Result<()>;

    /// Reconfigure a running instance after one of its imports changed.
    ///
    /// `trigger_status` is the status of the instance whose change triggered
    /// the call, e.g. the exporter's status at publish time.
    fn update(
        &self,
        instance: &Instance,
        changed_import: Option<&ImportBinding>,
        trigger_status: InstanceStatus,
    ) -> Result<()>;
}

/// Registry of plugins keyed by installer name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own installer name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        tracing::debug!(installer = %plugin.name(), "plugin registered");
        self.plugins.insert(plugin.name().to_owned(), plugin);
    }

    /// Resolve the plugin for an installer name.
    pub fn find(&self, installer_name: &str) -> Result<Arc<dyn Plugin>> {
        self.plugins
            .get(installer_name)
            .cloned()
            .ok_or_else(|| PluginError::UnknownInstaller(installer_name.to_owned()))
    }

    /// Installer names with a registered plugin, in registration order.
    pub fn installer_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }
}

pub use scripted::{PluginOp, ScriptedPlugin};
