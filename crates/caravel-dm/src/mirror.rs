//! ---
//! cvl_section: "05-dm"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Authoritative mirror of instance statuses."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use indexmap::IndexMap;
use parking_lot::RwLock;

use caravel_model::InstanceStatus;

/// Authoritative per-application view of instance statuses.
///
/// Updated from agent notifications. Agents send notifications in the exact
/// order their transitions occurred, so last-write-wins per instance is
/// sufficient.
#[derive(Default)]
pub struct StatusMirror {
    inner: RwLock<IndexMap<String, IndexMap<String, InstanceStatus>>>,
}

impl StatusMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest reported status of one instance.
    pub fn record(&self, application: &str, instance_path: &str, status: InstanceStatus) {
        let mut inner = self.inner.write();
        inner
            .entry(application.to_owned())
            .or_default()
            .insert(instance_path.to_owned(), status);
    }

    /// Last reported status of one instance, if any report arrived yet.
    pub fn status_of(&self, application: &str, instance_path: &str) -> Option<InstanceStatus> {
        let inner = self.inner.read();
        inner
            .get(application)
            .and_then(|instances| instances.get(instance_path))
            .copied()
    }

    /// Snapshot of every reported instance of one application.
    pub fn application_view(&self, application: &str) -> IndexMap<String, InstanceStatus> {
        let inner = self.inner.read();
        inner.get(application).cloned().unwrap_or_default()
    }

    /// Names of applications with at least one report.
    pub fn application_names(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner.keys().cloned().collect()
    }

    /// Drop every report of one application.
    pub fn forget_application(&self, application: &str) {
        let mut inner = self.inner.write();
        inner.shift_remove(application);
    }
}
