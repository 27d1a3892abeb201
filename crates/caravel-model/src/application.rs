//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Application binding of a component graphs to an instance tree."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::graphs::Graphs;
use crate::instance::InstanceTree;

/// One deployable application: a named graphs plus its placed instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    /// Version qualifier, e.g. `1.0.2` or `snapshot`.
    pub qualifier: String,
    pub graphs: Graphs,
    #[serde(default)]
    pub instances: InstanceTree,
}

impl Application {
    pub fn new(name: impl Into<String>, qualifier: impl Into<String>, graphs: Graphs) -> Self {
        Self {
            name: name.into(),
            qualifier: qualifier.into(),
            graphs,
            instances: InstanceTree::new(),
        }
    }
}
