//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Component graph container and edge maintenance."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::component::Component;

/// The full set of components for one application model.
///
/// Components are stored flat, in declaration order; root components are the
/// ones with no ancestors. Storage is deliberately a `Vec` rather than a
/// name-keyed map so that duplicated names survive loading and are reported
/// by validation instead of being silently merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graphs {
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Graphs {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// First component carrying the given name, if any.
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn find_component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.name == name)
    }

    /// Components with no ancestors, in declaration order.
    pub fn root_components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.is_root())
    }

    /// Record a "can be installed under" edge on both sides.
    ///
    /// Returns false when either component is unknown; in that case neither
    /// side is modified.
    pub fn add_child_edge(&mut self, parent: &str, child: &str) -> bool {
        if self.find_component(parent).is_none() || self.find_component(child).is_none() {
            return false;
        }
        if let Some(p) = self.find_component_mut(parent) {
            p.children.insert(child.to_owned());
        }
        if let Some(c) = self.find_component_mut(child) {
            c.ancestors.insert(parent.to_owned());
        }
        true
    }

    /// All exported variable names declared anywhere in the graphs.
    pub fn all_exported_variable_names(&self) -> Vec<&str> {
        self.components
            .iter()
            .flat_map(|c| c.exported_variables.keys().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
