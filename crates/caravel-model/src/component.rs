//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Design-time component definitions."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Whether an imported variable must be bound before the instance can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportRequirement {
    #[default]
    Required,
    Optional,
}

impl ImportRequirement {
    pub fn is_required(self) -> bool {
        matches!(self, ImportRequirement::Required)
    }
}

/// A reusable software role in the deployment model.
///
/// Components are created at model-load time, validated once, and then shared
/// read-only by every instance that references them. Placement edges are
/// recorded symmetrically by component name on both sides (`children` /
/// `ancestors`) and resolved through the owning [`crate::Graphs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Unique component name. Dots are reserved for variable namespacing.
    pub name: String,
    /// Display name shown to operators.
    #[serde(default)]
    pub alias: String,
    /// Identifies which plugin deploys this component.
    #[serde(default)]
    pub installer_name: String,
    /// Facets this component belongs to; each contributes a legal export prefix.
    #[serde(default)]
    pub facet_names: IndexSet<String>,
    /// Exported variables with their optional default values, in declaration order.
    #[serde(default)]
    pub exported_variables: IndexMap<String, Option<String>>,
    /// Imported variables and whether each one is required.
    #[serde(default)]
    pub imported_variables: IndexMap<String, ImportRequirement>,
    /// Names of components that can be installed under this one.
    #[serde(default)]
    pub children: IndexSet<String>,
    /// Names of components this one can be installed under.
    #[serde(default)]
    pub ancestors: IndexSet<String>,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        installer_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            installer_name: installer_name.into(),
            ..Self::default()
        }
    }

    /// Declare facet membership.
    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet_names.insert(facet.into());
        self
    }

    /// Declare an exported variable without a default value.
    pub fn export(mut self, name: impl Into<String>) -> Self {
        self.exported_variables.insert(name.into(), None);
        self
    }

    /// Declare an exported variable with a default value.
    pub fn export_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        self.exported_variables
            .insert(name.into(), Some(default.into()));
        self
    }

    /// Declare an imported variable.
    pub fn import(mut self, name: impl Into<String>, requirement: ImportRequirement) -> Self {
        self.imported_variables.insert(name.into(), requirement);
        self
    }

    /// True when the component sits at the top of the graphs.
    pub fn is_root(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Legal prefixes for this component's exported variables.
    pub fn export_prefixes(&self) -> IndexSet<&str> {
        let mut prefixes: IndexSet<&str> = IndexSet::new();
        prefixes.insert(self.name.as_str());
        prefixes.extend(self.facet_names.iter().map(String::as_str));
        prefixes
    }
}
