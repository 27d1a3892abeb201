//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Runtime instance tree with path-keyed adjacency."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::InstanceStatus;

/// One binding received from an exporting instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    /// Path of the instance that exported the variables.
    pub exporting_path: String,
    /// Component name of the exporting instance.
    pub component: String,
    /// Exported variable values, full names mapped to values.
    #[serde(default)]
    pub variables: IndexMap<String, String>,
}

/// A placed, runtime instantiation of a component.
///
/// Identity is the slash-separated path of ancestor names, e.g.
/// `/vm1/tomcat`. The component is referenced by name and resolved through
/// the application's [`crate::Graphs`]; only `status`, `overridden_exports`,
/// `data`, and `imports` are per-instance mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Name of the component this instance realises.
    pub component: String,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Path of the parent instance; `None` for roots.
    #[serde(default)]
    pub parent: Option<String>,
    /// Paths of child instances, in insertion order.
    #[serde(default)]
    pub children: IndexSet<String>,
    /// Instance-level export value overrides.
    #[serde(default)]
    pub overridden_exports: IndexMap<String, String>,
    /// Free-form transient markers.
    #[serde(default)]
    pub data: IndexMap<String, String>,
    /// Currently bound imports, keyed by imported-variable prefix.
    #[serde(default)]
    pub imports: IndexMap<String, Vec<ImportBinding>>,
}

impl Instance {
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            ..Self::default()
        }
    }

    /// Path of this instance, derived from the recorded parent path.
    pub fn path(&self) -> String {
        join_path(self.parent.as_deref(), &self.name)
    }

    /// Replace or append the binding for `prefix` coming from one exporter.
    ///
    /// Returns the previous binding from the same exporter, if any.
    pub fn bind_import(&mut self, prefix: &str, binding: ImportBinding) -> Option<ImportBinding> {
        let bindings = self.imports.entry(prefix.to_owned()).or_default();
        if let Some(existing) = bindings
            .iter_mut()
            .find(|b| b.exporting_path == binding.exporting_path)
        {
            return Some(std::mem::replace(existing, binding));
        }
        bindings.push(binding);
        None
    }

    /// Drop every binding originating from `exporting_path`.
    ///
    /// Returns the removed bindings; empty prefixes are pruned from the map.
    pub fn unbind_exporter(&mut self, exporting_path: &str) -> Vec<ImportBinding> {
        let mut removed = Vec::new();
        for bindings in self.imports.values_mut() {
            let mut index = 0;
            while index < bindings.len() {
                if bindings[index].exporting_path == exporting_path {
                    removed.push(bindings.remove(index));
                } else {
                    index += 1;
                }
            }
        }
        self.imports.retain(|_, bindings| !bindings.is_empty());
        removed
    }
}

/// Errors raised when mutating an [`InstanceTree`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("no instance registered at path {0}")]
    UnknownPath(String),
    #[error("an instance already exists at path {0}")]
    DuplicatePath(String),
    #[error("instance at {0} is not NOT_DEPLOYED and cannot be removed")]
    NotRemovable(String),
}

/// Path-keyed arena of instances.
///
/// Parent and child pointers are stored as paths on both sides and kept in
/// agreement by the insertion and removal operations; external code never
/// patches the adjacency directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTree {
    instances: IndexMap<String, Instance>,
}

/// Compute the path of an instance under an optional parent path.
pub fn join_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}/{}", parent, name),
        None => format!("/{}", name),
    }
}

impl InstanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a root instance. The instance's parent field is overwritten.
    pub fn insert_root(&mut self, mut instance: Instance) -> Result<String, TreeError> {
        let path = join_path(None, &instance.name);
        if self.instances.contains_key(&path) {
            return Err(TreeError::DuplicatePath(path));
        }
        instance.parent = None;
        instance.children.clear();
        self.instances.insert(path.clone(), instance);
        Ok(path)
    }

    /// Insert a child under an existing parent, recording both edge sides.
    pub fn insert_child(
        &mut self,
        parent_path: &str,
        mut instance: Instance,
    ) -> Result<String, TreeError> {
        if !self.instances.contains_key(parent_path) {
            return Err(TreeError::UnknownPath(parent_path.to_owned()));
        }
        let path = join_path(Some(parent_path), &instance.name);
        if self.instances.contains_key(&path) {
            return Err(TreeError::DuplicatePath(path));
        }
        instance.parent = Some(parent_path.to_owned());
        instance.children.clear();
        self.instances.insert(path.clone(), instance);
        if let Some(parent) = self.instances.get_mut(parent_path) {
            parent.children.insert(path.clone());
        }
        Ok(path)
    }

    /// Remove an instance and all of its descendants.
    ///
    /// Every member of the subtree must be `NOT_DEPLOYED`.
    pub fn remove_subtree(&mut self, path: &str) -> Result<Vec<Instance>, TreeError> {
        if !self.instances.contains_key(path) {
            return Err(TreeError::UnknownPath(path.to_owned()));
        }
        let members = self.collect_subtree(path);
        for member in &members {
            let instance = &self.instances[member];
            if instance.status != InstanceStatus::NotDeployed {
                return Err(TreeError::NotRemovable(member.clone()));
            }
        }
        if let Some(parent_path) = self.instances[path].parent.clone() {
            if let Some(parent) = self.instances.get_mut(&parent_path) {
                parent.children.shift_remove(path);
            }
        }
        let mut removed = Vec::with_capacity(members.len());
        for member in members {
            if let Some(instance) = self.instances.shift_remove(&member) {
                removed.push(instance);
            }
        }
        Ok(removed)
    }

    /// Paths of the subtree rooted at `path`, in top-down breadth-first order.
    ///
    /// Returns an empty vector for an unknown path. Callers that need
    /// leaf-first processing reverse the result.
    pub fn collect_subtree(&self, path: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        if !self.instances.contains_key(path) {
            return ordered;
        }
        let mut queue = std::collections::VecDeque::from([path.to_owned()]);
        while let Some(current) = queue.pop_front() {
            if let Some(instance) = self.instances.get(&current) {
                queue.extend(instance.children.iter().cloned());
            }
            ordered.push(current);
        }
        ordered
    }

    pub fn get(&self, path: &str) -> Option<&Instance> {
        self.instances.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Instance> {
        self.instances.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.instances.contains_key(path)
    }

    /// All paths in insertion order.
    pub fn paths(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    /// Paths of the root instances, in insertion order.
    pub fn root_paths(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|(_, instance)| instance.parent.is_none())
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Instance)> {
        self.instances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_level_tree() -> (InstanceTree, String, String, String) {
        let mut tree = InstanceTree::new();
        let vm = tree.insert_root(Instance::new("vm", "vm")).unwrap();
        let server = tree
            .insert_child(&vm, Instance::new("tomcat", "tomcat"))
            .unwrap();
        let app = tree
            .insert_child(&server, Instance::new("webapp", "webapp"))
            .unwrap();
        (tree, vm, server, app)
    }

    #[test]
    fn paths_are_derived_from_ancestor_chain() {
        let (_, vm, server, app) = three_level_tree();
        assert_eq!(vm, "/vm");
        assert_eq!(server, "/vm/tomcat");
        assert_eq!(app, "/vm/tomcat/webapp");
    }

    #[test]
    fn edges_agree_on_both_sides() {
        let (tree, vm, server, _) = three_level_tree();
        assert!(tree.get(&vm).unwrap().children.contains(&server));
        assert_eq!(tree.get(&server).unwrap().parent.as_deref(), Some("/vm"));
    }

    #[test]
    fn collect_subtree_is_top_down_breadth_first() {
        let (mut tree, vm, server, app) = three_level_tree();
        tree.insert_child(&vm, Instance::new("mysql", "mysql")).unwrap();
        let members = tree.collect_subtree(&vm);
        assert_eq!(members, vec![vm, server, "/vm/mysql".to_owned(), app]);
    }

    #[test]
    fn duplicate_sibling_names_are_rejected() {
        let mut tree = InstanceTree::new();
        let vm = tree.insert_root(Instance::new("vm", "vm")).unwrap();
        tree.insert_child(&vm, Instance::new("tomcat", "tomcat")).unwrap();
        let err = tree
            .insert_child(&vm, Instance::new("tomcat", "tomcat"))
            .unwrap_err();
        assert_eq!(err, TreeError::DuplicatePath("/vm/tomcat".to_owned()));
    }

    #[test]
    fn remove_requires_not_deployed_subtree() {
        let (mut tree, vm, server, _) = three_level_tree();
        tree.get_mut(&server).unwrap().status = InstanceStatus::DeployedStopped;
        let err = tree.remove_subtree(&vm).unwrap_err();
        assert_eq!(err, TreeError::NotRemovable(server.clone()));

        tree.get_mut(&server).unwrap().status = InstanceStatus::NotDeployed;
        let removed = tree.remove_subtree(&vm).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(tree.is_empty());
    }

    #[test]
    fn bind_import_replaces_same_exporter() {
        let mut instance = Instance::new("webapp", "webapp");
        let first = ImportBinding {
            exporting_path: "/vm/mysql".into(),
            component: "mysql".into(),
            variables: IndexMap::from([("mysql.port".to_owned(), "3306".to_owned())]),
        };
        assert!(instance.bind_import("mysql", first.clone()).is_none());
        let second = ImportBinding {
            variables: IndexMap::from([("mysql.port".to_owned(), "3307".to_owned())]),
            ..first.clone()
        };
        let previous = instance.bind_import("mysql", second).unwrap();
        assert_eq!(previous, first);
        assert_eq!(instance.imports["mysql"].len(), 1);
    }

    #[test]
    fn unbind_exporter_prunes_empty_prefixes() {
        let mut instance = Instance::new("webapp", "webapp");
        instance.bind_import(
            "mysql",
            ImportBinding {
                exporting_path: "/vm/mysql".into(),
                component: "mysql".into(),
                variables: IndexMap::new(),
            },
        );
        let removed = instance.unbind_exporter("/vm/mysql");
        assert_eq!(removed.len(), 1);
        assert!(instance.imports.is_empty());
    }
}
