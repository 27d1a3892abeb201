//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Variable naming helpers and export resolution."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use indexmap::{IndexMap, IndexSet};

use crate::component::Component;
use crate::instance::Instance;

/// Variable names reserved for the runtime; instance-level export overrides
/// must not use them. Their values are supplied by the machine layer when an
/// agent comes up, never by the model.
pub const RESERVED_VARIABLES: &[&str] = &["ip", "instance-path", "instance-name"];

/// Prefix before the first dot, or the whole name when there is none.
pub fn variable_prefix(name: &str) -> &str {
    match name.find('.') {
        Some(index) => &name[..index],
        None => name,
    }
}

/// Simple name after the first dot, empty when there is none.
pub fn variable_simple_name(name: &str) -> &str {
    match name.find('.') {
        Some(index) => &name[index + 1..],
        None => "",
    }
}

/// Prefixes of the imported variables a component requires to start.
pub fn required_import_prefixes(component: &Component) -> IndexSet<&str> {
    component
        .imported_variables
        .iter()
        .filter(|(_, requirement)| requirement.is_required())
        .map(|(name, _)| variable_prefix(name))
        .collect()
}

/// Prefixes of every imported variable, required or optional.
pub fn import_prefixes(component: &Component) -> IndexSet<&str> {
    component
        .imported_variables
        .keys()
        .map(|name| variable_prefix(name.as_str()))
        .collect()
}

/// Effective exported values for an instance: component defaults overlaid
/// with the instance-level overrides. Exports without a default and without
/// an override resolve to an empty value so that importers still see the
/// variable name.
pub fn resolved_exports(instance: &Instance, component: &Component) -> IndexMap<String, String> {
    let mut resolved = IndexMap::new();
    for (name, default) in &component.exported_variables {
        resolved.insert(name.clone(), default.clone().unwrap_or_default());
    }
    for (name, value) in &instance.overridden_exports {
        resolved.insert(name.clone(), value.clone());
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ImportRequirement;

    #[test]
    fn prefix_and_simple_name_split_at_first_dot() {
        assert_eq!(variable_prefix("mysql.port"), "mysql");
        assert_eq!(variable_simple_name("mysql.port"), "port");
        assert_eq!(variable_prefix("db.cluster.url"), "db");
        assert_eq!(variable_simple_name("db.cluster.url"), "cluster.url");
        assert_eq!(variable_prefix("plain"), "plain");
        assert_eq!(variable_simple_name("plain"), "");
    }

    #[test]
    fn required_prefixes_ignore_optional_imports() {
        let component = Component::new("webapp", "Webapp", "script")
            .import("mysql.port", ImportRequirement::Required)
            .import("mysql.ip", ImportRequirement::Required)
            .import("cache.url", ImportRequirement::Optional);
        let required = required_import_prefixes(&component);
        assert_eq!(required.len(), 1);
        assert!(required.contains("mysql"));
        assert_eq!(import_prefixes(&component).len(), 2);
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let component = Component::new("mysql", "MySQL", "script")
            .export_with_default("mysql.port", "3306")
            .export("mysql.ip");
        let mut instance = Instance::new("mysql", "mysql");
        instance
            .overridden_exports
            .insert("mysql.port".to_owned(), "3307".to_owned());
        let resolved = resolved_exports(&instance, &component);
        assert_eq!(resolved["mysql.port"], "3307");
        assert_eq!(resolved["mysql.ip"], "");
    }
}
