//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Structural validation over components, graphs, instances, and applications."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! Validation never fails with an error or a panic for anticipated
//! structural defects: every check appends to an ordered list of
//! [`ModelError`] values. Errors are emitted depth-first in declaration
//! order and are never deduplicated, so callers (and tests) can rely on
//! both the content and the ordering of the result.
use std::path::Path;

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::application::Application;
use crate::component::Component;
use crate::graphs::Graphs;
use crate::instance::{Instance, InstanceTree};
use crate::variables::{variable_prefix, variable_simple_name, RESERVED_VARIABLES};

/// Installer identifier handled by the machine-provisioning layer.
pub const TARGET_INSTALLER: &str = "target";
/// Properties file every target resource directory must contain.
pub const TARGET_PROPERTIES_FILE: &str = "target.properties";

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][\w\-.]*$").expect("valid identifier pattern"));
static INSTALLER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][\w\- ]*$").expect("valid installer pattern"));
static INSTANCE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][\w\- ]*$").expect("valid instance name pattern"));

/// Machine-readable classification of a structural defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    EmptyComponentName,
    InvalidComponentName,
    EmptyComponentAlias,
    EmptyComponentInstaller,
    InvalidComponentInstaller,
    EmptyFacetName,
    InvalidFacetName,
    EmptyVariableName,
    InvalidVariableName,
    InvalidExportPrefix,
    ComponentImportsExports,
    NoRootComponent,
    DuplicateComponent,
    UnresolvableVariable,
    CycleInComponents,
    NoResourceDirectory,
    NoIaasProperties,
    EmptyInstanceName,
    InvalidInstanceName,
    EmptyInstanceComponent,
    UnknownComponent,
    MagicInstanceVariable,
    EmptyApplicationName,
    EmptyApplicationQualifier,
    MissingInstanceParent,
    InvalidInstanceParent,
}

/// One structural defect: what went wrong, where, and a human-readable hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelError {
    pub code: ErrorCode,
    pub location: String,
    pub details: String,
}

impl ModelError {
    pub fn new(code: ErrorCode, location: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            location: location.into(),
            details: details.into(),
        }
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.code, self.location, self.details)
    }
}

/// Validate one component in isolation.
pub fn validate_component(component: &Component) -> Vec<ModelError> {
    let mut errors = Vec::new();
    let location = if component.name.trim().is_empty() {
        "component <unnamed>".to_owned()
    } else {
        format!("component {}", component.name)
    };

    if component.name.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyComponentName,
            &location,
            "component name cannot be empty",
        ));
    } else if !ID_PATTERN.is_match(&component.name) {
        errors.push(ModelError::new(
            ErrorCode::InvalidComponentName,
            &location,
            format!("invalid component name: {}", component.name),
        ));
    } else if component.name.contains('.') {
        errors.push(ModelError::new(
            ErrorCode::InvalidComponentName,
            &location,
            "dots are reserved for variable namespacing and not allowed in component names",
        ));
    }

    if component.alias.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyComponentAlias,
            &location,
            "component alias cannot be empty",
        ));
    }

    if component.installer_name.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyComponentInstaller,
            &location,
            "component installer cannot be empty",
        ));
    } else if !INSTALLER_PATTERN.is_match(&component.installer_name) {
        errors.push(ModelError::new(
            ErrorCode::InvalidComponentInstaller,
            &location,
            format!("invalid installer name: {}", component.installer_name),
        ));
    }

    for facet in &component.facet_names {
        if facet.trim().is_empty() {
            errors.push(ModelError::new(
                ErrorCode::EmptyFacetName,
                &location,
                "facet name cannot be empty",
            ));
        } else if !ID_PATTERN.is_match(facet) || facet.contains('.') {
            errors.push(ModelError::new(
                ErrorCode::InvalidFacetName,
                &location,
                format!("invalid facet name: {}", facet),
            ));
        }
    }

    let prefixes = component.export_prefixes();
    for name in component.exported_variables.keys() {
        if name.trim().is_empty() {
            errors.push(ModelError::new(
                ErrorCode::EmptyVariableName,
                &location,
                "exported variable name cannot be empty",
            ));
        } else if !ID_PATTERN.is_match(name) {
            errors.push(ModelError::new(
                ErrorCode::InvalidVariableName,
                &location,
                format!("invalid exported variable name: {}", name),
            ));
        } else if variable_simple_name(name).is_empty()
            || !prefixes.contains(variable_prefix(name))
        {
            errors.push(ModelError::new(
                ErrorCode::InvalidExportPrefix,
                &location,
                format!(
                    "exported variable {} must be prefixed by the component name or one of its facets",
                    name
                ),
            ));
        }
    }

    for (name, requirement) in &component.imported_variables {
        if name.trim().is_empty() {
            errors.push(ModelError::new(
                ErrorCode::EmptyVariableName,
                &location,
                "imported variable name cannot be empty",
            ));
        } else if !ID_PATTERN.is_match(name) {
            errors.push(ModelError::new(
                ErrorCode::InvalidVariableName,
                &location,
                format!("invalid imported variable name: {}", name),
            ));
        } else if requirement.is_required() && prefixes.contains(variable_prefix(name)) {
            errors.push(ModelError::new(
                ErrorCode::ComponentImportsExports,
                &location,
                format!(
                    "component requires an import of its own export prefix: {}",
                    name
                ),
            ));
        }
    }

    errors
}

/// Validate a full component graphs.
pub fn validate_graphs(graphs: &Graphs) -> Vec<ModelError> {
    let mut errors = Vec::new();
    for component in &graphs.components {
        errors.extend(validate_component(component));
    }

    if graphs.root_components().next().is_none() {
        errors.push(ModelError::new(
            ErrorCode::NoRootComponent,
            "graphs",
            "the graphs must contain at least one root component",
        ));
    }

    let mut seen: IndexSet<&str> = IndexSet::new();
    for component in &graphs.components {
        if !seen.insert(component.name.as_str()) {
            errors.push(ModelError::new(
                ErrorCode::DuplicateComponent,
                format!("component {}", component.name),
                "another component carries the same name",
            ));
        }
    }

    let exported: IndexSet<&str> = graphs.all_exported_variable_names().into_iter().collect();
    for component in &graphs.components {
        // Deliberately checked for optional imports as well; see DESIGN.md.
        for name in component.imported_variables.keys() {
            if !exported.contains(name.as_str()) {
                errors.push(ModelError::new(
                    ErrorCode::UnresolvableVariable,
                    format!("component {}", component.name),
                    format!("no component exports the imported variable {}", name),
                ));
            }
        }
    }

    errors.extend(detect_cycles(graphs));
    errors
}

/// Validate a graphs together with its on-disk resources.
///
/// In addition to [`validate_graphs`], every component handled by the
/// target installer must have a resource directory under `directory` and an
/// IaaS properties file inside it.
pub fn validate_graphs_at(graphs: &Graphs, directory: &Path) -> Vec<ModelError> {
    let mut errors = validate_graphs(graphs);
    for component in &graphs.components {
        if component.installer_name != TARGET_INSTALLER {
            continue;
        }
        let resource_dir = directory.join(&component.name);
        if !resource_dir.is_dir() {
            errors.push(ModelError::new(
                ErrorCode::NoResourceDirectory,
                format!("component {}", component.name),
                format!("missing resource directory {}", resource_dir.display()),
            ));
        } else if !resource_dir.join(TARGET_PROPERTIES_FILE).is_file() {
            errors.push(ModelError::new(
                ErrorCode::NoIaasProperties,
                format!("component {}", component.name),
                format!(
                    "missing {} in {}",
                    TARGET_PROPERTIES_FILE,
                    resource_dir.display()
                ),
            ));
        }
    }
    errors
}

/// Validate one instance in isolation.
pub fn validate_instance(instance: &Instance) -> Vec<ModelError> {
    let mut errors = Vec::new();
    let location = if instance.name.trim().is_empty() {
        "instance <unnamed>".to_owned()
    } else {
        format!("instance {}", instance.name)
    };

    if instance.name.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyInstanceName,
            &location,
            "instance name cannot be empty",
        ));
    } else if !INSTANCE_NAME_PATTERN.is_match(&instance.name) {
        errors.push(ModelError::new(
            ErrorCode::InvalidInstanceName,
            &location,
            format!("invalid instance name: {}", instance.name),
        ));
    }

    if instance.component.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyInstanceComponent,
            &location,
            "instance must reference a component",
        ));
    }

    for key in instance.overridden_exports.keys() {
        let simple = variable_simple_name(key);
        if RESERVED_VARIABLES.contains(&key.as_str()) || RESERVED_VARIABLES.contains(&simple) {
            errors.push(ModelError::new(
                ErrorCode::MagicInstanceVariable,
                &location,
                format!("{} is reserved for the runtime and cannot be overridden", key),
            ));
        }
    }

    errors
}

/// Validate an application: its graphs plus the placement of every instance.
pub fn validate_application(application: &Application) -> Vec<ModelError> {
    let mut errors = Vec::new();
    let location = if application.name.trim().is_empty() {
        "application <unnamed>".to_owned()
    } else {
        format!("application {}", application.name)
    };

    if application.name.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyApplicationName,
            &location,
            "application name cannot be empty",
        ));
    }
    if application.qualifier.trim().is_empty() {
        errors.push(ModelError::new(
            ErrorCode::EmptyApplicationQualifier,
            &location,
            "application qualifier cannot be empty",
        ));
    }

    errors.extend(validate_graphs(&application.graphs));

    for root in application.instances.root_paths() {
        validate_placement(
            &application.graphs,
            &application.instances,
            &root,
            &mut errors,
        );
    }

    errors
}

fn validate_placement(
    graphs: &Graphs,
    instances: &InstanceTree,
    path: &str,
    errors: &mut Vec<ModelError>,
) {
    let Some(instance) = instances.get(path) else {
        return;
    };
    errors.extend(validate_instance(instance));

    let location = format!("instance {}", path);
    match graphs.find_component(&instance.component) {
        None => {
            if !instance.component.trim().is_empty() {
                errors.push(ModelError::new(
                    ErrorCode::UnknownComponent,
                    &location,
                    format!("component {} is not part of the graphs", instance.component),
                ));
            }
        }
        Some(component) => match &instance.parent {
            None => {
                if !component.is_root() {
                    errors.push(ModelError::new(
                        ErrorCode::MissingInstanceParent,
                        &location,
                        format!(
                            "component {} cannot be instantiated at the root of the tree",
                            component.name
                        ),
                    ));
                }
            }
            Some(parent_path) => {
                let legal = instances
                    .get(parent_path)
                    .and_then(|parent| graphs.find_component(&parent.component))
                    .map(|parent_component| {
                        parent_component.children.contains(&instance.component)
                    })
                    .unwrap_or(false);
                if !legal {
                    errors.push(ModelError::new(
                        ErrorCode::InvalidInstanceParent,
                        &location,
                        format!(
                            "component {} cannot be installed under the parent instance",
                            instance.component
                        ),
                    ));
                }
            }
        },
    }

    let children: Vec<String> = instance.children.iter().cloned().collect();
    for child in children {
        validate_placement(graphs, instances, &child, errors);
    }
}

/// Depth-first cycle detection over the children relation.
///
/// Traversal starts from every root component, then from any component not
/// yet reached (a fully cyclic graph has no root at all). Each traversal
/// entry point reports at most one cycle; the error carries the offending
/// path rendered as `a -> b -> a`.
fn detect_cycles(graphs: &Graphs) -> Vec<ModelError> {
    let mut errors = Vec::new();
    let mut visited: IndexSet<String> = IndexSet::new();

    let mut entry_points: Vec<&str> = graphs.root_components().map(|c| c.name.as_str()).collect();
    let remaining: Vec<&str> = graphs
        .components
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !entry_points.contains(name))
        .collect();
    entry_points.extend(remaining);

    for entry in entry_points {
        if visited.contains(entry) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = find_cycle(graphs, entry, &mut path, &mut visited) {
            errors.push(ModelError::new(
                ErrorCode::CycleInComponents,
                format!("component {}", entry),
                cycle,
            ));
        }
    }
    errors
}

fn find_cycle(
    graphs: &Graphs,
    name: &str,
    path: &mut Vec<String>,
    visited: &mut IndexSet<String>,
) -> Option<String> {
    if let Some(position) = path.iter().position(|p| p == name) {
        let mut segments: Vec<&str> = path[position..].iter().map(String::as_str).collect();
        segments.push(name);
        return Some(segments.join(" -> "));
    }
    if visited.contains(name) {
        // already fully explored from another entry point
        return None;
    }
    visited.insert(name.to_owned());
    path.push(name.to_owned());
    if let Some(component) = graphs.find_component(name) {
        for child in &component.children {
            if let Some(cycle) = find_cycle(graphs, child, path, visited) {
                path.pop();
                return Some(cycle);
            }
        }
    }
    path.pop();
    None
}
