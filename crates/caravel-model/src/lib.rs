//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Deployment model types and structural validation."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
//! Design-time component graphs and runtime instance trees.
//!
//! A [`Component`] is a reusable software role with declared exported and
//! imported variables and "can be installed under" placement edges. A
//! [`Graphs`] value collects components; an [`Application`] binds a graphs to
//! a tree of placed [`Instance`]s. The [`validation`] module checks all
//! structural invariants and returns defects as ordered data, never as
//! errors.

pub mod application;
pub mod component;
pub mod graphs;
pub mod instance;
pub mod status;
pub mod validation;
pub mod variables;

pub use application::Application;
pub use component::{Component, ImportRequirement};
pub use graphs::Graphs;
pub use instance::{ImportBinding, Instance, InstanceTree};
pub use status::InstanceStatus;
pub use validation::{
    validate_application, validate_component, validate_graphs, validate_graphs_at,
    validate_instance, ErrorCode, ModelError,
};
pub use variables::{variable_prefix, variable_simple_name, RESERVED_VARIABLES};
