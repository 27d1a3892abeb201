//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "integration-tests"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Application-level validation and serialization round trips."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::fs;

use caravel_model::validation::{TARGET_INSTALLER, TARGET_PROPERTIES_FILE};
use caravel_model::{
    validate_application, validate_graphs, validate_graphs_at, Application, Component, ErrorCode,
    Graphs, ImportRequirement, Instance,
};

fn lamp_graphs() -> Graphs {
    let mut graphs = Graphs::new(vec![
        Component::new("vm", "Virtual Machine", TARGET_INSTALLER),
        Component::new("mysql", "MySQL", "script")
            .export_with_default("mysql.port", "3306")
            .export("mysql.ip"),
        Component::new("tomcat", "Tomcat", "script")
            .export_with_default("tomcat.port", "8080")
            .import("mysql.port", ImportRequirement::Required)
            .import("mysql.ip", ImportRequirement::Required),
    ]);
    graphs.add_child_edge("vm", "mysql");
    graphs.add_child_edge("vm", "tomcat");
    graphs
}

fn lamp_application() -> Application {
    let mut app = Application::new("lamp", "1.0", lamp_graphs());
    let vm1 = app.instances.insert_root(Instance::new("vm1", "vm")).unwrap();
    let vm2 = app.instances.insert_root(Instance::new("vm2", "vm")).unwrap();
    app.instances
        .insert_child(&vm1, Instance::new("mysql", "mysql"))
        .unwrap();
    app.instances
        .insert_child(&vm2, Instance::new("tomcat", "tomcat"))
        .unwrap();
    app
}

#[test]
fn valid_graphs_and_legal_instances_round_trip_cleanly() {
    let graphs = lamp_graphs();
    assert!(validate_graphs(&graphs).is_empty());
    assert!(validate_application(&lamp_application()).is_empty());
}

#[test]
fn rooting_a_non_root_component_is_rejected() {
    let mut app = Application::new("lamp", "1.0", lamp_graphs());
    app.instances
        .insert_root(Instance::new("standalone", "mysql"))
        .unwrap();
    let errors = validate_application(&app);
    assert!(errors.iter().any(|e| e.code == ErrorCode::MissingInstanceParent));
}

#[test]
fn illegal_child_placement_is_rejected() {
    let mut graphs = lamp_graphs();
    graphs.components.push(Component::new("probe", "Probe", "script"));
    // probe is reachable from no parent edge: installing it under mysql is illegal
    let mut app = Application::new("lamp", "1.0", graphs);
    let vm = app.instances.insert_root(Instance::new("vm1", "vm")).unwrap();
    let mysql = app
        .instances
        .insert_child(&vm, Instance::new("mysql", "mysql"))
        .unwrap();
    app.instances
        .insert_child(&mysql, Instance::new("probe", "probe"))
        .unwrap();
    let errors = validate_application(&app);
    assert!(errors.iter().any(|e| e.code == ErrorCode::InvalidInstanceParent));
}

#[test]
fn unknown_component_reference_is_reported() {
    let mut app = Application::new("lamp", "1.0", lamp_graphs());
    app.instances
        .insert_root(Instance::new("ghost", "no-such-component"))
        .unwrap();
    let errors = validate_application(&app);
    assert!(errors.iter().any(|e| e.code == ErrorCode::UnknownComponent));
}

#[test]
fn empty_application_fields_are_reported_before_graph_errors() {
    let app = Application::new("", "", Graphs::default());
    let errors = validate_application(&app);
    let codes: Vec<ErrorCode> = errors.iter().map(|e| e.code).collect();
    assert_eq!(
        codes,
        vec![
            ErrorCode::EmptyApplicationName,
            ErrorCode::EmptyApplicationQualifier,
            ErrorCode::NoRootComponent,
        ]
    );
}

#[test]
fn target_components_need_resources_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let graphs = lamp_graphs();

    let errors = validate_graphs_at(&graphs, dir.path());
    assert!(errors.iter().any(|e| e.code == ErrorCode::NoResourceDirectory));

    let vm_dir = dir.path().join("vm");
    fs::create_dir_all(&vm_dir).expect("create resource dir");
    let errors = validate_graphs_at(&graphs, dir.path());
    assert!(errors.iter().any(|e| e.code == ErrorCode::NoIaasProperties));

    fs::write(vm_dir.join(TARGET_PROPERTIES_FILE), "handler = mock\n").expect("write properties");
    assert!(validate_graphs_at(&graphs, dir.path()).is_empty());
}

#[test]
fn application_survives_a_json_round_trip() {
    let app = lamp_application();
    let serialized = serde_json::to_string(&app).expect("serialize application");
    let restored: Application = serde_json::from_str(&serialized).expect("parse application");
    assert_eq!(app, restored);
    assert!(validate_application(&restored).is_empty());
}
