//! ---
//! cvl_section: "04-agent"
//! cvl_subsection: "integration-test"
//! cvl_type: "test"
//! cvl_scope: "code"
//! cvl_description: "Agent message loop behaviour tests."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use tempfile::TempDir;

use caravel_agent::{AgentRuntime, InstanceResources};
use caravel_model::{
    Application, Component, Graphs, ImportBinding, ImportRequirement, Instance, InstanceStatus,
};
use caravel_msg::{
    ChangeInstanceState, ClientEvent, ExportsPublished, ExportsRequested, ExportsUnpublished,
    InMemoryTransport, ListenCommand, Message, MessagePayload, MessagingClient, RecordingClient,
    TargetState, Transport,
};
use caravel_plugin::{PluginRegistry, ScriptedPlugin};

struct Harness {
    runtime: AgentRuntime,
    recorder: Arc<RecordingClient>,
    inbox: Arc<InMemoryTransport>,
    _app_dir: TempDir,
    _work_dir: TempDir,
}

fn harness() -> Harness {
    let mut graphs = Graphs::new(vec![
        Component::new("vm", "Virtual Machine", "target").export("vm.ip"),
        Component::new("mysql", "MySQL", "script")
            .export_with_default("mysql.port", "3306")
            .export_with_default("mysql.ip", "10.0.0.5"),
        Component::new("tomcat", "Tomcat", "script")
            .export_with_default("tomcat.port", "8080")
            .import("mysql.port", ImportRequirement::Required),
    ]);
    assert!(graphs.add_child_edge("vm", "mysql"));
    assert!(graphs.add_child_edge("vm", "tomcat"));
    let mut app = Application::new("lamp", "1.0", graphs);
    let vm = app
        .instances
        .insert_root(Instance::new("vm", "vm"))
        .expect("insert vm");
    app.instances
        .insert_child(&vm, Instance::new("mysql", "mysql"))
        .expect("insert mysql");
    app.instances
        .insert_child(&vm, Instance::new("tomcat", "tomcat"))
        .expect("insert tomcat");

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(ScriptedPlugin::new("script")));
    plugins.register(Arc::new(ScriptedPlugin::new("target")));
    let recorder = Arc::new(RecordingClient::new());
    let inbox = Arc::new(InMemoryTransport::new());
    let app_dir = tempfile::tempdir().expect("app dir");
    let work_dir = tempfile::tempdir().expect("work dir");
    let resources = InstanceResources::new(app_dir.path(), work_dir.path());
    let runtime = AgentRuntime::new(
        app,
        Arc::new(plugins),
        recorder.clone(),
        resources,
        inbox.clone(),
    );
    Harness {
        runtime,
        recorder,
        inbox,
        _app_dir: app_dir,
        _work_dir: work_dir,
    }
}

fn set_status(h: &mut Harness, path: &str, status: InstanceStatus) {
    h.runtime
        .application_mut()
        .instances
        .get_mut(path)
        .expect("known instance")
        .status = status;
}

fn status_of(h: &Harness, path: &str) -> InstanceStatus {
    h.runtime
        .application()
        .instances
        .get(path)
        .expect("known instance")
        .status
}

#[test]
fn exports_published_binds_imports_and_starts_the_importer() {
    let mut h = harness();
    set_status(&mut h, "/vm", InstanceStatus::DeployedStarted);
    set_status(&mut h, "/vm/tomcat", InstanceStatus::Unresolved);

    h.runtime
        .process_message(Message::new(MessagePayload::ExportsPublished(
            ExportsPublished {
                application: "lamp".into(),
                exporting_path: "/remote-vm/mysql".into(),
                component: "mysql".into(),
                exporter_status: InstanceStatus::DeployedStarted,
                variables: IndexMap::from([("mysql.port".to_owned(), "3306".to_owned())]),
            },
        )));

    assert_eq!(status_of(&h, "/vm/tomcat"), InstanceStatus::DeployedStarted);
    let tomcat = h
        .runtime
        .application()
        .instances
        .get("/vm/tomcat")
        .expect("tomcat");
    assert_eq!(tomcat.imports["mysql"].len(), 1);
    assert_eq!(tomcat.imports["mysql"][0].exporting_path, "/remote-vm/mysql");
}

#[test]
fn exports_unpublished_unbinds_and_stops_the_importer() {
    let mut h = harness();
    set_status(&mut h, "/vm", InstanceStatus::DeployedStarted);
    set_status(&mut h, "/vm/tomcat", InstanceStatus::DeployedStarted);
    h.runtime
        .application_mut()
        .instances
        .get_mut("/vm/tomcat")
        .expect("tomcat")
        .bind_import(
            "mysql",
            ImportBinding {
                exporting_path: "/remote-vm/mysql".into(),
                component: "mysql".into(),
                variables: IndexMap::from([("mysql.port".to_owned(), "3306".to_owned())]),
            },
        );

    h.runtime
        .process_message(Message::new(MessagePayload::ExportsUnpublished(
            ExportsUnpublished {
                application: "lamp".into(),
                exporting_path: "/remote-vm/mysql".into(),
                component: "mysql".into(),
                exporter_status: InstanceStatus::Stopping,
            },
        )));

    assert_eq!(status_of(&h, "/vm/tomcat"), InstanceStatus::Unresolved);
    let tomcat = h
        .runtime
        .application()
        .instances
        .get("/vm/tomcat")
        .expect("tomcat");
    assert!(tomcat.imports.is_empty());
}

#[test]
fn export_requests_are_answered_only_while_listening() {
    let mut h = harness();
    set_status(&mut h, "/vm/mysql", InstanceStatus::DeployedStarted);
    let request = || {
        Message::new(MessagePayload::ExportsRequested(ExportsRequested {
            application: "lamp".into(),
            prefixes: vec!["mysql".to_owned()],
        }))
    };

    h.runtime.process_message(request());
    assert!(!h
        .recorder
        .events()
        .contains(&ClientEvent::Published { path: "/vm/mysql".to_owned() }));

    h.recorder
        .listen_to_requests(ListenCommand::Start, "lamp", "/vm/mysql")
        .expect("listen start");
    h.recorder.clear();
    h.runtime.process_message(request());
    assert!(h
        .recorder
        .events()
        .contains(&ClientEvent::Published { path: "/vm/mysql".to_owned() }));
}

#[test]
fn local_exporters_feed_local_importers_without_the_bus() {
    let mut h = harness();
    set_status(&mut h, "/vm", InstanceStatus::DeployedStarted);
    set_status(&mut h, "/vm/mysql", InstanceStatus::DeployedStopped);
    set_status(&mut h, "/vm/tomcat", InstanceStatus::Unresolved);

    h.runtime
        .process_message(Message::new(MessagePayload::ChangeInstanceState(
            ChangeInstanceState {
                application: "lamp".into(),
                instance_path: "/vm/mysql".into(),
                target: TargetState::DeployedStarted,
            },
        )));

    assert_eq!(status_of(&h, "/vm/mysql"), InstanceStatus::DeployedStarted);
    assert_eq!(status_of(&h, "/vm/tomcat"), InstanceStatus::DeployedStarted);
}

#[test]
fn messages_for_other_applications_are_ignored() {
    let mut h = harness();
    h.runtime
        .process_message(Message::new(MessagePayload::ChangeInstanceState(
            ChangeInstanceState {
                application: "other-app".into(),
                instance_path: "/vm".into(),
                target: TargetState::DeployedStopped,
            },
        )));
    assert_eq!(status_of(&h, "/vm"), InstanceStatus::NotDeployed);
    assert!(h.recorder.events().is_empty());
}

#[test]
fn pump_drains_the_inbox_in_order() {
    let mut h = harness();
    h.inbox
        .send(Message::new(MessagePayload::ChangeInstanceState(
            ChangeInstanceState {
                application: "lamp".into(),
                instance_path: "/vm".into(),
                target: TargetState::DeployedStopped,
            },
        )))
        .expect("queue deploy");
    h.inbox
        .send(Message::new(MessagePayload::ChangeInstanceState(
            ChangeInstanceState {
                application: "lamp".into(),
                instance_path: "/vm".into(),
                target: TargetState::DeployedStarted,
            },
        )))
        .expect("queue start");

    assert_eq!(h.runtime.pump(), 2);
    assert_eq!(status_of(&h, "/vm"), InstanceStatus::DeployedStarted);
    assert_eq!(h.runtime.pump(), 0);
}
