//! ---
//! cvl_section: "08-testing"
//! cvl_subsection: "integration-tests"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "End-to-end deployment flow across the DM and two agents."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::sync::Arc;

use tempfile::TempDir;

use caravel_agent::{AgentRuntime, InstanceResources};
use caravel_dm::{DmRuntime, StatusMirror};
use caravel_model::{
    Application, Component, Graphs, ImportRequirement, Instance, InstanceStatus,
};
use caravel_msg::{BusClient, InMemoryTransport, MessageBus, TargetState, DM_ENDPOINT};
use caravel_plugin::{PluginRegistry, ScriptedPlugin};

/// Shared component graphs: a vm hosting either mysql or tomcat, where
/// tomcat requires mysql's exports published from another machine.
fn lamp_graphs() -> Graphs {
    let mut graphs = Graphs::new(vec![
        Component::new("vm", "Virtual Machine", "target"),
        Component::new("mysql", "MySQL", "script")
            .export_with_default("mysql.port", "3306")
            .export_with_default("mysql.ip", "10.0.0.5"),
        Component::new("tomcat", "Tomcat", "script")
            .export_with_default("tomcat.port", "8080")
            .import("mysql.port", ImportRequirement::Required),
    ]);
    assert!(graphs.add_child_edge("vm", "mysql"));
    assert!(graphs.add_child_edge("vm", "tomcat"));
    graphs
}

fn subtree(root_name: &str, child: &str) -> Application {
    let mut app = Application::new("lamp", "1.0", lamp_graphs());
    let root = app
        .instances
        .insert_root(Instance::new(root_name, "vm"))
        .expect("insert root");
    app.instances
        .insert_child(&root, Instance::new(child, child))
        .expect("insert child");
    app
}

struct Platform {
    dm: DmRuntime,
    mirror: Arc<StatusMirror>,
    agent_a: AgentRuntime,
    agent_b: AgentRuntime,
    _dirs: Vec<TempDir>,
}

impl Platform {
    /// Pump agents and DM until no messages remain in flight.
    fn settle(&mut self) {
        loop {
            let worked = self.dm.pump() + self.agent_a.pump() + self.agent_b.pump();
            if worked == 0 {
                return;
            }
        }
    }

    fn mirrored(&self, path: &str) -> Option<InstanceStatus> {
        self.mirror.status_of("lamp", path)
    }
}

fn platform() -> Platform {
    let bus = Arc::new(MessageBus::new());
    let dm_inbox = Arc::new(InMemoryTransport::new());
    bus.register(DM_ENDPOINT, dm_inbox.clone());

    let mirror = Arc::new(StatusMirror::new());
    let dm = DmRuntime::new(mirror.clone(), bus.clone(), dm_inbox);
    dm.register_agent("lamp", "/vm-a", "agent-a");
    dm.register_agent("lamp", "/vm-b", "agent-b");

    let mut dirs = Vec::new();
    let mut agent = |endpoint: &str, app: Application| {
        let inbox = Arc::new(InMemoryTransport::new());
        bus.register(endpoint, inbox.clone());
        let mut plugins = PluginRegistry::new();
        plugins.register(Arc::new(ScriptedPlugin::new("script")));
        plugins.register(Arc::new(ScriptedPlugin::new("target")));
        let app_dir = tempfile::tempdir().expect("app dir");
        let work_dir = tempfile::tempdir().expect("work dir");
        let resources = InstanceResources::new(app_dir.path(), work_dir.path());
        dirs.push(app_dir);
        dirs.push(work_dir);
        AgentRuntime::new(
            app,
            Arc::new(plugins),
            Arc::new(BusClient::new(bus.clone(), endpoint)),
            resources,
            inbox,
        )
    };
    let agent_a = agent("agent-a", subtree("vm-a", "mysql"));
    let agent_b = agent("agent-b", subtree("vm-b", "tomcat"));
    Platform {
        dm,
        mirror,
        agent_a,
        agent_b,
        _dirs: dirs,
    }
}

#[test]
fn orderly_bring_up_crosses_agents() {
    let mut p = platform();

    for path in ["/vm-a", "/vm-a/mysql"] {
        p.dm.request_state("lamp", path, TargetState::DeployedStarted)
            .expect("routed");
        p.settle();
    }
    assert_eq!(p.mirrored("/vm-a/mysql"), Some(InstanceStatus::DeployedStarted));

    // mysql's publish already reached agent-b, so tomcat starts directly.
    for path in ["/vm-b", "/vm-b/tomcat"] {
        p.dm.request_state("lamp", path, TargetState::DeployedStarted)
            .expect("routed");
        p.settle();
    }
    assert_eq!(p.mirrored("/vm-b/tomcat"), Some(InstanceStatus::DeployedStarted));

    let tomcat = p
        .agent_b
        .application()
        .instances
        .get("/vm-b/tomcat")
        .expect("tomcat");
    assert_eq!(tomcat.imports["mysql"][0].exporting_path, "/vm-a/mysql");
    assert_eq!(tomcat.imports["mysql"][0].variables["mysql.port"], "3306");
}

#[test]
fn late_exporter_resolves_a_waiting_importer() {
    let mut p = platform();

    // Bring tomcat up first: it parks in UNRESOLVED and asks for exports.
    for path in ["/vm-b", "/vm-b/tomcat"] {
        p.dm.request_state("lamp", path, TargetState::DeployedStarted)
            .expect("routed");
        p.settle();
    }
    assert_eq!(p.mirrored("/vm-b/tomcat"), Some(InstanceStatus::Unresolved));

    // Once mysql starts, its publish unblocks tomcat without a new command.
    for path in ["/vm-a", "/vm-a/mysql"] {
        p.dm.request_state("lamp", path, TargetState::DeployedStarted)
            .expect("routed");
        p.settle();
    }
    assert_eq!(p.mirrored("/vm-a/mysql"), Some(InstanceStatus::DeployedStarted));
    assert_eq!(p.mirrored("/vm-b/tomcat"), Some(InstanceStatus::DeployedStarted));
}

#[test]
fn stopping_the_exporter_unresolves_the_importer() {
    let mut p = platform();
    for path in ["/vm-a", "/vm-a/mysql", "/vm-b", "/vm-b/tomcat"] {
        p.dm.request_state("lamp", path, TargetState::DeployedStarted)
            .expect("routed");
        p.settle();
    }
    assert_eq!(p.mirrored("/vm-b/tomcat"), Some(InstanceStatus::DeployedStarted));

    p.dm.request_state("lamp", "/vm-a/mysql", TargetState::DeployedStopped)
        .expect("routed");
    p.settle();

    assert_eq!(p.mirrored("/vm-a/mysql"), Some(InstanceStatus::DeployedStopped));
    assert_eq!(p.mirrored("/vm-b/tomcat"), Some(InstanceStatus::Unresolved));
    let tomcat = p
        .agent_b
        .application()
        .instances
        .get("/vm-b/tomcat")
        .expect("tomcat");
    assert!(tomcat.imports.is_empty());
}
