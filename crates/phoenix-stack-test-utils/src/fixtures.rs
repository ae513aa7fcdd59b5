//! Declared graphs shared by integration tests.

use std::io::Write;

use phoenix_stack_common::StackConfig;
use phoenix_stack_core::database::{DatabaseNode, DatabaseSpec, define_database_cluster};
use phoenix_stack_core::network::{
    GroupPurpose, NetworkNode, Peer, PortRange, Protocol, SecurityGroupSpec, SecurityRule,
    add_security_group, define_network,
};
use phoenix_stack_core::policy::define_role;
use phoenix_stack_core::secrets::{self, GenerationPolicy, SecretHandle};
use phoenix_stack_core::workload::{ContainerNode, ContainerSpec, TaskNode, TaskSpec, add_container, define_task};
use phoenix_stack_core::{NodeId, Registry, Template};
use tempfile::NamedTempFile;

/// The network, secret, database and task graph most ordering tests need.
///
/// The `app` container derives the database password; the `sidecar`
/// container in the same task does not.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub registry: Registry,
    pub network: NetworkNode,
    pub secret: SecretHandle,
    pub database: DatabaseNode,
    pub task: TaskNode,
    pub app: ContainerNode,
    pub sidecar: ContainerNode,
}

impl Scenario {
    pub fn ids(&self) -> ScenarioIds {
        ScenarioIds {
            network: self.network.id().clone(),
            secret: self.secret.id().clone(),
            database: self.database.id().clone(),
            task: self.task.id().clone(),
            app: self.app.id().clone(),
            sidecar: self.sidecar.id().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioIds {
    pub network: NodeId,
    pub secret: NodeId,
    pub database: NodeId,
    pub task: NodeId,
    pub app: NodeId,
    pub sidecar: NodeId,
}

/// Declare the scenario graph.
///
/// # Panics
///
/// Panics if any declaration is rejected; the fixture is known-good.
pub fn scenario() -> Scenario {
    let mut reg = Registry::new();
    let network = define_network(&mut reg, "VPC", "10.0.0.0/16", 2).unwrap();
    let secret = secrets::issue(
        &mut reg,
        "DBSecret",
        "scenario-db",
        &GenerationPolicy::default()
            .exclude_punctuation(true)
            .template_field("username", "postgres"),
    )
    .unwrap();
    let db_sg = add_security_group(
        &mut reg,
        &network,
        SecurityGroupSpec::new("DbSecurityGroup", GroupPurpose::Database).rule(SecurityRule::ingress(
            Peer::Cidr("10.0.0.0/16".to_string()),
            Protocol::Tcp,
            PortRange::single(5432),
            "vpc to db",
        )),
    )
    .unwrap();
    let database = define_database_cluster(
        &mut reg,
        &network,
        &db_sg,
        &secret,
        DatabaseSpec::new("Database", "scenario-db"),
    )
    .unwrap();

    let task_role = define_role(&mut reg, "TaskRole", "ecs-tasks.amazonaws.com", &[]).unwrap();
    let exec_role = define_role(&mut reg, "ExecRole", "ecs-tasks.amazonaws.com", &[]).unwrap();
    let task = define_task(
        &mut reg,
        TaskSpec::new("Task", 512, 1024, &task_role, &exec_role)
            .depends_on(secret.id())
            .depends_on(database.id()),
    )
    .unwrap();

    let url = Template::new()
        .text("postgresql://postgres:")
        .reference(secrets::derive(&secret, "password").unwrap())
        .text("@")
        .reference(database.endpoint_host())
        .text(":5432/postgres")
        .build();
    let app = add_container(
        &mut reg,
        &task,
        ContainerSpec::new("app", "example/app:1").port(8080).env("DATABASE_URL", url),
    )
    .unwrap();
    let sidecar = add_container(
        &mut reg,
        &task,
        ContainerSpec::new("sidecar", "example/sidecar:1")
            .env("MODE", "collector")
            .essential(false),
    )
    .unwrap();

    Scenario {
        registry: reg,
        network,
        secret,
        database,
        task,
        app,
        sidecar,
    }
}

/// Write `config` as JSON to a temporary file.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_config(config: &StackConfig) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    serde_json::to_writer_pretty(&mut file, config).unwrap();
    file.flush().unwrap();
    file
}
