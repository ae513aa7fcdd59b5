//! Workload definition: clusters, task definitions, containers, services and
//! the notebook instance.
//!
//! Containers are separate nodes (`<task>/<name>`) linked to their task
//! definition, so routing can bind to them and their environment can carry
//! refs of its own.

use std::collections::BTreeMap;

use phoenix_stack_common::ResourceKind;
use tracing::debug;

use crate::attr::{AttrRef, AttrValue, NodeId};
use crate::error::{Error, Result};
use crate::network::{NetworkNode, SecurityGroupNode};
use crate::registry::{Declaration, Registry, ResourceNode};

const ATTR_TASK: &str = "taskDefinition";
const ATTR_ESSENTIAL: &str = "essential";
const ATTR_CONTAINER_NAME: &str = "containerName";
const ATTR_PORTS: &str = "portMappings";

/// Memory (MiB) allowed for a serverless task at a given CPU size.
fn memory_options(cpu: u32) -> Option<(u32, u32, u32)> {
    // (min, max, step)
    match cpu {
        512 => Some((1024, 4096, 1024)),
        1024 => Some((2048, 8192, 1024)),
        2048 => Some((4096, 16384, 1024)),
        4096 => Some((8192, 30720, 1024)),
        8192 => Some((16384, 61440, 4096)),
        16384 => Some((32768, 122_880, 8192)),
        _ => None,
    }
}

/// True if the serverless platform offers this CPU/memory pair.
pub fn is_valid_task_size(cpu: u32, memory: u32) -> bool {
    if cpu == 256 {
        return matches!(memory, 512 | 1024 | 2048);
    }
    match memory_options(cpu) {
        Some((min, max, step)) => (min..=max).contains(&memory) && (memory - min) % step == 0,
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct ClusterNode {
    id: NodeId,
}

impl ClusterNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

pub fn define_cluster(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    network: &NetworkNode,
    name: &str,
) -> Result<ClusterNode> {
    let id = registry.register(
        Declaration::new(ResourceKind::Cluster)
            .id(id)
            .attr("clusterName", name)
            .attr("vpc", AttrRef::id(network.id())),
    )?;
    Ok(ClusterNode { id })
}

/// Declare the log group containers ship their output to.
pub fn define_log_group(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    name: &str,
    retention_days: u32,
) -> Result<NodeId> {
    registry.register(
        Declaration::new(ResourceKind::LogGroup)
            .id(id)
            .attr("logGroupName", name)
            .attr("retentionInDays", retention_days),
    )
}

/// Task definition parameters.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    id: NodeId,
    cpu: u32,
    memory: u32,
    task_role: NodeId,
    execution_role: NodeId,
    depends_on: Vec<NodeId>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<NodeId>,
        cpu: u32,
        memory: u32,
        task_role: &NodeId,
        execution_role: &NodeId,
    ) -> Self {
        Self {
            id: id.into(),
            cpu,
            memory,
            task_role: task_role.clone(),
            execution_role: execution_role.clone(),
            depends_on: Vec::new(),
        }
    }

    /// Declare a dependency no attribute expresses.
    pub fn depends_on(mut self, id: &NodeId) -> Self {
        self.depends_on.push(id.clone());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    id: NodeId,
}

impl TaskNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

/// Declare a task definition.
///
/// # Errors
///
/// - [`Error::InvalidTaskSize`] for a CPU/memory pair the platform does not offer
/// - [`Error::NodeNotFound`] / [`Error::KindMismatch`] if a role is not a declared Role
pub fn define_task(registry: &mut Registry, spec: TaskSpec) -> Result<TaskNode> {
    if !is_valid_task_size(spec.cpu, spec.memory) {
        return Err(Error::InvalidTaskSize {
            task: spec.id,
            cpu: spec.cpu,
            memory: spec.memory,
        });
    }
    registry.get_kind(&spec.task_role, ResourceKind::Role)?;
    registry.get_kind(&spec.execution_role, ResourceKind::Role)?;

    let mut decl = Declaration::new(ResourceKind::TaskDefinition)
        .id(spec.id)
        .attr("cpu", spec.cpu)
        .attr("memory", spec.memory)
        .attr("networkMode", "awsvpc")
        .attr("requiresCompatibilities", AttrValue::list(["FARGATE"]))
        .attr("taskRoleArn", AttrRef::arn(&spec.task_role))
        .attr("executionRoleArn", AttrRef::arn(&spec.execution_role));
    for dep in &spec.depends_on {
        decl = decl.depends_on(dep);
    }
    let id = registry.register(decl)?;
    debug!(task = %id, cpu = spec.cpu, memory = spec.memory, "Defined task");
    Ok(TaskNode { id })
}

/// Where a container's output goes.
#[derive(Debug, Clone)]
pub struct LogTarget {
    pub log_group: NodeId,
    pub stream_prefix: String,
}

/// Container parameters. The image is an opaque reference.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    name: String,
    image: String,
    ports: Vec<u16>,
    environment: BTreeMap<String, AttrValue>,
    logging: Option<LogTarget>,
    essential: bool,
}

impl ContainerSpec {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ports: Vec::new(),
            environment: BTreeMap::new(),
            logging: None,
            essential: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Literal, ref or template environment value.
    pub fn env(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.environment.insert(key.to_string(), value.into());
        self
    }

    pub fn logging(mut self, log_group: &NodeId, stream_prefix: &str) -> Self {
        self.logging = Some(LogTarget {
            log_group: log_group.clone(),
            stream_prefix: stream_prefix.to_string(),
        });
        self
    }

    pub fn essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ContainerNode {
    id: NodeId,
    name: String,
    ports: Vec<u16>,
}

impl ContainerNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

/// Add a container to a task definition.
pub fn add_container(registry: &mut Registry, task: &TaskNode, spec: ContainerSpec) -> Result<ContainerNode> {
    let mut decl = Declaration::new(ResourceKind::Container)
        .id(task.id.child(&spec.name))
        .attr(ATTR_TASK, AttrValue::link(&task.id))
        .attr(ATTR_CONTAINER_NAME, &spec.name)
        .attr("image", &spec.image)
        .attr(ATTR_ESSENTIAL, spec.essential)
        .attr(
            ATTR_PORTS,
            AttrValue::list(spec.ports.iter().map(|&port| {
                AttrValue::map([
                    ("containerPort", AttrValue::from(port)),
                    ("protocol", AttrValue::from("tcp")),
                ])
            })),
        )
        .attr("environment", AttrValue::Map(spec.environment));
    if let Some(log) = &spec.logging {
        decl = decl.attr(
            "logConfiguration",
            AttrValue::map([
                ("logDriver", AttrValue::from("awslogs")),
                ("logGroup", AttrValue::link(&log.log_group)),
                ("streamPrefix", AttrValue::from(&log.stream_prefix)),
            ]),
        );
    }
    let id = registry.register(decl)?;
    debug!(container = %id, essential = spec.essential, "Added container");
    Ok(ContainerNode {
        id,
        name: spec.name,
        ports: spec.ports,
    })
}

/// Containers declared for a task definition, in declaration order.
pub fn containers_of<'a>(registry: &'a Registry, task: &'a NodeId) -> impl Iterator<Item = &'a ResourceNode> {
    registry
        .nodes_of_kind(ResourceKind::Container)
        .filter(move |c| c.attribute(ATTR_TASK).and_then(AttrValue::as_link) == Some(task))
}

/// Container of `task` named `name`.
pub fn find_container<'a>(registry: &'a Registry, task: &'a NodeId, name: &str) -> Option<&'a ResourceNode> {
    containers_of(registry, task)
        .find(|c| c.attribute(ATTR_CONTAINER_NAME).and_then(AttrValue::as_str) == Some(name))
}

/// Ports a container node exposes.
pub fn container_ports(container: &ResourceNode) -> Vec<u16> {
    container
        .attribute(ATTR_PORTS)
        .and_then(AttrValue::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|m| m.as_map()?.get("containerPort")?.as_int())
        .filter_map(|p| u16::try_from(p).ok())
        .collect()
}

fn is_essential(container: &ResourceNode) -> bool {
    container
        .attribute(ATTR_ESSENTIAL)
        .and_then(AttrValue::as_bool)
        .unwrap_or(true)
}

/// Every task definition has at least one essential container.
///
/// # Errors
///
/// [`Error::NoEssentialContainer`] naming the first offending task.
pub fn validate_tasks(registry: &Registry) -> Result<()> {
    for task in registry.nodes_of_kind(ResourceKind::TaskDefinition) {
        if !containers_of(registry, task.id()).any(is_essential) {
            return Err(Error::NoEssentialContainer {
                task: task.id().clone(),
            });
        }
    }
    Ok(())
}

/// Whether a running task stops after the named containers exit: it does as
/// soon as any essential container has exited.
pub fn task_failed_after_exit(registry: &Registry, task: &TaskNode, exited: &[&str]) -> Result<bool> {
    registry.get_kind(&task.id, ResourceKind::TaskDefinition)?;
    for name in exited {
        let container = find_container(registry, &task.id, name).ok_or_else(|| Error::UnresolvedReference {
            node: task.id.clone(),
            reference: format!("container {name}"),
        })?;
        if is_essential(container) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A long-running service keeping copies of a task alive.
#[derive(Debug, Clone)]
pub struct ServiceNode {
    id: NodeId,
    task: NodeId,
}

impl ServiceNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Task definition the service runs.
    pub fn task(&self) -> &NodeId {
        &self.task
    }
}

/// Declare a service running `task` in the private subnets of `network`.
///
/// The service is ordered after every container already added to the task,
/// so add containers first.
pub fn define_service(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    cluster: &ClusterNode,
    task: &TaskNode,
    network: &NetworkNode,
    name: &str,
    desired_count: u32,
) -> Result<ServiceNode> {
    let containers: Vec<AttrValue> = containers_of(registry, &task.id)
        .map(|c| AttrValue::link(c.id()))
        .collect();
    let id = registry.register(
        Declaration::new(ResourceKind::Service)
            .id(id)
            .attr("serviceName", name)
            .attr("cluster", AttrRef::arn(&cluster.id))
            .attr(ATTR_TASK, AttrRef::arn(&task.id))
            .attr("containers", AttrValue::List(containers))
            .attr("desiredCount", desired_count)
            .attr("launchType", "FARGATE")
            .attr(
                "networkConfiguration",
                AttrValue::map([
                    (
                        "subnets",
                        AttrValue::list(network.private_subnets().iter().map(AttrRef::id)),
                    ),
                    ("assignPublicIp", AttrValue::from(false)),
                ]),
            ),
    )?;
    debug!(service = %id, task = %task.id, "Defined service");
    Ok(ServiceNode {
        id,
        task: task.id.clone(),
    })
}

/// Notebook instance parameters.
#[derive(Debug, Clone)]
pub struct NotebookSpec {
    pub id: NodeId,
    pub name: String,
    pub instance_type: String,
    pub role: NodeId,
    pub subnet: NodeId,
    pub root_access: bool,
}

/// Declare a managed notebook instance.
pub fn define_notebook(
    registry: &mut Registry,
    spec: NotebookSpec,
    security_group: &SecurityGroupNode,
) -> Result<NodeId> {
    registry.get_kind(&spec.role, ResourceKind::Role)?;
    registry.get_kind(&spec.subnet, ResourceKind::Subnet)?;
    registry.register(
        Declaration::new(ResourceKind::NotebookInstance)
            .id(spec.id)
            .attr("notebookInstanceName", spec.name)
            .attr("instanceType", spec.instance_type)
            .attr("roleArn", AttrRef::arn(&spec.role))
            .attr("subnetId", AttrRef::id(&spec.subnet))
            .attr("securityGroupIds", AttrValue::list([AttrRef::id(security_group.id())]))
            .attr("rootAccess", if spec.root_access { "Enabled" } else { "Disabled" }),
    )
}
