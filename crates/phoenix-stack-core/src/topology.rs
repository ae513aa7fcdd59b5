//! The phoenix demo environment.
//!
//! Declares, in order: access-log bucket, network, database credential,
//! database firewall and cluster, container roles, cluster, log group, task
//! definition with the chat front-end and tracing collector containers,
//! service, load balancer with its two routes, and the notebook with its
//! role and firewall.

use phoenix_stack_common::defaults::{
    DATABASE_PORT, DEFAULT_DATABASE_NAME, DEFAULT_DATABASE_USER, DEFAULT_LOG_RETENTION_DAYS,
    GRADIO_LISTENER_PORT, GRADIO_PORT, MANAGEMENT_PORT, PHOENIX_HEALTH_CHECK_PATH, PHOENIX_PORT,
};
use phoenix_stack_common::{ResourceKind, StackConfig};
use tracing::info;

use crate::attr::{AttrValue, NodeId, Template};
use crate::database::{DatabaseNode, DatabaseSpec, define_database_cluster};
use crate::error::{Error, Result};
use crate::network::{
    GroupPurpose, NetworkNode, Peer, PortRange, Protocol, SecurityGroupSpec, SecurityRule,
    add_security_group, define_network,
};
use crate::plan::Plan;
use crate::policy::{SECRET_READ_ACTION, define_role, grant};
use crate::registry::{Declaration, Registry};
use crate::resolver::build_plan;
use crate::routing::{
    AccessLogs, ListenerProtocol, LoadBalancerNode, RouteBinding, TargetContainer, add_listener,
    bind_targets, define_load_balancer,
};
use crate::secrets::{self, GenerationPolicy, SecretHandle};
use crate::workload::{
    ContainerSpec, NotebookSpec, ServiceNode, TaskNode, TaskSpec, add_container, define_cluster,
    define_log_group, define_notebook, define_service, define_task,
};

const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
const SAGEMAKER_PRINCIPAL: &str = "sagemaker.amazonaws.com";
const ACCESS_LOG_PREFIX: &str = "alb-access-logs";

/// Handles to the nodes callers usually need after declaration.
#[derive(Debug, Clone)]
pub struct DemoHandles {
    pub bucket: NodeId,
    pub network: NetworkNode,
    pub secret: SecretHandle,
    pub database: DatabaseNode,
    pub task: TaskNode,
    pub service: ServiceNode,
    pub load_balancer: LoadBalancerNode,
    pub notebook: NodeId,
}

/// A declared stack: its registry plus named handles.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    registry: Registry,
    handles: DemoHandles,
}

impl Stack {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handles(&self) -> &DemoHandles {
        &self.handles
    }

    /// Validate and resolve the stack.
    pub fn plan(&self) -> Result<Plan> {
        build_plan(&self.registry)
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

/// Declare the full demo environment from `config`.
///
/// # Errors
///
/// Fails on invalid configuration or on any graph-build error; nothing is
/// returned unless the whole environment was declared.
pub fn phoenix_demo(config: &StackConfig) -> Result<Stack> {
    config.check()?;
    let name = |suffix: &str| config.resource_name(suffix);
    let mut reg = Registry::new();

    let bucket = reg.register(
        Declaration::new(ResourceKind::Bucket)
            .id("Bucket")
            .attr("blockPublicAccess", "BLOCK_ALL")
            .attr("encryption", "S3_MANAGED")
            .attr("enforceSsl", true)
            .attr("versioned", true),
    )?;

    let network = define_network(&mut reg, "VPC", &config.vpc_cidr, config.max_azs)?;

    let secret = secrets::issue(
        &mut reg,
        "DBCredentialsSecret",
        &name("db-credential"),
        &GenerationPolicy::default()
            .exclude_punctuation(true)
            .include_space(false)
            .template_field("username", DEFAULT_DATABASE_USER),
    )?;

    let db_sg = add_security_group(
        &mut reg,
        &network,
        SecurityGroupSpec::new("DbSecurityGroup", GroupPurpose::Database)
            .description(&name("db-sg"))
            .rule(SecurityRule::ingress(
                Peer::Cidr(network.cidr().to_string()),
                Protocol::Tcp,
                PortRange::single(DATABASE_PORT),
                "allow inbound traffic within vpc to the db on port 5432",
            )),
    )?;
    let database = define_database_cluster(
        &mut reg,
        &network,
        &db_sg,
        &secret,
        DatabaseSpec::new("Database", &name("db")),
    )?;

    let task_role = define_role(
        &mut reg,
        "TaskRole",
        ECS_TASKS_PRINCIPAL,
        &["AmazonBedrockFullAccess", "AmazonDynamoDBFullAccess", "AmazonS3FullAccess"],
    )?;
    let secret_grant = grant(&mut reg, &task_role, &[SECRET_READ_ACTION], vec![secret.arn().into()])?;
    let exec_role = define_role(
        &mut reg,
        "TaskExecRole",
        ECS_TASKS_PRINCIPAL,
        &["AmazonEC2ContainerRegistryFullAccess", "CloudWatchLogsFullAccess"],
    )?;

    let cluster = define_cluster(&mut reg, "Cluster", &network, &name("cluster"))?;
    let log_group = define_log_group(
        &mut reg,
        "TaskLogGroup",
        &format!("/ecs/{}", config.stack_name),
        DEFAULT_LOG_RETENTION_DAYS,
    )?;

    let task = define_task(
        &mut reg,
        TaskSpec::new("TaskDef", config.task_cpu, config.task_memory, &task_role, &exec_role)
            .depends_on(secret.id())
            .depends_on(database.id())
            .depends_on(&secret_grant.id),
    )?;

    let gradio = add_container(
        &mut reg,
        &task,
        ContainerSpec::new("gradio", &config.gradio_image)
            .port(GRADIO_PORT)
            .env("MODEL_ID", config.model_id.as_str())
            .logging(&log_group, "gradio"),
    )?;

    let database_url = Template::new()
        .text(format!("postgresql://{DEFAULT_DATABASE_USER}:"))
        .reference(secrets::derive(&secret, "password")?)
        .text("@")
        .reference(database.endpoint_host())
        .text(format!(":{DATABASE_PORT}/{DEFAULT_DATABASE_NAME}"))
        .build();
    let phoenix = add_container(
        &mut reg,
        &task,
        ContainerSpec::new("phoenix", &config.phoenix_image)
            .port(PHOENIX_PORT)
            .env("PHOENIX_SQL_DATABASE_URL", database_url)
            .logging(&log_group, "phoenix"),
    )?;

    let service = define_service(&mut reg, "Service", &cluster, &task, &network, &name("service"), 1)?;

    let load_balancer = define_load_balancer(
        &mut reg,
        "LB",
        &network,
        true,
        Some(AccessLogs {
            bucket: bucket.clone(),
            prefix: ACCESS_LOG_PREFIX.to_string(),
        }),
        &service,
    )?;

    let routes = [
        (GRADIO_LISTENER_PORT, gradio.name(), GRADIO_PORT, None),
        (PHOENIX_PORT, phoenix.name(), PHOENIX_PORT, Some(PHOENIX_HEALTH_CHECK_PATH)),
    ];
    for (listener_port, container, port, health_check_path) in routes {
        let listener = add_listener(&mut reg, &load_balancer, listener_port, ListenerProtocol::Http)?;
        bind_targets(
            &mut reg,
            &listener,
            &[RouteBinding {
                listener_port,
                protocol: ListenerProtocol::Http,
                target: TargetContainer {
                    task: task.id().clone(),
                    container: container.to_string(),
                    port,
                },
                health_check_path: health_check_path.map(str::to_string),
            }],
        )?;
    }

    let notebook_role = define_role(
        &mut reg,
        "SageMakerNotebookRole",
        SAGEMAKER_PRINCIPAL,
        &["AmazonSageMakerFullAccess"],
    )?;
    let mut notebook_resources: Vec<AttrValue> = config
        .notebook_models
        .iter()
        .map(|model| AttrValue::from(format!("arn:aws:bedrock:{}::foundation-model/{model}", config.region)))
        .collect();
    notebook_resources.push(secret.arn().into());
    grant(
        &mut reg,
        &notebook_role,
        &["bedrock:InvokeModel", SECRET_READ_ACTION],
        notebook_resources,
    )?;

    let notebook_sg = add_security_group(
        &mut reg,
        &network,
        SecurityGroupSpec::new(
            "NotebookSecurityGroup",
            GroupPurpose::PublicManagement { port: MANAGEMENT_PORT },
        )
        .description(&name("notebook-sg"))
        .rule(SecurityRule::ingress(
            Peer::any_ipv4(),
            Protocol::Tcp,
            PortRange::single(MANAGEMENT_PORT),
            "allow inbound traffic from anywhere to the notebook on port 443",
        )),
    )?;
    let subnet = network
        .public_subnets()
        .first()
        .cloned()
        .ok_or_else(|| Error::InvalidNetwork {
            network: network.id().clone(),
            reason: "no public subnet for the notebook".to_string(),
        })?;
    let notebook = define_notebook(
        &mut reg,
        NotebookSpec {
            id: NodeId::from("SageMakerNotebook"),
            name: name("notebook"),
            instance_type: config.notebook_instance_type.clone(),
            role: notebook_role,
            subnet,
            root_access: false,
        },
        &notebook_sg,
    )?;

    info!(stack = %config.stack_name, nodes = reg.len(), "Declared demo stack");
    Ok(Stack {
        name: config.stack_name.clone(),
        registry: reg,
        handles: DemoHandles {
            bucket,
            network,
            secret,
            database,
            task,
            service,
            load_balancer,
            notebook,
        },
    })
}
