//! Managed relational database cluster.

use phoenix_stack_common::ResourceKind;
use phoenix_stack_common::defaults::{
    DATABASE_PORT, DEFAULT_DATABASE_NAME, DEFAULT_DB_MAX_CAPACITY, DEFAULT_DB_MIN_CAPACITY,
};
use tracing::debug;

use crate::attr::{AttrRef, AttrValue, NodeId, outputs};
use crate::error::Result;
use crate::network::{NetworkNode, SecurityGroupNode};
use crate::registry::{Declaration, Registry};
use crate::secrets::SecretHandle;

/// Engine version of the serverless Postgres cluster
pub const ENGINE_VERSION: &str = "16.2";

#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub id: NodeId,
    pub cluster_identifier: String,
    pub database_name: String,
    /// Serverless capacity bounds in capacity units
    pub min_capacity: f64,
    pub max_capacity: f64,
    pub backup_retention_days: u32,
    pub backup_window: String,
}

impl DatabaseSpec {
    pub fn new(id: impl Into<NodeId>, cluster_identifier: &str) -> Self {
        Self {
            id: id.into(),
            cluster_identifier: cluster_identifier.to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            min_capacity: DEFAULT_DB_MIN_CAPACITY,
            max_capacity: DEFAULT_DB_MAX_CAPACITY,
            backup_retention_days: 1,
            backup_window: "03:15-03:45".to_string(),
        }
    }
}

/// A declared database cluster.
#[derive(Debug, Clone)]
pub struct DatabaseNode {
    id: NodeId,
}

impl DatabaseNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Writer endpoint, available once the cluster is materialized.
    pub fn endpoint_host(&self) -> AttrRef {
        AttrRef::new(&self.id, outputs::ENDPOINT_HOST)
    }
}

/// Declare a serverless Postgres cluster in the private subnets of `network`,
/// with credentials taken from `credentials`.
pub fn define_database_cluster(
    registry: &mut Registry,
    network: &NetworkNode,
    security_group: &SecurityGroupNode,
    credentials: &SecretHandle,
    spec: DatabaseSpec,
) -> Result<DatabaseNode> {
    let subnets = AttrValue::list(network.private_subnets().iter().map(AttrRef::id));
    let id = registry.register(
        Declaration::new(ResourceKind::DatabaseCluster)
            .id(spec.id)
            .attr("engine", "aurora-postgresql")
            .attr("engineVersion", ENGINE_VERSION)
            .attr("clusterIdentifier", spec.cluster_identifier)
            .attr("databaseName", spec.database_name)
            .attr("port", DATABASE_PORT)
            .attr("masterUserSecretArn", credentials.arn())
            .attr("vpcSecurityGroupIds", AttrValue::list([AttrRef::id(security_group.id())]))
            .attr("subnetIds", subnets)
            .attr(
                "serverlessV2ScalingConfiguration",
                AttrValue::map([
                    ("minCapacity", AttrValue::from(spec.min_capacity.to_string())),
                    ("maxCapacity", AttrValue::from(spec.max_capacity.to_string())),
                ]),
            )
            .attr("backupRetentionPeriod", spec.backup_retention_days)
            .attr("preferredBackupWindow", spec.backup_window)
            .attr("publiclyAccessible", false),
    )?;
    debug!(database = %id, "Defined database cluster");
    Ok(DatabaseNode { id })
}
