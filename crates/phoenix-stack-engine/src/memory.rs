//! In-memory provider.
//!
//! Stands in for a cloud account: synthesizes identifiers and outputs,
//! records every call, and can be told to throttle or fail specific nodes.
//! Used by the `simulate` command and by tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use phoenix_stack_common::ResourceKind;
use phoenix_stack_common::defaults::{DATABASE_PORT, DEFAULT_REGION};
use phoenix_stack_core::{NodeId, outputs};
use tracing::debug;
use uuid::Uuid;

use crate::provider::{CreateRequest, Outputs, Provider, Resolved};
use crate::provider_error::{ProviderError, classify};

const DEFAULT_ACCOUNT: &str = "123456789012";

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create(NodeId),
    Delete(NodeId),
}

/// What the simulated account holds for one node.
#[derive(Debug, Clone)]
pub struct StoredResource {
    pub kind: ResourceKind,
    pub attributes: BTreeMap<String, Resolved>,
    pub tags: BTreeMap<String, String>,
    pub outputs: Outputs,
}

#[derive(Debug, Default)]
struct Account {
    resources: BTreeMap<NodeId, StoredResource>,
    calls: Vec<ProviderCall>,
    throttles: HashMap<NodeId, u32>,
    failures: HashSet<NodeId>,
    delete_failures: HashSet<NodeId>,
    pending_polls: HashMap<NodeId, u32>,
    ready_after: HashMap<ResourceKind, u32>,
}

#[derive(Debug)]
pub struct MemoryProvider {
    region: String,
    account_id: String,
    latency: Duration,
    account: Mutex<Account>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(DEFAULT_REGION, DEFAULT_ACCOUNT)
    }
}

impl MemoryProvider {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            latency: Duration::ZERO,
            account: Mutex::new(Account::default()),
        }
    }

    /// Sleep this long inside every create call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer the next `times` create calls for `id` with a throttling error.
    pub fn throttle(&self, id: impl Into<NodeId>, times: u32) {
        self.lock().throttles.insert(id.into(), times);
    }

    /// Reject every create call for `id`.
    pub fn fail(&self, id: impl Into<NodeId>) {
        self.lock().failures.insert(id.into());
    }

    /// Reject every delete call for `id`.
    pub fn fail_delete(&self, id: impl Into<NodeId>) {
        self.lock().delete_failures.insert(id.into());
    }

    /// Report nodes of `kind` as not ready for the first `polls` checks.
    pub fn slow_kind(&self, kind: ResourceKind, polls: u32) {
        self.lock().ready_after.insert(kind, polls);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn resource(&self, id: &NodeId) -> Option<StoredResource> {
        self.lock().resources.get(id).cloned()
    }

    pub fn resource_ids(&self) -> Vec<NodeId> {
        self.lock().resources.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    /// Position of the first create call for `id`.
    pub fn created_at(&self, id: &NodeId) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|c| *c == ProviderCall::Create(id.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, Account> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arn(&self, kind: ResourceKind, id: &NodeId) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}/{}",
            kind.service(),
            self.region,
            self.account_id,
            kind.as_str().to_lowercase(),
            id
        )
    }

    fn synthesize(&self, request: &CreateRequest) -> Outputs {
        let physical = format!("{}-{}", request.kind.as_str().to_lowercase(), Uuid::now_v7().simple());
        let name = request
            .attribute("name")
            .or_else(|| request.attribute("clusterIdentifier"))
            .and_then(Resolved::as_str)
            .unwrap_or(request.id.as_str())
            .to_string();

        let mut out = Outputs::from([
            (outputs::ID.to_string(), physical.clone()),
            (outputs::ARN.to_string(), self.arn(request.kind, &request.id)),
            (outputs::NAME.to_string(), name.clone()),
        ]);
        match request.kind {
            ResourceKind::DatabaseCluster => {
                out.insert(
                    outputs::ENDPOINT_HOST.to_string(),
                    format!("{name}.cluster-{physical}.{}.rds.amazonaws.com", self.region),
                );
                out.insert(outputs::ENDPOINT_PORT.to_string(), DATABASE_PORT.to_string());
            }
            ResourceKind::LoadBalancer => {
                out.insert(
                    outputs::DNS_NAME.to_string(),
                    format!("{physical}.{}.elb.amazonaws.com", self.region),
                );
            }
            ResourceKind::Network => {
                if let Some(cidr) = request.attribute("cidrBlock").and_then(Resolved::as_str) {
                    out.insert(outputs::CIDR_BLOCK.to_string(), cidr.to_string());
                }
            }
            _ => {}
        }
        out
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, request: &CreateRequest) -> Result<Outputs, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut account = self.lock();
        account.calls.push(ProviderCall::Create(request.id.clone()));

        if let Some(left) = account.throttles.get_mut(&request.id) {
            if *left > 0 {
                *left -= 1;
                debug!(node = %request.id, remaining = *left, "Throttling create");
                return Err(reject(request.kind, "ThrottlingException", "Rate exceeded"));
            }
        }
        if account.failures.contains(&request.id) {
            return Err(reject(
                request.kind,
                "ValidationException",
                &format!("create of {} rejected", request.id),
            ));
        }
        if account.resources.contains_key(&request.id) {
            return Err(reject(request.kind, "ResourceExistsException", request.id.as_str()));
        }

        let outputs = self.synthesize(request);
        if let Some(polls) = account.ready_after.get(&request.kind).copied() {
            account.pending_polls.insert(request.id.clone(), polls);
        }
        account.resources.insert(
            request.id.clone(),
            StoredResource {
                kind: request.kind,
                attributes: request.attributes.clone(),
                tags: request.tags.clone(),
                outputs: outputs.clone(),
            },
        );
        Ok(outputs)
    }

    async fn is_ready(&self, id: &NodeId, kind: ResourceKind) -> Result<bool, ProviderError> {
        let mut account = self.lock();
        if !account.resources.contains_key(id) {
            return Err(reject(kind, "ResourceNotFoundException", id.as_str()));
        }
        match account.pending_polls.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn delete(&self, id: &NodeId, kind: ResourceKind, _outputs: &Outputs) -> Result<(), ProviderError> {
        let mut account = self.lock();
        account.calls.push(ProviderCall::Delete(id.clone()));
        if account.delete_failures.contains(id) {
            return Err(reject(kind, "AccessDenied", &format!("delete of {id} rejected")));
        }
        match account.resources.remove(id) {
            Some(_) => Ok(()),
            None => Err(reject(kind, "ResourceNotFoundException", id.as_str())),
        }
    }
}

/// Answer a call the way a real account would: with an error code.
fn reject(kind: ResourceKind, code: &str, message: &str) -> ProviderError {
    classify(kind, Some(code), Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_stack_common::tags::{TAG_LOGICAL_ID, TAG_STACK, standard_tags};

    fn request(id: &str, kind: ResourceKind) -> CreateRequest {
        CreateRequest {
            id: NodeId::from(id),
            kind,
            attributes: BTreeMap::from([(
                "clusterIdentifier".to_string(),
                Resolved::Str("demo-db".to_string()),
            )]),
            tags: standard_tags("demo", id),
        }
    }

    #[tokio::test]
    async fn test_create_synthesizes_outputs() {
        let provider = MemoryProvider::new("eu-west-1", "111122223333");
        let out = provider
            .create(&request("Database", ResourceKind::DatabaseCluster))
            .await
            .unwrap();
        assert_eq!(
            out[outputs::ARN],
            "arn:aws:rds:eu-west-1:111122223333:databasecluster/Database"
        );
        assert!(out[outputs::ENDPOINT_HOST].starts_with("demo-db.cluster-"));
        assert_eq!(out[outputs::ENDPOINT_PORT], "5432");

        let stored = provider.resource(&NodeId::from("Database")).unwrap();
        assert_eq!(stored.tags[TAG_STACK], "demo");
        assert_eq!(stored.tags[TAG_LOGICAL_ID], "Database");
    }

    #[tokio::test]
    async fn test_throttle_then_succeed() {
        let provider = MemoryProvider::default();
        provider.throttle("Bucket", 2);
        let req = request("Bucket", ResourceKind::Bucket);
        assert_eq!(provider.create(&req).await.unwrap_err(), ProviderError::Throttled);
        assert_eq!(provider.create(&req).await.unwrap_err(), ProviderError::Throttled);
        provider.create(&req).await.unwrap();
        assert_eq!(provider.calls().len(), 3);

        let again = provider.create(&req).await.unwrap_err();
        assert!(again.is_already_exists());
        assert!(!again.is_retryable());
    }

    #[tokio::test]
    async fn test_injected_failures_carry_provider_codes() {
        let provider = MemoryProvider::default();
        provider.fail("Database");
        let err = provider
            .create(&request("Database", ResourceKind::DatabaseCluster))
            .await
            .unwrap_err();
        assert!(matches!(&err, ProviderError::Other { code: Some(c), .. } if c == "ValidationException"));
        assert!(err.suggestion().is_some());

        provider.fail_delete("Bucket");
        provider.create(&request("Bucket", ResourceKind::Bucket)).await.unwrap();
        let err = provider
            .delete(&NodeId::from("Bucket"), ResourceKind::Bucket, &Outputs::new())
            .await
            .unwrap_err();
        assert!(err.suggestion().is_some_and(|s| s.contains("permission")));
    }

    #[tokio::test]
    async fn test_slow_kind_polls() {
        let provider = MemoryProvider::default();
        provider.slow_kind(ResourceKind::DatabaseCluster, 1);
        let id = NodeId::from("Database");
        provider
            .create(&request("Database", ResourceKind::DatabaseCluster))
            .await
            .unwrap();
        assert!(!provider.is_ready(&id, ResourceKind::DatabaseCluster).await.unwrap());
        assert!(provider.is_ready(&id, ResourceKind::DatabaseCluster).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = MemoryProvider::default();
        let err = provider
            .delete(&NodeId::from("Gone"), ResourceKind::Bucket, &Outputs::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::NotFound {
                kind: ResourceKind::Bucket,
                id: "Gone".to_string(),
            }
        );
    }
}
