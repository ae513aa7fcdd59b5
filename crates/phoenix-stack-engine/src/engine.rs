//! Plan walker: concurrent apply and destroy.
//!
//! Both walks share one scheduling shape. A node is spawned onto a
//! [`JoinSet`] as soon as everything it waits on has finished, a semaphore
//! bounds provider calls in flight, and each node retries its own transient
//! errors so a throttled branch never stalls an independent one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use phoenix_stack_common::ResourceKind;
use phoenix_stack_common::tags::standard_tags;
use phoenix_stack_core::{NodeId, Plan, ResourceNode};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, RetryConfig};
use crate::error::EngineError;
use crate::events::StackEvent;
use crate::inject::{Inputs, resolve_attributes};
use crate::provider::{CreateRequest, Outputs, Provider};
use crate::provider_error::ProviderError;
use crate::state::MaterializedState;
use crate::vault::SecretVault;
use crate::wait::{WaitError, wait_for_resource};

/// Outcome of [`Engine::apply`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Everything that was materialized, including on partial failure
    pub state: MaterializedState,
    /// Nodes in the order they became ready
    pub created: Vec<NodeId>,
    pub failed: Vec<EngineError>,
    /// Nodes never started, in creation order
    pub skipped: Vec<NodeId>,
    pub secrets_generated: usize,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.failed.iter().map(EngineError::node)
    }
}

/// Outcome of [`Engine::destroy`].
#[derive(Debug, Default)]
pub struct DestroyReport {
    /// Nodes in the order they were removed
    pub destroyed: Vec<NodeId>,
    pub failed: Vec<EngineError>,
    /// Materialized nodes left in place
    pub retained: Vec<NodeId>,
}

impl DestroyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.retained.is_empty()
    }
}

/// Per-node worker state cloned into each spawned task.
#[derive(Clone)]
struct Worker {
    provider: Arc<dyn Provider>,
    config: EngineConfig,
    cancel: CancellationToken,
}

pub struct Engine {
    worker: Worker,
    events: Option<mpsc::UnboundedSender<StackEvent>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("stack", &self.worker.config.stack_name)
            .field("max_concurrency", &self.worker.config.max_concurrency)
            .field("cancelled", &self.worker.cancel.is_cancelled())
            .finish()
    }
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        Self {
            worker: Worker {
                provider,
                config,
                cancel: CancellationToken::new(),
            },
            events: None,
        }
    }

    /// Stop scheduling new nodes when `cancel` fires; in-flight readiness
    /// waits end early.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.worker.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<StackEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.worker.config
    }

    fn emit(&self, event: StackEvent) {
        if let Some(tx) = &self.events {
            // Receiver may have gone away; the report still has everything.
            let _ = tx.send(event);
        }
    }

    /// Materialize every node of `plan`, dependencies first.
    ///
    /// Never fails as a whole: per-node failures are in the report, along
    /// with the dependents that were skipped because of them.
    pub async fn apply(&self, plan: &Plan) -> ApplyReport {
        let vault = Arc::new(SecretVault::for_plan(plan));
        let semaphore = Arc::new(Semaphore::new(self.worker.config.max_concurrency()));
        let mut report = ApplyReport::default();

        let mut waiting: HashMap<&NodeId, usize> = plan
            .creation_order()
            .iter()
            .map(|id| (id, plan.upstream(id).len()))
            .collect();
        let mut ready: VecDeque<&NodeId> = plan
            .creation_order()
            .iter()
            .filter(|id| waiting.get(id) == Some(&0))
            .collect();
        let mut tasks: JoinSet<(NodeId, Result<Outputs, EngineError>)> = JoinSet::new();
        let mut running: HashMap<task::Id, NodeId> = HashMap::new();

        info!(stack = %self.worker.config.stack_name, nodes = plan.len(), "Applying plan");

        loop {
            while !self.worker.cancel.is_cancelled() {
                let Some(id) = ready.pop_front() else { break };
                let Some(node) = plan.node(id).cloned() else { continue };
                let inputs: Inputs = plan
                    .upstream(id)
                    .into_iter()
                    .filter_map(|up| Some((up.clone(), report.state.outputs(up)?.clone())))
                    .collect();
                let worker = self.worker.clone();
                let vault = vault.clone();
                let semaphore = semaphore.clone();

                debug!(node = %id, kind = %node.kind(), "Scheduling node");
                let handle = tasks.spawn(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => worker.materialize(&node, &inputs, &vault).await,
                        Err(_) => Err(EngineError::Cancelled {
                            node: node.id().clone(),
                        }),
                    };
                    (node.id().clone(), result)
                });
                running.insert(handle.id(), id.clone());
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let joined = match joined {
                Ok((task_id, outcome)) => {
                    running.remove(&task_id);
                    outcome
                }
                Err(e) => match running.remove(&e.id()) {
                    Some(id) => (id.clone(), Err(EngineError::Aborted { node: id, reason: e.to_string() })),
                    None => {
                        error!(error = %e, "Materialize task did not complete");
                        continue;
                    }
                },
            };
            match joined {
                (id, Ok(outputs)) => {
                    let Some(node) = plan.node(&id) else { continue };
                    report.state.insert(id.clone(), node.kind(), outputs);
                    self.emit(StackEvent::Created {
                        node: id.clone(),
                        kind: node.kind(),
                    });
                    for down in plan.downstream(&id) {
                        if let Some(n) = waiting.get_mut(down) {
                            *n -= 1;
                            if *n == 0 {
                                ready.push_back(down);
                            }
                        }
                    }
                    report.created.push(id);
                }
                (id, Err(e)) => {
                    error!(node = %id, error = %e, "Failed to materialize node");
                    self.emit(StackEvent::Failed {
                        node: id,
                        error: e.to_string(),
                    });
                    report.failed.push(e);
                }
            }
        }

        for id in plan.creation_order() {
            if report.state.contains(id) || report.failed_nodes().any(|f| f == id) {
                continue;
            }
            let blocked_by: Vec<NodeId> = plan
                .upstream(id)
                .into_iter()
                .filter(|up| !report.state.contains(up))
                .cloned()
                .collect();
            warn!(node = %id, blocked_by = ?blocked_by, "Skipped node");
            self.emit(StackEvent::Skipped {
                node: id.clone(),
                blocked_by,
            });
            report.skipped.push(id.clone());
        }
        report.secrets_generated = vault.generated();

        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Apply finished"
        );
        report
    }

    /// Remove every materialized node of `plan` from `state`, dependents
    /// first.
    ///
    /// A node is only deleted after all of its materialized dependents are
    /// gone; nodes absent from `state` are never touched, so a partial apply
    /// tears down cleanly.
    pub async fn destroy(&self, plan: &Plan, state: &mut MaterializedState) -> DestroyReport {
        let semaphore = Arc::new(Semaphore::new(self.worker.config.max_concurrency()));
        let mut report = DestroyReport::default();

        let targets: Vec<&NodeId> = plan
            .destruction_order()
            .iter()
            .filter_map(|id| plan.node(id).map(ResourceNode::id))
            .filter(|id| state.contains(id))
            .collect();
        for orphan in state.ids().filter(|id| plan.node(id).is_none()) {
            warn!(node = %orphan, "Materialized node is not in the plan, leaving it alone");
        }

        let mut waiting: HashMap<&NodeId, usize> = targets
            .iter()
            .map(|id| {
                let live = plan
                    .downstream(id)
                    .into_iter()
                    .filter(|d| state.contains(d))
                    .count();
                (*id, live)
            })
            .collect();
        let mut ready: VecDeque<&NodeId> = targets
            .iter()
            .copied()
            .filter(|id| waiting.get(id) == Some(&0))
            .collect();
        let mut tasks: JoinSet<(NodeId, Result<(), EngineError>)> = JoinSet::new();
        let mut running: HashMap<task::Id, NodeId> = HashMap::new();

        info!(stack = %self.worker.config.stack_name, nodes = targets.len(), "Destroying materialized nodes");

        loop {
            while !self.worker.cancel.is_cancelled() {
                let Some(id) = ready.pop_front() else { break };
                let Some(materialized) = state.get(id).cloned() else { continue };
                let id = id.clone();
                let worker = self.worker.clone();
                let semaphore = semaphore.clone();

                let node = id.clone();
                let handle = tasks.spawn(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => worker.remove(&node, materialized.kind, &materialized.outputs).await,
                        Err(_) => Err(EngineError::Cancelled { node: node.clone() }),
                    };
                    (node, result)
                });
                running.insert(handle.id(), id);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let joined = match joined {
                Ok((task_id, outcome)) => {
                    running.remove(&task_id);
                    outcome
                }
                Err(e) => match running.remove(&e.id()) {
                    Some(id) => (id.clone(), Err(EngineError::Aborted { node: id, reason: e.to_string() })),
                    None => {
                        error!(error = %e, "Destroy task did not complete");
                        continue;
                    }
                },
            };
            match joined {
                (id, Ok(())) => {
                    state.remove(&id);
                    self.emit(StackEvent::Destroyed { node: id.clone() });
                    for up in plan.upstream(&id) {
                        if let Some(n) = waiting.get_mut(up) {
                            *n -= 1;
                            if *n == 0 {
                                ready.push_back(up);
                            }
                        }
                    }
                    report.destroyed.push(id);
                }
                (id, Err(e)) => {
                    error!(node = %id, error = %e, "Failed to destroy node");
                    self.emit(StackEvent::Failed {
                        node: id,
                        error: e.to_string(),
                    });
                    report.failed.push(e);
                }
            }
        }

        for id in targets {
            if state.contains(id) {
                self.emit(StackEvent::Retained { node: id.clone() });
                report.retained.push(id.clone());
            }
        }

        info!(
            destroyed = report.destroyed.len(),
            failed = report.failed.len(),
            retained = report.retained.len(),
            "Destroy finished"
        );
        report
    }
}

fn backoff(retry: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(retry.min_delay)
        .with_max_delay(retry.max_delay)
        .with_max_times(retry.max_times)
}

impl Worker {
    async fn materialize(
        &self,
        node: &ResourceNode,
        inputs: &Inputs,
        vault: &SecretVault,
    ) -> Result<Outputs, EngineError> {
        let id = node.id();
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled { node: id.clone() });
        }

        let request = CreateRequest {
            id: id.clone(),
            kind: node.kind(),
            attributes: resolve_attributes(node, inputs, vault).await?,
            tags: standard_tags(&self.config.stack_name, id.as_str()),
        };

        let outputs = (|| async { self.provider.create(&request).await })
            .retry(backoff(&self.config.retry))
            .when(ProviderError::is_retryable)
            .notify(|e, dur| {
                warn!(node = %id, delay = ?dur, error = %e, "Transient provider error, retrying...");
            })
            .await
            .map_err(|source| {
                if source.is_already_exists() {
                    warn!(node = %id, "Resource already exists, possibly left over from an earlier apply");
                }
                EngineError::ProviderApply {
                    node: id.clone(),
                    source,
                }
            })?;

        wait_for_resource(
            &self.config.wait,
            Some(&self.cancel),
            || self.provider.is_ready(id, node.kind()),
            id.as_str(),
        )
        .await
        .map_err(|e| match e {
            WaitError::Cancelled { .. } => EngineError::Cancelled { node: id.clone() },
            WaitError::Check { source, .. } => EngineError::ProviderApply {
                node: id.clone(),
                source,
            },
            timeout @ WaitError::Timeout { .. } => EngineError::NotReady {
                node: id.clone(),
                reason: timeout.to_string(),
            },
        })?;

        info!(node = %id, kind = %node.kind(), "Materialized node");
        Ok(outputs)
    }

    async fn remove(&self, id: &NodeId, kind: ResourceKind, outputs: &Outputs) -> Result<(), EngineError> {
        let result = (|| async { self.provider.delete(id, kind, outputs).await })
            .retry(backoff(&self.config.retry))
            .when(ProviderError::is_retryable)
            .notify(|e, dur| {
                warn!(node = %id, delay = ?dur, error = %e, "Node still in use, retrying delete...");
            })
            .await;

        match result {
            Ok(()) => {
                info!(node = %id, kind = %kind, "Destroyed node");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(node = %id, "Node already gone");
                Ok(())
            }
            Err(source) => Err(EngineError::ProviderDestroy {
                node: id.clone(),
                source,
            }),
        }
    }
}
