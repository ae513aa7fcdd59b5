//! Lazy secret resolution.
//!
//! A secret's value is generated the first time a node derived from it is
//! materialized and is then shared by every other consumer. Nodes that were
//! not derived from the secret never see the value.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use phoenix_stack_common::ResourceKind;
use phoenix_stack_core::secrets::generate;
use phoenix_stack_core::{GenerationPolicy, NodeId, Plan, SecretValue};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::EngineError;

struct SecretSlot {
    policy: GenerationPolicy,
    consumers: BTreeSet<NodeId>,
    value: OnceCell<Arc<SecretValue>>,
}

pub struct SecretVault {
    slots: BTreeMap<NodeId, SecretSlot>,
    generated: AtomicUsize,
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault")
            .field("secrets", &self.slots.keys().collect::<Vec<_>>())
            .field("generated", &self.generated.load(Ordering::Relaxed))
            .finish()
    }
}

impl SecretVault {
    /// One slot per declared secret in `plan`.
    pub fn for_plan(plan: &Plan) -> Self {
        let slots = plan
            .nodes()
            .filter(|n| n.kind() == ResourceKind::Secret)
            .filter_map(|node| {
                let policy = GenerationPolicy::from_node(node)?;
                let consumers = plan.secret_consumers(node.id()).cloned().unwrap_or_default();
                Some((
                    node.id().clone(),
                    SecretSlot {
                        policy,
                        consumers,
                        value: OnceCell::new(),
                    },
                ))
            })
            .collect();
        Self {
            slots,
            generated: AtomicUsize::new(0),
        }
    }

    /// The value of `secret` as seen by `consumer`, generating it on first use.
    ///
    /// # Errors
    ///
    /// [`EngineError::SecretNotDerived`] if `consumer` holds no derived
    /// reference to `secret`.
    pub async fn value_for(&self, secret: &NodeId, consumer: &NodeId) -> Result<Arc<SecretValue>, EngineError> {
        let not_derived = || EngineError::SecretNotDerived {
            node: consumer.clone(),
            secret: secret.clone(),
        };
        let slot = self.slots.get(secret).ok_or_else(not_derived)?;
        if !slot.consumers.contains(consumer) {
            return Err(not_derived());
        }

        let value = slot
            .value
            .get_or_init(|| async {
                self.generated.fetch_add(1, Ordering::SeqCst);
                debug!(secret = %secret, first_consumer = %consumer, "Generated secret value");
                Arc::new(fresh_value(&slot.policy))
            })
            .await;
        Ok(value.clone())
    }

    /// Number of secret values generated so far.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

fn fresh_value(policy: &GenerationPolicy) -> SecretValue {
    let mut rng = rand::thread_rng();
    generate(policy, &mut rng)
}
