//! Attribute injection: turn a declared node into a provider request.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use phoenix_stack_core::{AttrRef, AttrValue, NodeId, Reference, ResourceNode, SecretValue, Sensitive, TemplatePart, outputs};

use crate::error::EngineError;
use crate::provider::{Outputs, Resolved};
use crate::vault::SecretVault;

/// Upstream outputs visible to one node.
pub(crate) type Inputs = HashMap<NodeId, Outputs>;

struct Injector<'a> {
    node: &'a NodeId,
    inputs: &'a Inputs,
    secrets: HashMap<NodeId, Arc<SecretValue>>,
}

/// Resolve every attribute of `node` against its upstream outputs.
///
/// Secret values are fetched from the vault first, so resolution itself
/// stays synchronous.
pub(crate) async fn resolve_attributes(
    node: &ResourceNode,
    inputs: &Inputs,
    vault: &SecretVault,
) -> Result<BTreeMap<String, Resolved>, EngineError> {
    let mut wanted = Vec::new();
    for (_, reference) in node.references() {
        if let Reference::Attr(r) = reference {
            if r.sensitive && !wanted.contains(&r.target) {
                wanted.push(r.target.clone());
            }
        }
    }

    let mut secrets = HashMap::new();
    for secret in wanted {
        let value = vault.value_for(&secret, node.id()).await?;
        secrets.insert(secret, value);
    }

    let injector = Injector {
        node: node.id(),
        inputs,
        secrets,
    };
    node.attributes()
        .iter()
        .map(|(name, value)| Ok((name.clone(), injector.value(value)?)))
        .collect()
}

impl Injector<'_> {
    fn unresolved(&self, reference: impl ToString) -> EngineError {
        EngineError::UnresolvedReference {
            node: self.node.clone(),
            reference: reference.to_string(),
        }
    }

    fn value(&self, value: &AttrValue) -> Result<Resolved, EngineError> {
        Ok(match value {
            AttrValue::Str(s) => Resolved::Str(s.clone()),
            AttrValue::Int(n) => Resolved::Int(*n),
            AttrValue::Bool(b) => Resolved::Bool(*b),
            AttrValue::List(items) => {
                Resolved::List(items.iter().map(|v| self.value(v)).collect::<Result<_, _>>()?)
            }
            AttrValue::Map(entries) => Resolved::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v)?)))
                    .collect::<Result<_, EngineError>>()?,
            ),
            AttrValue::Ref(r) if r.sensitive => Resolved::Secret(self.secret(r)?),
            AttrValue::Ref(r) => Resolved::Str(self.output(r)?.to_string()),
            AttrValue::Link(target) => Resolved::Link(self.link(target)?.to_string()),
            AttrValue::Template(parts) => self.template(parts)?,
        })
    }

    fn output(&self, r: &AttrRef) -> Result<&str, EngineError> {
        self.inputs
            .get(&r.target)
            .and_then(|o| o.get(&r.attribute))
            .map(String::as_str)
            .ok_or_else(|| self.unresolved(r))
    }

    fn link(&self, target: &NodeId) -> Result<&str, EngineError> {
        self.inputs
            .get(target)
            .and_then(|o| o.get(outputs::ID))
            .map(String::as_str)
            .ok_or_else(|| self.unresolved(target))
    }

    fn secret(&self, r: &AttrRef) -> Result<Sensitive<String>, EngineError> {
        self.secrets
            .get(&r.target)
            .and_then(|v| v.field(&r.attribute))
            .cloned()
            .ok_or_else(|| self.unresolved(r))
    }

    fn template(&self, parts: &[TemplatePart]) -> Result<Resolved, EngineError> {
        let mut text = String::new();
        let mut sensitive = false;
        for part in parts {
            match part {
                TemplatePart::Text(t) => text.push_str(t),
                TemplatePart::Ref(r) if r.sensitive => {
                    sensitive = true;
                    text.push_str(self.secret(r)?.expose());
                }
                TemplatePart::Ref(r) => text.push_str(self.output(r)?),
            }
        }
        Ok(if sensitive {
            Resolved::Secret(Sensitive::new(text))
        } else {
            Resolved::Str(text)
        })
    }
}
