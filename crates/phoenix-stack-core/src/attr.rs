//! Node identifiers and attribute values.
//!
//! Attribute values are either literals or one of three reference forms:
//!
//! - [`AttrValue::Ref`]: reads a materialized output of another node
//!   (e.g. a cluster endpoint). Sensitive refs come from the secret broker.
//! - [`AttrValue::Link`]: a structural cross-reference (security group peer,
//!   route target, log destination). It orders nodes but carries no value.
//! - [`AttrValue::Template`]: literal text interleaved with refs, assembled at
//!   injection time.
//!
//! Every reference form implies a dependency edge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable logical identifier of a declared node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of a node scoped under this one (`Parent/child`).
    pub fn child(&self, name: &str) -> NodeId {
        NodeId(format!("{}/{}", self.0, name))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// Output attribute names a provider reports after materialization.
pub mod outputs {
    /// Provider-assigned identifier (every kind)
    pub const ID: &str = "id";
    /// ARN-like identifier (every kind)
    pub const ARN: &str = "arn";
    /// Provider-side name (every kind)
    pub const NAME: &str = "name";
    /// Database cluster writer endpoint
    pub const ENDPOINT_HOST: &str = "endpointHost";
    /// Database cluster port
    pub const ENDPOINT_PORT: &str = "endpointPort";
    /// Load balancer public DNS name
    pub const DNS_NAME: &str = "dnsName";
    /// Network address space
    pub const CIDR_BLOCK: &str = "cidrBlock";
}

/// Typed pointer from one node's attribute to another node's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrRef {
    pub target: NodeId,
    pub attribute: String,
    /// Set for secret-derived refs; the value must only ever be injected
    /// into the node that holds the ref.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

impl AttrRef {
    pub fn new(target: &NodeId, attribute: impl Into<String>) -> Self {
        Self {
            target: target.clone(),
            attribute: attribute.into(),
            sensitive: false,
        }
    }

    pub(crate) fn sensitive(target: &NodeId, attribute: impl Into<String>) -> Self {
        Self {
            sensitive: true,
            ..Self::new(target, attribute)
        }
    }

    pub fn arn(target: &NodeId) -> Self {
        Self::new(target, outputs::ARN)
    }

    pub fn id(target: &NodeId) -> Self {
        Self::new(target, outputs::ID)
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// Piece of a [`AttrValue::Template`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePart {
    Text(String),
    Ref(AttrRef),
}

/// Declared attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    Ref(AttrRef),
    Link(NodeId),
    Template(Vec<TemplatePart>),
}

/// A reference found while walking attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    Attr(&'a AttrRef),
    Link(&'a NodeId),
}

impl Reference<'_> {
    pub fn target(&self) -> &NodeId {
        match self {
            Reference::Attr(r) => &r.target,
            Reference::Link(id) => id,
        }
    }
}

impl AttrValue {
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        AttrValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<AttrValue>>(items: impl IntoIterator<Item = V>) -> Self {
        AttrValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn link(id: &NodeId) -> Self {
        AttrValue::Link(id.clone())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&NodeId> {
        match self {
            AttrValue::Link(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_attr_ref(&self) -> Option<&AttrRef> {
        match self {
            AttrValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Walk every reference in this value. `path` is the attribute path of
    /// the value itself; nested paths are dot-separated.
    pub fn visit_references<'a>(&'a self, path: &str, f: &mut impl FnMut(&str, Reference<'a>)) {
        match self {
            AttrValue::Str(_) | AttrValue::Int(_) | AttrValue::Bool(_) => {}
            AttrValue::Ref(r) => f(path, Reference::Attr(r)),
            AttrValue::Link(id) => f(path, Reference::Link(id)),
            AttrValue::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Ref(r) = part {
                        f(path, Reference::Attr(r));
                    }
                }
            }
            AttrValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.visit_references(&format!("{path}[{i}]"), f);
                }
            }
            AttrValue::Map(entries) => {
                for (key, value) in entries {
                    value.visit_references(&format!("{path}.{key}"), f);
                }
            }
        }
    }

    /// True if any reference inside this value is secret-derived.
    pub fn is_sensitive(&self) -> bool {
        let mut sensitive = false;
        self.visit_references("", &mut |_, r| {
            if let Reference::Attr(a) = r {
                sensitive |= a.sensitive;
            }
        });
        sensitive
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<&String> for AttrValue {
    fn from(s: &String) -> Self {
        AttrValue::Str(s.clone())
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<u32> for AttrValue {
    fn from(i: u32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<u16> for AttrValue {
    fn from(i: u16) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<u8> for AttrValue {
    fn from(i: u8) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<AttrRef> for AttrValue {
    fn from(r: AttrRef) -> Self {
        AttrValue::Ref(r)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(items: Vec<AttrValue>) -> Self {
        AttrValue::List(items)
    }
}

/// Builder for [`AttrValue::Template`].
///
/// ```ignore
/// let url = Template::new()
///     .text("postgresql://postgres:")
///     .reference(password)
///     .text("@")
///     .reference(host)
///     .build();
/// ```
#[derive(Debug, Default, Clone)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(TemplatePart::Text(text.into()));
        self
    }

    pub fn reference(mut self, r: AttrRef) -> Self {
        self.parts.push(TemplatePart::Ref(r));
        self
    }

    pub fn build(self) -> AttrValue {
        AttrValue::Template(self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_nested_references() {
        let db = NodeId::from("Database");
        let sg = NodeId::from("DbSecurityGroup");
        let value = AttrValue::map([
            ("host", AttrValue::Ref(AttrRef::new(&db, outputs::ENDPOINT_HOST))),
            ("groups", AttrValue::list([AttrValue::link(&sg)])),
            ("port", AttrValue::from(5432u16)),
        ]);

        let mut seen = Vec::new();
        value.visit_references("cfg", &mut |path, r| {
            seen.push((path.to_string(), r.target().clone()))
        });

        assert_eq!(
            seen,
            vec![
                ("cfg.groups[0]".to_string(), sg),
                ("cfg.host".to_string(), db),
            ]
        );
    }

    #[test]
    fn test_template_references_are_visited() {
        let secret = NodeId::from("Secret");
        let db = NodeId::from("Database");
        let value = Template::new()
            .text("postgresql://postgres:")
            .reference(AttrRef::sensitive(&secret, "password"))
            .text("@")
            .reference(AttrRef::new(&db, outputs::ENDPOINT_HOST))
            .build();

        let mut targets = Vec::new();
        value.visit_references("url", &mut |_, r| targets.push(r.target().clone()));
        assert_eq!(targets, vec![secret, db]);
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_literals_are_not_sensitive() {
        assert!(!AttrValue::from("plain").is_sensitive());
        assert!(!AttrValue::Ref(AttrRef::arn(&NodeId::from("Role"))).is_sensitive());
    }

    #[test]
    fn test_child_id() {
        assert_eq!(NodeId::from("TaskDef").child("gradio").as_str(), "TaskDef/gradio");
    }

    #[test]
    fn test_sensitive_flag_is_serialized_only_when_set() {
        let plain = serde_json::to_value(AttrRef::arn(&NodeId::from("Role"))).unwrap();
        assert!(plain.get("sensitive").is_none());
        let secret = serde_json::to_value(AttrRef::sensitive(&NodeId::from("S"), "password")).unwrap();
        assert_eq!(secret["sensitive"], serde_json::json!(true));
    }
}
