//! Secret broker.
//!
//! [`issue`] declares a platform-generated credential and returns a handle;
//! [`derive`] turns a handle plus a field name into a sensitive
//! [`AttrRef`]. Nothing here ever holds a generated value: the node carries
//! only the generation policy, and the engine resolves values lazily at
//! injection time using [`generate`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use phoenix_stack_common::ResourceKind;
use phoenix_stack_common::defaults::DEFAULT_SECRET_LENGTH;
use rand::Rng;

use crate::attr::{AttrRef, AttrValue, NodeId};
use crate::error::{Error, Result};
use crate::registry::{Declaration, Registry, ResourceNode};

const ATTR_SECRET_NAME: &str = "secretName";
const ATTR_GENERATE: &str = "generateSecretString";

const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// How the platform generates a secret string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub exclude_punctuation: bool,
    pub include_space: bool,
    /// Fixed fields stored alongside the generated one (e.g. `username`).
    pub template_fields: BTreeMap<String, String>,
    /// Field that receives the generated string.
    pub generate_key: String,
    pub length: usize,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            exclude_punctuation: false,
            include_space: false,
            template_fields: BTreeMap::new(),
            generate_key: "password".to_string(),
            length: DEFAULT_SECRET_LENGTH,
        }
    }
}

impl GenerationPolicy {
    pub fn exclude_punctuation(mut self, exclude: bool) -> Self {
        self.exclude_punctuation = exclude;
        self
    }

    pub fn include_space(mut self, include: bool) -> Self {
        self.include_space = include;
        self
    }

    pub fn template_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_fields.insert(key.into(), value.into());
        self
    }

    pub fn generate_key(mut self, key: impl Into<String>) -> Self {
        self.generate_key = key.into();
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Every field a derived ref may name.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = self.template_fields.keys().cloned().collect();
        fields.insert(self.generate_key.clone());
        fields
    }

    fn charset(&self) -> Vec<char> {
        let mut chars: Vec<char> = ALPHANUMERIC.chars().collect();
        if !self.exclude_punctuation {
            chars.extend(PUNCTUATION.chars());
        }
        if self.include_space {
            chars.push(' ');
        }
        chars
    }

    fn validate(&self, secret: &NodeId) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidSecretPolicy {
            secret: secret.clone(),
            reason: reason.to_string(),
        };
        if self.length == 0 {
            return Err(invalid("length must be at least 1"));
        }
        if self.generate_key.is_empty() {
            return Err(invalid("generate key is empty"));
        }
        if self.template_fields.contains_key(&self.generate_key) {
            return Err(invalid("generate key collides with a template field"));
        }
        Ok(())
    }

    fn to_attr(&self) -> AttrValue {
        AttrValue::map([
            ("excludePunctuation", AttrValue::from(self.exclude_punctuation)),
            ("includeSpace", AttrValue::from(self.include_space)),
            ("passwordLength", AttrValue::Int(self.length as i64)),
            ("generateStringKey", AttrValue::from(&self.generate_key)),
            (
                "secretStringTemplate",
                AttrValue::map(self.template_fields.iter().map(|(k, v)| (k.clone(), v.clone()))),
            ),
        ])
    }

    /// Read the policy back from a declared Secret node.
    pub fn from_node(node: &ResourceNode) -> Option<Self> {
        if node.kind() != ResourceKind::Secret {
            return None;
        }
        let spec = node.attribute(ATTR_GENERATE)?.as_map()?;
        let template_fields = spec
            .get("secretStringTemplate")
            .and_then(AttrValue::as_map)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            exclude_punctuation: spec
                .get("excludePunctuation")
                .and_then(AttrValue::as_bool)
                .unwrap_or(false),
            include_space: spec
                .get("includeSpace")
                .and_then(AttrValue::as_bool)
                .unwrap_or(false),
            template_fields,
            generate_key: spec
                .get("generateStringKey")
                .and_then(AttrValue::as_str)?
                .to_string(),
            length: spec
                .get("passwordLength")
                .and_then(AttrValue::as_int)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_SECRET_LENGTH),
        })
    }
}

/// Opaque handle to an issued secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHandle {
    id: NodeId,
    name: String,
    fields: BTreeSet<String>,
}

impl SecretHandle {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-sensitive ref to the secret's identifier, for policy scoping.
    pub fn arn(&self) -> AttrRef {
        AttrRef::arn(&self.id)
    }
}

/// Declare a platform-generated secret.
///
/// # Errors
///
/// - [`Error::DuplicateId`] if `id` is taken
/// - [`Error::InvalidSecretPolicy`] for a policy that cannot generate a value
pub fn issue(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    name: &str,
    policy: &GenerationPolicy,
) -> Result<SecretHandle> {
    let id = id.into();
    policy.validate(&id)?;
    let id = registry.register(
        Declaration::new(ResourceKind::Secret)
            .id(id)
            .attr(ATTR_SECRET_NAME, name)
            .attr(ATTR_GENERATE, policy.to_attr()),
    )?;
    Ok(SecretHandle {
        id,
        name: name.to_string(),
        fields: policy.fields(),
    })
}

/// Sensitive reference to one field of an issued secret.
///
/// # Errors
///
/// Returns [`Error::UnresolvedReference`] if the policy never produces `field`.
pub fn derive(handle: &SecretHandle, field: &str) -> Result<AttrRef> {
    if !handle.fields.contains(field) {
        return Err(Error::UnresolvedReference {
            node: handle.id.clone(),
            reference: format!("{}.{}", handle.id, field),
        });
    }
    Ok(AttrRef::sensitive(&handle.id, field))
}

/// Wrapper that keeps a value out of `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// The wrapped value. Only call this at the point of injection.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(***)")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A resolved secret: template fields plus the generated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretValue {
    fields: BTreeMap<String, Sensitive<String>>,
}

impl SecretValue {
    pub fn field(&self, name: &str) -> Option<&Sensitive<String>> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Generate a secret value from a policy.
pub fn generate<R: Rng + ?Sized>(policy: &GenerationPolicy, rng: &mut R) -> SecretValue {
    let charset = policy.charset();
    let generated: String = (0..policy.length)
        .map(|_| charset[rng.gen_range(0..charset.len())])
        .collect();

    let mut fields: BTreeMap<String, Sensitive<String>> = policy
        .template_fields
        .iter()
        .map(|(k, v)| (k.clone(), Sensitive::new(v.clone())))
        .collect();
    fields.insert(policy.generate_key.clone(), Sensitive::new(generated));
    SecretValue { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn db_policy() -> GenerationPolicy {
        GenerationPolicy::default()
            .exclude_punctuation(true)
            .template_field("username", "postgres")
    }

    #[test]
    fn test_issue_declares_policy_without_value() {
        let mut reg = Registry::new();
        let handle = issue(&mut reg, "DbSecret", "demo-db-credential", &db_policy()).unwrap();
        let node = reg.get(handle.id()).unwrap();
        assert_eq!(node.kind(), ResourceKind::Secret);
        assert_eq!(
            node.attribute("secretName").and_then(AttrValue::as_str),
            Some("demo-db-credential")
        );
        assert_eq!(GenerationPolicy::from_node(node), Some(db_policy()));

        let json = serde_json::to_string(node).unwrap();
        assert!(!json.contains("\"password\":"));
    }

    #[test]
    fn test_derive_known_and_unknown_fields() {
        let mut reg = Registry::new();
        let handle = issue(&mut reg, "DbSecret", "db", &db_policy()).unwrap();

        let password = derive(&handle, "password").unwrap();
        assert!(password.sensitive);
        assert_eq!(password.target, *handle.id());
        assert!(derive(&handle, "username").unwrap().sensitive);

        let err = derive(&handle, "token").unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { reference, .. } if reference == "DbSecret.token"));
    }

    #[test]
    fn test_arn_ref_is_not_sensitive() {
        let mut reg = Registry::new();
        let handle = issue(&mut reg, "S", "s", &GenerationPolicy::default()).unwrap();
        assert!(!handle.arn().sensitive);
    }

    #[test]
    fn test_invalid_policies() {
        let mut reg = Registry::new();
        let zero = GenerationPolicy::default().length(0);
        assert!(matches!(
            issue(&mut reg, "A", "a", &zero),
            Err(Error::InvalidSecretPolicy { .. })
        ));
        let clash = GenerationPolicy::default().template_field("password", "fixed");
        assert!(matches!(
            issue(&mut reg, "B", "b", &clash),
            Err(Error::InvalidSecretPolicy { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_generate_respects_policy() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = generate(&db_policy(), &mut rng);
        let password = value.field("password").unwrap().expose();
        assert_eq!(password.len(), DEFAULT_SECRET_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(value.field("username").unwrap().expose(), "postgres");

        let spaced = GenerationPolicy::default()
            .exclude_punctuation(true)
            .include_space(true)
            .length(500);
        let value = generate(&spaced, &mut rng);
        let generated = value.field("password").unwrap().expose();
        assert!(generated.chars().all(|c| c.is_ascii_alphanumeric() || c == ' '));
    }

    #[test]
    fn test_sensitive_is_redacted() {
        let mut rng = StdRng::seed_from_u64(1);
        let value = generate(&db_policy(), &mut rng);
        let password = value.field("password").unwrap();
        assert_eq!(password.to_string(), "***");
        assert!(!format!("{value:?}").contains(password.expose().as_str()));
    }
}
