//! Access policy assembler: roles and the allow statements attached to them.

use std::collections::BTreeSet;

use phoenix_stack_common::ResourceKind;
use tracing::debug;

use crate::attr::{AttrValue, NodeId, outputs};
use crate::error::{Error, Result};
use crate::registry::{Declaration, Registry};

/// Action that reads a secret value.
pub const SECRET_READ_ACTION: &str = "secretsmanager:GetSecretValue";

const MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";
const ATTR_ROLE: &str = "role";

/// Declare a role assumable by a service principal.
pub fn define_role(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    principal: &str,
    managed_policies: &[&str],
) -> Result<NodeId> {
    let arns = managed_policies
        .iter()
        .map(|name| format!("{MANAGED_POLICY_PREFIX}{name}"));
    registry.register(
        Declaration::new(ResourceKind::Role)
            .id(id)
            .attr("assumedBy", AttrValue::map([("service", principal)]))
            .attr("managedPolicyArns", AttrValue::list(arns)),
    )
}

/// An allow statement attached to a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyGrant {
    pub id: NodeId,
    pub principal: NodeId,
    pub actions: BTreeSet<String>,
    pub resources: Vec<AttrValue>,
}

fn reads_secrets(action: &str) -> bool {
    action == SECRET_READ_ACTION || action == "secretsmanager:*" || action == "*"
}

/// Attach an allow statement to `role`.
///
/// Resources are literal identifiers or refs to other nodes' `arn` output.
///
/// # Errors
///
/// - [`Error::EmptyGrant`] with no actions or no resources
/// - [`Error::WildcardSecretGrant`] if a grant that can read secrets has a
///   wildcard resource, or does not name an issued secret
/// - [`Error::NodeNotFound`] / [`Error::KindMismatch`] if `role` is not a Role
pub fn grant(
    registry: &mut Registry,
    role: &NodeId,
    actions: &[&str],
    resources: Vec<AttrValue>,
) -> Result<PolicyGrant> {
    registry.get_kind(role, ResourceKind::Role)?;
    if actions.is_empty() {
        return Err(Error::EmptyGrant {
            role: role.clone(),
            missing: "actions",
        });
    }
    if resources.is_empty() {
        return Err(Error::EmptyGrant {
            role: role.clone(),
            missing: "resources",
        });
    }

    if actions.iter().any(|a| reads_secrets(a)) {
        check_secret_scope(registry, role, &resources)?;
    }

    let n = registry
        .nodes_of_kind(ResourceKind::PolicyStatement)
        .filter(|s| s.attribute(ATTR_ROLE).and_then(AttrValue::as_link) == Some(role))
        .count();
    let actions: BTreeSet<String> = actions.iter().map(|a| (*a).to_string()).collect();
    let id = registry.register(
        Declaration::new(ResourceKind::PolicyStatement)
            .id(role.child(&format!("Policy{}", n + 1)))
            .attr(ATTR_ROLE, AttrValue::link(role))
            .attr("effect", "Allow")
            .attr("actions", AttrValue::list(actions.iter()))
            .attr("resources", AttrValue::List(resources.clone())),
    )?;
    debug!(grant = %id, role = %role, actions = actions.len(), "Granted policy");

    Ok(PolicyGrant {
        id,
        principal: role.clone(),
        actions,
        resources,
    })
}

fn check_secret_scope(registry: &Registry, role: &NodeId, resources: &[AttrValue]) -> Result<()> {
    let too_broad = |reason: String| Error::WildcardSecretGrant {
        role: role.clone(),
        reason,
    };

    let mut names_secret = false;
    for resource in resources {
        match resource {
            AttrValue::Str(s) if s.contains('*') => {
                return Err(too_broad(format!("wildcard resource '{s}'")));
            }
            AttrValue::Ref(r) if r.attribute == outputs::ARN => {
                if registry
                    .get(&r.target)
                    .is_ok_and(|n| n.kind() == ResourceKind::Secret)
                {
                    names_secret = true;
                }
            }
            _ => {}
        }
    }
    if names_secret {
        Ok(())
    } else {
        Err(too_broad("no issued secret among the resources".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttrRef;
    use crate::secrets::{GenerationPolicy, issue};

    fn setup() -> (Registry, NodeId, AttrRef) {
        let mut reg = Registry::new();
        let role = define_role(&mut reg, "TaskRole", "ecs-tasks.amazonaws.com", &["AmazonS3FullAccess"]).unwrap();
        let secret = issue(&mut reg, "Secret", "db", &GenerationPolicy::default()).unwrap();
        (reg, role, secret.arn())
    }

    #[test]
    fn test_define_role_expands_managed_policies() {
        let (reg, role, _) = setup();
        let node = reg.get(&role).unwrap();
        let arns = node.attribute("managedPolicyArns").and_then(AttrValue::as_list).unwrap();
        assert_eq!(arns[0].as_str(), Some("arn:aws:iam::aws:policy/AmazonS3FullAccess"));
    }

    #[test]
    fn test_scoped_secret_grant() {
        let (mut reg, role, secret_arn) = setup();
        let grant = grant(&mut reg, &role, &[SECRET_READ_ACTION], vec![secret_arn.clone().into()]).unwrap();
        assert_eq!(grant.id.as_str(), "TaskRole/Policy1");
        assert_eq!(grant.principal, role);

        let node = reg.get(&grant.id).unwrap();
        let targets: Vec<NodeId> = node.references().into_iter().map(|(_, r)| r.target().clone()).collect();
        assert!(targets.contains(&secret_arn.target));
        assert!(targets.contains(&role));
    }

    #[test]
    fn test_wildcard_secret_grant_rejected() {
        let (mut reg, role, secret_arn) = setup();
        let err = grant(
            &mut reg,
            &role,
            &[SECRET_READ_ACTION],
            vec![secret_arn.into(), AttrValue::from("*")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::WildcardSecretGrant { .. }));

        let err = grant(
            &mut reg,
            &role,
            &[SECRET_READ_ACTION],
            vec![AttrValue::from("arn:aws:secretsmanager:us-east-1:123:secret:other")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::WildcardSecretGrant { .. }));
        assert_eq!(reg.nodes_of_kind(ResourceKind::PolicyStatement).count(), 0);
    }

    #[test]
    fn test_wildcard_allowed_without_secret_read() {
        let (mut reg, role, _) = setup();
        grant(&mut reg, &role, &["s3:GetObject"], vec![AttrValue::from("arn:aws:s3:::bucket/*")]).unwrap();
        let second = grant(&mut reg, &role, &["logs:PutLogEvents"], vec![AttrValue::from("*")]).unwrap();
        assert_eq!(second.id.as_str(), "TaskRole/Policy2");
    }

    #[test]
    fn test_empty_grants() {
        let (mut reg, role, secret_arn) = setup();
        assert!(matches!(
            grant(&mut reg, &role, &[], vec![secret_arn.into()]),
            Err(Error::EmptyGrant { missing: "actions", .. })
        ));
        assert!(matches!(
            grant(&mut reg, &role, &["s3:GetObject"], Vec::new()),
            Err(Error::EmptyGrant { missing: "resources", .. })
        ));
    }

    #[test]
    fn test_grant_requires_role() {
        let (mut reg, _, secret_arn) = setup();
        let not_a_role = secret_arn.target.clone();
        assert!(matches!(
            grant(&mut reg, &not_a_role, &["s3:GetObject"], vec![AttrValue::from("x")]),
            Err(Error::KindMismatch { .. })
        ));
    }
}
