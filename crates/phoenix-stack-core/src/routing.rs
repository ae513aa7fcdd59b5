//! Routing table: load balancers, listeners and target groups.
//!
//! A load balancer handle remembers the service it fronts. Binding a
//! listener to containers checks them against that service's task
//! definition, creates one target group per binding and attaches it to both
//! the listener and the service.
//!
//! Edge chain: balancer -> listener, container -> target group ->
//! listener, target group -> service, listener -> service.

use std::collections::BTreeSet;
use std::fmt;

use phoenix_stack_common::ResourceKind;
use tracing::debug;

use crate::attr::{AttrRef, AttrValue, NodeId};
use crate::error::{Error, Result};
use crate::network::NetworkNode;
use crate::registry::{Declaration, Registry};
use crate::workload::{ServiceNode, container_ports, find_container};

const ATTR_LOAD_BALANCER: &str = "loadBalancerArn";
const ATTR_PORT: &str = "port";
const ATTR_PROTOCOL: &str = "protocol";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerProtocol {
    Http,
    Https,
}

impl ListenerProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerProtocol::Http => "HTTP",
            ListenerProtocol::Https => "HTTPS",
        }
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the balancer writes access logs.
#[derive(Debug, Clone)]
pub struct AccessLogs {
    pub bucket: NodeId,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct LoadBalancerNode {
    id: NodeId,
    network: NodeId,
    service: NodeId,
    task: NodeId,
}

impl LoadBalancerNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Service behind the balancer.
    pub fn service(&self) -> &NodeId {
        &self.service
    }
}

/// Declare an application load balancer fronting `service`.
pub fn define_load_balancer(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    network: &NetworkNode,
    internet_facing: bool,
    access_logs: Option<AccessLogs>,
    service: &ServiceNode,
) -> Result<LoadBalancerNode> {
    registry.get_kind(service.id(), ResourceKind::Service)?;
    let subnets = if internet_facing {
        network.public_subnets()
    } else {
        network.private_subnets()
    };

    let mut decl = Declaration::new(ResourceKind::LoadBalancer)
        .id(id)
        .attr("type", "application")
        .attr("scheme", if internet_facing { "internet-facing" } else { "internal" })
        .attr("crossZoneEnabled", true)
        .attr("subnets", AttrValue::list(subnets.iter().map(AttrRef::id)));
    if let Some(logs) = access_logs {
        decl = decl.attr(
            "accessLogs",
            AttrValue::map([
                ("bucket", AttrValue::link(&logs.bucket)),
                ("prefix", AttrValue::from(logs.prefix)),
            ]),
        );
    }
    let id = registry.register(decl)?;
    debug!(load_balancer = %id, service = %service.id(), "Defined load balancer");
    Ok(LoadBalancerNode {
        id,
        network: network.id().clone(),
        service: service.id().clone(),
        task: service.task().clone(),
    })
}

#[derive(Debug, Clone)]
pub struct ListenerNode {
    id: NodeId,
    port: u16,
    protocol: ListenerProtocol,
    network: NodeId,
    service: NodeId,
    task: NodeId,
}

impl ListenerNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> ListenerProtocol {
        self.protocol
    }
}

/// Add a listener on `port`/`protocol`.
///
/// # Errors
///
/// [`Error::PortConflict`] if the balancer already listens on that pair.
pub fn add_listener(
    registry: &mut Registry,
    load_balancer: &LoadBalancerNode,
    port: u16,
    protocol: ListenerProtocol,
) -> Result<ListenerNode> {
    let existing = registry.nodes_of_kind(ResourceKind::Listener).find(|l| {
        l.attribute(ATTR_LOAD_BALANCER)
            .and_then(AttrValue::as_attr_ref)
            .is_some_and(|r| r.target == load_balancer.id)
            && l.attribute(ATTR_PORT).and_then(AttrValue::as_int) == Some(i64::from(port))
            && l.attribute(ATTR_PROTOCOL).and_then(AttrValue::as_str) == Some(protocol.as_str())
    });
    if let Some(existing) = existing {
        return Err(Error::PortConflict {
            load_balancer: load_balancer.id.clone(),
            port,
            protocol: protocol.to_string(),
            existing: existing.id().clone(),
        });
    }

    let id = registry.register(
        Declaration::new(ResourceKind::Listener)
            .id(load_balancer.id.child(&format!("{protocol}{port}")))
            .attr(ATTR_LOAD_BALANCER, AttrRef::arn(&load_balancer.id))
            .attr(ATTR_PORT, port)
            .attr(ATTR_PROTOCOL, protocol.as_str())
            .attr("defaultActions", AttrValue::List(Vec::new())),
    )?;
    debug!(listener = %id, port, protocol = %protocol, "Added listener");
    Ok(ListenerNode {
        id,
        port,
        protocol,
        network: load_balancer.network.clone(),
        service: load_balancer.service.clone(),
        task: load_balancer.task.clone(),
    })
}

/// A container port inside a task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetContainer {
    pub task: NodeId,
    pub container: String,
    pub port: u16,
}

impl fmt::Display for TargetContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.task, self.container, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub listener_port: u16,
    pub protocol: ListenerProtocol,
    pub target: TargetContainer,
    /// HTTP health check path; `None` means a TCP connect check.
    pub health_check_path: Option<String>,
}

/// Route a listener to containers of the service behind its balancer.
///
/// Every binding is checked before any node is registered. Returns the ids
/// of the created target groups.
///
/// # Errors
///
/// - [`Error::InvalidBinding`] if a binding's port or protocol differ from
///   the listener's, or its health path is not absolute
/// - [`Error::UnresolvedReference`] if the container or port is not part of
///   the task definition of the service behind the balancer
/// - [`Error::DuplicateId`] if a container is bound twice to this listener
/// - [`Error::NodeNotFound`] if the listener or its service is gone
pub fn bind_targets(
    registry: &mut Registry,
    listener: &ListenerNode,
    bindings: &[RouteBinding],
) -> Result<Vec<NodeId>> {
    registry.get(&listener.id)?;
    registry.get(&listener.service)?;
    let mut staged = BTreeSet::new();
    for binding in bindings {
        validate_binding(registry, listener, binding)?;
        let tg = listener.id.child(&binding.target.container);
        if registry.contains(&tg) || !staged.insert(tg.clone()) {
            return Err(Error::DuplicateId { id: tg });
        }
    }

    let mut target_groups = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let target = &binding.target;
        let container = listener.task.child(&target.container);
        let health_check = match &binding.health_check_path {
            Some(path) => AttrValue::map([
                ("protocol", AttrValue::from(listener.protocol.as_str())),
                ("path", AttrValue::from(path)),
            ]),
            None => AttrValue::map([("protocol", "TCP")]),
        };

        let tg = registry.register(
            Declaration::new(ResourceKind::TargetGroup)
                .id(listener.id.child(&target.container))
                .attr("vpcId", AttrRef::id(&listener.network))
                .attr("targetType", "ip")
                .attr(ATTR_PORT, binding.listener_port)
                .attr(ATTR_PROTOCOL, binding.protocol.as_str())
                .attr("healthCheck", health_check)
                .attr(
                    "targets",
                    AttrValue::list([AttrValue::map([
                        ("container", AttrValue::link(&container)),
                        ("port", AttrValue::from(target.port)),
                    ])]),
                ),
        )?;

        registry.push_attribute(
            &listener.id,
            "defaultActions",
            AttrValue::map([
                ("type", AttrValue::from("forward")),
                ("targetGroupArn", AttrValue::from(AttrRef::arn(&tg))),
            ]),
        )?;
        registry.push_attribute(
            &listener.service,
            "loadBalancers",
            AttrValue::map([
                ("containerName", AttrValue::from(&target.container)),
                ("containerPort", AttrValue::from(target.port)),
                ("targetGroupArn", AttrValue::from(AttrRef::arn(&tg))),
            ]),
        )?;
        registry.add_dependency(&listener.service, &listener.id)?;

        debug!(
            listener = %listener.id,
            target_group = %tg,
            target = %target,
            health_check = binding.health_check_path.as_deref().unwrap_or("tcp"),
            "Bound route"
        );
        target_groups.push(tg);
    }
    Ok(target_groups)
}

fn validate_binding(registry: &Registry, listener: &ListenerNode, binding: &RouteBinding) -> Result<()> {
    let invalid = |reason: String| Error::InvalidBinding {
        listener: listener.id.clone(),
        reason,
    };
    let unresolved = || Error::UnresolvedReference {
        node: listener.id.clone(),
        reference: binding.target.to_string(),
    };

    if binding.listener_port != listener.port || binding.protocol != listener.protocol {
        return Err(invalid(format!(
            "binding for {}/{} on a {}/{} listener",
            binding.listener_port, binding.protocol, listener.port, listener.protocol
        )));
    }
    if let Some(path) = &binding.health_check_path {
        if !path.starts_with('/') {
            return Err(invalid(format!("health check path '{path}' is not absolute")));
        }
    }

    if binding.target.task != listener.task {
        return Err(unresolved());
    }
    let container = find_container(registry, &listener.task, &binding.target.container).ok_or_else(unresolved)?;
    if !container_ports(container).contains(&binding.target.port) {
        return Err(unresolved());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::define_network;
    use crate::policy::define_role;
    use crate::workload::{ContainerSpec, TaskSpec, add_container, define_cluster, define_service, define_task};

    struct Fixture {
        reg: Registry,
        lb: LoadBalancerNode,
        task: NodeId,
    }

    fn fixture() -> Fixture {
        let mut reg = Registry::new();
        let net = define_network(&mut reg, "VPC", "10.0.0.0/16", 2).unwrap();
        let role = define_role(&mut reg, "Role", "ecs-tasks.amazonaws.com", &[]).unwrap();
        let cluster = define_cluster(&mut reg, "Cluster", &net, "demo").unwrap();
        let task = define_task(&mut reg, TaskSpec::new("TaskDef", 2048, 4096, &role, &role)).unwrap();
        add_container(&mut reg, &task, ContainerSpec::new("web", "img").port(8080)).unwrap();
        let service = define_service(&mut reg, "Service", &cluster, &task, &net, "demo", 1).unwrap();
        let lb = define_load_balancer(&mut reg, "LB", &net, true, None, &service).unwrap();
        Fixture {
            reg,
            lb,
            task: task.id().clone(),
        }
    }

    fn binding(task: &NodeId, container: &str, port: u16, path: Option<&str>) -> RouteBinding {
        RouteBinding {
            listener_port: 80,
            protocol: ListenerProtocol::Http,
            target: TargetContainer {
                task: task.clone(),
                container: container.to_string(),
                port,
            },
            health_check_path: path.map(str::to_string),
        }
    }

    #[test]
    fn test_port_conflict() {
        let mut f = fixture();
        let first = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap();
        let err = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap_err();
        match err {
            Error::PortConflict {
                load_balancer,
                port,
                existing,
                ..
            } => {
                assert_eq!(&load_balancer, f.lb.id());
                assert_eq!(port, 80);
                assert_eq!(&existing, first.id());
            }
            other => panic!("unexpected error: {other}"),
        }
        // Same port on another protocol is a different listener
        add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Https).unwrap();
    }

    #[test]
    fn test_bind_targets_wires_service() {
        let mut f = fixture();
        let listener = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap();
        let tgs = bind_targets(&mut f.reg, &listener, &[binding(&f.task, "web", 8080, None)]).unwrap();
        assert_eq!(tgs, vec![NodeId::from("LB/HTTP80/web")]);

        let tg = f.reg.get(&tgs[0]).unwrap();
        let health = tg.attribute("healthCheck").and_then(AttrValue::as_map).unwrap();
        assert_eq!(health.get("protocol").and_then(AttrValue::as_str), Some("TCP"));

        let service = f.reg.get(&NodeId::from("Service")).unwrap();
        assert!(service.depends_on().contains(listener.id()));
        assert_eq!(
            service.attribute("loadBalancers").and_then(AttrValue::as_list).map(<[_]>::len),
            Some(1)
        );
        let actions = f.reg.get(listener.id()).unwrap().attribute("defaultActions").unwrap();
        assert_eq!(actions.as_list().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_http_health_check_path() {
        let mut f = fixture();
        let listener = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap();
        let tgs = bind_targets(&mut f.reg, &listener, &[binding(&f.task, "web", 8080, Some("/healthz"))]).unwrap();
        let health = f.reg.get(&tgs[0]).unwrap().attribute("healthCheck").unwrap().clone();
        assert_eq!(
            health.as_map().and_then(|m| m.get("path")).and_then(AttrValue::as_str),
            Some("/healthz")
        );

        let bad = binding(&f.task, "web", 8080, Some("healthz"));
        assert!(matches!(
            bind_targets(&mut f.reg, &listener, &[bad]),
            Err(Error::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_unknown_container_is_unresolved() {
        let mut f = fixture();
        let listener = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap();
        for bad in [
            binding(&f.task, "ghost", 8080, None),
            binding(&f.task, "web", 9090, None),
            binding(&NodeId::from("OtherTask"), "web", 8080, None),
        ] {
            assert!(matches!(
                bind_targets(&mut f.reg, &listener, &[bad]),
                Err(Error::UnresolvedReference { .. })
            ));
        }
        assert_eq!(f.reg.nodes_of_kind(ResourceKind::TargetGroup).count(), 0);
    }

    #[test]
    fn test_binding_must_match_listener() {
        let mut f = fixture();
        let listener = add_listener(&mut f.reg, &f.lb, 6006, ListenerProtocol::Http).unwrap();
        assert!(matches!(
            bind_targets(&mut f.reg, &listener, &[binding(&f.task, "web", 8080, None)]),
            Err(Error::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_failed_binding_leaves_registry_untouched() {
        let mut f = fixture();
        let listener = add_listener(&mut f.reg, &f.lb, 80, ListenerProtocol::Http).unwrap();
        let declared = f.reg.len();
        let web = binding(&f.task, "web", 8080, None);

        let err = bind_targets(&mut f.reg, &listener, &[web.clone(), web.clone()]).unwrap_err();
        assert!(matches!(err, Error::DuplicateId { ref id } if id.as_str() == "LB/HTTP80/web"));
        assert_eq!(f.reg.len(), declared);
        let service = f.reg.get(&NodeId::from("Service")).unwrap();
        assert!(service.attribute("loadBalancers").and_then(AttrValue::as_list).is_none_or(<[_]>::is_empty));
        assert!(!service.depends_on().contains(listener.id()));
        let actions = f.reg.get(listener.id()).unwrap().attribute("defaultActions").unwrap();
        assert_eq!(actions.as_list().map(<[_]>::len), Some(0));

        // Binding again once succeeded collides with the registered group.
        bind_targets(&mut f.reg, &listener, &[web.clone()]).unwrap();
        let declared = f.reg.len();
        assert!(matches!(
            bind_targets(&mut f.reg, &listener, &[web]),
            Err(Error::DuplicateId { .. })
        ));
        assert_eq!(f.reg.len(), declared);
    }
}
