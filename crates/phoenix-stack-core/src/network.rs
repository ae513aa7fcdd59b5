//! Network topology builder.
//!
//! Declares the network, carves its subnets and validates security group
//! rules, including the two posture rules the stack depends on:
//! database ingress stays inside the network's address space, and a public
//! management surface is open to the world on its reserved port only.

use std::fmt;
use std::net::Ipv4Addr;

use ipnetwork::{IpNetwork, Ipv4Network};
use phoenix_stack_common::ResourceKind;
use tracing::debug;

use crate::attr::{AttrRef, AttrValue, NodeId};
use crate::error::{Error, Result};
use crate::registry::{Declaration, Registry};

/// Smallest subnet the carve-up may produce.
const MAX_SUBNET_PREFIX: u8 = 28;
/// Peers wider than this count as the open internet.
const PUBLIC_PREFIX_LIMIT: u8 = 8;

const ATTR_INGRESS: &str = "securityGroupIngress";
const ATTR_EGRESS: &str = "securityGroupEgress";

/// A declared network and its subnets.
#[derive(Debug, Clone)]
pub struct NetworkNode {
    id: NodeId,
    cidr: Ipv4Network,
    public_subnets: Vec<NodeId>,
    private_subnets: Vec<NodeId>,
}

impl NetworkNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn cidr(&self) -> Ipv4Network {
        self.cidr
    }

    /// One per availability zone, in zone order.
    pub fn public_subnets(&self) -> &[NodeId] {
        &self.public_subnets
    }

    /// Private subnets with egress through the public subnet of the same zone.
    pub fn private_subnets(&self) -> &[NodeId] {
        &self.private_subnets
    }
}

/// Declare a network spanning `az_count` zones.
///
/// The address space is split evenly into `2 * az_count` subnets: the public
/// ones first, then the private ones.
///
/// # Errors
///
/// [`Error::InvalidNetwork`] for a malformed address space, zero zones, or a
/// space too small to hold the subnets.
pub fn define_network(
    registry: &mut Registry,
    id: impl Into<NodeId>,
    address_space: &str,
    az_count: u8,
) -> Result<NetworkNode> {
    let id = id.into();
    let invalid = |reason: String| Error::InvalidNetwork {
        network: id.clone(),
        reason,
    };

    if !address_space.contains('/') {
        return Err(invalid(format!("'{address_space}' has no prefix length")));
    }
    let cidr: Ipv4Network = address_space
        .parse()
        .map_err(|_| invalid(format!("'{address_space}' is not an IPv4 CIDR block")))?;
    if az_count == 0 {
        return Err(invalid("at least one availability zone is required".to_string()));
    }

    let subnet_count = u32::from(az_count) * 2;
    let extra_bits = subnet_count.next_power_of_two().trailing_zeros() as u8;
    let subnet_prefix = cidr.prefix() + extra_bits;
    if subnet_prefix > MAX_SUBNET_PREFIX {
        return Err(invalid(format!(
            "{cidr} cannot hold {subnet_count} subnets (would need /{subnet_prefix})"
        )));
    }

    if registry.contains(&id) {
        return Err(Error::DuplicateId { id });
    }
    let id = registry.register(
        Declaration::new(ResourceKind::Network)
            .id(id)
            .attr("cidrBlock", cidr.to_string())
            .attr("maxAzs", az_count)
            .attr("enableDnsHostnames", true)
            .attr("enableDnsSupport", true),
    )?;

    let base = u32::from(cidr.network());
    let block = 1u32 << (32 - u32::from(subnet_prefix));
    let carve = |i: u32| -> Result<Ipv4Network> {
        Ipv4Network::new(Ipv4Addr::from(base + i * block), subnet_prefix).map_err(|e| {
            Error::InvalidNetwork {
                network: id.clone(),
                reason: e.to_string(),
            }
        })
    };

    let mut public_subnets = Vec::with_capacity(usize::from(az_count));
    for az in 0..u32::from(az_count) {
        let subnet = registry.register(
            Declaration::new(ResourceKind::Subnet)
                .id(id.child(&format!("PublicSubnet{}", az + 1)))
                .attr("vpcId", AttrRef::id(&id))
                .attr("cidrBlock", carve(az)?.to_string())
                .attr("availabilityZone", i64::from(az))
                .attr("mapPublicIpOnLaunch", true)
                .attr("tier", "public"),
        )?;
        public_subnets.push(subnet);
    }

    let mut private_subnets = Vec::with_capacity(usize::from(az_count));
    for (az, public) in (0..u32::from(az_count)).zip(&public_subnets) {
        let subnet = registry.register(
            Declaration::new(ResourceKind::Subnet)
                .id(id.child(&format!("PrivateSubnet{}", az + 1)))
                .attr("vpcId", AttrRef::id(&id))
                .attr("cidrBlock", carve(u32::from(az_count) + az)?.to_string())
                .attr("availabilityZone", i64::from(az))
                .attr("mapPublicIpOnLaunch", false)
                .attr("tier", "private-with-egress")
                .attr("egressVia", AttrValue::link(public)),
        )?;
        private_subnets.push(subnet);
    }

    debug!(network = %id, %cidr, az_count, "Defined network");
    Ok(NetworkNode {
        id,
        cidr,
        public_subnets,
        private_subnets,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "-1",
        }
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn all() -> Self {
        Self::new(0, u16::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// Source (ingress) or destination (egress) of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Cidr(String),
    Group(NodeId),
    /// The group the rule belongs to.
    SelfGroup,
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Peer::Cidr("0.0.0.0/0".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    pub direction: Direction,
    pub peer: Peer,
    pub protocol: Protocol,
    pub ports: PortRange,
    pub description: String,
}

impl SecurityRule {
    pub fn ingress(peer: Peer, protocol: Protocol, ports: PortRange, description: &str) -> Self {
        Self {
            direction: Direction::Ingress,
            peer,
            protocol,
            ports,
            description: description.to_string(),
        }
    }

    pub fn egress(peer: Peer, protocol: Protocol, ports: PortRange, description: &str) -> Self {
        Self {
            direction: Direction::Egress,
            ..Self::ingress(peer, protocol, ports, description)
        }
    }

    fn to_attr(&self) -> AttrValue {
        let peer = match &self.peer {
            Peer::Cidr(cidr) => ("cidrIp", AttrValue::from(cidr)),
            Peer::Group(group) => ("peerGroup", AttrValue::link(group)),
            Peer::SelfGroup => ("peerGroup", AttrValue::from("self")),
        };
        AttrValue::map([
            ("ipProtocol", AttrValue::from(self.protocol.as_str())),
            ("fromPort", AttrValue::from(self.ports.from)),
            ("toPort", AttrValue::from(self.ports.to)),
            ("description", AttrValue::from(&self.description)),
            peer,
        ])
    }
}

/// What a group protects; selects the posture checks applied to its rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPurpose {
    General,
    Database,
    /// Publicly reachable management surface with its reserved port.
    PublicManagement { port: u16 },
}

#[derive(Debug, Clone)]
pub struct SecurityGroupSpec {
    id: NodeId,
    description: String,
    purpose: GroupPurpose,
    allow_all_outbound: bool,
    rules: Vec<SecurityRule>,
}

impl SecurityGroupSpec {
    pub fn new(id: impl Into<NodeId>, purpose: GroupPurpose) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            purpose,
            allow_all_outbound: true,
            rules: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn allow_all_outbound(mut self, allow: bool) -> Self {
        self.allow_all_outbound = allow;
        self
    }

    pub fn rule(mut self, rule: SecurityRule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGroupNode {
    id: NodeId,
    network_cidr: Ipv4Network,
    purpose: GroupPurpose,
}

impl SecurityGroupNode {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn purpose(&self) -> GroupPurpose {
        self.purpose
    }
}

/// Declare a security group in `network`.
///
/// All rules are validated before anything is registered.
///
/// # Errors
///
/// - [`Error::InvalidRule`] for an empty port range, a malformed CIDR, an
///   unknown peer group, or a posture violation
/// - [`Error::DuplicateId`] if the group id is taken
pub fn add_security_group(
    registry: &mut Registry,
    network: &NetworkNode,
    spec: SecurityGroupSpec,
) -> Result<SecurityGroupNode> {
    let SecurityGroupSpec {
        id,
        description,
        purpose,
        allow_all_outbound,
        mut rules,
    } = spec;

    if allow_all_outbound {
        rules.push(SecurityRule::egress(
            Peer::any_ipv4(),
            Protocol::All,
            PortRange::all(),
            "Allow all outbound traffic by default",
        ));
    }

    let group = SecurityGroupNode {
        id,
        network_cidr: network.cidr,
        purpose,
    };
    for rule in &rules {
        validate_rule(registry, &group, rule)?;
    }

    let (ingress, egress): (Vec<_>, Vec<_>) = rules
        .iter()
        .partition(|r| r.direction == Direction::Ingress);
    let id = registry.register(
        Declaration::new(ResourceKind::SecurityGroup)
            .id(group.id.clone())
            .attr("vpcId", AttrRef::id(&network.id))
            .attr("groupDescription", description)
            .attr(ATTR_INGRESS, AttrValue::list(ingress.iter().map(|r| r.to_attr())))
            .attr(ATTR_EGRESS, AttrValue::list(egress.iter().map(|r| r.to_attr()))),
    )?;
    debug!(group = %id, rules = rules.len(), "Added security group");
    Ok(group)
}

/// Append a rule to an existing group.
pub fn add_rule(registry: &mut Registry, group: &SecurityGroupNode, rule: SecurityRule) -> Result<()> {
    validate_rule(registry, group, &rule)?;
    let attr = match rule.direction {
        Direction::Ingress => ATTR_INGRESS,
        Direction::Egress => ATTR_EGRESS,
    };
    registry.push_attribute(&group.id, attr, rule.to_attr())
}

fn validate_rule(registry: &Registry, group: &SecurityGroupNode, rule: &SecurityRule) -> Result<()> {
    let invalid = |reason: String| Error::InvalidRule {
        group: group.id.clone(),
        reason,
    };

    if rule.ports.is_empty() {
        return Err(invalid(format!(
            "empty port range {}-{}",
            rule.ports.from, rule.ports.to
        )));
    }

    let cidr = match &rule.peer {
        Peer::Cidr(raw) => {
            let parsed = raw
                .contains('/')
                .then(|| raw.parse::<IpNetwork>().ok())
                .flatten()
                .ok_or_else(|| invalid(format!("malformed CIDR '{raw}'")))?;
            Some(parsed)
        }
        Peer::Group(peer) => {
            match registry.get(peer) {
                Ok(node) if node.kind() == ResourceKind::SecurityGroup => {}
                _ => return Err(invalid(format!("unknown peer group {peer}"))),
            }
            None
        }
        Peer::SelfGroup => None,
    };

    if rule.direction == Direction::Egress {
        return Ok(());
    }
    let Some(cidr) = cidr else {
        return Ok(());
    };

    match group.purpose {
        GroupPurpose::General => Ok(()),
        GroupPurpose::Database => {
            let inside = match cidr {
                IpNetwork::V4(v4) => {
                    v4.prefix() >= group.network_cidr.prefix()
                        && group.network_cidr.contains(v4.network())
                }
                IpNetwork::V6(_) => false,
            };
            if inside {
                Ok(())
            } else {
                Err(invalid(format!(
                    "database ingress from {cidr} is outside the network address space {}",
                    group.network_cidr
                )))
            }
        }
        GroupPurpose::PublicManagement { port } => {
            let open = cidr.prefix() < PUBLIC_PREFIX_LIMIT;
            if open && (rule.protocol != Protocol::Tcp || rule.ports != PortRange::single(port)) {
                Err(invalid(format!(
                    "ingress from anywhere is only allowed on tcp/{port}, got {}/{}",
                    rule.protocol.as_str(),
                    rule.ports
                )))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(reg: &mut Registry) -> NetworkNode {
        define_network(reg, "VPC", "10.0.0.0/16", 2).unwrap()
    }

    #[test]
    fn test_define_network_carves_subnets() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        assert_eq!(net.public_subnets().len(), 2);
        assert_eq!(net.private_subnets().len(), 2);

        let cidrs: Vec<&str> = net
            .public_subnets()
            .iter()
            .chain(net.private_subnets())
            .map(|id| {
                reg.get(id)
                    .unwrap()
                    .attribute("cidrBlock")
                    .and_then(AttrValue::as_str)
                    .unwrap()
            })
            .collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );

        let private = reg.get(&net.private_subnets()[0]).unwrap();
        assert_eq!(
            private.attribute("egressVia").and_then(AttrValue::as_link),
            Some(&net.public_subnets()[0])
        );
    }

    #[test]
    fn test_define_network_rejects_bad_spaces() {
        let mut reg = Registry::new();
        for (cidr, azs) in [("10.0.0.0", 2), ("not-a-cidr/16", 2), ("10.0.0.0/16", 0), ("10.0.0.0/27", 2)] {
            assert!(
                matches!(
                    define_network(&mut reg, "VPC", cidr, azs),
                    Err(Error::InvalidNetwork { .. })
                ),
                "{cidr} with {azs} zones"
            );
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_database_ingress_from_network_cidr() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let spec = SecurityGroupSpec::new("DbSG", GroupPurpose::Database).rule(SecurityRule::ingress(
            Peer::Cidr("10.0.0.0/16".to_string()),
            Protocol::Tcp,
            PortRange::single(5432),
            "Postgres from the VPC",
        ));
        let group = add_security_group(&mut reg, &net, spec).unwrap();
        let node = reg.get(group.id()).unwrap();
        assert_eq!(
            node.attribute(ATTR_INGRESS).and_then(AttrValue::as_list).map(<[_]>::len),
            Some(1)
        );
        assert_eq!(
            node.attribute(ATTR_EGRESS).and_then(AttrValue::as_list).map(<[_]>::len),
            Some(1)
        );
    }

    #[test]
    fn test_database_rejects_open_ingress() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let spec = SecurityGroupSpec::new("DbSG", GroupPurpose::Database).rule(SecurityRule::ingress(
            Peer::any_ipv4(),
            Protocol::Tcp,
            PortRange::single(5432),
            "Postgres from anywhere",
        ));
        let err = add_security_group(&mut reg, &net, spec).unwrap_err();
        assert!(matches!(err, Error::InvalidRule { ref group, .. } if group.as_str() == "DbSG"));
        assert!(!reg.contains(&NodeId::from("DbSG")));
    }

    #[test]
    fn test_database_rejects_wider_space() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let spec = SecurityGroupSpec::new("DbSG", GroupPurpose::Database).rule(SecurityRule::ingress(
            Peer::Cidr("10.0.0.0/8".to_string()),
            Protocol::Tcp,
            PortRange::single(5432),
            "",
        ));
        assert!(add_security_group(&mut reg, &net, spec).is_err());
    }

    #[test]
    fn test_management_posture() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let mgmt = GroupPurpose::PublicManagement { port: 443 };

        let ok = SecurityGroupSpec::new("NotebookSG", mgmt).rule(SecurityRule::ingress(
            Peer::any_ipv4(),
            Protocol::Tcp,
            PortRange::single(443),
            "HTTPS",
        ));
        add_security_group(&mut reg, &net, ok).unwrap();

        let wide = SecurityGroupSpec::new("WideSG", mgmt).rule(SecurityRule::ingress(
            Peer::any_ipv4(),
            Protocol::Tcp,
            PortRange::new(443, 444),
            "",
        ));
        assert!(matches!(
            add_security_group(&mut reg, &net, wide),
            Err(Error::InvalidRule { .. })
        ));

        let ssh = SecurityGroupSpec::new("SshSG", mgmt).rule(SecurityRule::ingress(
            Peer::any_ipv4(),
            Protocol::Tcp,
            PortRange::single(22),
            "",
        ));
        assert!(add_security_group(&mut reg, &net, ssh).is_err());
    }

    #[test]
    fn test_management_posture_covers_split_internet() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let mgmt = GroupPurpose::PublicManagement { port: 443 };

        for half in ["0.0.0.0/1", "128.0.0.0/1", "64.0.0.0/7"] {
            let spec = SecurityGroupSpec::new("SplitSG", mgmt).rule(SecurityRule::ingress(
                Peer::Cidr(half.to_string()),
                Protocol::Tcp,
                PortRange::single(22),
                "",
            ));
            assert!(
                matches!(add_security_group(&mut reg, &net, spec), Err(Error::InvalidRule { .. })),
                "{half} accepted on tcp/22"
            );
        }

        let office = SecurityGroupSpec::new("OfficeSG", mgmt).rule(SecurityRule::ingress(
            Peer::Cidr("203.0.113.0/24".to_string()),
            Protocol::Tcp,
            PortRange::single(22),
            "office",
        ));
        add_security_group(&mut reg, &net, office).unwrap();
    }

    #[test]
    fn test_invalid_rules() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let cases = [
            SecurityRule::ingress(Peer::any_ipv4(), Protocol::Tcp, PortRange::new(90, 80), ""),
            SecurityRule::ingress(Peer::Cidr("10.0.0.300/24".into()), Protocol::Tcp, PortRange::single(80), ""),
            SecurityRule::ingress(Peer::Cidr("10.0.0.1".into()), Protocol::Tcp, PortRange::single(80), ""),
            SecurityRule::ingress(Peer::Group(NodeId::from("Ghost")), Protocol::Tcp, PortRange::single(80), ""),
            SecurityRule::ingress(Peer::Group(net.id().clone()), Protocol::Tcp, PortRange::single(80), ""),
        ];
        for rule in cases {
            let spec = SecurityGroupSpec::new("SG", GroupPurpose::General).rule(rule.clone());
            assert!(
                matches!(add_security_group(&mut reg, &net, spec), Err(Error::InvalidRule { .. })),
                "{rule:?}"
            );
        }
    }

    #[test]
    fn test_group_peer_links_and_self_reference() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let lb = add_security_group(&mut reg, &net, SecurityGroupSpec::new("LbSG", GroupPurpose::General)).unwrap();
        let app = add_security_group(
            &mut reg,
            &net,
            SecurityGroupSpec::new("AppSG", GroupPurpose::General)
                .rule(SecurityRule::ingress(
                    Peer::Group(lb.id().clone()),
                    Protocol::Tcp,
                    PortRange::single(8080),
                    "from the balancer",
                ))
                .rule(SecurityRule::ingress(Peer::SelfGroup, Protocol::All, PortRange::all(), "peers")),
        )
        .unwrap();

        let node = reg.get(app.id()).unwrap();
        let targets: Vec<NodeId> = node.references().into_iter().map(|(_, r)| r.target().clone()).collect();
        assert!(targets.contains(lb.id()));
        assert!(!targets.contains(app.id()));
    }

    #[test]
    fn test_add_rule_appends() {
        let mut reg = Registry::new();
        let net = network(&mut reg);
        let group = add_security_group(
            &mut reg,
            &net,
            SecurityGroupSpec::new("SG", GroupPurpose::General).allow_all_outbound(false),
        )
        .unwrap();
        add_rule(
            &mut reg,
            &group,
            SecurityRule::ingress(Peer::any_ipv4(), Protocol::Tcp, PortRange::single(80), "http"),
        )
        .unwrap();
        assert!(
            add_rule(
                &mut reg,
                &group,
                SecurityRule::ingress(Peer::any_ipv4(), Protocol::Tcp, PortRange::new(2, 1), ""),
            )
            .is_err()
        );
        let ingress = reg.get(group.id()).unwrap().attribute(ATTR_INGRESS).unwrap();
        assert_eq!(ingress.as_list().map(<[_]>::len), Some(1));
    }
}
