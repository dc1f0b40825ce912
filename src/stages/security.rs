//! Security groups and their rules.
//!
//! A declared rule is matched against the live group by (protocol, port
//! range, source). Missing rules are authorized one at a time, after which
//! the group snapshot is re-listed and the rule looked up again; a rule
//! that still does not show up is an error.

use crate::cloud::{Grant, IpPermission, RuleRequest, SecurityGroup};
use crate::core::context::{ConvergeContext, GroupSnapshot};
use crate::core::error::{CastError, Result};
use crate::core::types::TopologyDoc;
use std::fmt;

pub const ANYWHERE: &str = "0.0.0.0/0";

// ============================================================================
// Rule model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    /// Every protocol (`-1`)
    All,
}

impl Protocol {
    /// Anything other than `udp` or `icmp` is treated as `tcp`.
    pub fn normalize(declared: &str) -> Self {
        match declared.to_ascii_lowercase().as_str() {
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            _ => Protocol::Tcp,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::All => "-1",
        }
    }
}

/// A port range; `Any` only equals a permission with no ports at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRange {
    Any,
    Range { from: i32, to: i32 },
}

impl PortRange {
    pub fn single(port: i32) -> Self {
        PortRange::Range {
            from: port,
            to: port,
        }
    }

    fn bounds(self) -> (Option<i32>, Option<i32>) {
        match self {
            PortRange::Any => (None, None),
            PortRange::Range { from, to } => (Some(from), Some(to)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleSource {
    Cidr(String),
    Group { group_id: String, owner_id: String },
}

impl RuleSource {
    pub fn anywhere() -> Self {
        RuleSource::Cidr(ANYWHERE.to_string())
    }

    /// Reference a discovered group as a source.
    pub fn group(group: &SecurityGroup) -> Self {
        RuleSource::Group {
            group_id: group.id.clone(),
            owner_id: group.owner_id.clone(),
        }
    }

    fn grant(&self) -> Grant {
        match self {
            RuleSource::Cidr(cidr) => Grant::Cidr(cidr.clone()),
            RuleSource::Group { group_id, owner_id } => Grant::Group {
                group_id: group_id.clone(),
                owner_id: owner_id.clone(),
            },
        }
    }

    fn matches(&self, grant: &Grant) -> bool {
        match (self, grant) {
            (RuleSource::Cidr(a), Grant::Cidr(b)) => a == b,
            (
                RuleSource::Group { group_id, owner_id },
                Grant::Group {
                    group_id: gid,
                    owner_id: oid,
                },
            ) => group_id == gid && owner_id == oid,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

/// A declared rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSpec {
    pub protocol: Protocol,
    pub ports: PortRange,
    pub source: RuleSource,
}

impl RuleSpec {
    /// A rule from declared `prot`/`from`/`to`, protocol normalized.
    pub fn declared(prot: &str, from: i32, to: i32, source: RuleSource) -> Self {
        Self {
            protocol: Protocol::normalize(prot),
            ports: PortRange::Range { from, to },
            source,
        }
    }

    /// Every protocol on every port.
    pub fn all_traffic(source: RuleSource) -> Self {
        Self {
            protocol: Protocol::All,
            ports: PortRange::Any,
            source,
        }
    }

    /// True when `perm` covers exactly this (protocol, ports) and grants this source.
    pub fn matches(&self, perm: &IpPermission) -> bool {
        let (from, to) = self.ports.bounds();
        perm.protocol == self.protocol.as_str()
            && perm.from_port == from
            && perm.to_port == to
            && perm.grants.iter().any(|g| self.source.matches(g))
    }

    pub fn request(&self) -> RuleRequest {
        let (from_port, to_port) = self.ports.bounds();
        RuleRequest {
            protocol: self.protocol.as_str().to_string(),
            from_port,
            to_port,
            grant: self.source.grant(),
        }
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.protocol.as_str())?;
        match self.ports {
            PortRange::Any => write!(f, "any")?,
            PortRange::Range { from, to } => write!(f, "{}-{}", from, to)?,
        }
        match &self.source {
            RuleSource::Cidr(cidr) => write!(f, " from {}", cidr),
            RuleSource::Group { group_id, .. } => write!(f, " from {}", group_id),
        }
    }
}

/// The live permission satisfying `rule`, if any.
pub fn find_rule<'a>(
    group: &'a SecurityGroup,
    direction: Direction,
    rule: &RuleSpec,
) -> Option<&'a IpPermission> {
    let perms = match direction {
        Direction::Ingress => &group.ingress,
        Direction::Egress => &group.egress,
    };
    perms.iter().find(|p| rule.matches(p))
}

/// A rule bound to the group it belongs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRule {
    pub group: String,
    pub direction: Direction,
    pub rule: RuleSpec,
}

impl GroupRule {
    fn ingress(group: &str, rule: RuleSpec) -> Self {
        Self {
            group: group.to_string(),
            direction: Direction::Ingress,
            rule,
        }
    }
}

// ============================================================================
// Declared rule sets
// ============================================================================

fn group_source(groups: &GroupSnapshot, name: &str) -> Result<RuleSource> {
    groups
        .find(name)
        .map(RuleSource::group)
        .ok_or_else(|| CastError::Missing {
            kind: "security group",
            name: name.to_string(),
        })
}

/// World-facing ports on each balancer group.
pub fn balancer_rules(doc: &TopologyDoc) -> Vec<GroupRule> {
    doc.elbs
        .iter()
        .flat_map(|elb| {
            elb.ports.iter().map(move |p| {
                GroupRule::ingress(
                    &elb.group,
                    RuleSpec::declared(&p.prot, p.from, p.to, RuleSource::anywhere()),
                )
            })
        })
        .collect()
}

/// Per-tier rules, tiers in declared order.
pub fn tier_rules(doc: &TopologyDoc, groups: &GroupSnapshot) -> Result<Vec<GroupRule>> {
    let mut rules = Vec::new();
    for app in &doc.apps {
        let own = group_source(groups, &app.group)?;

        if let Some(elb) = doc.balancer_for(app) {
            let elb_source = group_source(groups, &elb.group)?;
            for l in &elb.listeners {
                rules.push(GroupRule::ingress(
                    &app.group,
                    RuleSpec::declared(&l.to_prot, i32::from(l.to), i32::from(l.to), elb_source.clone()),
                ));
            }
        }
        for p in &app.ports {
            rules.push(GroupRule::ingress(
                &app.group,
                RuleSpec::declared(&p.prot, p.from, p.to, own.clone()),
            ));
        }
        for a in &app.allow {
            rules.push(GroupRule::ingress(
                &app.group,
                RuleSpec::declared(&a.prot, a.from, a.to, group_source(groups, &a.group)?),
            ));
        }
        for p in &app.pubports {
            rules.push(GroupRule::ingress(
                &app.group,
                RuleSpec::declared(&p.prot, p.from, p.to, RuleSource::anywhere()),
            ));
        }
        rules.push(GroupRule::ingress(
            &app.group,
            RuleSpec::declared("tcp", 22, 22, RuleSource::anywhere()),
        ));
        if let Some(ref privnet) = doc.aws.privnet {
            rules.push(GroupRule::ingress(
                &app.group,
                RuleSpec::declared("icmp", -1, -1, RuleSource::Cidr(privnet.clone())),
            ));
        }
    }
    Ok(rules)
}

/// Peer groups allowed into balancer groups; needs the tier groups.
pub fn balancer_allow_rules(doc: &TopologyDoc, groups: &GroupSnapshot) -> Result<Vec<GroupRule>> {
    let mut rules = Vec::new();
    for elb in &doc.elbs {
        for a in &elb.allow {
            rules.push(GroupRule::ingress(
                &elb.group,
                RuleSpec::declared(&a.prot, a.from, a.to, group_source(groups, &a.group)?),
            ));
        }
    }
    Ok(rules)
}

/// Fixed NAT baseline plus declared extra ports.
pub fn nat_rules(doc: &TopologyDoc) -> Vec<GroupRule> {
    let group = doc.nat.group.as_str();
    let mut rules = vec![GroupRule::ingress(
        group,
        RuleSpec::declared("tcp", 22, 22, RuleSource::anywhere()),
    )];
    if let Some(ref privnet) = doc.aws.privnet {
        rules.push(GroupRule::ingress(
            group,
            RuleSpec::declared("icmp", -1, -1, RuleSource::Cidr(privnet.clone())),
        ));
    }
    // echo request
    rules.push(GroupRule::ingress(
        group,
        RuleSpec::declared("icmp", 8, -1, RuleSource::anywhere()),
    ));
    // traceroute
    rules.push(GroupRule::ingress(
        group,
        RuleSpec::declared("udp", 33434, 33534, RuleSource::anywhere()),
    ));
    for p in &doc.nat.ports {
        rules.push(GroupRule::ingress(
            group,
            RuleSpec::declared(&p.prot, p.from, p.to, RuleSource::anywhere()),
        ));
    }
    rules.push(GroupRule::ingress(
        group,
        RuleSpec::all_traffic(RuleSource::Cidr(doc.vpc.cidr.clone())),
    ));
    rules.push(GroupRule {
        group: group.to_string(),
        direction: Direction::Egress,
        rule: RuleSpec::all_traffic(RuleSource::anywhere()),
    });
    rules
}

// ============================================================================
// Convergence
// ============================================================================

/// Find or create a security group by name in the current network.
pub fn ensure_group(ctx: &mut ConvergeContext<'_>, name: &str) -> Result<String> {
    if let Some(g) = ctx.groups.find(name) {
        log::debug!("SG {} {}", g.name, g.id);
        return Ok(g.id.clone());
    }
    let vpc_id = ctx.network()?.vpc_id.clone();
    log::info!("Creating security group {}", name);
    ctx.plane
        .create_security_group(&vpc_id, name, name)
        .map_err(|e| CastError::cloud(format!("create security group {}", name), e))?;
    ctx.refresh_groups()?;
    let id = ctx
        .groups
        .find(name)
        .map(|g| g.id.clone())
        .ok_or_else(|| CastError::Unconfirmed {
            kind: "security group",
            key: name.to_string(),
        })?;
    ctx.created("security group", &id);
    Ok(id)
}

/// Make sure `rule` exists on its group, authorizing it if missing.
pub fn ensure_rule(ctx: &mut ConvergeContext<'_>, rule: &GroupRule) -> Result<()> {
    let group = ctx.groups.find(&rule.group).ok_or_else(|| CastError::Missing {
        kind: "security group",
        name: rule.group.clone(),
    })?;
    if find_rule(group, rule.direction, &rule.rule).is_some() {
        log::debug!("SGRULE {} {:?} {}", rule.group, rule.direction, rule.rule);
        return Ok(());
    }
    let group_id = group.id.clone();
    let request = rule.rule.request();
    log::info!(
        "Creating {:?} rule {} on {}",
        rule.direction,
        rule.rule,
        rule.group
    );
    let outcome = match rule.direction {
        Direction::Ingress => ctx.plane.authorize_ingress(&group_id, &request),
        Direction::Egress => ctx.plane.authorize_egress(&group_id, &request),
    };
    outcome.map_err(|e| CastError::cloud(format!("authorize {} on {}", rule.rule, rule.group), e))?;

    ctx.refresh_groups()?;
    let key = format!("{} {}", rule.group, rule.rule);
    let confirmed = ctx
        .groups
        .find(&rule.group)
        .is_some_and(|g| find_rule(g, rule.direction, &rule.rule).is_some());
    if !confirmed {
        return Err(CastError::Unconfirmed {
            kind: "security group rule",
            key,
        });
    }
    ctx.created("security group rule", &key);
    Ok(())
}

fn ensure_rules(ctx: &mut ConvergeContext<'_>, rules: &[GroupRule]) -> Result<()> {
    for rule in rules {
        ensure_rule(ctx, rule)?;
    }
    Ok(())
}

/// One group per balancer and per tier, in declared order.
pub fn converge_groups(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let vpc_id = ctx.network()?.vpc_id.clone();
    ctx.groups = GroupSnapshot::new(&vpc_id);
    ctx.refresh_groups()?;

    let doc = ctx.doc;
    let mut names: Vec<&str> = Vec::new();
    for name in doc
        .elbs
        .iter()
        .map(|e| e.group.as_str())
        .chain(doc.apps.iter().map(|a| a.group.as_str()))
    {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    for name in names {
        ensure_group(ctx, name)?;
    }
    Ok(())
}

pub fn converge_balancer_rules(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let rules = balancer_rules(ctx.doc);
    ensure_rules(ctx, &rules)
}

pub fn converge_tier_rules(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let rules = tier_rules(ctx.doc, &ctx.groups)?;
    ensure_rules(ctx, &rules)
}

pub fn converge_balancer_allow_rules(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let rules = balancer_allow_rules(ctx.doc, &ctx.groups)?;
    ensure_rules(ctx, &rules)
}

/// The NAT group and its baseline rules.
pub fn converge_nat_group(ctx: &mut ConvergeContext<'_>) -> Result<String> {
    let group = ctx.doc.nat.group.clone();
    let id = ensure_group(ctx, &group)?;
    let rules = nat_rules(ctx.doc);
    ensure_rules(ctx, &rules)?;
    Ok(id)
}
