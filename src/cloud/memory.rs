//! In-memory control plane.
//!
//! Behaves like the provider where the engine depends on it: new groups
//! carry an allow-all egress rule, every network gets a MAIN route table,
//! CNAME values come back with a trailing dot, duplicate creations are
//! rejected, and instances boot through `pending`. Every mutation is
//! journalled so callers can assert that a run changed nothing.

use super::*;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

/// Default number of polls/mutations an instance spends in `pending`.
pub const DEFAULT_BOOT_POLLS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    #[serde(flatten)]
    instance: Instance,
    #[serde(default)]
    pending_polls: Cell<u32>,
}

impl InstanceRecord {
    /// The instance as a caller would see it now.
    fn observed(&self) -> Instance {
        let mut inst = self.instance.clone();
        if inst.state == InstanceState::Pending && self.pending_polls.get() == 0 {
            inst.state = InstanceState::Running;
        }
        inst
    }

    fn tick(&self) {
        let left = self.pending_polls.get();
        self.pending_polls.set(left.saturating_sub(1));
    }
}

/// Injected failures; never persisted.
#[derive(Debug, Clone, Default)]
struct Faults {
    rejected: BTreeSet<String>,
    drop_authorizations: bool,
    drop_health_checks: bool,
    /// Operations after which the touched balancer disappears
    lose_balancer: BTreeSet<String>,
}

/// A complete control plane held in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCloud {
    owner_id: String,
    #[serde(default)]
    next_id: u64,
    #[serde(default = "default_boot_polls")]
    boot_polls: u32,
    #[serde(default)]
    vpcs: Vec<Vpc>,
    #[serde(default)]
    gateways: Vec<Gateway>,
    #[serde(default)]
    subnets: Vec<Subnet>,
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
    #[serde(default)]
    certificates: Vec<Certificate>,
    #[serde(default)]
    load_balancers: Vec<LoadBalancer>,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    instances: Vec<InstanceRecord>,
    #[serde(default)]
    launch_templates: Vec<LaunchTemplate>,
    #[serde(default)]
    autoscale_groups: Vec<AutoscaleGroup>,
    #[serde(default)]
    route_tables: Vec<RouteTable>,
    #[serde(default)]
    zones: BTreeMap<String, Vec<DnsRecord>>,
    #[serde(skip)]
    journal: Vec<String>,
    #[serde(skip)]
    faults: Faults,
}

fn default_boot_polls() -> u32 {
    DEFAULT_BOOT_POLLS
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new("000000000000")
    }
}

impl MemoryCloud {
    /// An empty account.
    pub fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            next_id: 0,
            boot_polls: DEFAULT_BOOT_POLLS,
            vpcs: Vec::new(),
            gateways: Vec::new(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            certificates: Vec::new(),
            load_balancers: Vec::new(),
            images: Vec::new(),
            instances: Vec::new(),
            launch_templates: Vec::new(),
            autoscale_groups: Vec::new(),
            route_tables: Vec::new(),
            zones: BTreeMap::new(),
            journal: Vec::new(),
            faults: Faults::default(),
        }
    }

    // -- seeding --

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.add_zone(zone);
        self
    }

    pub fn add_zone(&mut self, zone: &str) {
        self.zones.entry(zone.to_string()).or_default();
    }

    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    pub fn add_image(&mut self, id: &str, name: &str) {
        self.images.push(Image {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
        });
    }

    pub fn add_certificate(&mut self, name: &str, arn: &str) {
        self.certificates.push(Certificate {
            name: name.to_string(),
            arn: arn.to_string(),
        });
    }

    // -- fault injection --

    /// Reject every call to the named operation (e.g. `"authorize_ingress"`).
    pub fn reject(&mut self, operation: &str) {
        self.faults.rejected.insert(operation.to_string());
    }

    /// Instances launched from now on stay `pending` until [`settle`](Self::settle).
    pub fn never_boot(&mut self) {
        self.boot_polls = u32::MAX;
    }

    /// Accept authorize calls without recording the rule.
    pub fn drop_authorizations(&mut self) {
        self.faults.drop_authorizations = true;
    }

    /// Accept health-check configuration without storing it.
    pub fn drop_health_checks(&mut self) {
        self.faults.drop_health_checks = true;
    }

    /// Delete the balancer right after the named operation succeeds on it.
    pub fn lose_balancer_after(&mut self, operation: &str) {
        self.faults.lose_balancer.insert(operation.to_string());
    }

    fn maybe_lose_balancer(&mut self, operation: &str, name: &str) {
        if self.faults.lose_balancer.contains(operation) {
            self.load_balancers.retain(|b| b.name != name);
        }
    }

    // -- inspection --

    /// Every mutation performed so far, in order.
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    pub fn mutation_count(&self) -> usize {
        self.journal.len()
    }

    /// Finish booting every pending instance (time passes between runs).
    pub fn settle(&mut self) {
        for rec in &mut self.instances {
            rec.pending_polls.set(0);
            if rec.instance.state == InstanceState::Pending {
                rec.instance.state = InstanceState::Running;
            }
        }
    }

    /// Mutate a stored record directly, bypassing the journal.
    pub fn tamper_route(&mut self, table_id: &str, destination: &str, target: RouteTarget) {
        if let Some(route) = self
            .route_tables
            .iter_mut()
            .filter(|t| t.id == table_id)
            .flat_map(|t| t.routes.iter_mut())
            .find(|r| r.destination == destination)
        {
            route.target = target;
        }
    }

    /// Rewrite a CNAME directly, bypassing the journal.
    pub fn tamper_cname(&mut self, zone: &str, name: &str, value: &str) {
        if let Some(rec) = self
            .zones
            .get_mut(zone)
            .and_then(|records| records.iter_mut().find(|r| r.name == name))
        {
            rec.value = value.to_string();
        }
    }

    // -- internals --

    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    /// Gate, journal, and advance time for one mutating call.
    fn mutate(&mut self, operation: &str, detail: &str) -> Result<(), CloudError> {
        if self.faults.rejected.contains(operation) {
            return Err(CloudError::Rejected(format!("{} {}", operation, detail)));
        }
        self.journal.push(format!("{} {}", operation, detail));
        for rec in &mut self.instances {
            rec.tick();
            if rec.instance.state == InstanceState::Pending && rec.pending_polls.get() == 0 {
                rec.instance.state = InstanceState::Running;
            }
        }
        Ok(())
    }

    fn group_mut(&mut self, group_id: &str) -> Result<&mut SecurityGroup, CloudError> {
        self.security_groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "security group",
                id: group_id.to_string(),
            })
    }

    fn instance_rec(&self, instance_id: &str) -> Result<&InstanceRecord, CloudError> {
        self.instances
            .iter()
            .find(|r| r.instance.id == instance_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })
    }

    fn instance_mut(&mut self, instance_id: &str) -> Result<&mut Instance, CloudError> {
        self.instances
            .iter_mut()
            .map(|r| &mut r.instance)
            .find(|i| i.id == instance_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })
    }

    fn balancer_mut(&mut self, name: &str) -> Result<&mut LoadBalancer, CloudError> {
        self.load_balancers
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| CloudError::NotFound {
                kind: "load balancer",
                id: name.to_string(),
            })
    }

    fn zone_mut(&mut self, zone: &str) -> Result<&mut Vec<DnsRecord>, CloudError> {
        self.zones.get_mut(zone).ok_or_else(|| CloudError::NotFound {
            kind: "hosted zone",
            id: zone.to_string(),
        })
    }

    fn authorize(
        &mut self,
        group_id: &str,
        rule: &RuleRequest,
        egress: bool,
    ) -> Result<(), CloudError> {
        let op = if egress {
            "authorize_egress"
        } else {
            "authorize_ingress"
        };
        self.group_mut(group_id)?;
        self.mutate(op, &format!("{} {:?}", group_id, rule))?;
        if self.faults.drop_authorizations {
            return Ok(());
        }
        let group = self.group_mut(group_id)?;
        let perms = if egress {
            &mut group.egress
        } else {
            &mut group.ingress
        };
        match perms.iter_mut().find(|p| {
            p.protocol == rule.protocol && p.from_port == rule.from_port && p.to_port == rule.to_port
        }) {
            Some(perm) if perm.grants.contains(&rule.grant) => Err(CloudError::Duplicate(format!(
                "permission {:?} already granted on {}",
                rule, group_id
            ))),
            Some(perm) => {
                perm.grants.push(rule.grant.clone());
                Ok(())
            }
            None => {
                perms.push(IpPermission {
                    protocol: rule.protocol.clone(),
                    from_port: rule.from_port,
                    to_port: rule.to_port,
                    grants: vec![rule.grant.clone()],
                });
                Ok(())
            }
        }
    }
}

fn trailing_dot(host: &str) -> String {
    if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{}.", host)
    }
}

impl ControlPlane for MemoryCloud {
    fn owner_id(&self) -> String {
        self.owner_id.clone()
    }

    fn list_vpcs(&self) -> Result<Vec<Vpc>, CloudError> {
        Ok(self.vpcs.clone())
    }

    fn create_vpc(&mut self, cidr: &str) -> Result<Vpc, CloudError> {
        self.mutate("create_vpc", cidr)?;
        let vpc = Vpc {
            id: self.next("vpc"),
            cidr: cidr.to_string(),
            dns_hostnames: false,
        };
        let table_id = self.next("rtb");
        let assoc_id = self.next("rtbassoc");
        self.route_tables.push(RouteTable {
            id: table_id,
            vpc_id: vpc.id.clone(),
            associations: vec![Association {
                id: assoc_id,
                main: true,
                subnet_id: None,
            }],
            routes: vec![Route {
                destination: cidr.to_string(),
                target: RouteTarget::Local,
            }],
        });
        self.vpcs.push(vpc.clone());
        Ok(vpc)
    }

    fn enable_dns_hostnames(&mut self, vpc_id: &str) -> Result<(), CloudError> {
        self.mutate("enable_dns_hostnames", vpc_id)?;
        let vpc = self
            .vpcs
            .iter_mut()
            .find(|v| v.id == vpc_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "vpc",
                id: vpc_id.to_string(),
            })?;
        vpc.dns_hostnames = true;
        Ok(())
    }

    fn list_gateways(&self) -> Result<Vec<Gateway>, CloudError> {
        Ok(self.gateways.clone())
    }

    fn create_gateway(&mut self) -> Result<Gateway, CloudError> {
        self.mutate("create_gateway", "")?;
        let gw = Gateway {
            id: self.next("igw"),
            attachments: Vec::new(),
        };
        self.gateways.push(gw.clone());
        Ok(gw)
    }

    fn attach_gateway(&mut self, gateway_id: &str, vpc_id: &str) -> Result<(), CloudError> {
        self.mutate("attach_gateway", &format!("{} {}", gateway_id, vpc_id))?;
        let gw = self
            .gateways
            .iter_mut()
            .find(|g| g.id == gateway_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "gateway",
                id: gateway_id.to_string(),
            })?;
        if !gw.attachments.is_empty() {
            return Err(CloudError::Rejected(format!(
                "{} is already attached",
                gateway_id
            )));
        }
        gw.attachments.push(vpc_id.to_string());
        Ok(())
    }

    fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>, CloudError> {
        Ok(self
            .subnets
            .iter()
            .filter(|s| s.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    fn create_subnet(&mut self, vpc_id: &str, cidr: &str, az: &str) -> Result<Subnet, CloudError> {
        if self.subnets.iter().any(|s| s.vpc_id == vpc_id && s.cidr == cidr) {
            return Err(CloudError::Duplicate(format!("subnet {}", cidr)));
        }
        self.mutate("create_subnet", &format!("{} {} {}", vpc_id, cidr, az))?;
        let subnet = Subnet {
            id: self.next("subnet"),
            vpc_id: vpc_id.to_string(),
            cidr: cidr.to_string(),
            az: az.to_string(),
        };
        self.subnets.push(subnet.clone());
        Ok(subnet)
    }

    fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, CloudError> {
        Ok(self
            .security_groups
            .iter()
            .filter(|g| g.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    fn create_security_group(
        &mut self,
        vpc_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<String, CloudError> {
        if self
            .security_groups
            .iter()
            .any(|g| g.vpc_id == vpc_id && g.name == name)
        {
            return Err(CloudError::Duplicate(format!("security group {}", name)));
        }
        self.mutate("create_security_group", &format!("{} {}", vpc_id, name))?;
        let id = self.next("sg");
        self.security_groups.push(SecurityGroup {
            id: id.clone(),
            name: name.to_string(),
            vpc_id: vpc_id.to_string(),
            owner_id: self.owner_id.clone(),
            ingress: Vec::new(),
            egress: vec![IpPermission {
                protocol: "-1".to_string(),
                from_port: None,
                to_port: None,
                grants: vec![Grant::Cidr("0.0.0.0/0".to_string())],
            }],
        });
        Ok(id)
    }

    fn authorize_ingress(&mut self, group_id: &str, rule: &RuleRequest) -> Result<(), CloudError> {
        self.authorize(group_id, rule, false)
    }

    fn authorize_egress(&mut self, group_id: &str, rule: &RuleRequest) -> Result<(), CloudError> {
        self.authorize(group_id, rule, true)
    }

    fn list_certificates(&self) -> Result<Vec<Certificate>, CloudError> {
        Ok(self.certificates.clone())
    }

    fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, CloudError> {
        Ok(self.load_balancers.clone())
    }

    fn create_load_balancer(&mut self, request: &BalancerRequest) -> Result<(), CloudError> {
        if self.load_balancers.iter().any(|b| b.name == request.name) {
            return Err(CloudError::Duplicate(format!(
                "load balancer {}",
                request.name
            )));
        }
        self.mutate("create_load_balancer", &request.name)?;
        let serial = self.next("elb");
        self.load_balancers.push(LoadBalancer {
            name: request.name.clone(),
            dns_name: format!("{}-{}.elb.cloudcast.internal", request.name, serial),
            scheme: request.scheme,
            listeners: request.listeners.clone(),
            health_check: None,
            subnets: request.subnets.clone(),
            security_groups: vec![request.security_group.clone()],
            instances: Vec::new(),
        });
        Ok(())
    }

    fn configure_health_check(
        &mut self,
        name: &str,
        check: &HealthCheck,
    ) -> Result<(), CloudError> {
        self.balancer_mut(name)?;
        self.mutate("configure_health_check", name)?;
        if !self.faults.drop_health_checks {
            self.balancer_mut(name)?.health_check = Some(check.clone());
        }
        self.maybe_lose_balancer("configure_health_check", name);
        Ok(())
    }

    fn create_listeners(&mut self, name: &str, listeners: &[Listener]) -> Result<(), CloudError> {
        let lb = self.balancer_mut(name)?;
        if let Some(clash) = listeners.iter().find(|l| {
            lb.listeners
                .iter()
                .any(|existing| existing.external_port == l.external_port)
        }) {
            return Err(CloudError::Duplicate(format!(
                "listener on port {} of {}",
                clash.external_port, name
            )));
        }
        self.mutate("create_listeners", &format!("{} x{}", name, listeners.len()))?;
        self.balancer_mut(name)?
            .listeners
            .extend(listeners.iter().cloned());
        self.maybe_lose_balancer("create_listeners", name);
        Ok(())
    }

    fn register_instances(
        &mut self,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        self.balancer_mut(name)?;
        self.mutate(
            "register_instances",
            &format!("{} {}", name, instance_ids.join(",")),
        )?;
        let lb = self.balancer_mut(name)?;
        for id in instance_ids {
            if !lb.instances.contains(id) {
                lb.instances.push(id.clone());
            }
        }
        Ok(())
    }

    fn list_images(&self, name_pattern: &str) -> Result<Vec<Image>, CloudError> {
        let pattern = glob::Pattern::new(name_pattern)
            .map_err(|e| CloudError::Rejected(format!("bad image filter {}: {}", name_pattern, e)))?;
        Ok(self
            .images
            .iter()
            .filter(|i| pattern.matches(&i.name))
            .cloned()
            .collect())
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, CloudError> {
        Ok(self
            .instances
            .iter()
            .map(InstanceRecord::observed)
            .filter(|i| filter.matches(i))
            .collect())
    }

    fn describe_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        let rec = self.instance_rec(instance_id)?;
        rec.tick();
        Ok(rec.observed())
    }

    fn run_instance(&mut self, request: &InstanceRequest) -> Result<Instance, CloudError> {
        let subnet = self
            .subnets
            .iter()
            .find(|s| s.id == request.placement.subnet_id())
            .cloned()
            .ok_or_else(|| CloudError::NotFound {
                kind: "subnet",
                id: request.placement.subnet_id().to_string(),
            })?;
        self.mutate(
            "run_instance",
            &format!("{} {} {}", request.image_id, request.instance_type, subnet.id),
        )?;
        let id = self.next("i");
        let public_dns = match request.placement {
            Placement::PublicInterface { .. } => Some(format!("ec2-{}.compute.cloudcast.internal", id)),
            Placement::Private { .. } => None,
        };
        let state = if self.boot_polls == 0 {
            InstanceState::Running
        } else {
            InstanceState::Pending
        };
        let instance = Instance {
            id: id.clone(),
            image_id: request.image_id.clone(),
            instance_type: request.instance_type.clone(),
            vpc_id: subnet.vpc_id.clone(),
            subnet_id: subnet.id.clone(),
            state,
            tags: Tags::new(),
            private_dns: format!("ip-{}.cloudcast.internal", id),
            public_dns,
            source_dest_check: true,
        };
        self.instances.push(InstanceRecord {
            instance: instance.clone(),
            pending_polls: Cell::new(self.boot_polls),
        });
        Ok(instance)
    }

    fn create_tags(&mut self, instance_id: &str, tags: &Tags) -> Result<(), CloudError> {
        self.instance_rec(instance_id)?;
        self.mutate("create_tags", instance_id)?;
        let inst = self.instance_mut(instance_id)?;
        for (k, v) in tags {
            inst.tags.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn disable_source_dest_check(&mut self, instance_id: &str) -> Result<(), CloudError> {
        self.instance_rec(instance_id)?;
        self.mutate("disable_source_dest_check", instance_id)?;
        self.instance_mut(instance_id)?.source_dest_check = false;
        Ok(())
    }

    fn list_launch_templates(&self) -> Result<Vec<LaunchTemplate>, CloudError> {
        Ok(self.launch_templates.clone())
    }

    fn create_launch_template(&mut self, template: &LaunchTemplate) -> Result<(), CloudError> {
        if self.launch_templates.iter().any(|t| t.name == template.name) {
            return Err(CloudError::Duplicate(format!(
                "launch template {}",
                template.name
            )));
        }
        self.mutate("create_launch_template", &template.name)?;
        self.launch_templates.push(template.clone());
        Ok(())
    }

    fn list_autoscale_groups(&self) -> Result<Vec<AutoscaleGroup>, CloudError> {
        Ok(self.autoscale_groups.clone())
    }

    fn create_autoscale_group(&mut self, group: &AutoscaleGroup) -> Result<(), CloudError> {
        if self.autoscale_groups.iter().any(|g| g.name == group.name) {
            return Err(CloudError::Duplicate(format!(
                "autoscale group {}",
                group.name
            )));
        }
        if !self
            .launch_templates
            .iter()
            .any(|t| t.name == group.launch_template)
        {
            return Err(CloudError::NotFound {
                kind: "launch template",
                id: group.launch_template.clone(),
            });
        }
        self.mutate("create_autoscale_group", &group.name)?;
        self.autoscale_groups.push(group.clone());
        Ok(())
    }

    fn update_autoscale_group(
        &mut self,
        name: &str,
        update: &AutoscaleUpdate,
    ) -> Result<(), CloudError> {
        if !self.autoscale_groups.iter().any(|g| g.name == name) {
            return Err(CloudError::NotFound {
                kind: "autoscale group",
                id: name.to_string(),
            });
        }
        self.mutate("update_autoscale_group", &format!("{} {:?}", name, update))?;
        if let Some(group) = self.autoscale_groups.iter_mut().find(|g| g.name == name) {
            if let Some(ref t) = update.launch_template {
                group.launch_template.clone_from(t);
            }
            if let Some(min) = update.min_size {
                group.min_size = min;
            }
            if let Some(max) = update.max_size {
                group.max_size = max;
            }
            if let Some(desired) = update.desired_capacity {
                group.desired_capacity = Some(desired);
            }
        }
        Ok(())
    }

    fn list_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>, CloudError> {
        Ok(self
            .route_tables
            .iter()
            .filter(|t| t.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    fn create_route_table(&mut self, vpc_id: &str) -> Result<RouteTable, CloudError> {
        let cidr = self
            .vpcs
            .iter()
            .find(|v| v.id == vpc_id)
            .map(|v| v.cidr.clone())
            .ok_or_else(|| CloudError::NotFound {
                kind: "vpc",
                id: vpc_id.to_string(),
            })?;
        self.mutate("create_route_table", vpc_id)?;
        let table = RouteTable {
            id: self.next("rtb"),
            vpc_id: vpc_id.to_string(),
            associations: Vec::new(),
            routes: vec![Route {
                destination: cidr,
                target: RouteTarget::Local,
            }],
        };
        self.route_tables.push(table.clone());
        Ok(table)
    }

    fn associate_route_table(
        &mut self,
        table_id: &str,
        subnet_id: &str,
    ) -> Result<(), CloudError> {
        if !self.route_tables.iter().any(|t| t.id == table_id) {
            return Err(CloudError::NotFound {
                kind: "route table",
                id: table_id.to_string(),
            });
        }
        self.mutate("associate_route_table", &format!("{} {}", table_id, subnet_id))?;
        for table in &mut self.route_tables {
            table
                .associations
                .retain(|a| a.subnet_id.as_deref() != Some(subnet_id));
        }
        let assoc_id = self.next("rtbassoc");
        if let Some(table) = self.route_tables.iter_mut().find(|t| t.id == table_id) {
            table.associations.push(Association {
                id: assoc_id,
                main: false,
                subnet_id: Some(subnet_id.to_string()),
            });
        }
        Ok(())
    }

    fn create_route(
        &mut self,
        table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> Result<(), CloudError> {
        let table = self
            .route_tables
            .iter()
            .find(|t| t.id == table_id)
            .ok_or_else(|| CloudError::NotFound {
                kind: "route table",
                id: table_id.to_string(),
            })?;
        if table.routes.iter().any(|r| r.destination == destination) {
            return Err(CloudError::Duplicate(format!(
                "route {} in {}",
                destination, table_id
            )));
        }
        self.mutate(
            "create_route",
            &format!("{} {} {:?}", table_id, destination, target),
        )?;
        if let Some(table) = self.route_tables.iter_mut().find(|t| t.id == table_id) {
            table.routes.push(Route {
                destination: destination.to_string(),
                target: target.clone(),
            });
        }
        Ok(())
    }

    fn zone_exists(&self, zone: &str) -> Result<bool, CloudError> {
        Ok(self.zones.contains_key(zone))
    }

    fn find_cname(&self, zone: &str, name: &str) -> Result<Option<DnsRecord>, CloudError> {
        let records = self.zones.get(zone).ok_or_else(|| CloudError::NotFound {
            kind: "hosted zone",
            id: zone.to_string(),
        })?;
        Ok(records.iter().find(|r| r.name == name).cloned())
    }

    fn create_cname(&mut self, zone: &str, name: &str, target: &str) -> Result<(), CloudError> {
        if self.zone_mut(zone)?.iter().any(|r| r.name == name) {
            return Err(CloudError::Duplicate(format!("record {}", name)));
        }
        self.mutate("create_cname", &format!("{} {}", name, target))?;
        self.zone_mut(zone)?.push(DnsRecord {
            name: name.to_string(),
            value: trailing_dot(target),
        });
        Ok(())
    }

    fn update_cname(&mut self, zone: &str, name: &str, target: &str) -> Result<(), CloudError> {
        if !self.zone_mut(zone)?.iter().any(|r| r.name == name) {
            return Err(CloudError::NotFound {
                kind: "record",
                id: name.to_string(),
            });
        }
        self.mutate("update_cname", &format!("{} {}", name, target))?;
        if let Some(rec) = self.zone_mut(zone)?.iter_mut().find(|r| r.name == name) {
            rec.value = trailing_dot(target);
        }
        Ok(())
    }
}
