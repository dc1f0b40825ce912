//! Control-plane capability interface.
//!
//! The engine never talks to a provider directly. Every stage goes through
//! [`ControlPlane`]: list/get primitives that return the provider's current
//! view, and create/update primitives whose responses are not trusted to be
//! fully populated. Callers re-list after every mutation.

pub mod credentials;
pub mod memory;
pub mod snapshot;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a control plane.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Resource tags, insertion-ordered.
pub type Tags = IndexMap<String, String>;

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_hostnames: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: String,
    /// Networks this gateway is attached to
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub cidr: String,
    pub az: String,
}

// ============================================================================
// Security groups
// ============================================================================

/// Source of a permission as the control plane represents it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    Cidr(String),
    Group { group_id: String, owner_id: String },
}

/// One (protocol, port range) permission with every source granted on it.
///
/// `protocol` is the provider's string form (`tcp`, `udp`, `icmp`, `-1`).
/// Ports are absent for all-protocol permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub ingress: Vec<IpPermission>,
    #[serde(default)]
    pub egress: Vec<IpPermission>,
}

/// An authorize request for a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRequest {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub grant: Grant,
}

// ============================================================================
// Load balancers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub external_port: u16,
    pub internal_port: u16,
    pub external_protocol: String,
    pub internal_protocol: String,
    #[serde(default)]
    pub certificate_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub interval: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    InternetFacing,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub dns_name: String,
    pub scheme: Scheme,
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerRequest {
    pub name: String,
    pub scheme: Scheme,
    pub listeners: Vec<Listener>,
    pub subnets: Vec<String>,
    pub security_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub arn: String,
}

// ============================================================================
// Images and instances
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub image_id: String,
    pub instance_type: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub private_dns: String,
    #[serde(default)]
    pub public_dns: Option<String>,
    #[serde(default = "default_true")]
    pub source_dest_check: bool,
}

fn default_true() -> bool {
    true
}

/// How an instance attaches to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Subnet + security groups directly.
    Private {
        subnet_id: String,
        security_group: String,
    },
    /// A dedicated interface with an auto-assigned public address.
    PublicInterface {
        subnet_id: String,
        security_group: String,
    },
}

impl Placement {
    pub fn subnet_id(&self) -> &str {
        match self {
            Self::Private { subnet_id, .. } | Self::PublicInterface { subnet_id, .. } => subnet_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub instance_profile: String,
    pub placement: Placement,
}

/// Tag-based instance query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilter {
    pub vpc_id: String,
    pub tags: Vec<(String, String)>,
    pub state: Option<InstanceState>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        instance.vpc_id == self.vpc_id
            && self.state.is_none_or(|s| instance.state == s)
            && self
                .tags
                .iter()
                .all(|(k, v)| instance.tags.get(k) == Some(v))
    }
}

// ============================================================================
// Autoscaling
// ============================================================================

/// Immutable instance blueprint referenced by an autoscale group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub instance_profile: String,
    pub security_groups: Vec<String>,
    pub public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleTag {
    pub key: String,
    pub value: String,
    pub propagate_at_launch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleGroup {
    pub name: String,
    pub launch_template: String,
    pub min_size: u32,
    pub max_size: u32,
    #[serde(default)]
    pub desired_capacity: Option<u32>,
    pub availability_zones: Vec<String>,
    pub load_balancers: Vec<String>,
    pub subnets: Vec<String>,
    #[serde(default)]
    pub tags: Vec<AutoscaleTag>,
}

/// Changed fields of an autoscale group; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoscaleUpdate {
    pub launch_template: Option<String>,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub desired_capacity: Option<u32>,
}

impl AutoscaleUpdate {
    pub fn is_empty(&self) -> bool {
        self.launch_template.is_none()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.desired_capacity.is_none()
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Local,
    Gateway(String),
    Instance(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: String,
    pub target: RouteTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: String,
    /// Set on the implicit association that marks the MAIN table
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub subnet_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub vpc_id: String,
    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl RouteTable {
    pub fn is_main(&self) -> bool {
        self.associations.iter().any(|a| a.main)
    }
}

// ============================================================================
// DNS
// ============================================================================

/// A CNAME record. `value` is stored in trailing-dot canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub value: String,
}

// ============================================================================
// Capability
// ============================================================================

/// Everything the engine needs from a cloud control plane.
pub trait ControlPlane {
    /// Account that owns security groups created by this caller.
    fn owner_id(&self) -> String;

    // -- network --
    fn list_vpcs(&self) -> Result<Vec<Vpc>, CloudError>;
    fn create_vpc(&mut self, cidr: &str) -> Result<Vpc, CloudError>;
    fn enable_dns_hostnames(&mut self, vpc_id: &str) -> Result<(), CloudError>;
    fn list_gateways(&self) -> Result<Vec<Gateway>, CloudError>;
    fn create_gateway(&mut self) -> Result<Gateway, CloudError>;
    fn attach_gateway(&mut self, gateway_id: &str, vpc_id: &str) -> Result<(), CloudError>;
    fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>, CloudError>;
    fn create_subnet(&mut self, vpc_id: &str, cidr: &str, az: &str) -> Result<Subnet, CloudError>;

    // -- security groups --
    fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroup>, CloudError>;
    fn create_security_group(
        &mut self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, CloudError>;
    fn authorize_ingress(&mut self, group_id: &str, rule: &RuleRequest) -> Result<(), CloudError>;
    fn authorize_egress(&mut self, group_id: &str, rule: &RuleRequest) -> Result<(), CloudError>;

    // -- load balancers --
    fn list_certificates(&self) -> Result<Vec<Certificate>, CloudError>;
    fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, CloudError>;
    fn create_load_balancer(&mut self, request: &BalancerRequest) -> Result<(), CloudError>;
    fn configure_health_check(&mut self, name: &str, check: &HealthCheck)
        -> Result<(), CloudError>;
    fn create_listeners(&mut self, name: &str, listeners: &[Listener]) -> Result<(), CloudError>;
    fn register_instances(&mut self, name: &str, instance_ids: &[String])
        -> Result<(), CloudError>;

    // -- images and instances --
    /// Images whose name matches a glob pattern such as `prod-web-*`.
    fn list_images(&self, name_pattern: &str) -> Result<Vec<Image>, CloudError>;
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, CloudError>;
    fn describe_instance(&self, instance_id: &str) -> Result<Instance, CloudError>;
    fn run_instance(&mut self, request: &InstanceRequest) -> Result<Instance, CloudError>;
    fn create_tags(&mut self, instance_id: &str, tags: &Tags) -> Result<(), CloudError>;
    fn disable_source_dest_check(&mut self, instance_id: &str) -> Result<(), CloudError>;

    // -- autoscaling --
    fn list_launch_templates(&self) -> Result<Vec<LaunchTemplate>, CloudError>;
    fn create_launch_template(&mut self, template: &LaunchTemplate) -> Result<(), CloudError>;
    fn list_autoscale_groups(&self) -> Result<Vec<AutoscaleGroup>, CloudError>;
    fn create_autoscale_group(&mut self, group: &AutoscaleGroup) -> Result<(), CloudError>;
    fn update_autoscale_group(
        &mut self,
        name: &str,
        update: &AutoscaleUpdate,
    ) -> Result<(), CloudError>;

    // -- routing --
    fn list_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>, CloudError>;
    fn create_route_table(&mut self, vpc_id: &str) -> Result<RouteTable, CloudError>;
    fn associate_route_table(&mut self, table_id: &str, subnet_id: &str)
        -> Result<(), CloudError>;
    fn create_route(
        &mut self,
        table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> Result<(), CloudError>;

    // -- dns --
    fn zone_exists(&self, zone: &str) -> Result<bool, CloudError>;
    fn find_cname(&self, zone: &str, name: &str) -> Result<Option<DnsRecord>, CloudError>;
    fn create_cname(&mut self, zone: &str, name: &str, target: &str) -> Result<(), CloudError>;
    fn update_cname(&mut self, zone: &str, name: &str, target: &str) -> Result<(), CloudError>;
}
