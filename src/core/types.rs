//! Declared topology types, run report, and provenance events.
//!
//! The declared document keeps the key names of the cloudcaster JSON format
//! (`vpc.pubsubnets`, `apps[].aminame`, `nat.svctag`, ...). All types derive
//! Serialize/Deserialize so documents roundtrip through JSON and YAML.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Top-level document
// ============================================================================

/// Root document: the desired state of one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyDoc {
    /// Provider, region, environment and naming metadata
    pub aws: Settings,

    /// Network layout
    pub vpc: NetworkSpec,

    /// Load balancers (the first one is the default for tiers without `elb`)
    #[serde(default)]
    pub elbs: Vec<BalancerSpec>,

    /// Application tiers
    #[serde(default)]
    pub apps: Vec<AppSpec>,

    /// NAT/VPN singleton
    pub nat: NatSpec,
}

/// Top-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Provider label used in DNS names (e.g. "aws")
    pub provider: String,

    /// Region (e.g. "us-east-1")
    pub region: String,

    /// Continent label used in DNS names (e.g. "us")
    pub continent: String,

    /// Environment name (e.g. "prod")
    pub env: String,

    /// Hosted DNS zone
    pub zone: String,

    /// Tag key carrying the service name
    pub svctag: String,

    /// Tag key carrying the environment name
    pub envtag: String,

    /// Private/VPN address range reachable through the NAT singleton
    #[serde(default)]
    pub privnet: Option<String>,
}

/// Network layout. Subnets pair positionally with `azs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub cidr: String,
    pub azs: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub pubsubnets: Vec<String>,
}

/// A declared (protocol, port range) pair, sourced from context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub from: i32,
    pub to: i32,
    pub prot: String,
}

/// Allow traffic from another declared security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowSpec {
    pub group: String,
    pub from: i32,
    pub to: i32,
    pub prot: String,
}

// ============================================================================
// Load balancers
// ============================================================================

/// Declared load balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerSpec {
    /// Logical name; the live balancer is `{name}-{env}`
    pub name: String,

    /// Security group name
    pub group: String,

    /// Ports open to the world on the balancer group
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Listener set
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,

    /// Health check interval in seconds
    pub interval: u32,

    /// Healthy threshold
    pub healthy: u32,

    /// Unhealthy threshold
    pub unhealthy: u32,

    /// Health check target (e.g. "HTTP:8080/health")
    pub target: String,

    /// Internal scheme instead of internet-facing
    #[serde(default)]
    pub internal: bool,

    /// Groups allowed into the balancer group (applied after tier groups exist)
    #[serde(default)]
    pub allow: Vec<AllowSpec>,
}

/// Declared listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub from: u16,
    pub to: u16,
    pub from_prot: String,
    pub to_prot: String,
    /// Server certificate name
    #[serde(default)]
    pub cert: Option<String>,
}

// ============================================================================
// Application tiers
// ============================================================================

/// Declared application tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,

    /// Security group name
    pub group: String,

    /// Service tag value
    pub svctag: String,

    /// Explicit image ID (wins over `aminame`)
    #[serde(default)]
    pub ami: Option<String>,

    /// Logical image name resolved through the naming fallback chain
    #[serde(default)]
    pub aminame: Option<String>,

    #[serde(rename = "type")]
    pub instance_type: String,

    pub keypair: String,

    /// Instance profile
    pub role: String,

    /// Fixed instance count (or desired capacity for autoscale tiers)
    #[serde(default)]
    pub count: Option<u32>,

    /// Place in public subnets with a public address
    #[serde(default)]
    pub public: bool,

    /// Balancer name (defaults to the first declared balancer)
    #[serde(default)]
    pub elb: Option<String>,

    /// Intra-tier ports
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Peer groups allowed in
    #[serde(default)]
    pub allow: Vec<AllowSpec>,

    /// Ports open to the world
    #[serde(default)]
    pub pubports: Vec<PortSpec>,

    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub autoscale: Option<AutoscaleSpec>,
}

/// Autoscale bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleSpec {
    pub min: u32,
    pub max: u32,
}

/// How a tier's instances are managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierMode<'a> {
    Fixed { count: u32 },
    Autoscale(&'a AutoscaleSpec),
}

impl AppSpec {
    /// With `autoscale`, `count` is the desired capacity rather than a fixed size.
    pub fn mode(&self) -> TierMode<'_> {
        match &self.autoscale {
            Some(spec) => TierMode::Autoscale(spec),
            None => TierMode::Fixed {
                count: self.count.unwrap_or(0),
            },
        }
    }
}

// ============================================================================
// NAT singleton
// ============================================================================

/// Declared NAT/VPN singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatSpec {
    pub name: String,
    pub group: String,
    pub svctag: String,
    pub ami: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub keypair: String,
    pub role: String,

    /// Extra ports open to the world
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Boot wait policy
    #[serde(default)]
    pub wait: WaitSpec,
}

/// Bounded wait for the NAT instance to leave `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    600
}

impl WaitSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Naming
// ============================================================================

impl TopologyDoc {
    /// Find a declared balancer by logical name.
    pub fn balancer(&self, name: &str) -> Option<&BalancerSpec> {
        self.elbs.iter().find(|b| b.name == name)
    }

    /// The balancer a tier registers with: its own `elb`, else the first declared.
    pub fn balancer_for(&self, app: &AppSpec) -> Option<&BalancerSpec> {
        match &app.elb {
            Some(name) => self.balancer(name),
            None => self.elbs.first(),
        }
    }

    /// `{name}-{env}`, the live name of balancers, groups and instance tags.
    pub fn env_name(&self, name: &str) -> String {
        format!("{}-{}", name, self.aws.env)
    }

    /// `{name}-{env}.{provider}-{region}.{continent}.{zone}`
    pub fn dns_name(&self, name: &str) -> String {
        format!(
            "{}-{}.{}-{}.{}.{}",
            name,
            self.aws.env,
            self.aws.provider,
            self.aws.region,
            self.aws.continent,
            self.aws.zone
        )
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Per-stage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: String,
    pub created: u32,
    pub updated: u32,
}

/// Outcome of a convergence run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: String,
    pub created: u32,
    pub updated: u32,
    pub warnings: Vec<String>,
    pub skipped: Vec<String>,
    pub stages: Vec<StageSummary>,
    pub duration: Duration,
}

impl RunReport {
    /// True when the run changed nothing and found nothing to warn about.
    pub fn is_quiescent(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.warnings.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} warning(s), {} tier(s) skipped",
            self.created,
            self.updated,
            self.warnings.len(),
            self.skipped.len()
        )
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        run_id: String,
        document: String,
        digest: String,
        /// Where the control-plane credentials came from
        credentials: String,
        version: String,
    },
    StageStarted {
        stage: String,
    },
    ResourceCreated {
        kind: String,
        id: String,
    },
    ResourceUpdated {
        kind: String,
        id: String,
        detail: String,
    },
    DriftWarning {
        kind: String,
        id: String,
        detail: String,
    },
    TierSkipped {
        tier: String,
        reason: String,
    },
    StageCompleted {
        stage: String,
        created: u32,
        updated: u32,
    },
    RunCompleted {
        run_id: String,
        created: u32,
        updated: u32,
        warnings: u32,
        seconds: f64,
    },
    RunFailed {
        run_id: String,
        stage: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parses_with_defaults() {
        let doc = fixtures::scenario();
        assert_eq!(doc.vpc.azs.len(), 2);
        assert_eq!(doc.elbs[0].listeners[0].to, 8080);
        assert!(!doc.elbs[0].internal);
        assert!(doc.elbs[0].ports.is_empty());
        assert!(!doc.apps[0].public);
        assert!(doc.aws.privnet.is_none());
        assert_eq!(doc.nat.wait.interval_secs, 1);
    }

    #[test]
    fn test_wait_defaults() {
        let w = WaitSpec::default();
        assert_eq!(w.interval(), Duration::from_secs(5));
        assert_eq!(w.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_tier_mode() {
        let mut app = fixtures::scenario().apps.remove(0);
        assert_eq!(app.mode(), TierMode::Fixed { count: 1 });
        app.autoscale = Some(AutoscaleSpec { min: 1, max: 4 });
        assert!(matches!(app.mode(), TierMode::Autoscale(s) if s.max == 4));
    }

    #[test]
    fn test_default_balancer_is_first() {
        let doc = fixtures::scenario();
        let app = &doc.apps[0];
        assert_eq!(doc.balancer_for(app).unwrap().name, "web");
        let mut pinned = app.clone();
        pinned.elb = Some("ghost".into());
        assert!(doc.balancer_for(&pinned).is_none());
    }

    #[test]
    fn test_names() {
        let doc = fixtures::scenario();
        assert_eq!(doc.env_name("web"), "web-prod");
        assert_eq!(doc.dns_name("nat"), "nat-prod.aws-us-east-1.us.example.com");
    }

    #[test]
    fn test_report_display_and_quiescence() {
        let mut r = RunReport::default();
        assert!(r.is_quiescent());
        r.created = 2;
        r.warnings.push("w".into());
        assert!(!r.is_quiescent());
        assert_eq!(
            r.to_string(),
            "2 created, 0 updated, 1 warning(s), 0 tier(s) skipped"
        );
    }

    #[test]
    fn test_provenance_event_serde() {
        let event = ProvenanceEvent::ResourceCreated {
            kind: "subnet".into(),
            id: "subnet-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"resource_created\""));
        assert!(json.contains("\"id\":\"subnet-1\""));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let doc = fixtures::scenario();
        let yaml = serde_yaml_ng::to_string(&doc).unwrap();
        let back: TopologyDoc = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.apps[0].instance_type, "m3.medium");
        assert_eq!(back.vpc.pubsubnets, vec!["10.0.2.0/24"]);
    }

    #[test]
    fn test_missing_required_key_is_error() {
        let broken = fixtures::SCENARIO_JSON.replace("\"zone\": \"example.com\",", "");
        assert!(serde_json::from_str::<TopologyDoc>(&broken).is_err());
    }
}
