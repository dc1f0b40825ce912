//! Run-scoped convergence context.
//!
//! One `ConvergeContext` is threaded through every stage. It owns the
//! discovered-state snapshot that stages share (network IDs, security
//! groups, resolved images, the NAT handle) and records progress into the
//! run report and the provenance log.

use super::error::{CastError, Result};
use super::locator::locate;
use super::resolver::Stage;
use super::types::{ProvenanceEvent, RunReport, StageSummary, TopologyDoc};
use crate::cloud::{ControlPlane, SecurityGroup};
use crate::tripwire::eventlog::EventLog;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag checked by blocking waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// IDs produced by the network stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkIds {
    pub vpc_id: String,
    pub cidr: String,
    pub gateway_id: String,
    /// Private subnet IDs in declared order
    pub private_subnets: Vec<String>,
    /// Public subnet IDs in declared order
    pub public_subnets: Vec<String>,
}

/// The security groups of one network as last listed.
///
/// Never trusted across a mutation: call [`refresh`](Self::refresh) after
/// anything that could have changed a group.
#[derive(Debug, Clone, Default)]
pub struct GroupSnapshot {
    vpc_id: String,
    groups: Vec<SecurityGroup>,
}

impl GroupSnapshot {
    pub fn new(vpc_id: &str) -> Self {
        Self {
            vpc_id: vpc_id.to_string(),
            groups: Vec::new(),
        }
    }

    /// Discard the cached groups and list them again.
    pub fn refresh(&mut self, plane: &dyn ControlPlane) -> Result<()> {
        self.groups = plane
            .list_security_groups(&self.vpc_id)
            .map_err(|e| CastError::cloud(format!("list security groups in {}", self.vpc_id), e))?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&SecurityGroup> {
        locate(&self.groups, name)
    }

    pub fn by_id(&self, id: &str) -> Option<&SecurityGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// ID of a named group, or `Missing`.
    pub fn id_of(&self, name: &str) -> Result<String> {
        self.find(name)
            .map(|g| g.id.clone())
            .ok_or_else(|| CastError::Missing {
                kind: "security group",
                name: name.to_string(),
            })
    }

    pub fn groups(&self) -> &[SecurityGroup] {
        &self.groups
    }
}

/// The canonical NAT instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatHandle {
    pub instance_id: String,
    pub public_dns: Option<String>,
}

/// State shared by every stage of one run.
pub struct ConvergeContext<'a> {
    pub plane: &'a mut dyn ControlPlane,
    pub doc: &'a TopologyDoc,
    pub network: Option<NetworkIds>,
    pub groups: GroupSnapshot,
    /// Tier name → resolved image ID (tiers absent here were skipped)
    pub images: IndexMap<String, String>,
    pub nat: Option<NatHandle>,
    pub report: RunReport,
    pub cancel: CancelToken,
    events: EventLog,
    completed: Vec<Stage>,
    current: StageSummary,
}

impl<'a> ConvergeContext<'a> {
    pub fn new(
        plane: &'a mut dyn ControlPlane,
        doc: &'a TopologyDoc,
        events: EventLog,
        cancel: CancelToken,
    ) -> Self {
        Self {
            plane,
            doc,
            network: None,
            groups: GroupSnapshot::default(),
            images: IndexMap::new(),
            nat: None,
            report: RunReport::default(),
            cancel,
            events,
            completed: Vec::new(),
            current: StageSummary::default(),
        }
    }

    // -- stage outputs --

    pub fn network(&self) -> Result<&NetworkIds> {
        self.network
            .as_ref()
            .ok_or_else(|| CastError::StageOrder("network IDs requested before the network stage".into()))
    }

    pub fn nat(&self) -> Result<&NatHandle> {
        self.nat
            .as_ref()
            .ok_or_else(|| CastError::StageOrder("NAT instance requested before the NAT stage".into()))
    }

    pub fn refresh_groups(&mut self) -> Result<()> {
        self.groups.refresh(&*self.plane)
    }

    // -- stage bookkeeping --

    /// Enter a stage; every dependency must already have completed.
    pub fn begin_stage(&mut self, stage: Stage) -> Result<()> {
        if let Some(dep) = stage
            .depends_on()
            .iter()
            .find(|d| !self.completed.contains(d))
        {
            return Err(CastError::StageOrder(format!(
                "{} started before {} completed",
                stage, dep
            )));
        }
        log::debug!("Stage {}", stage);
        self.current = StageSummary {
            stage: stage.name().to_string(),
            created: 0,
            updated: 0,
        };
        self.events.record(ProvenanceEvent::StageStarted {
            stage: stage.name().to_string(),
        });
        Ok(())
    }

    pub fn end_stage(&mut self, stage: Stage) {
        self.completed.push(stage);
        let summary = std::mem::take(&mut self.current);
        log::debug!(
            "Stage {} done: {} created, {} updated",
            stage,
            summary.created,
            summary.updated
        );
        self.events.record(ProvenanceEvent::StageCompleted {
            stage: summary.stage.clone(),
            created: summary.created,
            updated: summary.updated,
        });
        self.report.stages.push(summary);
    }

    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    /// Name of the stage in progress, for failure events.
    pub fn current_stage(&self) -> &str {
        &self.current.stage
    }

    pub fn record_event(&mut self, event: ProvenanceEvent) {
        self.events.record(event);
    }

    // -- outcomes --

    pub fn created(&mut self, kind: &str, id: &str) {
        log::debug!("Created {} {}", kind, id);
        self.report.created += 1;
        self.current.created += 1;
        self.events.record(ProvenanceEvent::ResourceCreated {
            kind: kind.to_string(),
            id: id.to_string(),
        });
    }

    pub fn updated(&mut self, kind: &str, id: &str, detail: &str) {
        log::debug!("Updated {} {}: {}", kind, id, detail);
        self.report.updated += 1;
        self.current.updated += 1;
        self.events.record(ProvenanceEvent::ResourceUpdated {
            kind: kind.to_string(),
            id: id.to_string(),
            detail: detail.to_string(),
        });
    }

    /// Drift that is reported but not corrected.
    pub fn warn(&mut self, kind: &str, id: &str, detail: &str) {
        log::warn!("{} {}: {}", kind, id, detail);
        self.report.warnings.push(format!("{} {}: {}", kind, id, detail));
        self.events.record(ProvenanceEvent::DriftWarning {
            kind: kind.to_string(),
            id: id.to_string(),
            detail: detail.to_string(),
        });
    }

    pub fn skip(&mut self, tier: &str, reason: &str) {
        log::warn!("Skipping tier {}: {}", tier, reason);
        if !self.report.skipped.iter().any(|t| t == tier) {
            self.report.skipped.push(tier.to_string());
        }
        self.events.record(ProvenanceEvent::TierSkipped {
            tier: tier.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Finish the run, handing back the report and the event sink.
    pub fn finish(self) -> (RunReport, EventLog) {
        (self.report, self.events)
    }
}
