//! The NAT/VPN singleton.
//!
//! One running instance tagged with the NAT service tag per environment.
//! When none is running, one is launched into the first public subnet and
//! the stage waits, bounded, for it to leave `pending`. The first running
//! instance is canonical; extras are reported.

use super::security::converge_nat_group;
use crate::cloud::{
    ControlPlane, Instance, InstanceFilter, InstanceRequest, InstanceState, Placement, Tags,
};
use crate::core::context::{CancelToken, ConvergeContext, NatHandle};
use crate::core::error::{CastError, Result};
use std::time::{Duration, Instant};

/// Poll `instance_id` until it leaves `pending`, giving up after `timeout`.
pub fn wait_until_booted(
    plane: &dyn ControlPlane,
    instance_id: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Instance> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(CastError::Cancelled(format!("NAT instance {}", instance_id)));
        }
        let inst = plane
            .describe_instance(instance_id)
            .map_err(|e| CastError::cloud(format!("describe instance {}", instance_id), e))?;
        if inst.state != InstanceState::Pending {
            return Ok(inst);
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(CastError::Timeout {
                what: format!("NAT instance {}", instance_id),
                waited,
            });
        }
        log::debug!("NAT {} pending, waited {:?}", instance_id, waited);
        std::thread::sleep(interval.min(timeout.saturating_sub(waited)));
    }
}

fn nat_filter(ctx: &ConvergeContext<'_>, vpc_id: &str, state: Option<InstanceState>) -> InstanceFilter {
    let doc = ctx.doc;
    InstanceFilter {
        vpc_id: vpc_id.to_string(),
        tags: vec![
            (doc.aws.svctag.clone(), doc.nat.svctag.clone()),
            (doc.aws.envtag.clone(), doc.aws.env.clone()),
        ],
        state,
    }
}

fn launch(ctx: &mut ConvergeContext<'_>, vpc_id: &str, group_id: &str) -> Result<Instance> {
    let doc = ctx.doc;
    let subnet_id = ctx
        .network()?
        .public_subnets
        .first()
        .cloned()
        .ok_or_else(|| CastError::Prerequisite("NAT needs at least one public subnet".into()))?;

    log::info!("Creating NAT instance {} in {}", doc.nat.ami, subnet_id);
    let inst = ctx
        .plane
        .run_instance(&InstanceRequest {
            image_id: doc.nat.ami.clone(),
            instance_type: doc.nat.instance_type.clone(),
            key_name: doc.nat.keypair.clone(),
            instance_profile: doc.nat.role.clone(),
            placement: Placement::PublicInterface {
                subnet_id,
                security_group: group_id.to_string(),
            },
        })
        .map_err(|e| CastError::cloud("launch NAT instance", e))?;

    let mut tags = Tags::new();
    tags.insert("Name".to_string(), doc.env_name(&doc.nat.name));
    tags.insert(doc.aws.svctag.clone(), doc.nat.svctag.clone());
    tags.insert(doc.aws.envtag.clone(), doc.aws.env.clone());
    ctx.plane
        .create_tags(&inst.id, &tags)
        .map_err(|e| CastError::cloud(format!("tag NAT instance {}", inst.id), e))?;

    let booted = wait_until_booted(
        &*ctx.plane,
        &inst.id,
        doc.nat.wait.interval(),
        doc.nat.wait.timeout(),
        &ctx.cancel,
    )?;
    let visible = ctx
        .plane
        .list_instances(&nat_filter(ctx, vpc_id, None))
        .map_err(|e| CastError::cloud("list NAT instances", e))?;
    if !visible.iter().any(|i| i.id == booted.id) {
        return Err(CastError::Unconfirmed {
            kind: "NAT instance",
            key: booted.id,
        });
    }
    ctx.created("instance", &booted.id);
    Ok(booted)
}

/// NAT stage: group, rules, instance, forwarding.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let vpc_id = ctx.network()?.vpc_id.clone();
    let group_id = converge_nat_group(ctx)?;

    let running = ctx
        .plane
        .list_instances(&nat_filter(ctx, &vpc_id, Some(InstanceState::Running)))
        .map_err(|e| CastError::cloud("list NAT instances", e))?;

    let nat = match running.split_first() {
        Some((first, extras)) => {
            log::debug!("NAT {} {:?}", first.id, first.public_dns);
            for extra in extras {
                ctx.warn(
                    "instance",
                    &extra.id,
                    &format!("additional NAT instance; {} is canonical", first.id),
                );
            }
            first.clone()
        }
        None => launch(ctx, &vpc_id, &group_id)?,
    };

    if nat.image_id != ctx.doc.nat.ami {
        ctx.warn(
            "instance",
            &nat.id,
            &format!("NAT runs image {} but {} is declared", nat.image_id, ctx.doc.nat.ami),
        );
    }

    if nat.source_dest_check {
        log::info!("Disabling source/destination check on {}", nat.id);
        ctx.plane
            .disable_source_dest_check(&nat.id)
            .map_err(|e| CastError::cloud(format!("disable source/dest check on {}", nat.id), e))?;
        ctx.updated("instance", &nat.id, "source/dest check disabled");
    }

    ctx.nat = Some(NatHandle {
        instance_id: nat.id,
        public_dns: nat.public_dns,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::core::types::{fixtures, RunReport, TopologyDoc};
    use crate::stages::network;
    use crate::tripwire::eventlog::EventLog;

    fn run(cloud: &mut MemoryCloud, doc: &TopologyDoc, cancel: CancelToken) -> (Result<()>, RunReport) {
        let mut ctx = ConvergeContext::new(cloud, doc, EventLog::disabled(), cancel);
        network::converge(&mut ctx).unwrap();
        let vpc_id = ctx.network().unwrap().vpc_id.clone();
        ctx.groups = crate::core::context::GroupSnapshot::new(&vpc_id);
        ctx.refresh_groups().unwrap();
        let outcome = converge(&mut ctx);
        if outcome.is_ok() {
            assert!(ctx.nat.is_some());
        }
        (outcome, ctx.finish().0)
    }

    #[test]
    fn test_launches_waits_and_disables_check() {
        let mut cloud = MemoryCloud::default().with_boot_polls(3);
        let doc = fixtures::scenario();
        let (outcome, report) = run(&mut cloud, &doc, CancelToken::new());
        outcome.unwrap();
        // network (4), group + 4 rules, instance
        assert_eq!(report.created, 10);
        assert_eq!(report.updated, 1);

        let before = cloud.mutation_count();
        let (outcome, report) = run(&mut cloud, &doc, CancelToken::new());
        outcome.unwrap();
        assert!(report.is_quiescent());
        assert_eq!(cloud.mutation_count(), before);
    }

    #[test]
    fn test_wait_times_out() {
        let mut cloud = MemoryCloud::default();
        cloud.never_boot();
        let mut doc = fixtures::scenario();
        doc.nat.wait.timeout_secs = 1;
        let (outcome, _) = run(&mut cloud, &doc, CancelToken::new());
        assert!(matches!(outcome, Err(CastError::Timeout { .. })));
    }

    #[test]
    fn test_wait_cancelled() {
        let mut cloud = MemoryCloud::default();
        cloud.never_boot();
        let doc = fixtures::scenario();
        let cancel = CancelToken::new();
        cancel.cancel();
        let (outcome, _) = run(&mut cloud, &doc, cancel);
        assert!(matches!(outcome, Err(CastError::Cancelled(_))));
    }

    #[test]
    fn test_wait_returns_immediately_when_running() {
        let mut cloud = MemoryCloud::default().with_boot_polls(0);
        let vpc = cloud.create_vpc("10.0.0.0/16").unwrap();
        let subnet = cloud.create_subnet(&vpc.id, "10.0.2.0/24", "a").unwrap();
        let inst = cloud
            .run_instance(&InstanceRequest {
                image_id: "ami-nat1".into(),
                instance_type: "t2.micro".into(),
                key_name: "k".into(),
                instance_profile: "r".into(),
                placement: Placement::PublicInterface {
                    subnet_id: subnet.id,
                    security_group: "sg-1".into(),
                },
            })
            .unwrap();
        let got = wait_until_booted(
            &cloud,
            &inst.id,
            Duration::from_secs(60),
            Duration::from_secs(60),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(got.state, InstanceState::Running);
    }

    #[test]
    fn test_source_dest_failure_is_fatal() {
        let mut cloud = MemoryCloud::default().with_boot_polls(0);
        cloud.reject("disable_source_dest_check");
        let doc = fixtures::scenario();
        let (outcome, _) = run(&mut cloud, &doc, CancelToken::new());
        assert!(matches!(outcome, Err(CastError::Cloud { .. })));
    }

    #[test]
    fn test_wrong_image_is_warning() {
        let mut cloud = MemoryCloud::default().with_boot_polls(0);
        let mut doc = fixtures::scenario();
        run(&mut cloud, &doc, CancelToken::new()).0.unwrap();
        doc.nat.ami = "ami-nat2".into();
        let (outcome, report) = run(&mut cloud, &doc, CancelToken::new());
        outcome.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
