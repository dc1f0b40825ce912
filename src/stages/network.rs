//! Network, gateway and subnets.

use crate::cloud::{Subnet, Vpc};
use crate::core::context::{ConvergeContext, NetworkIds};
use crate::core::error::{CastError, Result};
use crate::core::locator::{locate, locate_by};

fn find_vpc(ctx: &ConvergeContext<'_>, cidr: &str) -> Result<Option<Vpc>> {
    let vpcs = ctx
        .plane
        .list_vpcs()
        .map_err(|e| CastError::cloud("list networks", e))?;
    Ok(locate(&vpcs, cidr).cloned())
}

fn list_subnets(ctx: &ConvergeContext<'_>, vpc_id: &str) -> Result<Vec<Subnet>> {
    ctx.plane
        .list_subnets(vpc_id)
        .map_err(|e| CastError::cloud(format!("list subnets in {}", vpc_id), e))
}

fn ensure_vpc(ctx: &mut ConvergeContext<'_>) -> Result<Vpc> {
    let cidr = ctx.doc.vpc.cidr.clone();
    if let Some(vpc) = find_vpc(ctx, &cidr)? {
        log::debug!("VPC {} {}", vpc.id, vpc.cidr);
        if !vpc.dns_hostnames {
            log::info!("Enabling DNS hostnames on {}", vpc.id);
            ctx.plane
                .enable_dns_hostnames(&vpc.id)
                .map_err(|e| CastError::cloud(format!("enable DNS hostnames on {}", vpc.id), e))?;
            ctx.updated("vpc", &vpc.id, "dns hostnames enabled");
        }
        return Ok(vpc);
    }

    log::info!("Creating VPC {}", cidr);
    ctx.plane
        .create_vpc(&cidr)
        .map_err(|e| CastError::cloud(format!("create network {}", cidr), e))?;
    let vpc = find_vpc(ctx, &cidr)?.ok_or_else(|| CastError::Unconfirmed {
        kind: "vpc",
        key: cidr.clone(),
    })?;
    ctx.created("vpc", &vpc.id);
    ctx.plane
        .enable_dns_hostnames(&vpc.id)
        .map_err(|e| CastError::cloud(format!("enable DNS hostnames on {}", vpc.id), e))?;
    Ok(vpc)
}

fn ensure_gateway(ctx: &mut ConvergeContext<'_>, vpc_id: &str) -> Result<String> {
    let gateways = ctx
        .plane
        .list_gateways()
        .map_err(|e| CastError::cloud("list gateways", e))?;
    if let Some(gw) = locate_by(&gateways, |g| g.attachments.iter().any(|a| a == vpc_id)) {
        log::debug!("IGW {} attached to {}", gw.id, vpc_id);
        return Ok(gw.id.clone());
    }

    log::info!("Creating internet gateway for {}", vpc_id);
    let gw = ctx
        .plane
        .create_gateway()
        .map_err(|e| CastError::cloud("create gateway", e))?;
    ctx.plane
        .attach_gateway(&gw.id, vpc_id)
        .map_err(|e| CastError::cloud(format!("attach gateway {} to {}", gw.id, vpc_id), e))?;
    let gateways = ctx
        .plane
        .list_gateways()
        .map_err(|e| CastError::cloud("list gateways", e))?;
    let gw = locate_by(&gateways, |g| g.attachments.iter().any(|a| a == vpc_id))
        .ok_or_else(|| CastError::Unconfirmed {
            kind: "gateway",
            key: vpc_id.to_string(),
        })?;
    ctx.created("gateway", &gw.id);
    Ok(gw.id.clone())
}

/// Create any missing subnet of `cidrs`, pairing each with the AZ at its position.
fn ensure_subnets(ctx: &mut ConvergeContext<'_>, vpc_id: &str, cidrs: &[String]) -> Result<Vec<String>> {
    let azs = ctx.doc.vpc.azs.clone();
    let existing = list_subnets(ctx, vpc_id)?;
    let mut created_any = false;
    for (i, cidr) in cidrs.iter().enumerate() {
        if let Some(s) = locate(&existing, cidr) {
            log::debug!("SUBNET {} {} {}", s.id, s.cidr, s.az);
            continue;
        }
        let az = azs.get(i).ok_or_else(|| {
            CastError::Invalid(vec![format!("subnet {} has no availability zone at index {}", cidr, i)])
        })?;
        log::info!("Creating subnet {} in {}", cidr, az);
        ctx.plane
            .create_subnet(vpc_id, cidr, az)
            .map_err(|e| CastError::cloud(format!("create subnet {}", cidr), e))?;
        created_any = true;
    }

    let listed = if created_any {
        list_subnets(ctx, vpc_id)?
    } else {
        existing.clone()
    };
    let mut ids = Vec::with_capacity(cidrs.len());
    for cidr in cidrs {
        let subnet = locate(&listed, cidr).ok_or_else(|| CastError::Unconfirmed {
            kind: "subnet",
            key: cidr.clone(),
        })?;
        if locate(&existing, cidr).is_none() {
            ctx.created("subnet", &subnet.id);
        }
        ids.push(subnet.id.clone());
    }
    Ok(ids)
}

/// Network stage: records the IDs every later stage needs.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let vpc = ensure_vpc(ctx)?;
    let gateway_id = ensure_gateway(ctx, &vpc.id)?;
    let private = ctx.doc.vpc.subnets.clone();
    let public = ctx.doc.vpc.pubsubnets.clone();
    let private_subnets = ensure_subnets(ctx, &vpc.id, &private)?;
    let public_subnets = ensure_subnets(ctx, &vpc.id, &public)?;

    ctx.network = Some(NetworkIds {
        vpc_id: vpc.id,
        cidr: vpc.cidr,
        gateway_id,
        private_subnets,
        public_subnets,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::cloud::ControlPlane;
    use crate::core::context::CancelToken;
    use crate::core::types::fixtures;
    use crate::tripwire::eventlog::EventLog;

    #[test]
    fn test_creates_network_then_finds_it() {
        let mut cloud = MemoryCloud::default();
        let doc = fixtures::scenario();
        let first = {
            let mut ctx =
                ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
            converge(&mut ctx).unwrap();
            // vpc, gateway, two subnets
            assert_eq!(ctx.report.created, 4);
            ctx.network.clone().unwrap()
        };
        assert_eq!(first.private_subnets.len(), 1);
        assert_eq!(first.public_subnets.len(), 1);
        assert!(cloud.list_vpcs().unwrap()[0].dns_hostnames);

        let before = cloud.mutation_count();
        let mut ctx = ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
        converge(&mut ctx).unwrap();
        assert_eq!(ctx.report.created + ctx.report.updated, 0);
        assert_eq!(ctx.network.clone().unwrap(), first);
        drop(ctx);
        assert_eq!(cloud.mutation_count(), before);
    }

    #[test]
    fn test_subnet_az_by_position() {
        let mut cloud = MemoryCloud::default();
        let mut doc = fixtures::scenario();
        doc.vpc.subnets = vec!["10.0.1.0/24".into(), "10.0.3.0/24".into()];
        let mut ctx = ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
        converge(&mut ctx).unwrap();
        let vpc_id = ctx.network.clone().unwrap().vpc_id;
        drop(ctx);
        let subnets = cloud.list_subnets(&vpc_id).unwrap();
        let second = subnets.iter().find(|s| s.cidr == "10.0.3.0/24").unwrap();
        assert_eq!(second.az, "us-east-1b");
    }

    #[test]
    fn test_existing_gateway_reused() {
        let mut cloud = MemoryCloud::default();
        let vpc = cloud.create_vpc("10.0.0.0/16").unwrap();
        let gw = cloud.create_gateway().unwrap();
        cloud.attach_gateway(&gw.id, &vpc.id).unwrap();
        let doc = fixtures::scenario();
        let mut ctx = ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
        converge(&mut ctx).unwrap();
        assert_eq!(ctx.network.as_ref().unwrap().gateway_id, gw.id);
        // dns hostnames were off on the pre-existing network
        assert_eq!(ctx.report.updated, 1);
    }

    #[test]
    fn test_create_failure_is_fatal() {
        let mut cloud = MemoryCloud::default();
        cloud.reject("create_subnet");
        let doc = fixtures::scenario();
        let mut ctx = ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
        assert!(matches!(converge(&mut ctx), Err(CastError::Cloud { .. })));
        assert!(ctx.network.is_none());
    }
}
