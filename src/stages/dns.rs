//! CNAME records for the NAT instance and every load balancer.

use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};
use crate::core::locator::locate;

/// `host` in trailing-dot canonical form.
pub fn canonical(host: &str) -> String {
    if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{}.", host)
    }
}

/// True if two hostnames differ only by a trailing dot.
pub fn same_target(a: &str, b: &str) -> bool {
    canonical(a).eq_ignore_ascii_case(&canonical(b))
}

/// Create or update the CNAME `name` so it points at `target`.
pub fn ensure_cname(ctx: &mut ConvergeContext<'_>, name: &str, target: &str) -> Result<()> {
    let zone = ctx.doc.aws.zone.clone();
    let existing = ctx
        .plane
        .find_cname(&zone, name)
        .map_err(|e| CastError::cloud(format!("look up {} in {}", name, zone), e))?;

    match existing {
        Some(rec) if same_target(&rec.value, target) => {
            log::debug!("DNS {} {}", rec.name, rec.value);
            Ok(())
        }
        Some(rec) => {
            log::info!("Updating {} from {} to {}", name, rec.value, target);
            ctx.plane
                .update_cname(&zone, name, target)
                .map_err(|e| CastError::cloud(format!("update {}", name), e))?;
            confirm(ctx, &zone, name, target)?;
            ctx.updated("dns record", name, &format!("{} -> {}", rec.value, canonical(target)));
            Ok(())
        }
        None => {
            log::info!("Creating {} -> {}", name, target);
            ctx.plane
                .create_cname(&zone, name, target)
                .map_err(|e| CastError::cloud(format!("create {}", name), e))?;
            confirm(ctx, &zone, name, target)?;
            ctx.created("dns record", name);
            Ok(())
        }
    }
}

fn confirm(ctx: &ConvergeContext<'_>, zone: &str, name: &str, target: &str) -> Result<()> {
    let rec = ctx
        .plane
        .find_cname(zone, name)
        .map_err(|e| CastError::cloud(format!("look up {} in {}", name, zone), e))?;
    match rec {
        Some(rec) if same_target(&rec.value, target) => Ok(()),
        _ => Err(CastError::Unconfirmed {
            kind: "dns record",
            key: name.to_string(),
        }),
    }
}

/// DNS stage.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let doc = ctx.doc;
    let zone = &doc.aws.zone;
    let hosted = ctx
        .plane
        .zone_exists(zone)
        .map_err(|e| CastError::cloud(format!("look up zone {}", zone), e))?;
    if !hosted {
        return Err(CastError::Missing {
            kind: "hosted zone",
            name: zone.clone(),
        });
    }

    let nat_name = doc.dns_name(&doc.nat.name);
    match ctx.nat()?.public_dns.clone() {
        Some(host) => ensure_cname(ctx, &nat_name, &host)?,
        None => {
            let id = ctx.nat()?.instance_id.clone();
            ctx.warn("dns record", &nat_name, &format!("NAT instance {} has no public hostname", id));
        }
    }

    if doc.elbs.is_empty() {
        return Ok(());
    }
    let balancers = ctx
        .plane
        .list_load_balancers()
        .map_err(|e| CastError::cloud("list load balancers", e))?;
    for elb in &doc.elbs {
        let live = locate(&balancers, &doc.env_name(&elb.name)).ok_or_else(|| CastError::Missing {
            kind: "load balancer",
            name: doc.env_name(&elb.name),
        })?;
        ensure_cname(ctx, &doc.dns_name(&elb.name), &live.dns_name)?;
    }
    Ok(())
}
