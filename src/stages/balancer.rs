//! Load balancers, listeners and health checks.
//!
//! Listener reconciliation is additive: declared listeners missing from the
//! live balancer are created in one batch, extra live listeners are left
//! alone.

use crate::cloud::{BalancerRequest, Certificate, HealthCheck, Listener, LoadBalancer, Scheme};
use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};
use crate::core::locator::locate;
use crate::core::types::{BalancerSpec, ListenerSpec};

/// Listener identity: ports plus case-insensitive protocols; certificates are ignored.
pub fn same_listener(a: &Listener, b: &Listener) -> bool {
    a.external_port == b.external_port
        && a.internal_port == b.internal_port
        && a.external_protocol.eq_ignore_ascii_case(&b.external_protocol)
        && a.internal_protocol.eq_ignore_ascii_case(&b.internal_protocol)
}

/// Declared listeners with no counterpart on the live balancer.
pub fn missing_listeners(declared: &[Listener], live: &[Listener]) -> Vec<Listener> {
    declared
        .iter()
        .filter(|d| !live.iter().any(|l| same_listener(d, l)))
        .cloned()
        .collect()
}

fn build_listener(spec: &ListenerSpec, certificates: &[Certificate]) -> Result<Listener> {
    let certificate_arn = match spec.cert.as_deref().filter(|c| !c.is_empty()) {
        Some(name) => Some(
            locate(certificates, name)
                .map(|c| c.arn.clone())
                .ok_or_else(|| CastError::Missing {
                    kind: "certificate",
                    name: name.to_string(),
                })?,
        ),
        None => None,
    };
    Ok(Listener {
        external_port: spec.from,
        internal_port: spec.to,
        external_protocol: spec.from_prot.clone(),
        internal_protocol: spec.to_prot.clone(),
        certificate_arn,
    })
}

pub fn health_check(spec: &BalancerSpec) -> HealthCheck {
    HealthCheck {
        interval: spec.interval,
        healthy_threshold: spec.healthy,
        unhealthy_threshold: spec.unhealthy,
        target: spec.target.clone(),
    }
}

fn find_balancer(ctx: &ConvergeContext<'_>, name: &str) -> Result<Option<LoadBalancer>> {
    let balancers = ctx
        .plane
        .list_load_balancers()
        .map_err(|e| CastError::cloud("list load balancers", e))?;
    Ok(locate(&balancers, name).cloned())
}

/// Configure and re-check the health check. Failures are reported, not fatal.
fn apply_health_check(ctx: &mut ConvergeContext<'_>, name: &str, check: &HealthCheck) -> Result<bool> {
    log::info!("Configuring health check {} on {}", check.target, name);
    if let Err(e) = ctx.plane.configure_health_check(name, check) {
        ctx.warn("load balancer", name, &format!("health check not configured: {}", e));
        return Ok(false);
    }
    let refreshed = find_balancer(ctx, name)?.ok_or_else(|| CastError::Unconfirmed {
        kind: "load balancer",
        key: name.to_string(),
    })?;
    if refreshed.health_check.as_ref() != Some(check) {
        ctx.warn(
            "load balancer",
            name,
            &format!("health check {} not visible after configuring", check.target),
        );
        return Ok(false);
    }
    Ok(true)
}

fn converge_one(
    ctx: &mut ConvergeContext<'_>,
    spec: &BalancerSpec,
    certificates: &[Certificate],
) -> Result<()> {
    let name = ctx.doc.env_name(&spec.name);
    let listeners = spec
        .listeners
        .iter()
        .map(|l| build_listener(l, certificates))
        .collect::<Result<Vec<_>>>()?;
    let check = health_check(spec);

    let Some(live) = find_balancer(ctx, &name)? else {
        let scheme = if spec.internal {
            Scheme::Internal
        } else {
            Scheme::InternetFacing
        };
        let request = BalancerRequest {
            name: name.clone(),
            scheme,
            listeners,
            subnets: ctx.network()?.public_subnets.clone(),
            security_group: ctx.groups.id_of(&spec.group)?,
        };
        log::info!("Creating load balancer {}", name);
        ctx.plane
            .create_load_balancer(&request)
            .map_err(|e| CastError::cloud(format!("create load balancer {}", name), e))?;
        let created = find_balancer(ctx, &name)?.ok_or_else(|| CastError::Unconfirmed {
            kind: "load balancer",
            key: name.clone(),
        })?;
        ctx.created("load balancer", &created.name);
        apply_health_check(ctx, &name, &check)?;
        return Ok(());
    };

    log::debug!("ELB {} {}", live.name, live.dns_name);
    let missing = missing_listeners(&listeners, &live.listeners);
    if !missing.is_empty() {
        log::info!("Adding {} listener(s) to {}", missing.len(), name);
        ctx.plane
            .create_listeners(&name, &missing)
            .map_err(|e| CastError::cloud(format!("create listeners on {}", name), e))?;
        let refreshed = find_balancer(ctx, &name)?.ok_or_else(|| CastError::Unconfirmed {
            kind: "load balancer",
            key: name.clone(),
        })?;
        if !missing_listeners(&listeners, &refreshed.listeners).is_empty() {
            return Err(CastError::Unconfirmed {
                kind: "listener",
                key: name,
            });
        }
        ctx.updated(
            "load balancer",
            &name,
            &format!("added {} listener(s)", missing.len()),
        );
    }
    if live.health_check.as_ref() != Some(&check) && apply_health_check(ctx, &name, &check)? {
        ctx.updated("load balancer", &name, "health check");
    }
    Ok(())
}

/// Load-balancer stage.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    if ctx.doc.elbs.is_empty() {
        return Ok(());
    }
    let certificates = ctx
        .plane
        .list_certificates()
        .map_err(|e| CastError::cloud("list certificates", e))?;
    let doc = ctx.doc;
    for spec in &doc.elbs {
        converge_one(ctx, spec, &certificates)?;
    }
    Ok(())
}
