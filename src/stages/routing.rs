//! Route tables: MAIN for private subnets, PUBLIC for public subnets.
//!
//! Missing associations and routes are created. A route that exists but
//! points somewhere else is reported and left as is.

use super::security::ANYWHERE;
use crate::cloud::{RouteTable, RouteTarget};
use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};

fn list_tables(ctx: &ConvergeContext<'_>, vpc_id: &str) -> Result<Vec<RouteTable>> {
    ctx.plane
        .list_route_tables(vpc_id)
        .map_err(|e| CastError::cloud(format!("list route tables in {}", vpc_id), e))
}

fn table(ctx: &ConvergeContext<'_>, vpc_id: &str, table_id: &str) -> Result<RouteTable> {
    list_tables(ctx, vpc_id)?
        .into_iter()
        .find(|t| t.id == table_id)
        .ok_or_else(|| CastError::Missing {
            kind: "route table",
            name: table_id.to_string(),
        })
}

fn target_label(target: &RouteTarget) -> String {
    match target {
        RouteTarget::Local => "local".to_string(),
        RouteTarget::Gateway(id) | RouteTarget::Instance(id) => id.clone(),
    }
}

/// MAIN by its default-association flag, PUBLIC as any other table.
pub fn split_tables(tables: &[RouteTable]) -> Result<(&RouteTable, Option<&RouteTable>)> {
    let main = tables
        .iter()
        .find(|t| t.is_main())
        .ok_or_else(|| CastError::Prerequisite("network has no MAIN route table".into()))?;
    let public = tables.iter().find(|t| t.id != main.id);
    Ok((main, public))
}

fn ensure_public_table(ctx: &mut ConvergeContext<'_>, vpc_id: &str) -> Result<(String, String)> {
    let tables = list_tables(ctx, vpc_id)?;
    let (main, public) = split_tables(&tables)?;
    let main_id = main.id.clone();
    if let Some(public) = public {
        log::debug!("RTB MAIN {} PUBLIC {}", main_id, public.id);
        return Ok((main_id, public.id.clone()));
    }

    log::info!("Creating public route table in {}", vpc_id);
    let created = ctx
        .plane
        .create_route_table(vpc_id)
        .map_err(|e| CastError::cloud(format!("create route table in {}", vpc_id), e))?;
    let tables = list_tables(ctx, vpc_id)?;
    let public = tables
        .iter()
        .find(|t| t.id == created.id)
        .ok_or_else(|| CastError::Unconfirmed {
            kind: "route table",
            key: created.id.clone(),
        })?;
    ctx.created("route table", &public.id);
    Ok((main_id, public.id.clone()))
}

fn ensure_associations(
    ctx: &mut ConvergeContext<'_>,
    vpc_id: &str,
    table_id: &str,
    subnets: &[String],
) -> Result<()> {
    let current = table(ctx, vpc_id, table_id)?;
    for subnet_id in subnets {
        if current
            .associations
            .iter()
            .any(|a| a.subnet_id.as_deref() == Some(subnet_id.as_str()))
        {
            log::debug!("ASSOC {} {}", table_id, subnet_id);
            continue;
        }
        log::info!("Associating {} with {}", subnet_id, table_id);
        ctx.plane
            .associate_route_table(table_id, subnet_id)
            .map_err(|e| CastError::cloud(format!("associate {} with {}", subnet_id, table_id), e))?;
        let refreshed = table(ctx, vpc_id, table_id)?;
        if !refreshed
            .associations
            .iter()
            .any(|a| a.subnet_id.as_deref() == Some(subnet_id.as_str()))
        {
            return Err(CastError::Unconfirmed {
                kind: "route table association",
                key: format!("{} {}", table_id, subnet_id),
            });
        }
        ctx.created("route table association", &format!("{} {}", table_id, subnet_id));
    }
    Ok(())
}

fn ensure_route(
    ctx: &mut ConvergeContext<'_>,
    vpc_id: &str,
    table_id: &str,
    destination: &str,
    target: RouteTarget,
) -> Result<()> {
    let current = table(ctx, vpc_id, table_id)?;
    if let Some(route) = current.routes.iter().find(|r| r.destination == destination) {
        log::debug!("ROUTE {} {} {}", table_id, destination, target_label(&route.target));
        if route.target != target {
            ctx.warn(
                "route",
                table_id,
                &format!(
                    "{} targets {}, expected {}",
                    destination,
                    target_label(&route.target),
                    target_label(&target)
                ),
            );
        }
        return Ok(());
    }

    log::info!("Creating route {} -> {} in {}", destination, target_label(&target), table_id);
    ctx.plane
        .create_route(table_id, destination, &target)
        .map_err(|e| CastError::cloud(format!("create route {} in {}", destination, table_id), e))?;
    let refreshed = table(ctx, vpc_id, table_id)?;
    if !refreshed.routes.iter().any(|r| r.destination == destination) {
        return Err(CastError::Unconfirmed {
            kind: "route",
            key: format!("{} {}", table_id, destination),
        });
    }
    ctx.created("route", &format!("{} {}", table_id, destination));
    Ok(())
}

/// Routes stage.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let net = ctx.network()?.clone();
    let nat_id = ctx.nat()?.instance_id.clone();

    let (main_id, public_id) = ensure_public_table(ctx, &net.vpc_id)?;
    ensure_associations(ctx, &net.vpc_id, &main_id, &net.private_subnets)?;
    ensure_associations(ctx, &net.vpc_id, &public_id, &net.public_subnets)?;

    ensure_route(ctx, &net.vpc_id, &main_id, ANYWHERE, RouteTarget::Instance(nat_id.clone()))?;
    ensure_route(
        ctx,
        &net.vpc_id,
        &public_id,
        ANYWHERE,
        RouteTarget::Gateway(net.gateway_id.clone()),
    )?;
    if let Some(privnet) = ctx.doc.aws.privnet.clone() {
        ensure_route(ctx, &net.vpc_id, &public_id, &privnet, RouteTarget::Instance(nat_id))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::cloud::{Association, ControlPlane};
    use crate::core::context::{CancelToken, NatHandle};
    use crate::core::types::{fixtures, RunReport, TopologyDoc};
    use crate::stages::network;
    use crate::tripwire::eventlog::EventLog;

    fn run(cloud: &mut MemoryCloud, doc: &TopologyDoc) -> (Result<()>, RunReport) {
        let mut ctx = ConvergeContext::new(cloud, doc, EventLog::disabled(), CancelToken::new());
        network::converge(&mut ctx).unwrap();
        ctx.nat = Some(NatHandle {
            instance_id: "i-nat".into(),
            public_dns: None,
        });
        let outcome = converge(&mut ctx);
        (outcome, ctx.finish().0)
    }

    #[test]
    fn test_split_tables_requires_main() {
        let t = RouteTable {
            id: "rtb-1".into(),
            vpc_id: "vpc-1".into(),
            associations: vec![],
            routes: vec![],
        };
        assert!(matches!(
            split_tables(std::slice::from_ref(&t)),
            Err(CastError::Prerequisite(_))
        ));
        let mut main = t.clone();
        main.id = "rtb-0".into();
        main.associations.push(Association {
            id: "a".into(),
            main: true,
            subnet_id: None,
        });
        let tables = vec![t, main];
        let (m, p) = split_tables(&tables).unwrap();
        assert_eq!(m.id, "rtb-0");
        assert_eq!(p.unwrap().id, "rtb-1");
    }

    #[test]
    fn test_creates_public_table_routes_and_associations() {
        let mut cloud = MemoryCloud::default();
        let doc = fixtures::scenario();
        let (outcome, report) = run(&mut cloud, &doc);
        outcome.unwrap();
        // network (4), public table, two associations, two default routes
        assert_eq!(report.created, 9);

        let vpc_id = cloud.list_vpcs().unwrap()[0].id.clone();
        let tables = cloud.list_route_tables(&vpc_id).unwrap();
        let (main, public) = split_tables(&tables).unwrap();
        let public = public.unwrap();
        assert!(main
            .routes
            .iter()
            .any(|r| r.destination == ANYWHERE && r.target == RouteTarget::Instance("i-nat".into())));
        assert!(public
            .routes
            .iter()
            .any(|r| r.destination == ANYWHERE && matches!(r.target, RouteTarget::Gateway(_))));

        let before = cloud.mutation_count();
        let (outcome, report) = run(&mut cloud, &doc);
        outcome.unwrap();
        assert!(report.is_quiescent());
        assert_eq!(cloud.mutation_count(), before);
    }

    #[test]
    fn test_privnet_route_only_when_declared() {
        let mut cloud = MemoryCloud::default();
        let mut doc = fixtures::scenario();
        doc.aws.privnet = Some("172.16.0.0/12".into());
        let (outcome, report) = run(&mut cloud, &doc);
        outcome.unwrap();
        assert_eq!(report.created, 10);
    }

    #[test]
    fn test_mismatched_target_is_warning_only() {
        let mut cloud = MemoryCloud::default();
        let doc = fixtures::scenario();
        run(&mut cloud, &doc).0.unwrap();
        let vpc_id = cloud.list_vpcs().unwrap()[0].id.clone();
        let main_id = cloud
            .list_route_tables(&vpc_id)
            .unwrap()
            .into_iter()
            .find(|t| t.is_main())
            .unwrap()
            .id;
        cloud.tamper_route(&main_id, ANYWHERE, RouteTarget::Instance("i-other".into()));

        let before = cloud.mutation_count();
        let (outcome, report) = run(&mut cloud, &doc);
        outcome.unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("i-other"));
        assert_eq!(cloud.mutation_count(), before);
    }
}
