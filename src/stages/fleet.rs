//! Fixed-count tiers.
//!
//! Running instances are counted by tag (service, environment, network,
//! running). Any deficit is launched round-robin across the tier's
//! subnets, starting after the instances already running.

use crate::cloud::{Instance, InstanceFilter, InstanceRequest, InstanceState, Placement, Tags};
use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};
use crate::core::types::{AppSpec, TierMode, TopologyDoc};

/// Subnets for `max(count - running, 0)` new instances, starting at index `running`.
pub fn placement_plan(count: usize, running: usize, subnets: &[String]) -> Vec<&str> {
    if subnets.is_empty() {
        return Vec::new();
    }
    let deficit = count.saturating_sub(running);
    (0..deficit)
        .map(|i| subnets[(running + i) % subnets.len()].as_str())
        .collect()
}

/// Tags every tier instance carries.
pub fn tier_tags(doc: &TopologyDoc, app: &AppSpec) -> Tags {
    let mut tags = Tags::new();
    tags.insert("Name".to_string(), doc.env_name(&app.name));
    tags.insert(doc.aws.svctag.clone(), app.svctag.clone());
    tags.insert(doc.aws.envtag.clone(), doc.aws.env.clone());
    if let Some(ref cluster) = app.cluster {
        tags.insert("cluster".to_string(), cluster.clone());
    }
    tags
}

fn tier_filter(doc: &TopologyDoc, vpc_id: &str, svctag: &str, state: Option<InstanceState>) -> InstanceFilter {
    InstanceFilter {
        vpc_id: vpc_id.to_string(),
        tags: vec![
            (doc.aws.svctag.clone(), svctag.to_string()),
            (doc.aws.envtag.clone(), doc.aws.env.clone()),
        ],
        state,
    }
}

fn report_drift(ctx: &mut ConvergeContext<'_>, app: &AppSpec, image_id: &str, running: &[Instance]) {
    for inst in running {
        log::debug!("INSTANCE {} {} {} {}", app.name, inst.id, inst.image_id, inst.subnet_id);
        if inst.image_id != image_id {
            ctx.warn(
                "instance",
                &inst.id,
                &format!("runs image {} but {} declares {}", inst.image_id, app.name, image_id),
            );
        }
        if inst.instance_type != app.instance_type {
            ctx.warn(
                "instance",
                &inst.id,
                &format!(
                    "is {} but {} declares {}",
                    inst.instance_type, app.name, app.instance_type
                ),
            );
        }
    }
}

fn converge_tier(ctx: &mut ConvergeContext<'_>, app: &AppSpec, count: u32) -> Result<()> {
    let Some(image_id) = ctx.images.get(&app.name).cloned() else {
        return Ok(());
    };
    let doc = ctx.doc;
    let net = ctx.network()?.clone();
    let filter = tier_filter(doc, &net.vpc_id, &app.svctag, Some(InstanceState::Running));
    let running = ctx
        .plane
        .list_instances(&filter)
        .map_err(|e| CastError::cloud(format!("list instances of {}", app.name), e))?;
    report_drift(ctx, app, &image_id, &running);

    let subnets = if app.public {
        &net.public_subnets
    } else {
        &net.private_subnets
    };
    if subnets.is_empty() {
        return Err(CastError::Prerequisite(format!(
            "tier {} has no {} subnets",
            app.name,
            if app.public { "public" } else { "private" }
        )));
    }
    let plan = placement_plan(count as usize, running.len(), subnets);
    if plan.is_empty() {
        return Ok(());
    }

    let security_group = ctx.groups.id_of(&app.group)?;
    let tags = tier_tags(doc, app);
    let mut launched = Vec::with_capacity(plan.len());
    for subnet_id in plan {
        let placement = if app.public {
            Placement::PublicInterface {
                subnet_id: subnet_id.to_string(),
                security_group: security_group.clone(),
            }
        } else {
            Placement::Private {
                subnet_id: subnet_id.to_string(),
                security_group: security_group.clone(),
            }
        };
        log::info!("Creating {} instance of {} in {}", app.instance_type, app.name, subnet_id);
        let inst = ctx
            .plane
            .run_instance(&InstanceRequest {
                image_id: image_id.clone(),
                instance_type: app.instance_type.clone(),
                key_name: app.keypair.clone(),
                instance_profile: app.role.clone(),
                placement,
            })
            .map_err(|e| CastError::cloud(format!("launch instance of {}", app.name), e))?;
        ctx.plane
            .create_tags(&inst.id, &tags)
            .map_err(|e| CastError::cloud(format!("tag instance {}", inst.id), e))?;
        launched.push(inst.id);
    }

    let visible = ctx
        .plane
        .list_instances(&tier_filter(doc, &net.vpc_id, &app.svctag, None))
        .map_err(|e| CastError::cloud(format!("list instances of {}", app.name), e))?;
    for id in &launched {
        if !visible.iter().any(|i| &i.id == id) {
            return Err(CastError::Unconfirmed {
                kind: "instance",
                key: id.clone(),
            });
        }
        ctx.created("instance", id);
    }

    if let Some(elb) = doc.balancer_for(app) {
        let name = doc.env_name(&elb.name);
        log::info!("Registering {} instance(s) with {}", launched.len(), name);
        ctx.plane
            .register_instances(&name, &launched)
            .map_err(|e| CastError::cloud(format!("register instances with {}", name), e))?;
        ctx.updated(
            "load balancer",
            &name,
            &format!("registered {}", launched.join(",")),
        );
    }
    Ok(())
}

/// Fleet stage: every fixed-count tier with a resolved image.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let doc = ctx.doc;
    for app in &doc.apps {
        if let TierMode::Fixed { count } = app.mode() {
            converge_tier(ctx, app, count)?;
        }
    }
    Ok(())
}
