//! Autoscale tiers: an immutable launch template plus a mutable group.
//!
//! The template is never edited. When the tier's image, instance type or
//! public-IP policy no longer match the current template, a new dated
//! revision is created and the group is pointed at it. The group itself is
//! a stable singleton named `{tier}-{env}`; at most one update call is
//! issued per run, carrying every changed field.

use super::revision::{is_revision_of, revision_name};
use crate::cloud::{AutoscaleGroup, AutoscaleTag, AutoscaleUpdate, LaunchTemplate};
use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};
use crate::core::locator::locate;
use crate::core::types::{AppSpec, AutoscaleSpec, TierMode};
use chrono::{DateTime, Duration, Utc};

/// True if `template` still launches what the tier declares.
pub fn template_matches(template: &LaunchTemplate, image_id: &str, app: &AppSpec) -> bool {
    template.image_id == image_id
        && template.instance_type == app.instance_type
        && template.public_ip == app.public
}

/// The revision in use: the group's template if it is one of ours, else the newest.
pub fn current_template<'a>(
    templates: &'a [LaunchTemplate],
    prefix: &str,
    group: Option<&AutoscaleGroup>,
) -> Option<&'a LaunchTemplate> {
    if let Some(t) = group
        .and_then(|g| locate(templates, &g.launch_template))
        .filter(|t| is_revision_of(&t.name, prefix))
    {
        return Some(t);
    }
    templates
        .iter()
        .filter(|t| is_revision_of(&t.name, prefix))
        .max_by(|a, b| a.name.cmp(&b.name))
}

/// A revision name not yet taken; later seconds are tried on collision.
pub fn fresh_revision(prefix: &str, now: DateTime<Utc>, templates: &[LaunchTemplate]) -> String {
    let mut at = now;
    loop {
        let name = revision_name(prefix, at);
        if locate(templates, &name).is_none() {
            return name;
        }
        at += Duration::seconds(1);
    }
}

/// Fields of `live` that differ from the declared bounds.
pub fn group_update(
    live: &AutoscaleGroup,
    template: &str,
    bounds: &AutoscaleSpec,
    desired: Option<u32>,
) -> AutoscaleUpdate {
    AutoscaleUpdate {
        launch_template: (live.launch_template != template).then(|| template.to_string()),
        min_size: (live.min_size != bounds.min).then_some(bounds.min),
        max_size: (live.max_size != bounds.max).then_some(bounds.max),
        desired_capacity: match (live.desired_capacity, desired) {
            (Some(current), Some(wanted)) if current != wanted => Some(wanted),
            _ => None,
        },
    }
}

fn describe(update: &AutoscaleUpdate) -> String {
    let mut parts = Vec::new();
    if let Some(ref t) = update.launch_template {
        parts.push(format!("template {}", t));
    }
    if let Some(min) = update.min_size {
        parts.push(format!("min {}", min));
    }
    if let Some(max) = update.max_size {
        parts.push(format!("max {}", max));
    }
    if let Some(desired) = update.desired_capacity {
        parts.push(format!("desired {}", desired));
    }
    parts.join(", ")
}

fn list_templates(ctx: &ConvergeContext<'_>) -> Result<Vec<LaunchTemplate>> {
    ctx.plane
        .list_launch_templates()
        .map_err(|e| CastError::cloud("list launch templates", e))
}

fn find_group(ctx: &ConvergeContext<'_>, name: &str) -> Result<Option<AutoscaleGroup>> {
    let groups = ctx
        .plane
        .list_autoscale_groups()
        .map_err(|e| CastError::cloud("list autoscale groups", e))?;
    Ok(locate(&groups, name).cloned())
}

fn ensure_template(
    ctx: &mut ConvergeContext<'_>,
    app: &AppSpec,
    image_id: &str,
    group: Option<&AutoscaleGroup>,
) -> Result<String> {
    let prefix = ctx.doc.env_name(&app.name);
    let templates = list_templates(ctx)?;
    if let Some(t) = current_template(&templates, &prefix, group) {
        if template_matches(t, image_id, app) {
            log::debug!("LT {} {} {}", t.name, t.image_id, t.instance_type);
            return Ok(t.name.clone());
        }
        log::info!("Launch template {} is stale for {}", t.name, app.name);
    }

    let template = LaunchTemplate {
        name: fresh_revision(&prefix, Utc::now(), &templates),
        image_id: image_id.to_string(),
        instance_type: app.instance_type.clone(),
        key_name: app.keypair.clone(),
        instance_profile: app.role.clone(),
        security_groups: vec![ctx.groups.id_of(&app.group)?],
        public_ip: app.public,
    };
    log::info!("Creating launch template {}", template.name);
    ctx.plane
        .create_launch_template(&template)
        .map_err(|e| CastError::cloud(format!("create launch template {}", template.name), e))?;
    let templates = list_templates(ctx)?;
    if locate(&templates, &template.name).is_none() {
        return Err(CastError::Unconfirmed {
            kind: "launch template",
            key: template.name,
        });
    }
    ctx.created("launch template", &template.name);
    Ok(template.name)
}

fn group_tags(ctx: &ConvergeContext<'_>, app: &AppSpec) -> Vec<AutoscaleTag> {
    let doc = ctx.doc;
    let mut pairs = vec![
        ("Name".to_string(), doc.env_name(&app.name)),
        (doc.aws.envtag.clone(), doc.aws.env.clone()),
        (doc.aws.svctag.clone(), app.svctag.clone()),
    ];
    if let Some(ref cluster) = app.cluster {
        pairs.push(("cluster".to_string(), cluster.clone()));
    }
    pairs
        .into_iter()
        .map(|(key, value)| AutoscaleTag {
            key,
            value,
            propagate_at_launch: true,
        })
        .collect()
}

fn converge_tier(ctx: &mut ConvergeContext<'_>, app: &AppSpec, bounds: &AutoscaleSpec) -> Result<()> {
    let Some(image_id) = ctx.images.get(&app.name).cloned() else {
        return Ok(());
    };
    let doc = ctx.doc;
    let name = doc.env_name(&app.name);
    let live = find_group(ctx, &name)?;
    let template = ensure_template(ctx, app, &image_id, live.as_ref())?;

    let Some(live) = live else {
        let net = ctx.network()?;
        let subnets = if app.public {
            net.public_subnets.clone()
        } else {
            net.private_subnets.clone()
        };
        let group = AutoscaleGroup {
            name: name.clone(),
            launch_template: template,
            min_size: bounds.min,
            max_size: bounds.max,
            desired_capacity: app.count,
            availability_zones: doc.vpc.azs.clone(),
            load_balancers: doc
                .balancer_for(app)
                .map(|b| vec![doc.env_name(&b.name)])
                .unwrap_or_default(),
            subnets,
            tags: group_tags(ctx, app),
        };
        log::info!("Creating autoscale group {}", name);
        ctx.plane
            .create_autoscale_group(&group)
            .map_err(|e| CastError::cloud(format!("create autoscale group {}", name), e))?;
        if find_group(ctx, &name)?.is_none() {
            return Err(CastError::Unconfirmed {
                kind: "autoscale group",
                key: name,
            });
        }
        ctx.created("autoscale group", &name);
        return Ok(());
    };

    log::debug!(
        "ASG {} {} {}..{}",
        live.name,
        live.launch_template,
        live.min_size,
        live.max_size
    );
    let update = group_update(&live, &template, bounds, app.count);
    if update.is_empty() {
        return Ok(());
    }
    let detail = describe(&update);
    log::info!("Updating autoscale group {}: {}", name, detail);
    ctx.plane
        .update_autoscale_group(&name, &update)
        .map_err(|e| CastError::cloud(format!("update autoscale group {}", name), e))?;
    let refreshed = find_group(ctx, &name)?.ok_or_else(|| CastError::Missing {
        kind: "autoscale group",
        name: name.clone(),
    })?;
    if !group_update(&refreshed, &template, bounds, app.count).is_empty() {
        return Err(CastError::Unconfirmed {
            kind: "autoscale group update",
            key: name,
        });
    }
    ctx.updated("autoscale group", &name, &detail);
    Ok(())
}

/// Autoscale stage: every autoscale tier with a resolved image.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let doc = ctx.doc;
    for app in &doc.apps {
        if let TierMode::Autoscale(bounds) = app.mode() {
            converge_tier(ctx, app, bounds)?;
        }
    }
    Ok(())
}
