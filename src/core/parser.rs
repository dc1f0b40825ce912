//! Document parsing and validation.
//!
//! The declared document is JSON; a `.yaml`/`.yml` extension selects YAML.
//! Validation collects every problem before reporting, so one run shows
//! the whole list.

use super::error::{CastError, Result};
use super::types::*;
use std::collections::HashSet;
use std::path::Path;

/// True when `path` names a YAML document.
pub fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Read and parse a document from disk. Returns the document and its raw text.
pub fn parse_document_file(path: &Path) -> Result<(TopologyDoc, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CastError::Document(format!("failed to read {}: {}", path.display(), e)))?;
    let doc = parse_document(&content, is_yaml(path))?;
    Ok((doc, content))
}

/// Parse a document from a string.
pub fn parse_document(text: &str, yaml: bool) -> Result<TopologyDoc> {
    if yaml {
        serde_yaml_ng::from_str(text).map_err(|e| CastError::Document(format!("YAML parse error: {}", e)))
    } else {
        serde_json::from_str(text).map_err(|e| CastError::Document(format!("JSON parse error: {}", e)))
    }
}

/// Validate a parsed document. Returns a list of problems (empty = valid).
pub fn validate_document(doc: &TopologyDoc) -> Vec<String> {
    let mut errors = Vec::new();

    if doc.vpc.cidr.trim().is_empty() {
        errors.push("vpc.cidr must not be empty".to_string());
    }
    for (label, list) in [("subnets", &doc.vpc.subnets), ("pubsubnets", &doc.vpc.pubsubnets)] {
        if list.len() > doc.vpc.azs.len() {
            errors.push(format!(
                "vpc.{} has {} entries but only {} availability zone(s) are listed",
                label,
                list.len(),
                doc.vpc.azs.len()
            ));
        }
    }
    if doc.vpc.pubsubnets.is_empty() {
        errors.push("vpc.pubsubnets must list at least one subnet for the NAT instance".to_string());
    }

    // The NAT group is created after tier rules, so it cannot be a source.
    let declared: HashSet<&str> = doc
        .elbs
        .iter()
        .map(|e| e.group.as_str())
        .chain(doc.apps.iter().map(|a| a.group.as_str()))
        .collect();

    for elb in &doc.elbs {
        for allow in &elb.allow {
            if !declared.contains(allow.group.as_str()) {
                errors.push(format!(
                    "elb '{}' allows unknown group '{}'",
                    elb.name, allow.group
                ));
            }
        }
    }

    for app in &doc.apps {
        validate_app(doc, app, &declared, &mut errors);
    }

    if doc.nat.wait.interval_secs == 0 {
        errors.push("nat.wait.interval_secs must be greater than 0".to_string());
    }
    if doc.nat.wait.timeout_secs == 0 {
        errors.push("nat.wait.timeout_secs must be greater than 0".to_string());
    }

    errors
}

fn validate_app(doc: &TopologyDoc, app: &AppSpec, declared: &HashSet<&str>, errors: &mut Vec<String>) {
    match (&app.autoscale, app.count) {
        (None, None) => errors.push(format!(
            "app '{}' declares neither count nor autoscale",
            app.name
        )),
        (Some(bounds), count) => {
            if bounds.min > bounds.max {
                errors.push(format!(
                    "app '{}' autoscale min {} exceeds max {}",
                    app.name, bounds.min, bounds.max
                ));
            } else if let Some(desired) = count {
                if desired < bounds.min || desired > bounds.max {
                    errors.push(format!(
                        "app '{}' count {} is outside autoscale bounds {}..={}",
                        app.name, desired, bounds.min, bounds.max
                    ));
                }
            }
        }
        (None, Some(_)) => {
            let subnets = if app.public {
                &doc.vpc.pubsubnets
            } else {
                &doc.vpc.subnets
            };
            if subnets.is_empty() {
                errors.push(format!(
                    "app '{}' has no {} subnets to place instances in",
                    app.name,
                    if app.public { "public" } else { "private" }
                ));
            }
        }
    }

    if app.ami.is_none() && app.aminame.is_none() {
        errors.push(format!("app '{}' needs ami or aminame", app.name));
    }

    if let Some(ref elb) = app.elb {
        if doc.balancer(elb).is_none() {
            errors.push(format!(
                "app '{}' references unknown elb '{}'",
                app.name, elb
            ));
        }
    }

    for allow in &app.allow {
        if !declared.contains(allow.group.as_str()) {
            errors.push(format!(
                "app '{}' allows unknown group '{}'",
                app.name, allow.group
            ));
        }
    }
}
