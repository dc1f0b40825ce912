//! Image resolution through an ordered chain of naming conventions.
//!
//! A tier with an explicit `ami` uses it as is. Otherwise its `aminame` is
//! tried as `{env}-{name}`, then `all-{name}`, then `{name}`; the first
//! convention with an acceptable image wins. A tier nothing resolves for is
//! skipped for the rest of the run.

use super::revision::is_revision_of;
use crate::cloud::{ControlPlane, Image};
use crate::core::context::ConvergeContext;
use crate::core::error::{CastError, Result};

/// One naming convention: images named `{prefix}` or `{prefix}-{stamp}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameConvention {
    pub prefix: String,
}

impl NameConvention {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Listing filter for candidates.
    pub fn pattern(&self) -> String {
        format!("{}-*", self.prefix)
    }

    /// Highest-sorting acceptable candidate.
    pub fn select<'a>(&self, candidates: &'a [Image]) -> Option<&'a Image> {
        let mut sorted: Vec<&Image> = candidates.iter().collect();
        sorted.sort_by(|a, b| b.name.cmp(&a.name));
        sorted
            .into_iter()
            .find(|img| is_revision_of(&img.name, &self.prefix))
    }

    pub fn resolve(&self, plane: &dyn ControlPlane) -> Result<Option<Image>> {
        let pattern = self.pattern();
        let candidates = plane
            .list_images(&pattern)
            .map_err(|e| CastError::cloud(format!("list images {}", pattern), e))?;
        Ok(self.select(&candidates).cloned())
    }
}

/// Conventions tried in order for a logical image name.
#[derive(Debug, Clone)]
pub struct MatcherChain {
    conventions: Vec<NameConvention>,
}

impl MatcherChain {
    pub fn for_image(env: &str, name: &str) -> Self {
        Self {
            conventions: vec![
                NameConvention::new(format!("{}-{}", env, name)),
                NameConvention::new(format!("all-{}", name)),
                NameConvention::new(name),
            ],
        }
    }

    pub fn conventions(&self) -> &[NameConvention] {
        &self.conventions
    }

    /// First convention yielding an image; later ones are never listed.
    pub fn resolve(&self, plane: &dyn ControlPlane) -> Result<Option<Image>> {
        for convention in &self.conventions {
            if let Some(image) = convention.resolve(plane)? {
                log::debug!("AMI {} {} via {}", image.id, image.name, convention.pattern());
                return Ok(Some(image));
            }
        }
        Ok(None)
    }
}

/// Images stage: fills `ctx.images` for every tier that resolves.
pub fn converge(ctx: &mut ConvergeContext<'_>) -> Result<()> {
    let doc = ctx.doc;
    for app in &doc.apps {
        if let Some(ref ami) = app.ami {
            ctx.images.insert(app.name.clone(), ami.clone());
            continue;
        }
        let Some(ref logical) = app.aminame else {
            ctx.skip(&app.name, "neither ami nor aminame declared");
            continue;
        };
        match MatcherChain::for_image(&doc.aws.env, logical).resolve(&*ctx.plane)? {
            Some(image) => {
                ctx.images.insert(app.name.clone(), image.id);
            }
            None => ctx.skip(&app.name, &format!("no image found for {}", logical)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryCloud;
    use crate::core::context::CancelToken;
    use crate::core::types::fixtures;
    use crate::tripwire::eventlog::EventLog;

    fn image(id: &str, name: &str) -> Image {
        Image {
            id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }

    #[test]
    fn test_select_newest_revision() {
        let c = NameConvention::new("prod-web");
        let images = vec![
            image("ami-1", "prod-web-20240101000000"),
            image("ami-3", "prod-web-20240301000000"),
            image("ami-2", "prod-web-20240201000000"),
        ];
        assert_eq!(c.select(&images).unwrap().id, "ami-3");
    }

    #[test]
    fn test_select_skips_foreign_suffixes() {
        let c = NameConvention::new("prod-web");
        let images = vec![
            image("ami-x", "prod-web-worker-20250101000000"),
            image("ami-y", "prod-web-latest"),
            image("ami-1", "prod-web-20240101000000"),
        ];
        assert_eq!(c.select(&images).unwrap().id, "ami-1");
    }

    #[test]
    fn test_select_accepts_exact_prefix() {
        let c = NameConvention::new("web");
        assert_eq!(c.select(&[image("ami-1", "web")]).unwrap().id, "ami-1");
        assert!(c.select(&[]).is_none());
    }

    #[test]
    fn test_fallback_to_third_convention() {
        let mut cloud = MemoryCloud::default();
        cloud.add_image("ami-bare", "web-20240101000000");
        let chain = MatcherChain::for_image("prod", "web");
        assert_eq!(chain.resolve(&cloud).unwrap().unwrap().id, "ami-bare");
    }

    #[test]
    fn test_higher_convention_wins_over_later_sorting_name() {
        let mut cloud = MemoryCloud::default();
        cloud.add_image("ami-env", "prod-web-20200101000000");
        // sorts higher, but belongs to the `all-` convention
        cloud.add_image("ami-all", "all-web-20990101000000");
        cloud.add_image("ami-bare", "web-20990101000000");
        let chain = MatcherChain::for_image("prod", "web");
        assert_eq!(chain.resolve(&cloud).unwrap().unwrap().id, "ami-env");

        let chain = MatcherChain::for_image("dev", "web");
        assert_eq!(chain.resolve(&cloud).unwrap().unwrap().id, "ami-all");
    }

    #[test]
    fn test_chain_order() {
        let chain = MatcherChain::for_image("prod", "web");
        let patterns: Vec<_> = chain.conventions().iter().map(|c| c.pattern()).collect();
        assert_eq!(patterns, vec!["prod-web-*", "all-web-*", "web-*"]);
    }

    #[test]
    fn test_unresolved_tier_is_skipped() {
        let mut cloud = MemoryCloud::default();
        cloud.add_image("ami-db", "all-db-20240101000000");
        let mut doc = fixtures::scenario();
        let mut web = doc.apps[0].clone();
        web.name = "web".into();
        web.ami = None;
        web.aminame = Some("web".into());
        let mut db = web.clone();
        db.name = "db".into();
        db.aminame = Some("db".into());
        doc.apps.push(web);
        doc.apps.push(db);

        let mut ctx = ConvergeContext::new(&mut cloud, &doc, EventLog::disabled(), CancelToken::new());
        converge(&mut ctx).unwrap();
        assert_eq!(ctx.images.get("app").map(String::as_str), Some("ami-app1"));
        assert_eq!(ctx.images.get("db").map(String::as_str), Some("ami-db"));
        assert!(!ctx.images.contains_key("web"));
        assert_eq!(ctx.report.skipped, vec!["web"]);
    }
}
