//! Find an existing resource by its identity key.
//!
//! Pure lookups over a freshly listed collection. Image and launch-template
//! revisions are resolved elsewhere (`stages::ami`, `stages::autoscale`).

use crate::cloud::{
    AutoscaleGroup, Certificate, LaunchTemplate, LoadBalancer, SecurityGroup, Subnet, Vpc,
};

/// A discovered resource with a single attribute that identifies it.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Vpc {
    fn key(&self) -> &str {
        &self.cidr
    }
}

impl Keyed for Subnet {
    fn key(&self) -> &str {
        &self.cidr
    }
}

impl Keyed for SecurityGroup {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for LoadBalancer {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for Certificate {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for LaunchTemplate {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Keyed for AutoscaleGroup {
    fn key(&self) -> &str {
        &self.name
    }
}

/// First resource whose key equals `key`.
pub fn locate<'a, T: Keyed>(items: &'a [T], key: &str) -> Option<&'a T> {
    items.iter().find(|item| item.key() == key)
}

/// First resource satisfying an arbitrary predicate.
pub fn locate_by<'a, T>(items: &'a [T], pred: impl Fn(&T) -> bool) -> Option<&'a T> {
    items.iter().find(|item| pred(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(id: &str, cidr: &str) -> Subnet {
        Subnet {
            id: id.into(),
            vpc_id: "vpc-1".into(),
            cidr: cidr.into(),
            az: "us-east-1a".into(),
        }
    }

    #[test]
    fn test_locate_by_cidr() {
        let subnets = vec![subnet("s-1", "10.0.1.0/24"), subnet("s-2", "10.0.2.0/24")];
        assert_eq!(locate(&subnets, "10.0.2.0/24").unwrap().id, "s-2");
        assert!(locate(&subnets, "10.0.3.0/24").is_none());
    }

    #[test]
    fn test_locate_first_of_duplicates() {
        let subnets = vec![subnet("s-1", "10.0.1.0/24"), subnet("s-2", "10.0.1.0/24")];
        assert_eq!(locate(&subnets, "10.0.1.0/24").unwrap().id, "s-1");
    }

    #[test]
    fn test_locate_by_predicate() {
        let subnets = vec![subnet("s-1", "10.0.1.0/24")];
        assert!(locate_by(&subnets, |s| s.az.ends_with('a')).is_some());
        assert!(locate_by(&subnets, |s| s.az.ends_with('b')).is_none());
    }

    #[test]
    fn test_empty_collection() {
        let none: Vec<Vpc> = vec![];
        assert!(locate(&none, "10.0.0.0/16").is_none());
    }
}
