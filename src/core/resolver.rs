//! Stage dependency DAG and execution order.
//!
//! Every stage declares the stages whose outputs it reads. The fixed run
//! order is checked against those edges at startup, and the same order is
//! derivable with Kahn's algorithm (ties broken by declaration index).

use super::error::{CastError, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// One step of a convergence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Network,
    SecurityGroups,
    BalancerRules,
    TierRules,
    BalancerAllowRules,
    LoadBalancers,
    Images,
    Fleets,
    Autoscale,
    Nat,
    Routes,
    Dns,
}

impl Stage {
    /// Declaration order, used for tie-breaking.
    pub const ALL: [Stage; 12] = [
        Stage::Network,
        Stage::SecurityGroups,
        Stage::BalancerRules,
        Stage::TierRules,
        Stage::BalancerAllowRules,
        Stage::LoadBalancers,
        Stage::Images,
        Stage::Fleets,
        Stage::Autoscale,
        Stage::Nat,
        Stage::Routes,
        Stage::Dns,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Network => "network",
            Stage::SecurityGroups => "security-groups",
            Stage::BalancerRules => "balancer-rules",
            Stage::TierRules => "tier-rules",
            Stage::BalancerAllowRules => "balancer-allow-rules",
            Stage::LoadBalancers => "load-balancers",
            Stage::Images => "images",
            Stage::Fleets => "fleets",
            Stage::Autoscale => "autoscale",
            Stage::Nat => "nat",
            Stage::Routes => "routes",
            Stage::Dns => "dns",
        }
    }

    /// Stages whose results this stage reads.
    pub fn depends_on(self) -> &'static [Stage] {
        match self {
            Stage::Network => &[],
            Stage::SecurityGroups => &[Stage::Network],
            Stage::BalancerRules => &[Stage::SecurityGroups],
            // ELB→tier rules reference balancer group IDs
            Stage::TierRules => &[Stage::SecurityGroups, Stage::BalancerRules],
            // Allow rules reference tier group IDs
            Stage::BalancerAllowRules => &[Stage::TierRules],
            Stage::LoadBalancers => &[Stage::Network, Stage::SecurityGroups],
            Stage::Images => &[],
            Stage::Fleets => &[Stage::Images, Stage::LoadBalancers, Stage::TierRules],
            Stage::Autoscale => &[Stage::Images, Stage::LoadBalancers],
            Stage::Nat => &[Stage::Network, Stage::SecurityGroups],
            Stage::Routes => &[Stage::Nat, Stage::Network],
            Stage::Dns => &[Stage::Nat, Stage::LoadBalancers],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The order a run executes stages in.
pub const STAGE_ORDER: [Stage; 12] = [
    Stage::Network,
    Stage::SecurityGroups,
    Stage::BalancerRules,
    Stage::TierRules,
    Stage::BalancerAllowRules,
    Stage::LoadBalancers,
    Stage::Images,
    Stage::Fleets,
    Stage::Autoscale,
    Stage::Nat,
    Stage::Routes,
    Stage::Dns,
];

/// Verify that `order` lists every stage exactly once, after all of its dependencies.
pub fn check_stage_order(order: &[Stage]) -> Result<()> {
    let mut seen: BTreeSet<Stage> = BTreeSet::new();
    for &stage in order {
        if !seen.insert(stage) {
            return Err(CastError::StageOrder(format!("{} listed twice", stage)));
        }
        if let Some(dep) = stage.depends_on().iter().find(|d| !seen.contains(d)) {
            return Err(CastError::StageOrder(format!(
                "{} runs before its dependency {}",
                stage, dep
            )));
        }
    }
    if let Some(missing) = Stage::ALL.iter().find(|s| !seen.contains(s)) {
        return Err(CastError::StageOrder(format!("{} never runs", missing)));
    }
    Ok(())
}

/// Derive an execution order for `stages` from their dependency edges.
pub fn build_stage_order(stages: &[Stage]) -> Result<Vec<Stage>> {
    topo_sort(stages, |s| s.depends_on().to_vec()).map_err(|cycle| {
        CastError::StageOrder(format!(
            "dependency cycle detected involving: {}",
            cycle
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

/// Kahn's algorithm; among ready nodes the earliest declared runs first.
///
/// Dependencies outside `nodes` are ignored. On a cycle, returns the
/// nodes that could not be ordered.
fn topo_sort<N, F>(nodes: &[N], deps: F) -> std::result::Result<Vec<N>, Vec<N>>
where
    N: Copy + Eq + std::hash::Hash,
    F: Fn(N) -> Vec<N>,
{
    let index: HashMap<N, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let mut in_degree = vec![0usize; nodes.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, &node) in nodes.iter().enumerate() {
        for dep in deps(node) {
            if let Some(&d) = index.get(&dep) {
                adjacency[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(current) = ready.pop_first() {
        order.push(nodes[current]);
        for &next in &adjacency[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i])
            .collect();
        return Err(stuck);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_order_is_valid() {
        check_stage_order(&STAGE_ORDER).unwrap();
    }

    #[test]
    fn test_derived_order_matches_fixed_order() {
        let derived = build_stage_order(&Stage::ALL).unwrap();
        assert_eq!(derived, STAGE_ORDER.to_vec());
    }

    #[test]
    fn test_dependency_after_dependent_rejected() {
        let mut order = STAGE_ORDER.to_vec();
        // Move balancer allow rules ahead of tier rules
        order.swap(3, 4);
        let err = check_stage_order(&order).unwrap_err();
        assert!(err.to_string().contains("balancer-allow-rules runs before"));
    }

    #[test]
    fn test_duplicate_and_missing_rejected() {
        let mut dup = STAGE_ORDER.to_vec();
        dup.push(Stage::Dns);
        assert!(check_stage_order(&dup).unwrap_err().to_string().contains("twice"));

        let short = &STAGE_ORDER[..11];
        assert!(check_stage_order(short)
            .unwrap_err()
            .to_string()
            .contains("dns never runs"));
    }

    #[test]
    fn test_routes_follow_nat() {
        let pos = |s: Stage| STAGE_ORDER.iter().position(|&x| x == s).unwrap();
        assert!(pos(Stage::Nat) < pos(Stage::Routes));
        assert!(pos(Stage::TierRules) < pos(Stage::BalancerAllowRules));
        assert!(pos(Stage::Images) < pos(Stage::Fleets));
    }

    #[test]
    fn test_topo_sort_ties_by_declaration() {
        let order = topo_sort(&[3u8, 1, 2], |_| vec![]).unwrap();
        assert_eq!(order, vec![3, 1, 2]);
        let order = topo_sort(&[1u8, 2, 3], |n| if n == 1 { vec![3] } else { vec![] }).unwrap();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_topo_sort_cycle() {
        let deps = |n: u8| match n {
            1 => vec![2],
            2 => vec![1],
            _ => vec![],
        };
        let stuck = topo_sort(&[1u8, 2, 3], deps).unwrap_err();
        assert_eq!(stuck, vec![1, 2]);
    }

    #[test]
    fn test_subset_order_ignores_outside_deps() {
        let order = build_stage_order(&[Stage::Dns, Stage::Nat]).unwrap();
        assert_eq!(order, vec![Stage::Nat, Stage::Dns]);
    }
}
