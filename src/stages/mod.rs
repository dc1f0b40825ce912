//! Convergence stages, one module per resource family.

pub mod ami;
pub mod autoscale;
pub mod balancer;
pub mod dns;
pub mod fleet;
pub mod nat;
pub mod network;
pub mod revision;
pub mod routing;
pub mod security;

use crate::core::context::ConvergeContext;
use crate::core::error::Result;
use crate::core::resolver::Stage;

/// Run one stage against the context.
pub fn run(ctx: &mut ConvergeContext<'_>, stage: Stage) -> Result<()> {
    match stage {
        Stage::Network => network::converge(ctx),
        Stage::SecurityGroups => security::converge_groups(ctx),
        Stage::BalancerRules => security::converge_balancer_rules(ctx),
        Stage::TierRules => security::converge_tier_rules(ctx),
        Stage::BalancerAllowRules => security::converge_balancer_allow_rules(ctx),
        Stage::LoadBalancers => balancer::converge(ctx),
        Stage::Images => ami::converge(ctx),
        Stage::Fleets => fleet::converge(ctx),
        Stage::Autoscale => autoscale::converge(ctx),
        Stage::Nat => nat::converge(ctx),
        Stage::Routes => routing::converge(ctx),
        Stage::Dns => dns::converge(ctx),
    }
}
