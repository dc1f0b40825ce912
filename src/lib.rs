//! Cloudcast: converge a declared cloud topology against a control plane.
//!
//! One document describes an environment (network, security groups, load
//! balancers, application tiers, a NAT singleton, routes and DNS). A run
//! walks a fixed stage DAG, creating what is missing and reporting drift it
//! does not correct. Re-running against a converged account changes nothing.

pub mod cli;
pub mod cloud;
pub mod core;
pub mod stages;
pub mod tripwire;
