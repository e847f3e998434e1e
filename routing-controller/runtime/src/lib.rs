#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use workspace_routing_core as core;
pub use workspace_routing_k8s_api as k8s;
pub use workspace_routing_k8s_solvers as solvers;

mod args;
mod error;
mod metrics;
mod oauth_client;
mod reconcile;
mod store;
mod sync;

pub use self::{
    args::Args,
    error::Error,
    metrics::{ControllerMetrics, Outcome},
    reconcile::{error_policy, reconcile, Context},
    store::{ClusterObject, ObjectStore},
};
