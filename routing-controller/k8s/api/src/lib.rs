#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod openshift;
pub mod routing;

pub use self::{
    openshift::{OAuthClient, Route},
    routing::{
        EndpointSpec, ExposedEndpoint, Exposure, PodAdditions, RoutingInstance,
        RoutingInstanceSpec, RoutingInstanceStatus, RoutingPhase,
    },
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            Container, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
        },
        networking::v1::Ingress,
    },
    apimachinery::pkg::{apis::meta::v1::OwnerReference, util::intstr::IntOrString},
};
pub use kube::api::{ObjectMeta, Resource, ResourceExt};
