use crate::{builder, Endpoints, RoutingMeta, RoutingObjects, SolverError};
use workspace_routing_core::naming;
use workspace_routing_k8s_api::{
    labels, PodAdditions, ResourceExt, SecretVolumeSource, Volume, VolumeMount,
};

const SERVING_CERT_MOUNT_ROOT: &str = "/var/serving-cert";

/// Exposes endpoints inside the cluster only, at their Services' addresses.
///
/// With TLS, each Service is issued a serving certificate by the OpenShift
/// service CA, which is mounted into the workspace pod, and endpoint URLs use
/// secure schemes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSolver {
    tls: bool,
}

impl ClusterSolver {
    pub fn new(tls: bool) -> Self {
        Self { tls }
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn spec_objects(
        &self,
        endpoints: &Endpoints,
        meta: &RoutingMeta,
    ) -> Result<RoutingObjects, SolverError> {
        let all = endpoints.values().flatten();

        let mut objects = RoutingObjects::default();
        objects
            .services
            .extend(builder::shared_service(all.clone(), meta));
        objects
            .services
            .extend(builder::discoverable_services(all, meta));

        if self.tls && !objects.services.is_empty() {
            let mut additions = PodAdditions::default();
            for service in &mut objects.services {
                let name = service.name_any();
                service
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(labels::SERVING_CERT_SECRET.to_string(), name.clone());

                let volume = naming::serving_cert_volume_name(&name);
                additions.volumes.push(Volume {
                    name: volume.clone(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(name.clone()),
                        default_mode: Some(0o644),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                additions.volume_mounts.push(VolumeMount {
                    name: volume,
                    read_only: Some(true),
                    mount_path: format!("{}/{}", SERVING_CERT_MOUNT_ROOT, name),
                    ..Default::default()
                });
            }
            objects.pod_additions = Some(additions);
        }

        Ok(objects)
    }
}
