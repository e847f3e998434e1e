//! Keeps the cluster-scoped OAuth client of a workspace in sync.
//!
//! OAuth clients cannot be owned by a namespaced routing instance, so they are
//! found by the workspace's label and removed explicitly when the instance is
//! finalized.

use crate::{
    k8s::OAuthClient,
    metrics::ControllerMetrics,
    store::ObjectStore,
    sync::{self, Synced},
    Error,
};

impl Synced for OAuthClient {
    const KIND: &'static str = "OAuthClient";

    fn spec_matches(&self, cluster: &Self) -> bool {
        self.secret == cluster.secret
            && self.redirect_uris == cluster.redirect_uris
            && self.grant_method == cluster.grant_method
    }

    fn apply_spec(&self, cluster: &mut Self) {
        cluster.secret = self.secret.clone();
        cluster.redirect_uris = self.redirect_uris.clone();
        cluster.grant_method = self.grant_method.clone();
    }
}

/// Syncs the workspace's OAuth client, removing any client it no longer
/// needs. Returns `true` if nothing had to be written.
pub(crate) async fn sync<S: ObjectStore>(
    store: &S,
    metrics: &ControllerMetrics,
    workspace_id: &str,
    desired: Option<OAuthClient>,
) -> Result<bool, Error> {
    let synced = sync::sync_all(
        store,
        metrics,
        None,
        workspace_id,
        desired.into_iter().collect(),
    )
    .await?;
    Ok(synced.is_some())
}

pub(crate) async fn delete_all<S: ObjectStore>(
    store: &S,
    metrics: &ControllerMetrics,
    workspace_id: &str,
) -> Result<(), Error> {
    sync::delete_all::<OAuthClient, _>(store, metrics, None, workspace_id).await
}
