//! The shared data-plane adapter: a thin wrapper around a [`kube::Client`]
//! exposing exactly the typed and unstructured resource handles the three
//! control-plane loops need, plus the one non-trivial piece of shared logic —
//! label-based optimistic updates and the watch-then-relist loop helper
//! described in DESIGN.md §9.
//!
//! Nothing here decides *when* to mutate a claim; callers (the autoscaler, the
//! authenticator, the assignment service) own that policy. This module only
//! guarantees that a mutation either lands cleanly or reports a conflict.

use crate::{
    crd::{ClusterClaim, ClusterDeployment},
    error::Error,
};
use k8s_openapi::{
    api::{
        certificates::v1::CertificateSigningRequest,
        core::v1::{ConfigMap, Secret},
    },
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{
    api::{Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Label-patch author used on every optimistic update this system performs.
const FIELD_MANAGER: &str = "cluster-gateway";

/// Resolved (unstructured) API handle for a Kubernetes kind this system has no
/// compiled-in type for, e.g. the downstream cluster's `ClusterOperator` or
/// `Authentication` objects (`config.openshift.io` / `operator.openshift.io`).
pub fn dynamic_api(client: Client, group: &str, version: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let resource = kube::api::ApiResource::from_gvk(&gvk);
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &resource),
        None => Api::all_with(client, &resource),
    }
}

/// Handle onto the hub cluster's pool resources.
#[derive(Clone)]
pub struct ResourceStore {
    client: Client,
    namespace: String,
}

impl ResourceStore {
    pub fn new(client: Client, namespace: String) -> Self {
        Self { client, namespace }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn claims(&self) -> Api<ClusterClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn deployments(&self) -> Api<ClusterDeployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn configmaps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn signing_requests(&self) -> Api<CertificateSigningRequest> {
        Api::all(self.client.clone())
    }

    /// All claims that name the given pool, regardless of their label state.
    pub async fn list_pool_claims(&self, pool_name: &str) -> Result<Vec<ClusterClaim>, Error> {
        let lp = ListParams::default();
        let all = self.claims().list(&lp).await.map_err(|source| Error::Kube {
            resource: "ClusterClaim".to_string(),
            source,
        })?;
        Ok(all
            .items
            .into_iter()
            .filter(|c| c.spec.cluster_pool_name == pool_name)
            .collect())
    }

    pub async fn get_claim(&self, name: &str) -> Result<ClusterClaim, Error> {
        self.claims().get(name).await.map_err(|source| match &source {
            kube::Error::Api(e) if e.code == 404 => Error::NotFound {
                kind: "ClusterClaim".to_string(),
                name: name.to_string(),
            },
            _ => Error::Kube {
                resource: format!("ClusterClaim/{}", name),
                source,
            },
        })
    }

    pub async fn get_deployment(&self, name: &str) -> Result<ClusterDeployment, Error> {
        self.deployments().get(name).await.map_err(|source| match &source {
            kube::Error::Api(e) if e.code == 404 => Error::NotFound {
                kind: "ClusterDeployment".to_string(),
                name: name.to_string(),
            },
            _ => Error::Kube {
                resource: format!("ClusterDeployment/{}", name),
                source,
            },
        })
    }

    /// Creates a new claim against the pool if one by this name doesn't
    /// already exist. Returns `Ok(false)` (no error) if it was already present
    /// — claim creation is idempotent by name, which is what lets the
    /// autoscaler retry its reconcile step freely.
    pub async fn create_claim_if_absent(
        &self,
        name: &str,
        pool_name: &str,
        lifetime: Option<String>,
    ) -> Result<bool, Error> {
        if self.claims().get(name).await.is_ok() {
            return Ok(false);
        }

        let claim = ClusterClaim::new(
            name,
            crate::crd::ClusterClaimSpec {
                cluster_pool_name: pool_name.to_string(),
                lifetime,
            },
        );

        match self.claims().create(&PostParams::default(), &claim).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(source) => Err(Error::Kube {
                resource: format!("ClusterClaim/{}", name),
                source,
            }),
        }
    }

    /// Applies `mutate` to a freshly fetched copy of the claim's labels and
    /// replaces the object, which Kubernetes accepts only if the fetched
    /// `resourceVersion` is still current. A stale read surfaces as
    /// [`Error::Conflict`] — the caller's job, not this adapter's, to decide
    /// whether to retry.
    pub async fn patch_claim_labels<F>(&self, name: &str, mutate: F) -> Result<ClusterClaim, Error>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut claim = self.get_claim(name).await?;
        let mut labels = claim.labels().clone();
        mutate(&mut labels);
        *claim.labels_mut() = labels;

        self.claims()
            .replace(name, &PostParams::default(), &claim)
            .await
            .map_err(|source| match &source {
                kube::Error::Api(e) if e.code == 409 => Error::Conflict {
                    resource: format!("ClusterClaim/{}", name),
                },
                _ => Error::Kube {
                    resource: format!("ClusterClaim/{}", name),
                    source,
                },
            })
    }

    /// Applies `mutate` to a freshly fetched copy of the whole claim (labels
    /// and spec together) and replaces it in one optimistic update — used by
    /// the assignment service's fresh-selection step, which must set `phone`,
    /// `fp`, and `spec.lifetime` atomically so no reader ever observes one
    /// without the other.
    pub async fn bind_claim<F>(&self, name: &str, mutate: F) -> Result<ClusterClaim, Error>
    where
        F: FnOnce(&mut ClusterClaim),
    {
        let mut claim = self.get_claim(name).await?;
        mutate(&mut claim);

        self.claims()
            .replace(name, &PostParams::default(), &claim)
            .await
            .map_err(|source| match &source {
                kube::Error::Api(e) if e.code == 409 => Error::Conflict {
                    resource: format!("ClusterClaim/{}", name),
                },
                _ => Error::Kube {
                    resource: format!("ClusterClaim/{}", name),
                    source,
                },
            })
    }

    /// Merge-patches the claim's status (used to set `status.namespace` is the
    /// orchestrator's job; we only ever read it — kept here for symmetry with
    /// `patch_claim_labels` and potential future use by admin tooling).
    pub async fn patch_claim_spec_lifetime(&self, name: &str, lifetime: String) -> Result<ClusterClaim, Error> {
        let patch = serde_json::json!({ "spec": { "lifetime": lifetime } });
        self.claims()
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|source| Error::Kube {
                resource: format!("ClusterClaim/{}", name),
                source,
            })
    }
}

/// Spawns a task that watches `K`, forwarding one tick through the returned
/// channel for every list/watch observation and for every `fallback_timeout`
/// of quiescence. Combines an initial list with a subsequent bounded watch,
/// re-listing on watch expiry or error, per the "watch + poll hybrid" design
/// note: this one helper is shared by the autoscaler and authenticator loops
/// instead of being duplicated inline in each. The receiver closes once
/// `cancel` fires or the watch stream ends for good.
pub fn watch_ticks<K>(
    api: Api<K>,
    lp: ListParams,
    fallback_timeout: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::sync::mpsc::Receiver<()>
where
    K: Clone + std::fmt::Debug + for<'de> serde::Deserialize<'de> + Resource + Send + Sync + 'static,
    K::DynamicType: Default,
{
    use kube_runtime::watcher;
    use tokio_stream::StreamExt as _;

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        let mut stream = watcher(api, lp).boxed();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("watch loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(fallback_timeout) => {
                    if tx.send(()).await.is_err() {
                        return;
                    }
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(_event)) => {
                            if tx.send(()).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(error)) => {
                            tracing::warn!(?error, "watch stream error, relying on fallback timer");
                        }
                        None => {
                            tracing::warn!("watch stream ended, relying on fallback timer");
                            return;
                        }
                    }
                }
            }
        }
    });
    rx
}

/// True iff every condition in `conditions` reports the stability triple
/// (`Available=True`, `Progressing=False`, `Degraded=False`) the authenticator's
/// stability gate requires.
pub fn conditions_stable(conditions: &[Condition]) -> bool {
    let status_is = |kind: &str, want: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == kind)
            .map(|c| c.status == want)
            .unwrap_or(false)
    };
    status_is("Available", "True") && status_is("Progressing", "False") && status_is("Degraded", "False")
}
