//! Authenticator loop (§4.2): seals bound-but-unauthenticated claims with
//! freshly minted downstream credentials and bootstrap state, stamping
//! `auth=done` as the last, idempotent commit step.

use crate::{config::CliArgs, credentials};
use common::{
    error::Error,
    kubeconfig,
    labels::{AUTH_DONE, LABEL_AUTH},
    resource_store::{conditions_stable, dynamic_api, ResourceStore},
};
use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::Condition,
    ByteString,
};
use kube::{
    api::{Api, ObjectMeta, PostParams},
    Client, Resource, ResourceExt,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STABILITY_HOLD: Duration = Duration::from_secs(120);
const STABILITY_BUDGET: Duration = Duration::from_secs(30 * 60);
const CERTIFICATE_POLL_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_ADMIN_CSR_NAME: &str = "cluster-gateway-system-admin";
const USER_CSR_NAME: &str = "cluster-gateway-user-admin";
const SYSTEM_ADMIN_CN: &str = "system:admin";
const USER_CN: &str = "admin";

pub(crate) const IDENTITY_PROVIDER_NAMESPACE: &str = "openshift-authentication";
const BOOTSTRAP_CONFIGMAP_NAME: &str = "cluster-gateway-bootstrap";
pub(crate) const HTPASSWD_SECRET_NAME: &str = "cluster-gateway-htpasswd";

/// Derives the downstream's user-facing kubeconfig secret name from its admin
/// reference, per §3: suffix rewrite `-admin-kubeconfig` → `-user-kubeconfig`.
pub(crate) fn user_kubeconfig_secret_name(admin_secret_name: &str) -> String {
    if let Some(prefix) = admin_secret_name.strip_suffix("-admin-kubeconfig") {
        format!("{}-user-kubeconfig", prefix)
    } else {
        format!("{}-user-kubeconfig", admin_secret_name)
    }
}

pub struct Authenticator {
    store: ResourceStore,
    pool_name: String,
    tick_period: Duration,
}

impl Authenticator {
    pub fn new(store: ResourceStore, args: &CliArgs) -> Self {
        Self {
            store,
            pool_name: args.pool_name.clone(),
            tick_period: args.reconcile_period.into(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticks = common::resource_store::watch_ticks(
            self.store.claims(),
            kube::api::ListParams::default(),
            self.tick_period,
            cancel.clone(),
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("authenticator loop cancelled");
                    return;
                }
                tick = ticks.recv() => {
                    if tick.is_none() {
                        tracing::info!("authenticator watch closed, exiting");
                        return;
                    }
                    if let Err(error) = self.tick(&cancel).await {
                        tracing::warn!(?error, "authenticator tick failed, will retry next cycle");
                    }
                }
            }
        }
    }

    async fn tick(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let claims = self.store.list_pool_claims(&self.pool_name).await?;

        for claim in claims {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let name = claim.name();
            let already_sealed = claim
                .meta()
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_AUTH))
                .map(|v| v == AUTH_DONE)
                .unwrap_or(false);
            if already_sealed {
                continue;
            }
            let Some(cluster_namespace) = claim.status.as_ref().and_then(|s| s.namespace.clone()) else {
                continue;
            };

            if let Err(error) = self.authenticate_claim(&name, &cluster_namespace, cancel).await {
                tracing::warn!(claim = %name, ?error, "authenticator step failed for claim, will retry");
            }
        }
        Ok(())
    }

    /// Runs the full §4.2 algorithm for one bound claim. Every step is
    /// idempotent by construction (CSR submission deletes any stale request
    /// first; secret/configmap seeding is create-if-missing), so a crash
    /// partway through is safe to simply retry from the next tick.
    async fn authenticate_claim(&self, claim_name: &str, cluster_namespace: &str, cancel: &CancellationToken) -> Result<(), Error> {
        let deployment = self.store.get_deployment(cluster_namespace).await?;
        let metadata = deployment.spec.cluster_metadata.as_ref().ok_or_else(|| Error::Unbound {
            kind: "ClusterDeployment".to_string(),
            name: cluster_namespace.to_string(),
        })?;
        let admin_secret_ref = metadata.admin_kubeconfig_secret_ref.as_ref().ok_or_else(|| Error::MissingKey {
            name: cluster_namespace.to_string(),
            key: "clusterMetadata.adminKubeconfigSecretRef".to_string(),
        })?;

        let admin_secret = self.store.secrets(cluster_namespace).get(&admin_secret_ref.name).await.map_err(|source| Error::Kube {
            resource: format!("Secret/{}", admin_secret_ref.name),
            source,
        })?;
        let admin_secret_data = decode_secret_data(&admin_secret)?;
        let admin_yaml = kubeconfig::read_kubeconfig(&admin_secret_data)?;
        let (downstream, api_server_url) = credentials::client_from_kubeconfig(&admin_yaml).await?;

        self.wait_for_stability(&downstream, cancel).await?;

        let (host, port) = split_host_port(&api_server_url)?;

        let system_admin_key = credentials::generate_csr(SYSTEM_ADMIN_CN)?;
        credentials::submit_csr(&downstream, SYSTEM_ADMIN_CSR_NAME, &system_admin_key.csr_pem).await?;
        let system_admin_cert = credentials::poll_for_certificate(&downstream, SYSTEM_ADMIN_CSR_NAME, CERTIFICATE_POLL_TIMEOUT).await?;
        let ca_der = credentials::extract_ca_der(&host, port)?;
        let admin_kubeconfig = credentials::assemble_kubeconfig(&api_server_url, &ca_der, &system_admin_cert, &system_admin_key.key, SYSTEM_ADMIN_CN)?;

        commit_kubeconfig(&self.store, cluster_namespace, &admin_secret_ref.name, &admin_kubeconfig).await?;

        let user_key = credentials::generate_csr(USER_CN)?;
        credentials::submit_csr(&downstream, USER_CSR_NAME, &user_key.csr_pem).await?;
        let user_cert = credentials::poll_for_certificate(&downstream, USER_CSR_NAME, CERTIFICATE_POLL_TIMEOUT).await?;
        let user_kubeconfig = credentials::assemble_kubeconfig(&api_server_url, &ca_der, &user_cert, &user_key.key, USER_CN)?;

        let user_secret_name = user_kubeconfig_secret_name(&admin_secret_ref.name);
        commit_kubeconfig(&self.store, cluster_namespace, &user_secret_name, &user_kubeconfig).await?;

        let (system_admin_client, _) = credentials::client_from_kubeconfig(&admin_kubeconfig).await?;
        seed_bootstrap_objects(&system_admin_client).await?;

        self.store
            .patch_claim_labels(claim_name, |labels| {
                labels.insert(LABEL_AUTH.to_string(), AUTH_DONE.to_string());
            })
            .await?;
        tracing::info!(claim = claim_name, "authenticator sealed claim");
        Ok(())
    }

    /// Enumerates `ClusterOperator` objects on the downstream cluster and
    /// waits for a continuous 120 s window of full stability, within a 30
    /// minute total budget. Any non-stable reading (including a transient
    /// enumeration error) resets the hold.
    async fn wait_for_stability(&self, downstream: &Client, cancel: &CancellationToken) -> Result<(), Error> {
        let api = dynamic_api(downstream.clone(), "config.openshift.io", "v1", "ClusterOperator", None);
        let deadline = tokio::time::Instant::now() + STABILITY_BUDGET;
        let mut stable_since: Option<tokio::time::Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::External {
                    context: "stability gate".to_string(),
                    detail: "cancelled".to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::External {
                    context: "stability gate".to_string(),
                    detail: "exceeded 30 minute budget".to_string(),
                });
            }

            let stable_now = match api.list(&Default::default()).await {
                Ok(list) => list.items.iter().all(|operator| {
                    let conditions: Vec<Condition> = operator
                        .data
                        .get("status")
                        .and_then(|s| s.get("conditions"))
                        .and_then(|c| serde_json::from_value(c.clone()).ok())
                        .unwrap_or_default();
                    conditions_stable(&conditions)
                }),
                Err(error) => {
                    tracing::debug!(?error, "transient error listing cluster operators, resetting stability hold");
                    false
                }
            };

            if stable_now {
                let since = *stable_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= STABILITY_HOLD {
                    return Ok(());
                }
            } else {
                stable_since = None;
            }

            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

/// Splits an API server URL of the form `https://host:port` into its host and
/// port, defaulting to 6443 (the conventional Kubernetes API server port)
/// when no port is present.
fn split_host_port(api_server_url: &str) -> Result<(String, u16), Error> {
    let without_scheme = api_server_url.split("://").last().unwrap_or(api_server_url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| Error::External {
                context: "parsing downstream API server URL".to_string(),
                detail: api_server_url.to_string(),
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), 6443)),
    }
}

/// The Kubernetes API already base64-decodes `Secret.data` for us; this just
/// turns those raw bytes back into the "raw string" shape
/// `common::kubeconfig::decode_transparent` expects, which may itself be a
/// second, intentional layer of base64 (the `kubeconfig`/`raw-kubeconfig`
/// convention this system stores credentials under).
fn decode_secret_data(secret: &Secret) -> Result<BTreeMap<String, String>, Error> {
    let data = secret.data.as_ref().ok_or_else(|| Error::MissingKey {
        name: secret.name(),
        key: "data".to_string(),
    })?;
    Ok(data
        .iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect())
}

async fn commit_kubeconfig(store: &ResourceStore, namespace: &str, secret_name: &str, yaml: &str) -> Result<(), Error> {
    let api: Api<Secret> = store.secrets(namespace);
    let mut data = BTreeMap::new();
    data.insert(kubeconfig::KEY_KUBECONFIG.to_string(), ByteString(yaml.as_bytes().to_vec()));
    data.insert(kubeconfig::KEY_RAW_KUBECONFIG.to_string(), ByteString(yaml.as_bytes().to_vec()));

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    if api.get(secret_name).await.is_ok() {
        api.replace(secret_name, &PostParams::default(), &secret)
            .await
            .map_err(|source| Error::Kube {
                resource: format!("Secret/{}", secret_name),
                source,
            })?;
    } else {
        api.create(&PostParams::default(), &secret)
            .await
            .map_err(|source| Error::Kube {
                resource: format!("Secret/{}", secret_name),
                source,
            })?;
    }
    Ok(())
}

/// Seeds the empty bootstrap configmap and htpasswd secret the identity
/// provider expects, create-if-missing so a retry after a partial failure
/// doesn't clobber state the assignment service may have already written.
async fn seed_bootstrap_objects(client: &Client) -> Result<(), Error> {
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), IDENTITY_PROVIDER_NAMESPACE);
    if configmaps.get(BOOTSTRAP_CONFIGMAP_NAME).await.is_err() {
        let configmap = ConfigMap {
            metadata: ObjectMeta {
                name: Some(BOOTSTRAP_CONFIGMAP_NAME.to_string()),
                namespace: Some(IDENTITY_PROVIDER_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        configmaps
            .create(&PostParams::default(), &configmap)
            .await
            .map_err(|source| Error::Kube {
                resource: format!("ConfigMap/{}", BOOTSTRAP_CONFIGMAP_NAME),
                source,
            })?;
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), IDENTITY_PROVIDER_NAMESPACE);
    if secrets.get(HTPASSWD_SECRET_NAME).await.is_err() {
        let mut data = BTreeMap::new();
        data.insert("htpasswd".to_string(), ByteString(Vec::new()));
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(HTPASSWD_SECRET_NAME.to_string()),
                namespace: Some(IDENTITY_PROVIDER_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };
        secrets
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|source| Error::Kube {
                resource: format!("Secret/{}", HTPASSWD_SECRET_NAME),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derives_user_kubeconfig_name_from_admin_suffix() {
        assert_eq!(
            user_kubeconfig_secret_name("demo-cluster-admin-kubeconfig"),
            "demo-cluster-user-kubeconfig"
        );
    }

    #[test]
    fn falls_back_to_appending_suffix_when_no_admin_marker() {
        assert_eq!(user_kubeconfig_secret_name("demo-cluster"), "demo-cluster-user-kubeconfig");
    }
}

