//! Assignment service (§4.3): binds a (phone, password, fingerprint) to one
//! claim from the pool and prepares the downstream cluster for that user.

use crate::{authenticator, config::CliArgs, credentials, error::ApiError, recaptcha::RecaptchaClient};
use chrono::{DateTime, Utc};
use common::{
    crd::ClusterClaim,
    duration::{format_lifetime, parse_lifetime},
    labels::{ClaimLabels, LABEL_AUTH, LABEL_FINGERPRINT, LABEL_PHONE},
    resource_store::ResourceStore,
    sanitize::{sanitize_fingerprint, sanitize_phone},
};
use kube::{Resource, ResourceExt};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::time::Duration;

const AI_CONSOLE_FROM_HOST: &str = "console-openshift-console";
const AI_CONSOLE_TO_HOST: &str = "data-science-gateway";
const AI_CONSOLE_PATH_SUFFIX: &str = "/learning-resources";
const AI_CONSOLE_QUERY_KEY: &str = "keyword";

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    #[serde(rename = "webConsoleURL")]
    pub web_console_url: String,
    #[serde(rename = "aiConsoleURL")]
    pub ai_console_url: String,
    pub kubeconfig: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
}

pub struct AssignmentService {
    store: ResourceStore,
    pool_name: String,
    claim_prefix: String,
    claim_lifetime: Duration,
    recaptcha: Option<RecaptchaClient>,
}

impl AssignmentService {
    pub fn new(store: ResourceStore, args: &CliArgs) -> Result<Self, ApiError> {
        let claim_lifetime = parse_lifetime(&args.claim_lifetime).map_err(ApiError::from)?;
        Ok(Self {
            store,
            pool_name: args.pool_name.clone(),
            claim_prefix: args.claim_prefix.clone(),
            claim_lifetime,
            recaptcha: RecaptchaClient::new(&args.recaptcha_secret),
        })
    }

    /// Runs the full §4.3 algorithm. Returns the caller's console URLs,
    /// kubeconfig, and expiry on success.
    pub async fn claim_cluster(
        &self,
        phone: &str,
        password: &str,
        recaptcha_token: &str,
        fingerprint: &str,
    ) -> Result<ClaimResponse, ApiError> {
        let phone = sanitize_phone(phone);
        let fingerprint = sanitize_fingerprint(fingerprint);

        if phone.is_empty() {
            return Err(ApiError::MissingField { field: "phone".to_string() });
        }
        if password.is_empty() {
            return Err(ApiError::MissingField { field: "password".to_string() });
        }

        if let Some(recaptcha) = &self.recaptcha {
            recaptcha.verify(recaptcha_token).await?;
        }

        let claims = self.store.list_pool_claims(&self.pool_name).await.map_err(ApiError::from)?;
        let sealed: Vec<&ClusterClaim> = claims
            .iter()
            .filter(|c| ClaimLabels::from_map(c.meta().labels.as_ref().unwrap_or(&Default::default())).auth_done)
            .collect();

        let claim = match self.affinity_rebind(&sealed, &phone, &fingerprint).await? {
            Some(claim) => claim,
            None => {
                self.device_conflict_check(&sealed, &phone, &fingerprint)?;
                self.select_fresh(&sealed, &phone, &fingerprint).await?
            }
        };

        self.inject_credentials(&claim, password).await
    }

    /// Step 1: if a sealed claim already carries this phone, reuse it
    /// (idempotent retry before the lifetime elapses), backfilling `fp` if it
    /// was unset or stale. Backfill failures are logged, never fatal.
    async fn affinity_rebind(&self, sealed: &[&ClusterClaim], phone: &str, fingerprint: &str) -> Result<Option<ClusterClaim>, ApiError> {
        let existing = sealed.iter().find(|c| {
            c.meta()
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_PHONE))
                .map(|p| p == phone)
                .unwrap_or(false)
        });

        let Some(existing) = existing else {
            return Ok(None);
        };
        let name = existing.name();

        let needs_backfill = !fingerprint.is_empty()
            && existing
                .meta()
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_FINGERPRINT))
                .map(|fp| fp != fingerprint)
                .unwrap_or(true);

        if needs_backfill {
            let fingerprint = fingerprint.to_string();
            if let Err(error) = self
                .store
                .patch_claim_labels(&name, move |labels| {
                    labels.insert(LABEL_FINGERPRINT.to_string(), fingerprint);
                })
                .await
            {
                tracing::warn!(claim = %name, ?error, "failed to backfill device fingerprint on affinity rebind");
            }
        }

        let claim = self.store.get_claim(&name).await.map_err(ApiError::from)?;
        Ok(Some(claim))
    }

    /// Step 2: a non-empty fingerprint already bound to a *different* phone is
    /// a conflict, regardless of which claim it sits on.
    fn device_conflict_check(&self, sealed: &[&ClusterClaim], phone: &str, fingerprint: &str) -> Result<(), ApiError> {
        if fingerprint.is_empty() {
            return Ok(());
        }
        let conflict = sealed.iter().any(|c| {
            let labels = ClaimLabels::from_map(c.meta().labels.as_ref().unwrap_or(&Default::default()));
            labels.fingerprint.as_deref() == Some(fingerprint)
                && labels.phone.as_deref().map(|p| p != phone).unwrap_or(false)
                && labels.phone.as_deref() != Some("")
        });
        if conflict {
            return Err(ApiError::DeviceAlreadyClaimed);
        }
        Ok(())
    }

    /// Step 3: uniformly-random fresh selection among available claims, with
    /// a single optimistic update setting `phone`, `fp`, and a fresh
    /// `spec.lifetime` that pins the new expiry to "now + configured
    /// lifetime" regardless of how long the claim had already existed.
    async fn select_fresh(&self, sealed: &[&ClusterClaim], phone: &str, fingerprint: &str) -> Result<ClusterClaim, ApiError> {
        let available: Vec<&&ClusterClaim> = sealed
            .iter()
            .filter(|c| ClaimLabels::from_map(c.meta().labels.as_ref().unwrap_or(&Default::default())).available())
            .collect();

        let chosen_name = {
            let mut rng = rand::thread_rng();
            available
                .choose(&mut rng)
                .map(|c| c.name())
                .ok_or(ApiError::AllClustersInUse)?
        };

        let phone = phone.to_string();
        let fingerprint = fingerprint.to_string();
        let claim_lifetime = self.claim_lifetime;

        self.store
            .bind_claim(&chosen_name, move |claim| {
                let age_at_selection = claim
                    .meta()
                    .creation_timestamp
                    .as_ref()
                    .map(|t| Utc::now().signed_duration_since(t.0))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                let new_lifetime = age_at_selection + claim_lifetime;

                let labels = claim.labels_mut();
                labels.insert(LABEL_PHONE.to_string(), phone.clone());
                if !fingerprint.is_empty() {
                    labels.insert(LABEL_FINGERPRINT.to_string(), fingerprint.clone());
                }
                claim.spec.lifetime = Some(format_lifetime(new_lifetime));
            })
            .await
            .map_err(ApiError::from)
    }

    /// Writes a bcrypt-hashed `htpasswd` secret for user `admin` on the
    /// downstream cluster, then assembles the response. Any downstream
    /// failure triggers the §4.3 recovery path: the claim is unlabeled so the
    /// next request on the same phone selects a fresh cluster.
    async fn inject_credentials(&self, claim: &ClusterClaim, password: &str) -> Result<ClaimResponse, ApiError> {
        let claim_name = claim.name();
        let result = self.try_inject_credentials(claim, password).await;
        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                tracing::warn!(claim = %claim_name, ?error, "downstream credential injection failed, recovering claim");
                if let Err(recovery_error) = self
                    .store
                    .patch_claim_labels(&claim_name, |labels| {
                        labels.remove(LABEL_AUTH);
                        labels.remove(LABEL_PHONE);
                        labels.remove(LABEL_FINGERPRINT);
                    })
                    .await
                {
                    tracing::error!(claim = %claim_name, ?recovery_error, "failed to recover claim after downstream failure");
                }
                Err(ApiError::ClusterUnavailable)
            }
        }
    }

    async fn try_inject_credentials(&self, claim: &ClusterClaim, password: &str) -> Result<ClaimResponse, ApiError> {
        let cluster_namespace = claim.status.as_ref().and_then(|s| s.namespace.clone()).ok_or_else(|| {
            common::error::Error::Unbound {
                kind: "ClusterClaim".to_string(),
                name: claim.name(),
            }
        })?;

        let deployment = self.store.get_deployment(&cluster_namespace).await?;
        let metadata = deployment.spec.cluster_metadata.as_ref().ok_or_else(|| common::error::Error::Unbound {
            kind: "ClusterDeployment".to_string(),
            name: cluster_namespace.clone(),
        })?;
        let admin_secret_ref = metadata.admin_kubeconfig_secret_ref.as_ref().ok_or_else(|| common::error::Error::MissingKey {
            name: cluster_namespace.clone(),
            key: "clusterMetadata.adminKubeconfigSecretRef".to_string(),
        })?;

        let admin_secret = self.store.secrets(&cluster_namespace).get(&admin_secret_ref.name).await.map_err(|source| common::error::Error::Kube {
            resource: format!("Secret/{}", admin_secret_ref.name),
            source,
        })?;
        let admin_secret_data = decode_secret_data(&admin_secret)?;
        let admin_yaml = common::kubeconfig::read_kubeconfig(&admin_secret_data)?;
        let (admin_client, _) = credentials::client_from_kubeconfig(&admin_yaml).await?;

        write_htpasswd(&admin_client, password).await?;

        let user_secret_name = authenticator::user_kubeconfig_secret_name(&admin_secret_ref.name);
        let user_secret = self.store.secrets(&cluster_namespace).get(&user_secret_name).await.map_err(|source| common::error::Error::Kube {
            resource: format!("Secret/{}", user_secret_name),
            source,
        })?;
        let user_secret_data = decode_secret_data(&user_secret)?;
        let user_kubeconfig = common::kubeconfig::read_kubeconfig(&user_secret_data)?;

        let web_console_url = deployment.status.as_ref().and_then(|s| s.web_console_url.clone()).unwrap_or_default();
        let ai_console_url = derive_ai_console_url(&web_console_url, &self.claim_prefix);

        let lifetime = claim
            .spec
            .lifetime
            .as_deref()
            .map(parse_lifetime)
            .transpose()?
            .unwrap_or(self.claim_lifetime);
        let created_at: DateTime<Utc> = claim
            .meta()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let expires_at = created_at + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());

        Ok(ClaimResponse {
            web_console_url,
            ai_console_url,
            kubeconfig: user_kubeconfig,
            expires_at: expires_at.to_rfc3339(),
        })
    }

    /// Readiness probe (§4.3 final paragraph): never blocks, `false` on any
    /// lookup failure.
    pub async fn cluster_ready(&self, phone: &str) -> bool {
        let phone = sanitize_phone(phone);
        self.check_ready(&phone).await.unwrap_or(false)
    }

    async fn check_ready(&self, phone: &str) -> Result<bool, common::error::Error> {
        let claims = self.store.list_pool_claims(&self.pool_name).await?;
        let claim = claims
            .into_iter()
            .find(|c| {
                c.meta()
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(LABEL_PHONE))
                    .map(|p| p == phone)
                    .unwrap_or(false)
            })
            .ok_or_else(|| common::error::Error::NotFound {
                kind: "ClusterClaim".to_string(),
                name: phone.to_string(),
            })?;

        let cluster_namespace = claim.status.as_ref().and_then(|s| s.namespace.clone()).ok_or_else(|| common::error::Error::Unbound {
            kind: "ClusterClaim".to_string(),
            name: claim.name(),
        })?;
        let deployment = self.store.get_deployment(&cluster_namespace).await?;
        let metadata = deployment.spec.cluster_metadata.as_ref().ok_or_else(|| common::error::Error::Unbound {
            kind: "ClusterDeployment".to_string(),
            name: cluster_namespace.clone(),
        })?;
        let admin_secret_ref = metadata.admin_kubeconfig_secret_ref.as_ref().ok_or_else(|| common::error::Error::MissingKey {
            name: cluster_namespace.clone(),
            key: "clusterMetadata.adminKubeconfigSecretRef".to_string(),
        })?;
        let admin_secret = self.store.secrets(&cluster_namespace).get(&admin_secret_ref.name).await.map_err(|source| common::error::Error::Kube {
            resource: format!("Secret/{}", admin_secret_ref.name),
            source,
        })?;
        let admin_secret_data = decode_secret_data(&admin_secret)?;
        let admin_yaml = common::kubeconfig::read_kubeconfig(&admin_secret_data)?;
        let (downstream, _) = credentials::client_from_kubeconfig(&admin_yaml).await?;

        let api = common::resource_store::dynamic_api(downstream, "operator.openshift.io", "v1", "Authentication", None);
        let authentication = api.get("cluster").await.map_err(|source| common::error::Error::Kube {
            resource: "Authentication/cluster".to_string(),
            source,
        })?;

        let conditions: Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition> = authentication
            .data
            .get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();

        Ok(conditions
            .iter()
            .find(|c| c.type_ == "Progressing")
            .map(|c| c.status == "False")
            .unwrap_or(false))
    }
}

fn decode_secret_data(secret: &k8s_openapi::api::core::v1::Secret) -> Result<std::collections::BTreeMap<String, String>, common::error::Error> {
    let data = secret.data.as_ref().ok_or_else(|| common::error::Error::MissingKey {
        name: secret.name(),
        key: "data".to_string(),
    })?;
    Ok(data
        .iter()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect())
}

/// Writes `htpasswd: "admin:<hash>\n"` to the bootstrap secret, skipping the
/// write when the existing hash already validates against `password`.
async fn write_htpasswd(admin_client: &kube::Client, password: &str) -> Result<(), common::error::Error> {
    let secrets: kube::api::Api<k8s_openapi::api::core::v1::Secret> =
        kube::api::Api::namespaced(admin_client.clone(), authenticator::IDENTITY_PROVIDER_NAMESPACE);

    let existing = secrets.get(authenticator::HTPASSWD_SECRET_NAME).await.ok();
    if let Some(existing_hash) = existing.as_ref().and_then(extract_htpasswd_hash) {
        if bcrypt::verify(password, &existing_hash).unwrap_or(false) {
            return Ok(());
        }
    }

    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|source| common::error::Error::External {
        context: "hashing admin password".to_string(),
        detail: source.to_string(),
    })?;
    let htpasswd_line = format!("admin:{}\n", hash);

    let mut data = std::collections::BTreeMap::new();
    data.insert("htpasswd".to_string(), k8s_openapi::ByteString(htpasswd_line.into_bytes()));

    let secret = k8s_openapi::api::core::v1::Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(authenticator::HTPASSWD_SECRET_NAME.to_string()),
            namespace: Some(authenticator::IDENTITY_PROVIDER_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    if existing.is_some() {
        secrets
            .replace(authenticator::HTPASSWD_SECRET_NAME, &kube::api::PostParams::default(), &secret)
            .await
            .map_err(|source| common::error::Error::Kube {
                resource: "Secret/htpasswd".to_string(),
                source,
            })?;
    } else {
        secrets
            .create(&kube::api::PostParams::default(), &secret)
            .await
            .map_err(|source| common::error::Error::Kube {
                resource: "Secret/htpasswd".to_string(),
                source,
            })?;
    }
    Ok(())
}

fn extract_htpasswd_hash(secret: &k8s_openapi::api::core::v1::Secret) -> Option<String> {
    let bytes = &secret.data.as_ref()?.get("htpasswd")?.0;
    let line = String::from_utf8_lossy(bytes);
    let line = line.lines().next()?;
    line.strip_prefix("admin:").map(|hash| hash.to_string())
}

/// Rewrites a web console URL into its AI console counterpart: swap the host
/// segment, append the fixed learning-resources path, and tag the pool's
/// claim prefix on as a `keyword` query parameter.
fn derive_ai_console_url(web_console_url: &str, claim_prefix: &str) -> String {
    if web_console_url.is_empty() {
        return String::new();
    }
    let rewritten = web_console_url.replacen(AI_CONSOLE_FROM_HOST, AI_CONSOLE_TO_HOST, 1);
    format!(
        "{}{}?&{}={}",
        rewritten.trim_end_matches('/'),
        AI_CONSOLE_PATH_SUFFIX,
        AI_CONSOLE_QUERY_KEY,
        claim_prefix
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rewrites_console_host_and_appends_suffix() {
        let url = "https://console-openshift-console.apps.demo.example.com/dashboards";
        assert_eq!(
            derive_ai_console_url(url, "prelude"),
            "https://data-science-gateway.apps.demo.example.com/dashboards/learning-resources?&keyword=prelude"
        );
    }

    #[test]
    fn empty_console_url_derives_empty_ai_console_url() {
        assert_eq!(derive_ai_console_url("", "prelude"), "");
    }

    #[test]
    fn extracts_hash_from_htpasswd_line() {
        let mut data = std::collections::BTreeMap::new();
        data.insert(
            "htpasswd".to_string(),
            k8s_openapi::ByteString(b"admin:$2b$10$abcdefghijklmnopqrstuv\n".to_vec()),
        );
        let secret = k8s_openapi::api::core::v1::Secret {
            data: Some(data),
            ..Default::default()
        };
        assert_eq!(extract_htpasswd_hash(&secret).as_deref(), Some("$2b$10$abcdefghijklmnopqrstuv"));
    }
}
