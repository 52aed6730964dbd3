//! Admin surface (§4.4): password login issuing an opaque session token, and
//! a read-only snapshot of every claim and deployment in the pool.

use crate::{config::CliArgs, error::ApiError};
use common::{age::format_age, labels::ClaimLabels, resource_store::ResourceStore};
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashSet;
use std::time::SystemTime;

#[derive(Debug, Serialize)]
pub struct ClaimInfo {
    pub name: String,
    pub pool: String,
    pub phone: Option<String>,
    pub authenticated: bool,
    pub namespace: Option<String>,
    pub age: String,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub platform: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub provisioning_status: String,
    #[serde(rename = "powerState")]
    pub power_state: Option<String>,
    pub age: String,
}

#[derive(Debug, Serialize)]
pub struct AdminSnapshot {
    #[serde(rename = "clusterClaims")]
    pub cluster_claims: Vec<ClaimInfo>,
    #[serde(rename = "clusterDeployments")]
    pub cluster_deployments: Vec<DeploymentInfo>,
}

/// Process-local session table: tokens are 32 random bytes hex-encoded, valid
/// until the process exits — restarting invalidates every session, per §3.
pub struct AdminSessions {
    admin_password: String,
    tokens: RwLock<HashSet<String>>,
}

impl AdminSessions {
    pub fn new(args: &CliArgs) -> Self {
        Self {
            admin_password: args.admin_password.clone(),
            tokens: RwLock::new(HashSet::new()),
        }
    }

    /// When no admin password is configured, the admin surface is considered
    /// open: every request is treated as authorized.
    pub fn disabled(&self) -> bool {
        self.admin_password.is_empty()
    }

    /// Constant-time compares `password` against the configured admin
    /// password, and on a match mints and stores a fresh 32-byte token.
    pub fn login(&self, password: &str) -> Result<String, ApiError> {
        if self.disabled() {
            return Ok(String::new());
        }
        if !constant_time_eq(password.as_bytes(), self.admin_password.as_bytes()) {
            return Err(ApiError::Unauthenticated);
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.write().insert(token.clone());
        Ok(token)
    }

    pub fn authorize(&self, token: &str) -> bool {
        self.disabled() || self.tokens.read().contains(token)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Assembles the admin dashboard snapshot for every claim and deployment
/// naming `pool_name`.
pub async fn snapshot(store: &ResourceStore, pool_name: &str) -> Result<AdminSnapshot, ApiError> {
    let claims = store.list_pool_claims(pool_name).await?;
    let now = SystemTime::now();

    let cluster_claims = claims
        .iter()
        .map(|claim| {
            let labels = ClaimLabels::from_map(claim.meta().labels.as_ref().unwrap_or(&Default::default()));
            let age = claim
                .meta()
                .creation_timestamp
                .as_ref()
                .and_then(|t| {
                    let created: SystemTime = t.0.into();
                    now.duration_since(created).ok()
                })
                .map(format_age)
                .unwrap_or_else(|| "0s".to_string());
            let expires_at = claim
                .spec
                .lifetime
                .as_deref()
                .and_then(|l| common::duration::parse_lifetime(l).ok())
                .zip(claim.meta().creation_timestamp.as_ref())
                .map(|(lifetime, created)| {
                    let expiry = created.0 + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());
                    expiry.to_rfc3339()
                });

            ClaimInfo {
                name: claim.name(),
                pool: claim.spec.cluster_pool_name.clone(),
                phone: labels.phone,
                authenticated: labels.auth_done,
                namespace: claim.status.as_ref().and_then(|s| s.namespace.clone()),
                age,
                expires_at,
            }
        })
        .collect();

    let deployment_namespaces: Vec<String> = claims.iter().filter_map(|c| c.status.as_ref().and_then(|s| s.namespace.clone())).collect();

    let mut cluster_deployments = Vec::new();
    for namespace in deployment_namespaces {
        let Ok(deployment) = store.get_deployment(&namespace).await else {
            continue;
        };
        let age = deployment
            .meta()
            .creation_timestamp
            .as_ref()
            .and_then(|t| {
                let created: SystemTime = t.0.into();
                now.duration_since(created).ok()
            })
            .map(format_age)
            .unwrap_or_else(|| "0s".to_string());

        cluster_deployments.push(DeploymentInfo {
            name: deployment.spec.cluster_name.clone(),
            namespace: namespace.clone(),
            platform: deployment.spec.platform.clone(),
            region: deployment.spec.region.clone(),
            version: deployment.spec.release_image.clone(),
            provisioning_status: if deployment.status.as_ref().map(|s| s.installed).unwrap_or(deployment.spec.installed) {
                "installed".to_string()
            } else {
                "provisioning".to_string()
            },
            power_state: deployment.status.as_ref().and_then(|s| s.power_state.clone()),
            age,
        });
    }

    Ok(AdminSnapshot { cluster_claims, cluster_deployments })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"hunter2", b"hunter2"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_bytes() {
        assert!(!constant_time_eq(b"hunter2", b"hunter3"));
    }
}
