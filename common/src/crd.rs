//! Typed Kubernetes resource definitions for the pool's `ClusterClaim` and
//! `ClusterDeployment` custom resources (group `hive.openshift.io`, version
//! `v1`), trimmed to the fields this system reads or writes.
//!
//! These are genuine upstream CRD kinds (the cluster-pool orchestrator this
//! gateway sits in front of); we only model the subset of each schema this
//! system touches, the same way the teacher's `DiskPool` CRD models only the
//! `openebs.io` pool fields it needs rather than the orchestrator's full spec.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `spec` of a `hive.openshift.io/v1 ClusterClaim`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterClaim",
    namespaced,
    status = "ClusterClaimStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClaimSpec {
    /// Name of the `ClusterPool` this claim draws from.
    pub cluster_pool_name: String,
    /// How long the claim is reserved for once bound, as a Go-style duration
    /// string (`d`/`h`/`m` terms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<String>,
}

/// `status` of a `ClusterClaim`: the orchestrator fills `namespace` in once it
/// has bound a `ClusterDeployment` to satisfy the claim.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Reference to a namespaced secret, as used throughout Hive's API for
/// kubeconfig/password secret pointers.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

/// The subset of `ClusterDeployment.spec.clusterMetadata` this system needs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub infra_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig_secret_ref: Option<SecretReference>,
}

/// `spec` of a `hive.openshift.io/v1 ClusterDeployment`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    namespaced,
    status = "ClusterDeploymentStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_image: Option<String>,
    #[serde(default)]
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_metadata: Option<ClusterMetadata>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_console_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
    #[serde(default)]
    pub installed: bool,
}
