//! Kubeconfig blob handling: transparent base64 wrapping, and assembly of a
//! fresh kubeconfig document from a freshly minted client certificate.

use crate::error::Error;
use serde::Serialize;

/// Well-known secret keys a kubeconfig may be stored under. Both are always
/// checked; whichever is present (and non-empty) wins, `kubeconfig` first.
pub const KEY_KUBECONFIG: &str = "kubeconfig";
pub const KEY_RAW_KUBECONFIG: &str = "raw-kubeconfig";

/// Marker that identifies a decoded (not base64-wrapped) kubeconfig YAML
/// document.
const YAML_MARKER: &str = "apiVersion";

/// Reads a kubeconfig out of a secret's `data` map, accepting either of
/// [`KEY_KUBECONFIG`] / [`KEY_RAW_KUBECONFIG`], and transparently unwrapping a
/// base64 layer: if the raw bytes don't already look like YAML (no
/// `apiVersion` marker), they're base64-decoded first.
///
/// Returns the same YAML text regardless of which form the value was stored
/// in.
pub fn read_kubeconfig(data: &std::collections::BTreeMap<String, String>) -> Result<String, Error> {
    let (key, raw) = data
        .get(KEY_KUBECONFIG)
        .map(|v| (KEY_KUBECONFIG, v))
        .or_else(|| data.get(KEY_RAW_KUBECONFIG).map(|v| (KEY_RAW_KUBECONFIG, v)))
        .ok_or_else(|| Error::MissingKey {
            name: "secret".to_string(),
            key: KEY_KUBECONFIG.to_string(),
        })?;

    decode_transparent(key, raw)
}

/// Applies the same transparent-base64 rule to a single value, for callers
/// that already know which key they read it from (used when logging which key
/// produced a decode failure).
pub fn decode_transparent(key: &str, raw: &str) -> Result<String, Error> {
    if raw.contains(YAML_MARKER) {
        return Ok(raw.to_string());
    }

    let decoded = base64::decode(raw.trim()).map_err(|source| Error::Decode {
        name: "secret".to_string(),
        key: key.to_string(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

#[derive(Serialize)]
struct KubeconfigCluster {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct KubeconfigClusterEntry {
    name: String,
    cluster: KubeconfigCluster,
}

#[derive(Serialize)]
struct KubeconfigUser {
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: String,
    #[serde(rename = "client-key-data")]
    client_key_data: String,
}

#[derive(Serialize)]
struct KubeconfigUserEntry {
    name: String,
    user: KubeconfigUser,
}

#[derive(Serialize)]
struct KubeconfigContext {
    cluster: String,
    user: String,
}

#[derive(Serialize)]
struct KubeconfigContextEntry {
    name: String,
    context: KubeconfigContext,
}

#[derive(Serialize)]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<KubeconfigClusterEntry>,
    users: Vec<KubeconfigUserEntry>,
    contexts: Vec<KubeconfigContextEntry>,
    #[serde(rename = "current-context")]
    current_context: String,
    preferences: std::collections::HashMap<String, String>,
}

/// Assembles a single-user, single-cluster kubeconfig YAML document for a
/// freshly minted client certificate, embedding the CA, cert, and key as
/// base64 as the kubeconfig format requires. The cluster name is derived from
/// the API server host (port and scheme stripped).
pub fn assemble_kubeconfig(
    api_server_url: &str,
    ca_der: &[u8],
    client_cert_der: &[u8],
    client_key_der: &[u8],
    user_name: &str,
) -> Result<String, Error> {
    let cluster_name = cluster_name_from_url(api_server_url);
    let context_name = format!("{}/{}", user_name, cluster_name);

    let doc = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![KubeconfigClusterEntry {
            name: cluster_name.clone(),
            cluster: KubeconfigCluster {
                server: api_server_url.to_string(),
                certificate_authority_data: base64::encode(ca_der),
            },
        }],
        users: vec![KubeconfigUserEntry {
            name: user_name.to_string(),
            user: KubeconfigUser {
                client_certificate_data: base64::encode(client_cert_der),
                client_key_data: base64::encode(client_key_der),
            },
        }],
        contexts: vec![KubeconfigContextEntry {
            name: context_name.clone(),
            context: KubeconfigContext {
                cluster: cluster_name,
                user: user_name.to_string(),
            },
        }],
        current_context: context_name,
        preferences: std::collections::HashMap::new(),
    };

    serde_yaml::to_string(&doc).map_err(|source| Error::Yaml {
        what: "kubeconfig".to_string(),
        source,
    })
}

fn cluster_name_from_url(url: &str) -> String {
    let without_scheme = url.split("://").last().unwrap_or(url);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    host.split(':').next().unwrap_or(host).to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn reads_raw_yaml_unchanged() {
        let mut data = BTreeMap::new();
        data.insert(KEY_KUBECONFIG.to_string(), "apiVersion: v1\nkind: Config".to_string());
        assert_eq!(read_kubeconfig(&data).unwrap(), "apiVersion: v1\nkind: Config");
    }

    #[test]
    fn reads_base64_wrapped_transparently() {
        let yaml = "apiVersion: v1\nkind: Config";
        let mut data = BTreeMap::new();
        data.insert(KEY_RAW_KUBECONFIG.to_string(), base64::encode(yaml));
        assert_eq!(read_kubeconfig(&data).unwrap(), yaml);
    }

    #[test]
    fn prefers_kubeconfig_key_over_raw() {
        let mut data = BTreeMap::new();
        data.insert(KEY_KUBECONFIG.to_string(), "apiVersion: v1\nkind: A".to_string());
        data.insert(KEY_RAW_KUBECONFIG.to_string(), "apiVersion: v1\nkind: B".to_string());
        assert_eq!(read_kubeconfig(&data).unwrap(), "apiVersion: v1\nkind: A");
    }

    #[test]
    fn derives_cluster_name_from_host() {
        assert_eq!(cluster_name_from_url("https://api.example.com:6443"), "api.example.com");
    }
}
