//! Credential minting for the downstream cluster: RSA key generation, the
//! CSR submit/approve/poll dance against the downstream cluster's own
//! `certificates.k8s.io` API, CA extraction from the live TLS endpoint, and
//! kubeconfig assembly. Used exclusively by the authenticator loop
//! (`crate::authenticator`); the assignment service only ever *reads* the
//! credentials this module produced.

use common::error::Error;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestSpec};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client, Config,
};
use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{X509NameBuilder, X509ReqBuilder},
};
use std::time::Duration;

/// RSA modulus size used for every minted credential, per the authenticator
/// algorithm.
const KEY_BITS: u32 = 4096;
const SIGNER_KUBE_APISERVER_CLIENT: &str = "kubernetes.io/kube-apiserver-client";
const EXPIRY_SECONDS_ONE_YEAR: i32 = 365 * 24 * 3600;

fn external<E: std::fmt::Display>(context: &str, source: E) -> Error {
    Error::External {
        context: context.to_string(),
        detail: source.to_string(),
    }
}

/// Builds a `kube::Client` for the downstream cluster from an already
/// base64-decoded kubeconfig YAML document (see `common::kubeconfig`),
/// alongside the API server URL the config resolved to — `Client` itself
/// doesn't retain it once built, and the authenticator needs it for both the
/// CA-extraction dial and the kubeconfig it assembles.
pub async fn client_from_kubeconfig(yaml: &str) -> Result<(Client, String), Error> {
    let kubeconfig = kube::config::Kubeconfig::from_yaml(yaml)
        .map_err(|source| external("parsing downstream kubeconfig", source))?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
        .await
        .map_err(|source| external("building downstream client config", source))?;

    let api_server_url = config.cluster_url.to_string();

    let client = Client::try_from(config).map_err(|source| Error::Kube {
        resource: "downstream client".to_string(),
        source,
    })?;
    Ok((client, api_server_url))
}

/// RSA keypair plus the PEM-encoded PKCS#10 CSR built from it, CN set to
/// `common_name`.
pub struct MintedKey {
    pub key: PKey<Private>,
    pub csr_pem: Vec<u8>,
}

pub fn generate_csr(common_name: &str) -> Result<MintedKey, Error> {
    let rsa = Rsa::generate(KEY_BITS).map_err(|source| external("generating RSA key", source))?;
    let key = PKey::from_rsa(rsa).map_err(|source| external("wrapping RSA key", source))?;

    let mut name_builder = X509NameBuilder::new().map_err(|source| external("building X509 name", source))?;
    name_builder
        .append_entry_by_text("CN", common_name)
        .map_err(|source| external("setting CSR common name", source))?;
    let name = name_builder.build();

    let mut req_builder = X509ReqBuilder::new().map_err(|source| external("building CSR", source))?;
    req_builder
        .set_subject_name(&name)
        .map_err(|source| external("setting CSR subject", source))?;
    req_builder
        .set_pubkey(&key)
        .map_err(|source| external("setting CSR public key", source))?;
    req_builder
        .sign(&key, MessageDigest::sha256())
        .map_err(|source| external("self-signing CSR", source))?;
    let csr_pem = req_builder
        .build()
        .to_pem()
        .map_err(|source| external("PEM-encoding CSR", source))?;

    Ok(MintedKey { key, csr_pem })
}

/// Submits a signing request, deleting any previous request of the same name
/// first (best-effort — a failed delete does not abort the mint, per
/// DESIGN.md's open question (a)).
pub async fn submit_csr(client: &Client, name: &str, csr_pem: &[u8]) -> Result<(), Error> {
    let api: Api<CertificateSigningRequest> = Api::all(client.clone());

    if let Err(error) = api.delete(name, &DeleteParams::default()).await {
        tracing::debug!(name, ?error, "no prior signing request to delete (or delete failed)");
    }

    let csr = CertificateSigningRequest {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: k8s_openapi::ByteString(csr_pem.to_vec()),
            signer_name: SIGNER_KUBE_APISERVER_CLIENT.to_string(),
            usages: Some(vec!["client auth".to_string()]),
            expiration_seconds: Some(EXPIRY_SECONDS_ONE_YEAR),
            ..Default::default()
        },
        status: None,
    };

    api.create(&PostParams::default(), &csr)
        .await
        .map_err(|source| Error::Kube {
            resource: format!("CertificateSigningRequest/{}", name),
            source,
        })?;

    approve_csr(client, name).await
}

/// Appends an `Approved=True` condition and commits it through the CSR's
/// `approval` subresource.
async fn approve_csr(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<CertificateSigningRequest> = Api::all(client.clone());
    let mut csr = api.get(name).await.map_err(|source| Error::Kube {
        resource: format!("CertificateSigningRequest/{}", name),
        source,
    })?;

    let condition = k8s_openapi::api::certificates::v1::CertificateSigningRequestCondition {
        type_: "Approved".to_string(),
        status: "True".to_string(),
        reason: Some("AutoApproved".to_string()),
        message: Some("approved by cluster-gateway authenticator".to_string()),
        ..Default::default()
    };
    csr.status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new)
        .push(condition);

    let url = api.resource_url().to_string();
    let patch_request = kube::api::Request::new(url)
        .patch_subresource("approval", name, &PatchParams::default(), &Patch::Merge(&csr))
        .map_err(|source| Error::Kube {
            resource: format!("CertificateSigningRequest/{}/approval", name),
            source,
        })?;

    client
        .request::<CertificateSigningRequest>(patch_request)
        .await
        .map_err(|source| Error::Kube {
            resource: format!("CertificateSigningRequest/{}/approval", name),
            source,
        })?;
    Ok(())
}

/// Polls for up to `timeout` for the CSR to carry an issued certificate.
pub async fn poll_for_certificate(client: &Client, name: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
    let api: Api<CertificateSigningRequest> = Api::all(client.clone());
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let csr = api.get(name).await.map_err(|source| Error::Kube {
            resource: format!("CertificateSigningRequest/{}", name),
            source,
        })?;

        if let Some(cert) = csr.status.as_ref().and_then(|s| s.certificate.as_ref()) {
            return Ok(cert.0.clone());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::NotFound {
                kind: "issued certificate".to_string(),
                name: name.to_string(),
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

/// Opens a bare TLS connection to `host:port`, skipping verification (this is
/// an intentional, narrowly-scoped exception used only to read back the CA the
/// cluster itself presents), and returns the deepest (root-most) `CA:true`
/// certificate in the peer chain, falling back to the chain's last entry if
/// none is marked as a CA.
pub fn extract_ca_der(host: &str, port: u16) -> Result<Vec<u8>, Error> {
    use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
    use std::net::TcpStream;

    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|source| external("building TLS connector", source))?;
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();

    let stream = TcpStream::connect((host, port)).map_err(|_| Error::NotFound {
        kind: "downstream API server".to_string(),
        name: format!("{}:{}", host, port),
    })?;

    let ssl_stream = connector.connect(host, stream).map_err(|_| Error::NotFound {
        kind: "downstream TLS handshake".to_string(),
        name: format!("{}:{}", host, port),
    })?;

    let chain = ssl_stream.ssl().peer_cert_chain().ok_or_else(|| Error::NotFound {
        kind: "peer certificate chain".to_string(),
        name: host.to_string(),
    })?;

    // `peer_cert_chain` orders entries leaf-first, so the deepest (root-most)
    // `CA:true` entry is the *last* match, not the first — keep overwriting
    // `deepest_ca` as we walk so it ends up holding that last match.
    let mut fallback: Option<Vec<u8>> = None;
    let mut deepest_ca: Option<Vec<u8>> = None;
    for cert in chain {
        let der = cert.to_der().map_err(|source| external("DER-encoding peer certificate", source))?;
        fallback = Some(der.clone());

        if let Ok((_, parsed)) = x509_parser::parse_x509_certificate(&der) {
            if let Ok(Some(constraints)) = parsed.basic_constraints() {
                if constraints.ca {
                    deepest_ca = Some(der);
                }
            }
        }
    }

    deepest_ca.or(fallback).ok_or_else(|| Error::NotFound {
        kind: "CA certificate".to_string(),
        name: host.to_string(),
    })
}

/// Assembles the kubeconfig YAML for a freshly minted client certificate.
pub fn assemble_kubeconfig(
    api_server_url: &str,
    ca_der: &[u8],
    client_cert_der: &[u8],
    client_key: &PKey<Private>,
    user_name: &str,
) -> Result<String, Error> {
    let key_der = client_key
        .private_key_to_der()
        .map_err(|source| external("DER-encoding client key", source))?;
    common::kubeconfig::assemble_kubeconfig(api_server_url, ca_der, client_cert_der, &key_der, user_name)
}
