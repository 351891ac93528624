//! Key and trust material for FTPS.
//!
//! A keystore supplies the client identity (mutual TLS). A truststore
//! replaces the built-in roots, so server certificates must chain to it.

use std::path::PathBuf;

use native_tls::{Certificate, Identity, TlsConnector};
use slotfeed_core::config::StoreDescriptor;
use slotfeed_core::ConfigurationError;
use tracing::info;
use url::Url;

const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Build the TLS connector used for every session of one connector.
pub fn build_tls_connector(
    keystore: Option<&StoreDescriptor>,
    truststore: Option<&StoreDescriptor>,
) -> Result<TlsConnector, ConfigurationError> {
    let mut builder = TlsConnector::builder();

    if let Some(keystore) = keystore {
        builder.identity(load_identity(keystore)?);
        info!(keystore = %keystore.url, "client certificate loaded, mutual TLS enabled");
    }

    if let Some(truststore) = truststore {
        let certs = load_certificates(truststore)?;
        info!(truststore = %truststore.url, certificates = certs.len(), "server trust anchors loaded");
        for cert in certs {
            builder.add_root_certificate(cert);
        }
        builder.disable_built_in_roots(true);
    }

    builder
        .build()
        .map_err(|e| ConfigurationError::invalid("tls", e.to_string()))
}

/// Accepts plain paths and `file://` URLs.
fn resolve_path(url: &str) -> Result<PathBuf, ConfigurationError> {
    if !url.contains("://") {
        return Ok(PathBuf::from(url));
    }
    let parsed = Url::parse(url).map_err(|e| ConfigurationError::invalid("store.url", e.to_string()))?;
    if parsed.scheme() != "file" {
        return Err(ConfigurationError::Unsupported {
            kind: "store url scheme",
            value: parsed.scheme().to_string(),
        });
    }
    parsed
        .to_file_path()
        .map_err(|()| ConfigurationError::invalid("store.url", format!("not a local path: {url}")))
}

fn read_material(store: &StoreDescriptor, field: &'static str) -> Result<Vec<u8>, ConfigurationError> {
    let path = resolve_path(&store.url)?;
    std::fs::read(&path)
        .map_err(|e| ConfigurationError::invalid(field, format!("{}: {e}", path.display())))
}

fn load_identity(store: &StoreDescriptor) -> Result<Identity, ConfigurationError> {
    let kind = store.store_type.to_ascii_uppercase();
    if !matches!(kind.as_str(), "PKCS12" | "P12" | "PFX" | "PEM") {
        return Err(ConfigurationError::Unsupported {
            kind: "keystore type",
            value: store.store_type.clone(),
        });
    }
    let bytes = read_material(store, "keystore")?;
    let identity = match kind.as_str() {
        // One PEM file holding the certificate chain and the PKCS#8 key.
        "PEM" => Identity::from_pkcs8(&bytes, &bytes),
        _ => Identity::from_pkcs12(&bytes, store.password.as_deref().unwrap_or("")),
    };
    identity.map_err(|e| ConfigurationError::invalid("keystore", e.to_string()))
}

fn load_certificates(store: &StoreDescriptor) -> Result<Vec<Certificate>, ConfigurationError> {
    let kind = store.store_type.to_ascii_uppercase();
    if !matches!(kind.as_str(), "PEM" | "DER" | "CER" | "CRT") {
        return Err(ConfigurationError::Unsupported {
            kind: "truststore type",
            value: store.store_type.clone(),
        });
    }
    let bytes = read_material(store, "truststore")?;
    let invalid = |e: native_tls::Error| ConfigurationError::invalid("truststore", e.to_string());
    if kind != "PEM" {
        return Ok(vec![Certificate::from_der(&bytes).map_err(invalid)?]);
    }
    let text = String::from_utf8_lossy(&bytes);
    let certs = split_pem_certificates(&text)
        .into_iter()
        .map(|block| Certificate::from_pem(block.as_bytes()).map_err(invalid))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ConfigurationError::invalid("truststore", "no certificates found"));
    }
    Ok(certs)
}

fn split_pem_certificates(text: &str) -> Vec<String> {
    text.split_inclusive(PEM_CERT_END)
        .filter(|block| block.contains(PEM_CERT_END))
        .map(|block| block.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str, store_type: &str) -> StoreDescriptor {
        StoreDescriptor {
            url: url.into(),
            store_type: store_type.into(),
            password: None,
        }
    }

    #[test]
    fn file_urls_resolve_to_paths() {
        assert_eq!(
            resolve_path("file:///etc/ssl/ca.pem").unwrap(),
            PathBuf::from("/etc/ssl/ca.pem")
        );
        assert_eq!(resolve_path("certs/ca.pem").unwrap(), PathBuf::from("certs/ca.pem"));
    }

    #[test]
    fn remote_store_urls_are_unsupported() {
        assert!(matches!(
            resolve_path("https://example.com/ca.pem"),
            Err(ConfigurationError::Unsupported { .. })
        ));
    }

    #[test]
    fn unknown_store_types_rejected_before_reading() {
        let err = build_tls_connector(Some(&descriptor("/nonexistent.jks", "JKS")), None).unwrap_err();
        assert!(matches!(err, ConfigurationError::Unsupported { kind: "keystore type", .. }));

        let err = build_tls_connector(None, Some(&descriptor("/nonexistent", "JKS"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::Unsupported { kind: "truststore type", .. }));
    }

    #[test]
    fn missing_material_is_a_configuration_error() {
        let err = build_tls_connector(None, Some(&descriptor("/nonexistent/ca.pem", "PEM"))).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { field: "truststore", .. }));
    }

    #[test]
    fn pem_bundles_split_per_certificate() {
        let bundle = "-----BEGIN CERTIFICATE-----\nAAA\n-----END CERTIFICATE-----\n\
                      -----BEGIN CERTIFICATE-----\nBBB\n-----END CERTIFICATE-----\n";
        let blocks = split_pem_certificates(bundle);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].contains("BBB"));
    }
}
