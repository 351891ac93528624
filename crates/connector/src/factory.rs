use std::sync::Arc;

use slotfeed_core::config::{SourceConfig, TransportKind};
use slotfeed_core::{ConfigurationError, RemoteFile};
use tracing::info;

use crate::ftp::{FtpSettings, PlainFtpOpener, SecureFtpOpener};
use crate::session::SessionConnector;
use crate::store::ObjectStoreConnector;
use crate::tls::build_tls_connector;
use crate::traits::{ConnectorFactory, DynConnector};

/// Picks the transport named by [`SourceConfig::transport`].
///
/// Parameters are validated before anything is built, so a bad config never
/// reaches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceConnectorFactory;

impl ConnectorFactory for SourceConnectorFactory {
    type Slot = RemoteFile;
    type Params = SourceConfig;

    fn create(&self, params: &SourceConfig) -> Result<DynConnector<RemoteFile>, ConfigurationError> {
        params.validate()?;

        let connector: DynConnector<RemoteFile> = match params.transport {
            TransportKind::Ftp => Arc::new(SessionConnector::new(
                PlainFtpOpener::new(FtpSettings::from_source(params)),
                &params.directory,
            )),
            TransportKind::Ftps => {
                let tls = build_tls_connector(params.keystore.as_ref(), params.truststore.as_ref())?;
                Arc::new(SessionConnector::new(
                    SecureFtpOpener::new(FtpSettings::from_source(params), tls),
                    &params.directory,
                ))
            }
            TransportKind::S3 | TransportKind::Local => Arc::new(ObjectStoreConnector::from_source(params)?),
        };

        info!(
            transport = %params.transport,
            connector = connector.name(),
            "source connector created"
        );
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotfeed_core::config::StoreDescriptor;

    #[test]
    fn invalid_params_never_build_a_connector() {
        let source = SourceConfig::new(TransportKind::Ftp, "", "/out");
        let err = SourceConnectorFactory.create(&source).err().unwrap();
        assert_eq!(err, ConfigurationError::Missing("host"));
    }

    #[test]
    fn ftp_connector_is_built_without_connecting() {
        // Nothing listens on this host; construction must not care.
        let source = SourceConfig::new(TransportKind::Ftp, "ftp.invalid", "/out");
        let connector = SourceConnectorFactory.create(&source).unwrap();
        assert_eq!(connector.name(), "ftp://ftp.invalid:21/out");
    }

    #[test]
    fn ftps_with_unloadable_truststore_fails_at_construction() {
        let mut source = SourceConfig::new(TransportKind::Ftps, "ftp.invalid", "/out");
        source.truststore = Some(StoreDescriptor {
            url: "/nonexistent/ca.pem".into(),
            store_type: "PEM".into(),
            password: None,
        });
        assert!(SourceConnectorFactory.create(&source).is_err());
    }

    #[test]
    fn local_transport_uses_object_store() {
        let tmp = tempfile::tempdir().unwrap();
        let source = SourceConfig::new(
            TransportKind::Local,
            tmp.path().to_string_lossy(),
            "incoming",
        );
        let connector = SourceConnectorFactory.create(&source).unwrap();
        assert!(connector.name().starts_with("file://"));
        assert!(connector.name().ends_with("/incoming"));
    }
}
