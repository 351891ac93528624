use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use slotfeed_core::config::{AwsConfig, SourceConfig, TransportKind};
use slotfeed_core::{ConfigurationError, RemoteFile};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ConnectorError;
use crate::session::join_remote;
use crate::traits::SourceConnector;

/// Where an object-store connector reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Local { root: PathBuf },
    S3 { bucket: String, aws: AwsConfig },
}

impl StoreLocation {
    /// Build the store handle. Nothing is contacted until the first request.
    fn open(&self) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        match self {
            StoreLocation::Local { root } => {
                let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
                    ConnectorError::Connect {
                        endpoint: self.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Arc::new(store))
            }
            StoreLocation::S3 { bucket, aws } => {
                let mut builder = AmazonS3Builder::new().with_region(&aws.region);

                if let Some(ref key) = aws.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(ref secret) = aws.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if let Some(ref token) = aws.session_token {
                    builder = builder.with_token(token);
                }

                match aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
                    Some(endpoint) => {
                        // object_store requires absolute endpoint URLs
                        let endpoint_url =
                            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                                endpoint.to_string()
                            } else {
                                format!("https://{}", endpoint)
                            };
                        builder = builder
                            .with_bucket_name(bucket)
                            .with_allow_http(endpoint_url.starts_with("http://"))
                            .with_endpoint(endpoint_url);
                    }
                    None => {
                        builder = builder.with_url(format!("s3://{}", bucket));
                    }
                }

                Ok(Arc::new(builder.build()?))
            }
        }
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreLocation::Local { root } => write!(f, "file://{}", root.display()),
            StoreLocation::S3 { bucket, .. } => write!(f, "s3://{}", bucket),
        }
    }
}

/// Pull connector over S3 or a local directory tree.
///
/// Follows the same lifecycle as the FTP connectors: the store handle is
/// built on connect and dropped after every operation.
pub struct ObjectStoreConnector {
    location: StoreLocation,
    prefix: String,
    name: String,
    session: Mutex<Option<Arc<dyn ObjectStore>>>,
}

impl ObjectStoreConnector {
    pub fn new(location: StoreLocation, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        let name = format!("{}/{}", location, prefix);
        Self {
            location,
            prefix,
            name,
            session: Mutex::new(None),
        }
    }

    /// `host` is the bucket (s3) or root directory (local); `directory` the key prefix.
    pub fn from_source(source: &SourceConfig) -> Result<Self, ConfigurationError> {
        let location = match source.transport {
            TransportKind::Local => StoreLocation::Local {
                root: PathBuf::from(&source.host),
            },
            TransportKind::S3 => StoreLocation::S3 {
                bucket: source.host.clone(),
                aws: source.aws.clone(),
            },
            other => {
                return Err(ConfigurationError::Unsupported {
                    kind: "object store transport",
                    value: other.to_string(),
                })
            }
        };
        Ok(Self::new(location, &source.directory))
    }

    fn connect(&self, slot: &mut Option<Arc<dyn ObjectStore>>) -> Result<Arc<dyn ObjectStore>, ConnectorError> {
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }
        debug!(location = %self.location, "opening object store");
        let store = self.location.open()?;
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    fn disconnect(&self, slot: &mut Option<Arc<dyn ObjectStore>>) {
        slot.take();
    }

    /// Objects directly under the prefix; deeper keys show up as common
    /// prefixes and are skipped, like directories in an FTP listing.
    async fn list_objects(&self, store: &dyn ObjectStore) -> Result<Vec<RemoteFile>, ConnectorError> {
        let prefix = ObjectPath::from(self.prefix.as_str());
        let strip = format!("{}/", prefix.as_ref());
        let listing = store.list_with_delimiter(Some(&prefix)).await?;
        if !listing.common_prefixes.is_empty() {
            debug!(prefix = %prefix, skipped = listing.common_prefixes.len(), "ignoring nested prefixes");
        }

        let mut files: Vec<RemoteFile> = listing
            .objects
            .into_iter()
            .map(|meta| {
                let key = meta.location.to_string();
                RemoteFile {
                    name: key.strip_prefix(&strip).unwrap_or(&key).to_string(),
                    timestamp: Some(meta.last_modified),
                    size: Some(meta.size as u64),
                }
            })
            .collect();

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn copy_object(
        &self,
        store: &dyn ObjectStore,
        slot: &RemoteFile,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ConnectorError> {
        let location = ObjectPath::from(join_remote(&self.prefix, &slot.name));
        let mut chunks = store.get(&location).await?.into_stream();
        let mut copied = 0u64;
        while let Some(chunk) = chunks.try_next().await? {
            sink.write_all(&chunk).await?;
            copied += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(copied)
    }
}

#[async_trait]
impl SourceConnector for ObjectStoreConnector {
    type Slot = RemoteFile;

    async fn list(&self) -> Result<Vec<RemoteFile>, ConnectorError> {
        let mut slot = self.session.lock().await;
        let result = match self.connect(&mut slot) {
            Ok(store) => self.list_objects(store.as_ref()).await,
            Err(e) => Err(e),
        };
        self.disconnect(&mut slot);
        if let Ok(files) = &result {
            debug!(connector = %self.name, files = files.len(), "listed object prefix");
        }
        result
    }

    async fn fetch(
        &self,
        slot: &RemoteFile,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ConnectorError> {
        let mut session = self.session.lock().await;
        let result = match self.connect(&mut session) {
            Ok(store) => self.copy_object(store.as_ref(), slot, sink).await,
            Err(e) => Err(e),
        };
        self.disconnect(&mut session);
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
