pub mod error;
pub mod factory;
pub mod ftp;
pub mod retry;
pub mod session;
pub mod store;
pub mod tls;
pub mod traits;

pub use error::ConnectorError;
pub use factory::SourceConnectorFactory;
pub use ftp::{FtpSettings, PlainFtpOpener, SecureFtpOpener};
pub use retry::RetryPolicy;
pub use session::{EntryKind, RemoteEntry, SessionConnector, SessionOpener, TransportSession};
pub use store::{ObjectStoreConnector, StoreLocation};
pub use traits::{ConnectorFactory, DynConnector, SourceConnector};
