//! FTP and FTPS sessions backed by `suppaftp`.
//!
//! The control socket is dialed here, with `default_timeout` on connect and
//! on every read and write, before the greeting is read. Data connections
//! use `data_timeout` the same way.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use slotfeed_core::config::{Credentials, SourceConfig};
use suppaftp::list::File;
use suppaftp::{FtpError, FtpResult, FtpStream, Mode, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::session::{base_name, EntryKind, RemoteEntry, SessionOpener, TransportSession};

const ANONYMOUS: &str = "anonymous";

/// Connection settings shared by the plain and secure openers.
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub default_timeout: Duration,
    pub data_timeout: Duration,
    pub mode: Mode,
}

impl FtpSettings {
    pub fn from_source(source: &SourceConfig) -> Self {
        Self {
            host: source.host.clone(),
            port: source.port,
            credentials: source.credentials.clone(),
            default_timeout: source.default_timeout(),
            data_timeout: source.data_timeout(),
            mode: if source.active_mode { Mode::Active } else { Mode::Passive },
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Result<SocketAddr, ConnectorError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(e.to_string()))?
            .next()
            .ok_or_else(|| self.connect_error("host resolved to no addresses"))
    }

    fn connect_error(&self, reason: impl Into<String>) -> ConnectorError {
        ConnectorError::Connect {
            endpoint: self.endpoint(),
            reason: reason.into(),
        }
    }

    /// A greeting other than "ready" surfaces as a status error.
    fn handshake_error(&self, err: FtpError) -> ConnectorError {
        match err {
            FtpError::UnexpectedResponse(response) => ConnectorError::Status {
                endpoint: self.endpoint(),
                reason: format!("{:?}", response.status),
            },
            other => self.connect_error(other.to_string()),
        }
    }

    fn user(&self) -> (&str, &str) {
        match &self.credentials {
            Some(creds) => (creds.username.as_str(), creds.password.as_str()),
            None => (ANONYMOUS, ANONYMOUS),
        }
    }

    fn auth_error(&self, err: FtpError) -> ConnectorError {
        ConnectorError::Auth {
            endpoint: self.endpoint(),
            user: self.user().0.to_string(),
            reason: err.to_string(),
        }
    }

    /// Dial the control connection with every socket timeout already set.
    fn connect_control(&self) -> Result<TcpStream, ConnectorError> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.default_timeout)
            .map_err(|e| self.connect_error(e.to_string()))?;
        stream.set_read_timeout(Some(self.default_timeout))?;
        stream.set_write_timeout(Some(self.default_timeout))?;
        Ok(stream)
    }
}

/// Passive-mode data socket builder bounded by `timeout`.
fn data_connector(timeout: Duration) -> impl Fn(SocketAddr) -> FtpResult<TcpStream> + Send + Sync + 'static {
    move |addr| {
        let open = || -> io::Result<TcpStream> {
            let stream = TcpStream::connect_timeout(&addr, timeout)?;
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
            Ok(stream)
        };
        open().map_err(FtpError::ConnectionError)
    }
}

/// Install the data-channel mode and timeouts on a freshly opened stream.
macro_rules! with_data_channel {
    ($stream:expr, $settings:expr) => {
        match $settings.mode {
            Mode::Active => $stream.active_mode($settings.data_timeout),
            mode => {
                let mut stream = $stream.passive_stream_builder(data_connector($settings.data_timeout));
                stream.set_mode(mode);
                stream
            }
        }
    };
}

fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let file = match File::from_str(line.trim_end()) {
        Ok(file) => file,
        Err(e) => {
            debug!(line, error = %e, "skipping unparseable listing line");
            return None;
        }
    };
    let kind = if file.is_directory() {
        EntryKind::Directory
    } else if file.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    Some(RemoteEntry {
        name: base_name(file.name()).to_string(),
        kind,
        modified: Some(DateTime::<Utc>::from(file.modified())),
        size: Some(file.size() as u64),
    })
}

macro_rules! ftp_session {
    ($stream:ty) => {
        impl TransportSession for $stream {
            fn list_entries(&mut self, directory: &str) -> Result<Vec<RemoteEntry>, ConnectorError> {
                let lines = self.list(Some(directory)).map_err(|e| ConnectorError::List {
                    directory: directory.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
            }

            fn retrieve(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ConnectorError> {
                let fetch_error = |reason: String| ConnectorError::Fetch {
                    path: path.to_string(),
                    reason,
                };
                let mut data = self.retr_as_stream(path).map_err(|e| fetch_error(e.to_string()))?;
                // On a failed copy the session is torn down without finalizing.
                let copied = io::copy(&mut data, out).map_err(|e| fetch_error(e.to_string()))?;
                self.finalize_retr_stream(data)
                    .map_err(|e| fetch_error(e.to_string()))?;
                Ok(copied)
            }

            fn close(&mut self) -> Result<(), ConnectorError> {
                self.quit()
                    .map_err(|e| ConnectorError::Disconnect(e.to_string()))
            }
        }
    };
}

ftp_session!(FtpStream);
ftp_session!(NativeTlsFtpStream);

/// Plain FTP.
pub struct PlainFtpOpener {
    settings: FtpSettings,
}

impl PlainFtpOpener {
    pub fn new(settings: FtpSettings) -> Self {
        Self { settings }
    }
}

impl SessionOpener for PlainFtpOpener {
    type Session = FtpStream;

    fn open(&self) -> Result<FtpStream, ConnectorError> {
        let settings = &self.settings;
        let control = settings.connect_control()?;
        let stream = FtpStream::connect_with_stream(control).map_err(|e| settings.handshake_error(e))?;
        let mut stream = with_data_channel!(stream, settings);
        let (user, password) = settings.user();
        if let Err(e) = stream.login(user, password) {
            let _ = stream.quit();
            return Err(settings.auth_error(e));
        }
        debug!(endpoint = %settings.endpoint(), user, "ftp session established");
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("ftp://{}", self.settings.endpoint())
    }
}

/// FTP over explicit TLS. Data-channel protection is always on.
pub struct SecureFtpOpener {
    settings: FtpSettings,
    tls: TlsConnector,
}

impl SecureFtpOpener {
    /// `tls` carries the key/trust material, loaded once at construction.
    pub fn new(settings: FtpSettings, tls: TlsConnector) -> Self {
        info!(endpoint = %settings.endpoint(), "ftps connector configured");
        Self { settings, tls }
    }
}

impl SessionOpener for SecureFtpOpener {
    type Session = NativeTlsFtpStream;

    fn open(&self) -> Result<NativeTlsFtpStream, ConnectorError> {
        let settings = &self.settings;
        let control = settings.connect_control()?;
        let plain = NativeTlsFtpStream::connect_with_stream(control)
            .map_err(|e| settings.handshake_error(e))?;
        // AUTH TLS, then PBSZ 0 / PROT P; fails if the server certificate does not validate.
        // The handshake runs under the control socket's timeouts.
        let secure = plain
            .into_secure(NativeTlsConnector::from(self.tls.clone()), &settings.host)
            .map_err(|e| settings.connect_error(format!("tls negotiation: {e}")))?;
        let mut stream = with_data_channel!(secure, settings);
        let (user, password) = settings.user();
        if let Err(e) = stream.login(user, password) {
            let _ = stream.quit();
            return Err(settings.auth_error(e));
        }
        debug!(endpoint = %settings.endpoint(), user, "ftps session established");
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("ftps://{}", self.settings.endpoint())
    }
}
