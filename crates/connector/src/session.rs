//! Connection lifecycle for blocking, session-oriented transports (FTP, FTPS).
//!
//! A [`SessionConnector`] owns at most one live session. Each `list`/`fetch`
//! call connects if needed, runs its operation on the blocking thread pool,
//! and always tears the session down afterwards. Disconnect failures are
//! logged and swallowed so the operation's own result is what the caller sees.
//!
//! Fetched bytes cross from the blocking thread to the async sink through a
//! bounded channel, so at most [`FETCH_QUEUE_CHUNKS`] chunks are in memory.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use slotfeed_core::RemoteFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConnectorError;
use crate::traits::SourceConnector;

/// Kind of a directory entry as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One raw entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            modified,
            size: None,
        }
    }

    fn into_remote_file(self) -> RemoteFile {
        RemoteFile {
            name: self.name,
            timestamp: self.modified,
            size: self.size,
        }
    }
}

/// An established, authenticated transport session. All calls block.
pub trait TransportSession: Send + 'static {
    fn list_entries(&mut self, directory: &str) -> Result<Vec<RemoteEntry>, ConnectorError>;

    /// Stream the file at `path` into `out`, returning the byte count.
    fn retrieve(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ConnectorError>;

    /// Politely end the session. Callers ignore failures.
    fn close(&mut self) -> Result<(), ConnectorError>;
}

/// Opens sessions: connect, check the greeting status, authenticate.
///
/// Must fail fast with a [`ConnectorError`] at the first rejected step.
pub trait SessionOpener: Send + Sync + 'static {
    type Session: TransportSession;

    fn open(&self) -> Result<Self::Session, ConnectorError>;

    /// URL-ish label used for connector names and logs.
    fn endpoint(&self) -> String;
}

struct SessionState<O: SessionOpener> {
    opener: O,
    directory: String,
    session: Mutex<Option<O::Session>>,
}

impl<O: SessionOpener> SessionState<O> {
    /// Run `op` against a connected session, then disconnect regardless of outcome.
    fn run<T, F>(&self, op: F) -> Result<T, ConnectorError>
    where
        F: FnOnce(&mut O::Session, &str) -> Result<T, ConnectorError>,
    {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self
            .connect(&mut slot)
            .and_then(|session| op(session, &self.directory));
        self.disconnect(&mut slot);
        result
    }

    /// No-op when a session is already open.
    fn connect<'a>(
        &self,
        slot: &'a mut Option<O::Session>,
    ) -> Result<&'a mut O::Session, ConnectorError> {
        let session = match slot.take() {
            Some(session) => session,
            None => {
                debug!(endpoint = %self.opener.endpoint(), "connecting");
                self.opener.open()?
            }
        };
        Ok(slot.insert(session))
    }

    fn disconnect(&self, slot: &mut Option<O::Session>) {
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.close() {
                warn!(endpoint = %self.opener.endpoint(), error = %e, "disconnect failed, ignoring");
            }
        }
    }
}

/// [`SourceConnector`] over any blocking [`SessionOpener`].
pub struct SessionConnector<O: SessionOpener> {
    state: Arc<SessionState<O>>,
    name: String,
}

impl<O: SessionOpener> SessionConnector<O> {
    pub fn new(opener: O, directory: impl Into<String>) -> Self {
        let directory = directory.into();
        let name = format!("{}/{}", opener.endpoint(), directory.trim_start_matches('/'));
        Self {
            state: Arc::new(SessionState {
                opener,
                directory,
                session: Mutex::new(None),
            }),
            name,
        }
    }

    fn spawn_session<T, F>(&self, op: F) -> JoinHandle<Result<T, ConnectorError>>
    where
        T: Send + 'static,
        F: FnOnce(&mut O::Session, &str) -> Result<T, ConnectorError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || state.run(op))
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, ConnectorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut O::Session, &str) -> Result<T, ConnectorError> + Send + 'static,
    {
        self.spawn_session(op)
            .await
            .map_err(|e| ConnectorError::Task(e.to_string()))?
    }
}

/// Chunks buffered between the transfer thread and the async sink.
pub const FETCH_QUEUE_CHUNKS: usize = 16;

/// Blocking writer that hands each chunk to the async side.
struct ChunkSender {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChunkSender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fetch sink closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Join a directory and an entry name with exactly one separator.
pub(crate) fn join_remote(directory: &str, name: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        format!("/{}", name.trim_start_matches('/'))
    } else {
        format!("{}/{}", directory, name.trim_start_matches('/'))
    }
}

#[async_trait]
impl<O: SessionOpener> SourceConnector for SessionConnector<O> {
    type Slot = RemoteFile;

    async fn list(&self) -> Result<Vec<RemoteFile>, ConnectorError> {
        let entries = self
            .with_session(|session, directory| session.list_entries(directory))
            .await?;
        let total = entries.len();
        let mut files: Vec<RemoteFile> = entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .map(RemoteEntry::into_remote_file)
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(connector = %self.name, total, files = files.len(), "listed source directory");
        Ok(files)
    }

    async fn fetch(
        &self,
        slot: &RemoteFile,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ConnectorError> {
        let name = slot.name.clone();
        let (tx, mut rx) = mpsc::channel::<Bytes>(FETCH_QUEUE_CHUNKS);
        let transfer = self.spawn_session(move |session, directory| {
            let mut out = ChunkSender { tx };
            session.retrieve(&join_remote(directory, &name), &mut out)
        });

        let mut sink_result = Ok(());
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = sink.write_all(&chunk).await {
                sink_result = Err(e);
                break;
            }
        }
        // A sink failure closes the channel, which aborts the transfer.
        drop(rx);

        let transferred = transfer
            .await
            .map_err(|e| ConnectorError::Task(e.to_string()))?;
        sink_result?;
        let copied = transferred?;
        sink.flush().await?;
        debug!(connector = %self.name, slot = %slot.name, bytes = copied, "fetched slot");
        Ok(copied)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Last path component, for transports that report full paths in listings.
pub(crate) fn base_name(raw: &str) -> &str {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use chrono::TimeZone;

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        lists: AtomicUsize,
    }

    struct FakeOpener {
        counters: Arc<Counters>,
        entries: Vec<RemoteEntry>,
        files: HashMap<String, Vec<u8>>,
        refuse_connect: bool,
        fail_list: bool,
        fail_close: bool,
    }

    impl FakeOpener {
        fn new(counters: Arc<Counters>) -> Self {
            Self {
                counters,
                entries: Vec::new(),
                files: HashMap::new(),
                refuse_connect: false,
                fail_list: false,
                fail_close: false,
            }
        }
    }

    struct FakeSession {
        counters: Arc<Counters>,
        entries: Vec<RemoteEntry>,
        files: HashMap<String, Vec<u8>>,
        chunk_size: usize,
        fail_list: bool,
        fail_close: bool,
    }

    impl TransportSession for FakeSession {
        fn list_entries(&mut self, directory: &str) -> Result<Vec<RemoteEntry>, ConnectorError> {
            self.counters.lists.fetch_add(1, Ordering::SeqCst);
            if self.fail_list {
                return Err(ConnectorError::List {
                    directory: directory.to_string(),
                    reason: "550 listing denied".into(),
                });
            }
            Ok(self.entries.clone())
        }

        fn retrieve(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ConnectorError> {
            let body = self.files.get(path).ok_or_else(|| ConnectorError::Fetch {
                path: path.to_string(),
                reason: "550 no such file".into(),
            })?;
            // Small chunks so a body spans several channel sends.
            for chunk in body.chunks(self.chunk_size) {
                out.write_all(chunk)?;
            }
            Ok(body.len() as u64)
        }

        fn close(&mut self) -> Result<(), ConnectorError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(ConnectorError::Disconnect("421 timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    impl SessionOpener for FakeOpener {
        type Session = FakeSession;

        fn open(&self) -> Result<FakeSession, ConnectorError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect {
                return Err(ConnectorError::Connect {
                    endpoint: self.endpoint(),
                    reason: "connection refused".into(),
                });
            }
            Ok(FakeSession {
                counters: Arc::clone(&self.counters),
                entries: self.entries.clone(),
                files: self.files.clone(),
                chunk_size: 4,
                fail_list: self.fail_list,
                fail_close: self.fail_close,
            })
        }

        fn endpoint(&self) -> String {
            "fake://localhost:21".into()
        }
    }

    fn entry(name: &str, kind: EntryKind) -> RemoteEntry {
        RemoteEntry {
            name: name.into(),
            kind,
            modified: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            size: Some(10),
        }
    }

    #[tokio::test]
    async fn list_keeps_files_sorted_by_name() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.entries = vec![
            entry("b.csv", EntryKind::File),
            entry("archive", EntryKind::Directory),
            entry("a.csv", EntryKind::File),
            entry("latest", EntryKind::Symlink),
        ];
        let connector = SessionConnector::new(opener, "/outgoing");

        let files = connector.list().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert_eq!(files[0].size, Some(10));
        assert_eq!(connector.name(), "fake://localhost:21/outgoing");
    }

    #[tokio::test]
    async fn every_operation_connects_and_disconnects() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.files.insert("/outgoing/a.csv".into(), b"hello".to_vec());
        let connector = SessionConnector::new(opener, "/outgoing");

        connector.list().await.unwrap();
        connector.list().await.unwrap();
        let mut sink = Vec::new();
        let copied = connector
            .fetch(&RemoteFile::new("a.csv", None), &mut sink)
            .await
            .unwrap();

        assert_eq!(copied, 5);
        assert_eq!(sink, b"hello");
        assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_operation_still_disconnects() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.fail_list = true;
        let connector = SessionConnector::new(opener, "/outgoing");

        let err = connector.list().await.unwrap_err();
        assert!(matches!(err, ConnectorError::List { .. }));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_failure_is_swallowed() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.fail_close = true;
        opener.entries = vec![entry("a.csv", EntryKind::File)];
        let connector = SessionConnector::new(opener, "/outgoing");

        let files = connector.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_connection_fails_fast() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.refuse_connect = true;
        let connector = SessionConnector::new(opener, "/outgoing");

        let err = connector.list().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Connect { .. }));
        assert_eq!(counters.lists.load(Ordering::SeqCst), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let counters = Arc::new(Counters::default());
        let connector = SessionConnector::new(FakeOpener::new(Arc::clone(&counters)), "/outgoing");

        let mut sink = Vec::new();
        let err = connector
            .fetch(&RemoteFile::new("gone.csv", None), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Fetch { ref path, .. } if path == "/outgoing/gone.csv"));
        assert!(sink.is_empty());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_streams_in_chunks() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        let body: Vec<u8> = (0..200u8).collect();
        opener.files.insert("/outgoing/big.bin".into(), body.clone());
        let connector = SessionConnector::new(opener, "/outgoing");

        let mut sink = Vec::new();
        let copied = connector
            .fetch(&RemoteFile::new("big.bin", None), &mut sink)
            .await
            .unwrap();

        assert_eq!(copied, 200);
        assert_eq!(sink, body);
    }

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn sink_failure_aborts_transfer_and_disconnects() {
        let counters = Arc::new(Counters::default());
        let mut opener = FakeOpener::new(Arc::clone(&counters));
        opener.files.insert("/outgoing/big.bin".into(), vec![7u8; 4096]);
        let connector = SessionConnector::new(opener, "/outgoing");

        let err = connector
            .fetch(&RemoteFile::new("big.bin", None), &mut BrokenSink)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectorError::Io(ref e) if e.to_string() == "disk full"));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn join_remote_normalizes_separators() {
        assert_eq!(join_remote("/outgoing/", "/a.csv"), "/outgoing/a.csv");
        assert_eq!(join_remote("outgoing", "a.csv"), "outgoing/a.csv");
        assert_eq!(join_remote("/", "a.csv"), "/a.csv");
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("/outgoing/a.csv"), "a.csv");
        assert_eq!(base_name("a.csv"), "a.csv");
    }
}
