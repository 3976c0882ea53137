//! Transport Module
//!
//! Byte-stream abstraction the connection lifecycle runs on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   open(peer)   ┌──────────────────────┐
//! │  dyn Transport       │ ─────────────▶ │  Arc<dyn Link>       │
//! │  (tcp / local)       │                │  read / write / close│
//! └──────────────────────┘                └──────────┬───────────┘
//!                                                    │
//!                                   ┌────────────────┴───────────┐
//!                                   ▼                            ▼
//!                             LinkMonitor (read)         Dispatcher (write)
//! ```
//!
//! Transports never retry. `close` is idempotent and swallows errors.
//!
//! - [`tcp`] - `host:port` endpoints over TCP
//! - [`local`] - local socket names / paths

pub mod local;
pub mod tcp;

use crate::domain::models::PeerDescriptor;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

pub use local::LocalSocketTransport;
pub use tcp::TcpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("link is closed")]
    Closed,
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// Opens links to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, peer: &PeerDescriptor) -> Result<Arc<dyn Link>, TransportError>;
}

/// An open duplex byte stream.
#[async_trait]
pub trait Link: Send + Sync {
    /// Read into `buf`. `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `bytes` and flush.
    async fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Close the stream. Safe to call repeatedly.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// [`Link`] over any tokio stream.
///
/// The stream is split so a pending read does not hold up a write.
pub struct StreamLink<S> {
    reader: Mutex<Option<ReadHalf<S>>>,
    writer: Mutex<Option<WriteHalf<S>>>,
    closed: AtomicBool,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;
        Ok(reader.read(buf).await?)
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        // Dropping the read half releases the underlying stream.
        self.reader.lock().await.take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
