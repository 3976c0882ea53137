//! Link Monitor
//!
//! Detects silent loss of an open link by reading until the stream ends or
//! fails. Inbound bytes are only a liveness signal and are discarded.

use crate::infrastructure::transport::{Link, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Why a monitor stopped.
#[derive(Debug)]
pub enum MonitorExit {
    EndOfStream,
    Failed(TransportError),
    Cancelled,
}

/// Loss report sent to the session owner. Never sent for a cancelled monitor.
#[derive(Debug)]
pub struct LinkLost {
    pub session: u64,
    pub exit: MonitorExit,
}

pub struct LinkMonitor {
    session: u64,
    link: Arc<dyn Link>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    buffer_size: usize,
}

impl LinkMonitor {
    pub fn new(
        session: u64,
        link: Arc<dyn Link>,
        live: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            link,
            live,
            cancel,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Read until end of stream, error, or cancellation.
    pub async fn run(&self) -> MonitorExit {
        let mut buffer = vec![0u8; self.buffer_size];

        let exit = loop {
            if self.cancel.is_cancelled() || !self.live.load(Ordering::SeqCst) {
                break MonitorExit::Cancelled;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break MonitorExit::Cancelled,
                result = self.link.read(&mut buffer) => match result {
                    Ok(0) => break MonitorExit::EndOfStream,
                    Ok(n) => trace!("Monitor discarded {} inbound bytes", n),
                    Err(e) => break MonitorExit::Failed(e),
                },
            }
        };

        self.live.store(false, Ordering::SeqCst);
        exit
    }

    /// Run on its own task, reporting loss to `reports`.
    pub fn spawn<T>(self, reports: mpsc::UnboundedSender<T>) -> JoinHandle<()>
    where
        T: From<LinkLost> + Send + 'static,
    {
        tokio::spawn(async move {
            let exit = self.run().await;
            match &exit {
                MonitorExit::Cancelled => {
                    debug!("Link monitor for session {} cancelled", self.session);
                    return;
                }
                MonitorExit::EndOfStream => {
                    info!("Link monitor for session {} saw end of stream", self.session);
                }
                MonitorExit::Failed(e) => {
                    warn!("Link monitor for session {} read failed: {}", self.session, e);
                }
            }
            let _ = reports.send(
                LinkLost {
                    session: self.session,
                    exit,
                }
                .into(),
            );
        })
    }
}
