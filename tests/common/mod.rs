#![allow(dead_code)]

use async_trait::async_trait;
use serial_pad::domain::controller::{ConnectionController, ControllerHandle};
use serial_pad::domain::models::{
    ConnectionState, PeerDescriptor, PeerHandle, Snapshot, StatusMessage,
};
use serial_pad::infrastructure::platform::{DesktopEnvironment, PeerEnumerator};
use serial_pad::infrastructure::transport::{Link, StreamLink, Transport, TransportError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn rover() -> PeerDescriptor {
    PeerDescriptor::new(Some("Rover".to_string()), "AA:BB", PeerHandle::new("rover"))
}

/// Link over an in-memory duplex whose writes can be made to fail.
pub struct ScriptedLink {
    inner: StreamLink<DuplexStream>,
    pub fail_writes: AtomicBool,
    pub written: Mutex<Vec<u8>>,
    pub closes: AtomicUsize,
}

impl ScriptedLink {
    /// Returns the link and the remote device's end of the stream.
    pub fn pair() -> (Arc<ScriptedLink>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        let link = Arc::new(ScriptedLink {
            inner: StreamLink::new(local),
            fail_writes: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        (link, remote)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Link for ScriptedLink {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.read(buf).await
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        self.inner.write_all(bytes).await?;
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Transport whose `open` completes when the test supplies a result.
pub struct GatedTransport {
    results: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Arc<dyn Link>, TransportError>>>,
    pub open_calls: AtomicUsize,
    /// Signalled as each `open` takes its result.
    pub opened: Notify,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn open(&self, _peer: &PeerDescriptor) -> Result<Arc<dyn Link>, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().await;
        let result = match results.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed),
        };
        self.opened.notify_one();
        result
    }
}

pub struct CountingEnumerator {
    pub peers: Mutex<Vec<PeerDescriptor>>,
    pub calls: AtomicUsize,
}

impl CountingEnumerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PeerEnumerator for CountingEnumerator {
    fn paired_peers(&self) -> anyhow::Result<Vec<PeerDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.peers.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub handle: ControllerHandle,
    pub env: Arc<DesktopEnvironment>,
    pub enumerator: Arc<CountingEnumerator>,
    pub transport: Arc<GatedTransport>,
    pub opens: mpsc::UnboundedSender<Result<Arc<dyn Link>, TransportError>>,
    pub notices: mpsc::UnboundedReceiver<StatusMessage>,
    pub snapshots: watch::Receiver<Snapshot>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(env: DesktopEnvironment, selected: Option<PeerDescriptor>) -> Self {
        let env = Arc::new(env);
        let enumerator = Arc::new(CountingEnumerator {
            peers: Mutex::new(vec![rover()]),
            calls: AtomicUsize::new(0),
        });
        let (opens, results) = mpsc::unbounded_channel();
        let transport = Arc::new(GatedTransport {
            results: tokio::sync::Mutex::new(results),
            open_calls: AtomicUsize::new(0),
            opened: Notify::new(),
        });
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let (controller, handle) = ConnectionController::new(
            env.clone(),
            enumerator.clone(),
            transport.clone(),
            notice_tx,
        );
        let task = controller.with_selected(selected).spawn();
        let snapshots = handle.subscribe();

        Self {
            handle,
            env,
            enumerator,
            transport,
            opens,
            notices,
            snapshots,
            task,
        }
    }

    /// Everything granted and enabled, Rover already selected.
    pub fn ready() -> Self {
        Self::start(DesktopEnvironment::default(), Some(rover()))
    }

    pub async fn wait_state(&mut self, state: ConnectionState) -> Snapshot {
        let snapshot = tokio::time::timeout(WAIT, self.snapshots.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
            .expect("controller stopped")
            .clone();
        assert_eq!(
            snapshot.session_active,
            snapshot.state.has_session(),
            "session presence must match {:?}",
            snapshot.state
        );
        snapshot
    }

    /// Connect Rover and complete the open with a fresh scripted link.
    pub async fn connected(&mut self) -> (Arc<ScriptedLink>, DuplexStream) {
        self.wait_state(ConnectionState::Disconnected).await;
        self.handle.connect();
        self.wait_state(ConnectionState::Connecting).await;

        let (link, remote) = ScriptedLink::pair();
        self.opens.send(Ok(link.clone() as Arc<dyn Link>)).unwrap();
        self.wait_state(ConnectionState::Connected).await;
        while self.next_notice().await != "Connected to Rover" {}
        (link, remote)
    }

    pub async fn next_notice(&mut self) -> String {
        tokio::time::timeout(WAIT, self.notices.recv())
            .await
            .expect("timed out waiting for a notice")
            .expect("notifier closed")
            .message
    }

    pub fn drain_notices(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            messages.push(notice.message);
        }
        messages
    }

    pub fn open_calls(&self) -> usize {
        self.transport.open_calls.load(Ordering::SeqCst)
    }
}
