//! Connection lifecycle state machine.
//!
//! A single actor task owns the lifecycle state, the selected peer, the peer
//! directory and the transport session. Intents from the front end and
//! reports from background work (connect attempt, link monitor, dispatcher)
//! arrive on channels and are applied one at a time, so no two transitions
//! race.
//!
//! ```text
//!            ┌──────────────┐  connect   ┌────────────┐  opened  ┌───────────┐
//!  select ──▶│ Disconnected │ ─────────▶ │ Connecting │ ───────▶ │ Connected │
//!            └──────────────┘            └────────────┘          └───────────┘
//!                   ▲        open failed / no peer │   lost / send failed │
//!                   └──────────────── teardown ────┴──────────────────────┘
//! ```

use crate::domain::models::{
    ConnectionState, Direction, MessageSeverity, PeerDescriptor, RadioEvent, Snapshot,
    StatusMessage,
};
use crate::infrastructure::dispatcher::{Dispatcher, SendFailure};
use crate::infrastructure::monitor::{LinkLost, LinkMonitor, DEFAULT_BUFFER_SIZE};
use crate::infrastructure::platform::{Environment, PeerEnumerator};
use crate::infrastructure::transport::{Link, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// User intents accepted by the controller.
#[derive(Debug, Clone)]
pub enum Intent {
    /// App start or resume: re-check adapter and permissions
    Resume,
    /// Aggregate result of a permission request
    PermissionResult(bool),
    ShowPeers,
    SelectPeer(PeerDescriptor),
    Connect,
    Disconnect,
    Send(Direction),
    Radio(RadioEvent),
    /// App teardown
    Shutdown,
}

/// Outcome of the background connect attempt.
enum AttemptResult {
    /// The selected peer is no longer among the paired peers
    NoPeer,
    Opened(Result<Arc<dyn Link>, TransportError>),
}

/// Reports from background tasks, tagged with the session they belong to.
enum Report {
    Attempt { session: u64, result: AttemptResult },
    Lost(LinkLost),
    SendFailed(SendFailure),
}

impl From<LinkLost> for Report {
    fn from(lost: LinkLost) -> Self {
        Self::Lost(lost)
    }
}

impl From<SendFailure> for Report {
    fn from(failure: SendFailure) -> Self {
        Self::SendFailed(failure)
    }
}

/// Resources of one connect attempt / connection. Released together.
struct Session {
    id: u64,
    link: Option<Arc<dyn Link>>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    attempt: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    dispatcher: Option<Dispatcher>,
}

/// Front-end side of the controller: issues intents, observes snapshots.
#[derive(Clone)]
pub struct ControllerHandle {
    intents: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<Snapshot>,
}

impl ControllerHandle {
    /// Returns false once the controller has stopped.
    pub fn dispatch(&self, intent: Intent) -> bool {
        self.intents.send(intent).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.dispatch(Intent::Resume)
    }

    pub fn permission_result(&self, all_granted: bool) -> bool {
        self.dispatch(Intent::PermissionResult(all_granted))
    }

    pub fn show_peers(&self) -> bool {
        self.dispatch(Intent::ShowPeers)
    }

    pub fn select_peer(&self, peer: PeerDescriptor) -> bool {
        self.dispatch(Intent::SelectPeer(peer))
    }

    pub fn connect(&self) -> bool {
        self.dispatch(Intent::Connect)
    }

    pub fn disconnect(&self) -> bool {
        self.dispatch(Intent::Disconnect)
    }

    pub fn send(&self, direction: Direction) -> bool {
        self.dispatch(Intent::Send(direction))
    }

    pub fn radio(&self, event: RadioEvent) -> bool {
        self.dispatch(Intent::Radio(event))
    }

    pub fn shutdown(&self) -> bool {
        self.dispatch(Intent::Shutdown)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}

pub struct ConnectionController {
    state: ConnectionState,
    peers: Vec<PeerDescriptor>,
    selected: Option<PeerDescriptor>,
    session: Option<Session>,
    next_session: u64,

    environment: Arc<dyn Environment>,
    enumerator: Arc<dyn PeerEnumerator>,
    transport: Arc<dyn Transport>,
    notifier: mpsc::UnboundedSender<StatusMessage>,

    intents: mpsc::UnboundedReceiver<Intent>,
    reports_tx: mpsc::UnboundedSender<Report>,
    reports_rx: mpsc::UnboundedReceiver<Report>,
    snapshot: watch::Sender<Snapshot>,

    monitor_buffer_size: usize,
}

impl ConnectionController {
    pub fn new(
        environment: Arc<dyn Environment>,
        enumerator: Arc<dyn PeerEnumerator>,
        transport: Arc<dyn Transport>,
        notifier: mpsc::UnboundedSender<StatusMessage>,
    ) -> (Self, ControllerHandle) {
        let (intents_tx, intents) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(Snapshot::default());

        let controller = Self {
            state: ConnectionState::Disconnected,
            peers: Vec::new(),
            selected: None,
            session: None,
            next_session: 1,
            environment,
            enumerator,
            transport,
            notifier,
            intents,
            reports_tx,
            reports_rx,
            snapshot,
            monitor_buffer_size: DEFAULT_BUFFER_SIZE,
        };
        let handle = ControllerHandle {
            intents: intents_tx,
            snapshot: snapshot_rx,
        };
        (controller, handle)
    }

    /// Start with a previously chosen peer. Does not connect.
    pub fn with_selected(mut self, selected: Option<PeerDescriptor>) -> Self {
        self.selected = selected;
        self
    }

    pub fn with_monitor_buffer_size(mut self, size: usize) -> Self {
        self.monitor_buffer_size = size.max(1);
        self
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Connection controller started");
        self.publish();
        self.check_environment().await;

        loop {
            // Intents first: a queued disconnect beats a connect result that
            // arrived in the meantime.
            tokio::select! {
                biased;
                intent = self.intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.handle_intent(intent).await,
                },
                Some(report) = self.reports_rx.recv() => self.handle_report(report).await,
            }
        }

        // No transition after teardown; the last published state stands.
        self.teardown().await;
        info!("Connection controller stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn handle_intent(&mut self, intent: Intent) {
        debug!("Intent {:?} in state {:?}", intent, self.state);
        match intent {
            Intent::Resume => self.check_environment().await,
            Intent::PermissionResult(granted) => self.on_permission_result(granted).await,
            Intent::ShowPeers => self.show_peers().await,
            Intent::SelectPeer(peer) => self.select_peer(peer),
            Intent::Connect => self.connect().await,
            Intent::Disconnect => self.disconnect().await,
            Intent::Send(direction) => self.send(direction),
            Intent::Radio(event) => self.on_radio(event).await,
            Intent::Shutdown => {}
        }
    }

    async fn handle_report(&mut self, report: Report) {
        match report {
            Report::Attempt { session, result } => self.on_attempt(session, result).await,
            Report::Lost(lost) => self.on_link_lost(lost).await,
            Report::SendFailed(failure) => self.on_send_failed(failure).await,
        }
    }

    // ---- environment -------------------------------------------------------

    async fn check_environment(&mut self) {
        if self.state == ConnectionState::AdapterUnsupported {
            return;
        }
        if !self.environment.adapter_present() {
            self.leave_session(ConnectionState::AdapterUnsupported).await;
            return;
        }
        if !self.environment.permissions_granted() {
            self.leave_session(ConnectionState::PermissionsNeeded).await;
            return;
        }
        if !self.environment.adapter_enabled() {
            self.leave_session(ConnectionState::AdapterDisabled).await;
            return;
        }

        if !self.state.has_session() {
            self.refresh_directory();
            if self.state != ConnectionState::SelectingPeer {
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn on_permission_result(&mut self, granted: bool) {
        if !granted {
            self.notify(
                "Bluetooth permissions are required to use this app.",
                MessageSeverity::Warning,
            );
            self.leave_session(ConnectionState::PermissionsNeeded).await;
            return;
        }

        if !self.environment.adapter_present() {
            self.leave_session(ConnectionState::AdapterUnsupported).await;
        } else if self.environment.adapter_enabled() {
            self.notify("Permissions granted. Ready to connect.", MessageSeverity::Success);
            self.leave_session(ConnectionState::Disconnected).await;
            self.refresh_directory();
        } else {
            self.notify(
                "Permissions granted, but Bluetooth is disabled.",
                MessageSeverity::Warning,
            );
            self.leave_session(ConnectionState::AdapterDisabled).await;
        }
    }

    async fn on_radio(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Off => {
                if self.state != ConnectionState::AdapterUnsupported {
                    self.notify("Bluetooth was turned off.", MessageSeverity::Warning);
                    self.leave_session(ConnectionState::AdapterDisabled).await;
                }
            }
            RadioEvent::On => {
                if self.state == ConnectionState::AdapterDisabled {
                    self.notify("Bluetooth turned on.", MessageSeverity::Info);
                    // Lands in Disconnected once the resume check passes.
                    self.check_environment().await;
                }
            }
        }
    }

    // ---- peers ---------------------------------------------------------------

    /// Replace the directory with the enumerator's current list.
    fn refresh_directory(&mut self) {
        match self.enumerator.paired_peers() {
            Ok(peers) => {
                debug!("Peer directory refreshed: {} peers", peers.len());
                self.peers = peers;
            }
            Err(e) => {
                warn!("Peer enumeration failed: {}", e);
                self.peers.clear();
                self.notify(
                    format!("Error loading paired devices: {}", e),
                    MessageSeverity::Error,
                );
            }
        }
        self.publish();
    }

    async fn show_peers(&mut self) {
        if self.state.has_session() {
            debug!("Ignoring peer list request while {:?}", self.state);
            return;
        }
        if !self.environment.permissions_granted() {
            self.notify("Permissions required to view devices.", MessageSeverity::Warning);
            self.set_state(ConnectionState::PermissionsNeeded);
            return;
        }
        if !self.environment.adapter_present() {
            self.set_state(ConnectionState::AdapterUnsupported);
            return;
        }
        if !self.environment.adapter_enabled() {
            self.notify("Enable Bluetooth to view devices.", MessageSeverity::Warning);
            self.set_state(ConnectionState::AdapterDisabled);
            return;
        }

        self.enter_selection();
    }

    fn enter_selection(&mut self) {
        self.refresh_directory();
        self.set_state(ConnectionState::SelectingPeer);
        if self.peers.is_empty() {
            self.notify(
                "No paired devices found. Pair in system settings.",
                MessageSeverity::Warning,
            );
        }
    }

    fn select_peer(&mut self, peer: PeerDescriptor) {
        if self.state != ConnectionState::SelectingPeer {
            debug!("Ignoring peer selection while {:?}", self.state);
            return;
        }
        info!("Selected peer {} ({})", peer.display_name(), peer.address);
        self.selected = Some(peer);
        self.set_state(ConnectionState::Disconnected);
    }

    // ---- connect -----------------------------------------------------------

    async fn connect(&mut self) {
        if self.state.has_session() {
            debug!("Connect ignored: already {:?}", self.state);
            return;
        }
        if !self.environment.permissions_granted() {
            self.set_state(ConnectionState::PermissionsNeeded);
            self.environment.request_permissions();
            self.notify("Permissions required to connect.", MessageSeverity::Warning);
            return;
        }
        if self.selected.is_none() {
            self.notify("Please select a device first", MessageSeverity::Info);
            if self.environment.adapter_present() && self.environment.adapter_enabled() {
                self.enter_selection();
            } else {
                self.set_state(ConnectionState::SelectingPeer);
            }
            return;
        }
        if !self.environment.adapter_present() {
            self.notify("Bluetooth not supported on this device.", MessageSeverity::Error);
            self.set_state(ConnectionState::AdapterUnsupported);
            return;
        }
        if !self.environment.adapter_enabled() {
            self.notify("Bluetooth is disabled. Please enable it.", MessageSeverity::Warning);
            self.set_state(ConnectionState::AdapterDisabled);
            return;
        }

        self.begin_attempt();
    }

    fn begin_attempt(&mut self) {
        let id = self.next_session;
        self.next_session += 1;

        let cancel = CancellationToken::new();
        let selected = self.selected.clone();
        let label = selected
            .as_ref()
            .map(|p| p.label().to_string())
            .unwrap_or_default();

        let attempt = {
            let cancel = cancel.clone();
            let enumerator = self.enumerator.clone();
            let transport = self.transport.clone();
            let reports = self.reports_tx.clone();
            tokio::spawn(async move {
                let resolved = match selected {
                    None => None,
                    Some(selected) => match enumerator.paired_peers() {
                        Ok(peers) => peers.into_iter().find(|p| *p == selected),
                        Err(e) => {
                            warn!("Could not re-check paired peers: {}", e);
                            Some(selected)
                        }
                    },
                };

                let result = match resolved {
                    None => AttemptResult::NoPeer,
                    Some(peer) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        opened = transport.open(&peer) => AttemptResult::Opened(opened),
                    },
                };
                let _ = reports.send(Report::Attempt {
                    session: id,
                    result,
                });
            })
        };

        self.session = Some(Session {
            id,
            link: None,
            live: Arc::new(AtomicBool::new(false)),
            cancel,
            attempt: Some(attempt),
            monitor: None,
            dispatcher: None,
        });
        self.set_state(ConnectionState::Connecting);
        self.notify(format!("Connecting to {}...", label), MessageSeverity::Info);
    }

    async fn on_attempt(&mut self, session: u64, result: AttemptResult) {
        if !self.is_current(session) || self.state != ConnectionState::Connecting {
            debug!("Dropping stale connect result for session {}", session);
            if let AttemptResult::Opened(Ok(link)) = result {
                link.close().await;
            }
            return;
        }

        let label = self.selected_label();
        match result {
            AttemptResult::NoPeer => {
                self.notify(
                    "Error: No device selected for connection.",
                    MessageSeverity::Error,
                );
                self.leave_session(ConnectionState::PeerNotFound).await;
            }
            AttemptResult::Opened(Err(e)) => {
                warn!("Connection to {} failed: {}", label, e);
                self.notify(format!("Connection failed to {}.", label), MessageSeverity::Error);
                self.leave_session(ConnectionState::Disconnected).await;
            }
            AttemptResult::Opened(Ok(link)) => {
                let buffer_size = self.monitor_buffer_size;
                let reports = self.reports_tx.clone();
                if let Some(session) = self.session.as_mut() {
                    session.attempt = None;
                    session.live.store(true, Ordering::SeqCst);
                    session.monitor = Some(
                        LinkMonitor::new(
                            session.id,
                            link.clone(),
                            session.live.clone(),
                            session.cancel.clone(),
                        )
                        .with_buffer_size(buffer_size)
                        .spawn(reports.clone()),
                    );
                    session.dispatcher = Some(Dispatcher::spawn(
                        session.id,
                        link.clone(),
                        session.cancel.clone(),
                        reports,
                    ));
                    session.link = Some(link);
                }
                self.set_state(ConnectionState::Connected);
                self.notify(format!("Connected to {}", label), MessageSeverity::Success);
            }
        }
    }

    // ---- connected ---------------------------------------------------------

    async fn on_link_lost(&mut self, lost: LinkLost) {
        if !self.is_current(lost.session) || self.state != ConnectionState::Connected {
            debug!("Dropping stale loss report for session {}", lost.session);
            return;
        }
        info!("Link lost on session {}: {:?}", lost.session, lost.exit);
        self.notify("Connection lost.", MessageSeverity::Warning);
        self.leave_session(ConnectionState::Disconnected).await;
    }

    fn send(&mut self, direction: Direction) {
        if self.state != ConnectionState::Connected {
            self.notify("Cannot send: Not connected.", MessageSeverity::Warning);
            return;
        }
        let queued = self
            .session
            .as_ref()
            .and_then(|s| s.dispatcher.as_ref())
            .map(|d| d.send(direction))
            .unwrap_or(false);
        if !queued {
            // The writer already stopped; its failure report is on the way.
            debug!("Dispatcher gone, dropping {:?}", direction.as_str());
        }
    }

    async fn on_send_failed(&mut self, failure: SendFailure) {
        if !self.is_current(failure.session) || self.state != ConnectionState::Connected {
            debug!("Dropping stale send failure for session {}", failure.session);
            return;
        }
        warn!(
            "Sending {:?} failed: {}",
            failure.direction.as_str(),
            failure.error
        );
        self.notify("Send failed: Connection lost.", MessageSeverity::Error);
        self.leave_session(ConnectionState::Disconnected).await;
    }

    async fn disconnect(&mut self) {
        if !self.state.has_session() {
            debug!("Disconnect ignored in {:?}", self.state);
            return;
        }
        self.notify("Disconnecting...", MessageSeverity::Info);
        self.leave_session(ConnectionState::Disconnected).await;
    }

    // ---- session -----------------------------------------------------------

    /// Release the session, then move to `next`.
    async fn leave_session(&mut self, next: ConnectionState) {
        self.teardown().await;
        self.set_state(next);
    }

    /// Stop the monitor and writer, abandon a pending attempt, close the
    /// link, clear the session. Idempotent.
    async fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!("Tearing down session {}", session.id);

        session.live.store(false, Ordering::SeqCst);
        session.cancel.cancel();
        if let Some(attempt) = session.attempt {
            attempt.abort();
        }
        if let Some(monitor) = session.monitor {
            let _ = monitor.await;
        }
        if let Some(dispatcher) = session.dispatcher {
            dispatcher.join().await;
        }
        if let Some(link) = session.link {
            link.close().await;
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session)
    }

    fn selected_label(&self) -> String {
        self.selected
            .as_ref()
            .map(|p| p.label().to_string())
            .unwrap_or_default()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("State {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(Snapshot {
            state: self.state,
            peers: self.peers.clone(),
            selected: self.selected.clone(),
            session_active: self.session.is_some(),
        });
    }

    fn notify(&self, message: impl Into<String>, severity: MessageSeverity) {
        let message = message.into();
        info!("Notify: {}", message);
        let _ = self.notifier.send(StatusMessage::new(message, severity));
    }
}
