//! Terminal front end.
//!
//! Turns typed commands into controller intents and prints the snapshot
//! whenever it changes.

use crate::domain::controller::ControllerHandle;
use crate::domain::models::{
    ConnectionState, Direction, MessageSeverity, PeerDescriptor, RadioEvent, Snapshot,
    StatusMessage,
};
use crate::domain::settings::{KnownPeer, SettingsService};
use crate::infrastructure::platform::DesktopEnvironment;
use anyhow::Result;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};

pub const HELP: &str = "\
commands:
  peers                          list paired devices
  select <n>                     choose device n from the list
  pair <address> <endpoint> [name]  remember a device
  connect | disconnect
  up | down | left | right       send a direction
  grant | deny                   answer a permission request
  radio on | radio off
  resume | status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Peers,
    Select(usize),
    Pair {
        address: String,
        endpoint: String,
        name: Option<String>,
    },
    Connect,
    Disconnect,
    Send(Direction),
    Grant,
    Deny,
    Radio(RadioEvent),
    Resume,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(ParseCommandError::Empty)?;
        let head = head.to_ascii_lowercase();

        if let Ok(direction) = head.parse::<Direction>() {
            return Ok(Self::Send(direction));
        }

        let command = match head.as_str() {
            "peers" | "devices" => Self::Peers,
            "select" => {
                let n = words
                    .next()
                    .and_then(|w| w.parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .ok_or(ParseCommandError::Usage("select <n>"))?;
                Self::Select(n)
            }
            "pair" => {
                let usage = ParseCommandError::Usage("pair <address> <endpoint> [name]");
                let address = words.next().ok_or_else(|| usage.clone())?.to_string();
                let endpoint = words.next().ok_or(usage)?.to_string();
                let name = words.collect::<Vec<_>>().join(" ");
                Self::Pair {
                    address,
                    endpoint,
                    name: (!name.is_empty()).then_some(name),
                }
            }
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "grant" => Self::Grant,
            "deny" => Self::Deny,
            "radio" => match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("on") => Self::Radio(RadioEvent::On),
                Some("off") => Self::Radio(RadioEvent::Off),
                _ => return Err(ParseCommandError::Usage("radio on|off")),
            },
            "resume" => Self::Resume,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => return Err(ParseCommandError::Unknown(head)),
        };
        Ok(command)
    }
}

/// Human-readable view of a snapshot. Absent names show as "Unknown".
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = format!("[{}]", snapshot.state);

    if let Some(peer) = &snapshot.selected {
        if snapshot.state != ConnectionState::SelectingPeer {
            let _ = write!(out, " Device: {} ({})", peer.display_name(), peer.address);
        }
    }

    if snapshot.state == ConnectionState::SelectingPeer {
        if snapshot.peers.is_empty() {
            out.push_str("\n  (no paired devices)");
        }
        for (i, peer) in snapshot.peers.iter().enumerate() {
            let _ = write!(out, "\n  {}. {} ({})", i + 1, peer.display_name(), peer.address);
        }
    }

    match snapshot.state {
        ConnectionState::PermissionsNeeded => out.push_str("\n  type `grant` to grant permissions"),
        ConnectionState::AdapterUnsupported => {
            out.push_str("\n  This device does not support Bluetooth.")
        }
        _ => {}
    }
    out
}

fn render_notice(notice: &StatusMessage) -> String {
    let tag = match notice.severity {
        MessageSeverity::Info => "info",
        MessageSeverity::Success => "ok",
        MessageSeverity::Warning => "warn",
        MessageSeverity::Error => "error",
    };
    format!("({}) {}", tag, notice.message)
}

pub struct Console {
    handle: ControllerHandle,
    environment: Arc<DesktopEnvironment>,
    settings: Arc<Mutex<SettingsService>>,
}

impl Console {
    pub fn new(
        handle: ControllerHandle,
        environment: Arc<DesktopEnvironment>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        Self {
            handle,
            environment,
            settings,
        }
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(self, mut notices: mpsc::UnboundedReceiver<StatusMessage>) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut snapshots = self.handle.subscribe();
        let first = snapshots.borrow_and_update().clone();
        let mut accepted = first.selected.clone();
        println!("{}", HELP);
        println!("{}", render(&first));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.apply(command).await,
                        Err(e) => println!("{}", e),
                    }
                }
                Some(notice) = notices.recv() => println!("{}", render_notice(&notice)),
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.remember_accepted_selection(&mut accepted, &snapshot).await;
                    println!("{}", render(&snapshot));
                }
            }
        }

        self.handle.shutdown();
        Ok(())
    }

    async fn apply(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Peers => {
                self.handle.show_peers();
            }
            ConsoleCommand::Select(n) => {
                // Persisted once the controller reports the selection.
                let snapshot = self.handle.snapshot();
                match snapshot.peers.get(n - 1) {
                    Some(peer) => {
                        self.handle.select_peer(peer.clone());
                    }
                    None => println!("no device {} (run `peers` first)", n),
                }
            }
            ConsoleCommand::Pair {
                address,
                endpoint,
                name,
            } => {
                let peer = KnownPeer {
                    name,
                    address,
                    endpoint,
                };
                self.update_settings("paired device", move |s| s.add_known_peer(peer))
                    .await;
            }
            ConsoleCommand::Connect => {
                self.handle.connect();
            }
            ConsoleCommand::Disconnect => {
                self.handle.disconnect();
            }
            ConsoleCommand::Send(direction) => {
                self.handle.send(direction);
            }
            ConsoleCommand::Grant => {
                self.environment.set_granted(true);
                self.handle.permission_result(true);
            }
            ConsoleCommand::Deny => {
                self.environment.set_granted(false);
                self.handle.permission_result(false);
            }
            ConsoleCommand::Radio(event) => {
                self.environment.set_enabled(event == RadioEvent::On);
                self.handle.radio(event);
            }
            ConsoleCommand::Resume => {
                self.handle.resume();
            }
            ConsoleCommand::Status => println!("{}", render(&self.handle.snapshot())),
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
    }

    /// Persist the controller's selection when it changes to a new peer.
    async fn remember_accepted_selection(
        &self,
        accepted: &mut Option<PeerDescriptor>,
        snapshot: &Snapshot,
    ) {
        if snapshot.selected == *accepted {
            return;
        }
        accepted.clone_from(&snapshot.selected);
        if let Some(peer) = &snapshot.selected {
            let address = peer.address.clone();
            self.update_settings("selection", move |s| s.remember_selection(&address))
                .await;
        }
    }

    /// Apply a settings change. Saving touches the disk, so it runs on the
    /// blocking pool.
    async fn update_settings<F>(&self, what: &'static str, update: F)
    where
        F: FnOnce(&mut SettingsService) -> Result<()> + Send + 'static,
    {
        let settings = self.settings.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            update(&mut settings)
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not save {}: {}", what, e),
            Err(e) => error!("Settings task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller::ConnectionController;
    use crate::domain::models::PeerHandle;
    use crate::infrastructure::platform::SettingsPeerEnumerator;
    use crate::infrastructure::transport::TcpTransport;

    #[test]
    fn test_parse_commands() {
        assert_eq!("UP".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Send(Direction::Up)));
        assert_eq!("select 2".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Select(2)));
        assert_eq!(
            "radio off".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Radio(RadioEvent::Off))
        );
        assert_eq!(
            "pair AA:BB 127.0.0.1:7878 Snake Box".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Pair {
                address: "AA:BB".to_string(),
                endpoint: "127.0.0.1:7878".to_string(),
                name: Some("Snake Box".to_string()),
            })
        );
        assert!(matches!(
            "select 0".parse::<ConsoleCommand>(),
            Err(ParseCommandError::Usage(_))
        ));
        assert!(matches!(
            "fly".parse::<ConsoleCommand>(),
            Err(ParseCommandError::Unknown(_))
        ));
    }

    #[test]
    fn test_render_uses_unknown_for_missing_names() {
        let peer = PeerDescriptor::new(None, "AA:BB", PeerHandle::new("x"));
        let snapshot = Snapshot {
            state: ConnectionState::SelectingPeer,
            peers: vec![peer.clone()],
            selected: None,
            session_active: false,
        };
        assert!(render(&snapshot).contains("1. Unknown (AA:BB)"));

        let connected = Snapshot {
            state: ConnectionState::Connected,
            peers: vec![peer.clone()],
            selected: Some(peer),
            session_active: true,
        };
        assert_eq!(render(&connected), "[Connected] Device: Unknown (AA:BB)");
    }

    fn console_with_rover(dir: &std::path::Path) -> (Console, Arc<Mutex<SettingsService>>) {
        let mut service = SettingsService::load_from(dir.join("settings.json"));
        service
            .add_known_peer(KnownPeer {
                name: Some("Rover".to_string()),
                address: "AA:BB".to_string(),
                endpoint: "127.0.0.1:1".to_string(),
            })
            .unwrap();
        let settings = Arc::new(Mutex::new(service));
        let environment = Arc::new(DesktopEnvironment::default());
        let (notice_tx, _notices) = mpsc::unbounded_channel();

        let (controller, handle) = ConnectionController::new(
            environment.clone(),
            Arc::new(SettingsPeerEnumerator::new(settings.clone())),
            Arc::new(TcpTransport),
            notice_tx,
        );
        controller.spawn();
        (Console::new(handle, environment, settings.clone()), settings)
    }

    fn persisted_selection(settings: &Arc<Mutex<SettingsService>>) -> Option<String> {
        settings.lock().unwrap().get().last_selected_address.clone()
    }

    #[tokio::test]
    async fn test_selection_is_saved_only_once_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (console, settings) = console_with_rover(dir.path());
        let mut snapshots = console.handle.subscribe();
        let mut accepted = None;

        // The directory is listed while Disconnected, but selecting there is ignored.
        snapshots
            .wait_for(|s| s.state == ConnectionState::Disconnected && !s.peers.is_empty())
            .await
            .unwrap();
        console.apply(ConsoleCommand::Select(1)).await;
        console.apply(ConsoleCommand::Peers).await;
        let snapshot = snapshots
            .wait_for(|s| s.state == ConnectionState::SelectingPeer)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.selected, None);
        console.remember_accepted_selection(&mut accepted, &snapshot).await;
        assert_eq!(persisted_selection(&settings), None);

        console.apply(ConsoleCommand::Select(1)).await;
        let snapshot = snapshots
            .wait_for(|s| s.selected.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        console.remember_accepted_selection(&mut accepted, &snapshot).await;
        assert_eq!(persisted_selection(&settings), Some("AA:BB".to_string()));

        let reloaded = SettingsService::load_from(dir.path().join("settings.json"));
        assert_eq!(
            reloaded.get().restored_selection().map(|p| p.address),
            Some("AA:BB".to_string())
        );
    }

    #[tokio::test]
    async fn test_pair_saves_known_peer() {
        let dir = tempfile::tempdir().unwrap();
        let (console, settings) = console_with_rover(dir.path());

        console
            .apply("pair CC:DD /tmp/base.sock Base".parse().unwrap())
            .await;
        let peers = settings.lock().unwrap().get().known_peers.clone();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].name.as_deref(), Some("Base"));
    }
}
