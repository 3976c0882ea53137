//! Platform collaborators: adapter/permission signals and paired-peer
//! enumeration.

use crate::domain::models::PeerDescriptor;
use crate::domain::settings::SettingsService;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Adapter and permission signals that gate lifecycle transitions.
pub trait Environment: Send + Sync {
    fn adapter_present(&self) -> bool;
    fn adapter_enabled(&self) -> bool;
    fn permissions_granted(&self) -> bool;

    /// Ask the user for the required permissions. The outcome is delivered
    /// later as a permission result intent.
    fn request_permissions(&self);
}

/// Produces the full list of paired peers on each call.
pub trait PeerEnumerator: Send + Sync {
    fn paired_peers(&self) -> anyhow::Result<Vec<PeerDescriptor>>;
}

/// In-process signals for desktop use, toggled from the front end.
#[derive(Debug)]
pub struct DesktopEnvironment {
    present: AtomicBool,
    enabled: AtomicBool,
    granted: AtomicBool,
    permission_requests: AtomicUsize,
}

impl DesktopEnvironment {
    pub fn new(present: bool, enabled: bool, granted: bool) -> Self {
        Self {
            present: AtomicBool::new(present),
            enabled: AtomicBool::new(enabled),
            granted: AtomicBool::new(granted),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

impl Default for DesktopEnvironment {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

impl Environment for DesktopEnvironment {
    fn adapter_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn adapter_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn permissions_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_permissions(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        info!("Permission request issued; answer with `grant` or `deny`");
    }
}

/// Enumerates the peers remembered in settings.
pub struct SettingsPeerEnumerator {
    settings: Arc<Mutex<SettingsService>>,
}

impl SettingsPeerEnumerator {
    pub fn new(settings: Arc<Mutex<SettingsService>>) -> Self {
        Self { settings }
    }
}

impl PeerEnumerator for SettingsPeerEnumerator {
    fn paired_peers(&self) -> anyhow::Result<Vec<PeerDescriptor>> {
        let settings = self
            .settings
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))?;
        Ok(settings
            .get()
            .known_peers
            .iter()
            .map(|p| p.to_descriptor())
            .collect())
    }
}
