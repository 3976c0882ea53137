use crate::domain::models::{PeerDescriptor, PeerHandle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String, // "trace", "debug", "info", "warn", "error"
    pub file_logging_enabled: bool,
    pub console_logging_enabled: bool,
    pub log_dir: String,
    pub file_name_prefix: String,
    pub show_file_line: bool,
    pub show_target: bool,
    pub ansi_colors: bool,
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging_enabled: true,
            console_logging_enabled: true,
            log_dir: "logs".to_string(),
            file_name_prefix: "serial_pad".to_string(),
            show_file_line: false,
            show_target: true,
            ansi_colors: true,
            rotation: "daily".to_string(),
        }
    }
}

/// Which byte-stream transport the binary opens peers with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Local,
}

/// A paired peer remembered across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    pub endpoint: String,
}

impl KnownPeer {
    pub fn to_descriptor(&self) -> PeerDescriptor {
        PeerDescriptor::new(
            self.name.clone(),
            self.address.clone(),
            PeerHandle::new(self.endpoint.as_str()),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub known_peers: Vec<KnownPeer>,
    #[serde(default)]
    pub last_selected_address: Option<String>,

    // Link monitor scratch buffer
    #[serde(default = "default_monitor_buffer_size")]
    pub monitor_buffer_size: usize,

    // Device-side receiver
    #[serde(default = "default_receiver_endpoint")]
    pub receiver_endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            transport: TransportKind::default(),
            known_peers: Vec::new(),
            last_selected_address: None,
            monitor_buffer_size: default_monitor_buffer_size(),
            receiver_endpoint: default_receiver_endpoint(),
        }
    }
}

fn default_monitor_buffer_size() -> usize {
    1024
}
fn default_receiver_endpoint() -> String {
    "127.0.0.1:7878".to_string()
}

impl Settings {
    /// The remembered selection, if it still names a known peer.
    pub fn restored_selection(&self) -> Option<PeerDescriptor> {
        let address = self.last_selected_address.as_deref()?;
        self.known_peers
            .iter()
            .find(|p| p.address == address)
            .map(KnownPeer::to_descriptor)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load from an explicit path, falling back to defaults if the file is
    /// missing or unreadable.
    pub fn load_from(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({}): {}", settings_path.display(), e);
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SerialPad");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_peer(&mut self, peer: KnownPeer) -> anyhow::Result<()> {
        if !self
            .settings
            .known_peers
            .iter()
            .any(|p| p.address == peer.address)
        {
            self.settings.known_peers.push(peer);
            self.save()?;
        }
        Ok(())
    }

    pub fn remember_selection(&mut self, address: &str) -> anyhow::Result<()> {
        if self.settings.last_selected_address.as_deref() != Some(address) {
            self.settings.last_selected_address = Some(address.to_string());
            self.save()?;
        }
        Ok(())
    }
}
