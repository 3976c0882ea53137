use clap::Parser;
use serial_pad::domain::controller::ConnectionController;
use serial_pad::domain::settings::{SettingsService, TransportKind};
use serial_pad::infrastructure::logging::init_logger;
use serial_pad::infrastructure::platform::{DesktopEnvironment, SettingsPeerEnumerator};
use serial_pad::infrastructure::receiver::CommandReceiver;
use serial_pad::infrastructure::transport::{LocalSocketTransport, TcpTransport, Transport};
use serial_pad::presentation::console::Console;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Controller for a remote device over a byte stream.
#[derive(Parser, Debug)]
#[command(name = "serial_pad")]
#[command(version)]
struct Cli {
    /// Run the device-side receiver instead of the controller, optionally on
    /// the given endpoint.
    #[arg(long, num_args = 0..=1, value_name = "ENDPOINT")]
    device: Option<Option<String>>,

    /// Transport to use, overriding the settings file.
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let mut settings_service = SettingsService::new()?;
    if let Some(kind) = args.transport {
        settings_service.get_mut().transport = kind;
    }

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    match args.device {
        Some(endpoint) => run_device(&settings_service, endpoint).await,
        None => run_controller(settings_service).await,
    }
}

async fn run_controller(settings_service: SettingsService) -> anyhow::Result<()> {
    info!("Starting serial pad controller");
    info!("Settings: {}", settings_service.path().display());

    let (kind, buffer_size, restored) = {
        let s = settings_service.get();
        (s.transport, s.monitor_buffer_size, s.restored_selection())
    };
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Tcp => Arc::new(TcpTransport),
        TransportKind::Local => Arc::new(LocalSocketTransport),
    };

    let settings = Arc::new(Mutex::new(settings_service));
    let environment = Arc::new(DesktopEnvironment::default());
    let enumerator = Arc::new(SettingsPeerEnumerator::new(settings.clone()));
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let (controller, handle) =
        ConnectionController::new(environment.clone(), enumerator, transport, notice_tx);
    let controller = controller
        .with_selected(restored)
        .with_monitor_buffer_size(buffer_size)
        .spawn();

    let console = Console::new(handle, environment, settings);
    if let Err(e) = console.run(notice_rx).await {
        error!("Console error: {}", e);
    }

    // The console issued shutdown; wait for teardown to finish.
    let _ = controller.await;
    Ok(())
}

async fn run_device(settings: &SettingsService, endpoint: Option<String>) -> anyhow::Result<()> {
    let s = settings.get();
    let endpoint = endpoint.unwrap_or_else(|| s.receiver_endpoint.clone());
    info!("Starting device receiver on {}", endpoint);

    let receiver = CommandReceiver::bind(s.transport, &endpoint).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let server = tokio::spawn(receiver.run(tx, cancel.clone()));
    let printer = tokio::spawn(async move {
        while let Some(direction) = rx.recv().await {
            println!("{}", direction);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Stopping device receiver");
    cancel.cancel();
    server.await??;
    let _ = printer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_controller() {
        let cli = Cli::try_parse_from(["serial_pad"]).unwrap();
        assert_eq!(cli.device, None);
        assert_eq!(cli.transport, None);
    }

    #[test]
    fn test_cli_device_endpoint_is_optional() {
        let cli = Cli::try_parse_from(["serial_pad", "--device"]).unwrap();
        assert_eq!(cli.device, Some(None));

        let cli = Cli::try_parse_from([
            "serial_pad",
            "--device",
            "/tmp/rover.sock",
            "--transport",
            "local",
        ])
        .unwrap();
        assert_eq!(cli.device, Some(Some("/tmp/rover.sock".to_string())));
        assert_eq!(cli.transport, Some(TransportKind::Local));
    }

    #[test]
    fn test_cli_rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["serial_pad", "--transport", "serial"]).is_err());
    }
}
