//! Voice Client Application
//!
//! Keeps a voice session with the speech service open until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_link_client::{
    audio::{device::list_devices, CpalBackend},
    config::{project_dirs, AppConfig},
    credentials::{CredentialStore, FileCredentialStore},
    network::WsConnector,
    session::{SessionSupervisor, SupervisorExit},
    ui::ConsoleStatus,
};

/// Log files above this size are moved aside on start
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "voice-client", version, about = "Voice session client")]
struct Cli {
    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server URL, e.g. ws://host:8000/ws
    #[arg(long)]
    server: Option<String>,

    /// Store this token and use it for the session
    #[arg(long)]
    token: Option<String>,

    /// User name saved alongside --token
    #[arg(long, requires = "token")]
    user: Option<String>,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Where session recordings go
    #[arg(long)]
    recordings_dir: Option<PathBuf>,

    /// Do not record inbound audio
    #[arg(long)]
    no_record: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging();

    if cli.list_devices {
        print_devices();
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = cli
        .config
        .clone()
        .or_else(AppConfig::default_path)
        .context("cannot determine config directory")?;
    let mut config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(server) = cli.server {
        config.server.url = server;
    }
    if let Some(dir) = cli.recordings_dir {
        config.recording.directory = dir;
    }
    if cli.no_record {
        config.recording.enabled = false;
    }
    config.validate()?;

    let token_path = FileCredentialStore::default_path().context("cannot determine config directory")?;
    let credentials = Arc::new(FileCredentialStore::load(token_path));
    if let Some(token) = cli.token.as_deref() {
        credentials.save(token, cli.user.as_deref())?;
        tracing::info!("Token saved to {}", credentials.path().display());
    }
    if credentials.get_token().is_none() {
        tracing::error!(
            "No token found at {}. Run with --token <TOKEN> first.",
            credentials.path().display()
        );
        return Ok(ExitCode::from(3));
    }
    if let Some(user) = credentials.user() {
        tracing::info!("Logged in as {}", user);
    }

    tracing::info!("Starting voice client");
    tracing::info!("Server: {}", config.server.url);
    tracing::info!(
        "Audio: in {} Hz, out {} Hz to '{}'",
        config.audio.input_sample_rate,
        config.audio.output_sample_rate,
        config.audio.output_device_name
    );
    if config.recording.enabled {
        tracing::info!("Recordings: {}", config.recording.directory.display());
    }

    let status = Arc::new(ConsoleStatus::new(Duration::from_millis(config.status.speaking_decay_ms)));
    let connector = Arc::new(WsConnector::new(&config.server));
    let audio = Arc::new(CpalBackend::new(config.audio.clone()));
    let mut supervisor = SessionSupervisor::new(config, connector, audio, credentials, status);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            signal_cancel.cancel();
        }
    });

    let code = match supervisor.run(cancel).await {
        SupervisorExit::Stopped => ExitCode::SUCCESS,
        SupervisorExit::RetriesExhausted { attempts } => {
            tracing::error!("Server unreachable after {} attempts", attempts);
            ExitCode::from(1)
        }
        SupervisorExit::AuthRejected(reason) => {
            tracing::error!("Login rejected ({}). Run with --token to log in again.", reason);
            ExitCode::from(2)
        }
        SupervisorExit::CredentialMissing => ExitCode::from(3),
    };
    tracing::info!("Voice client stopped");
    Ok(code)
}

fn init_logging() {
    let file_layer = project_dirs()
        .and_then(|dirs| open_log_file(dirs.data_dir()).ok())
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
        });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}

/// Open `<dir>/voice_client.log` for append, moving an oversized log to `.old`
fn open_log_file(dir: &Path) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("voice_client.log");
    if std::fs::metadata(&path).is_ok_and(|m| m.len() > LOG_ROTATE_BYTES) {
        std::fs::rename(&path, path.with_extension("log.old"))?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
