//! ScanShell demo: drives the session lifecycle against a simulated scanner SDK.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{sleep, Duration};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scanshell_core::config::ScanConfig;
use scanshell_core::harness::{SimulatedCamera, StaticConnectivity, ValidationScript};
use scanshell_core::{
    display_container, Bounds, CoordinatorOptions, LicenseStore, NativeEvent, Platform,
    SessionEvent, SessionLifecycleCoordinator,
};

/// How long a decoded result stays on screen.
const PRESENT_FOR: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
#[command(name = "scanshell-demo", version, about = "Scanner session lifecycle demo")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SCANSHELL_CONFIG")]
    config: Option<PathBuf>,

    /// License key for every platform
    #[arg(long, env = "SCANSHELL_LICENSE_KEY")]
    license_key: Option<String>,

    /// Preference file (overrides [storage] path)
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PlatformArg::Android)]
    platform: PlatformArg,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlatformArg {
    Android,
    Ios,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Android => Platform::Android,
            PlatformArg::Ios => Platform::Ios,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize, lease the camera, feed decode results, and return it
    Run {
        /// Fail the connectivity pre-flight
        #[arg(long)]
        offline: bool,
        /// Have the SDK reject the license with this reason
        #[arg(long)]
        reject: Option<String>,
        /// Decode results to inject while the camera is leased
        #[arg(long = "scan")]
        scans: Vec<String>,
    },
    /// Show saved license state
    Status,
    /// Forget the saved license
    Clear,
}

fn load_config(cli: &Cli) -> anyhow::Result<ScanConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ScanConfig::from_toml_str(&content)?
        }
        None => ScanConfig::default(),
    };
    config.apply_overrides(|name| std::env::var(name).ok());
    if let Some(key) = &cli.license_key {
        config.license.android_key = key.clone();
        config.license.ios_key = key.clone();
        config.license.default_key = key.clone();
    }
    if let Some(path) = &cli.store {
        config.storage.path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let platform = Platform::from(cli.platform);
    let store = config.open_store();
    let sim = SimulatedCamera::shared(platform);

    match cli.command {
        Command::Run {
            offline,
            reject,
            scans,
        } => {
            if let Some(reason) = reject {
                sim.set_script(ValidationScript::Reject(reason));
            }
            let coordinator = SessionLifecycleCoordinator::new(
                sim.clone(),
                store,
                Arc::new(StaticConnectivity::new(!offline)),
                CoordinatorOptions::from_config(&config, platform)?,
            );
            run(&coordinator, &sim, scans).await
        }
        Command::Status => {
            let first_time = match store.load().await? {
                Some(record) => {
                    println!("saved license: {}", record.license_identifier);
                    println!("validated: {}", record.validated);
                    !record.validated
                }
                None => {
                    println!("saved license: none");
                    true
                }
            };
            println!("current {platform} key: {}", config.license_key_for(platform)?);
            println!("first time use: {first_time}");
            Ok(())
        }
        Command::Clear => {
            let coordinator = SessionLifecycleCoordinator::new(
                sim,
                store,
                Arc::new(StaticConnectivity::new(false)),
                CoordinatorOptions::from_config(&config, platform)?,
            );
            coordinator.clear_saved_license().await?;
            println!("saved license cleared");
            Ok(())
        }
    }
}

async fn run(
    coordinator: &SessionLifecycleCoordinator,
    sim: &Arc<SimulatedCamera>,
    scans: Vec<String>,
) -> anyhow::Result<()> {
    let mut events = coordinator.subscribe();
    println!("first time use: {}", coordinator.is_first_time_use().await);

    let (layout, container) = display_container(1);
    let init = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.initialize(container).await })
    };

    // The container is laid out a moment after the page appears
    sleep(Duration::from_millis(50)).await;
    layout.report(Bounds::new(1080.0, 1920.0));

    if let Err(e) = init.await? {
        drain(&mut events);
        coordinator.shutdown().await;
        anyhow::bail!("initialization failed: {}", e.reason());
    }
    info!(state = ?coordinator.state(), "scanner ready");

    let lease = coordinator.get_camera_for_scanning().await?;
    lease.start().await?;
    for text in scans {
        sim.emit(NativeEvent::ScanDecoded(text));
    }
    sleep(Duration::from_millis(50)).await;

    let mut presenting = Vec::new();
    loop {
        match events.try_recv() {
            Ok(SessionEvent::ScanDecoded(text)) => {
                // One result at a time, as a results page would
                let Some(ticket) = coordinator.decoder().try_begin() else {
                    println!("skipped while presenting: {text}");
                    continue;
                };
                println!("decoded: {text}");
                presenting.push(tokio::spawn(async move {
                    sleep(PRESENT_FOR).await;
                    drop(ticket);
                }));
            }
            Ok(event) => println!("event: {event:?}"),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    for task in presenting {
        task.await?;
    }

    coordinator.return_camera(lease).await?;
    coordinator.shutdown().await;
    println!("done");
    Ok(())
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        println!("event: {event:?}");
    }
}
