use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wab_client::{ApiClient, ClientConfig, ControlApi};
use wab_engine::{EngineConfig, InstanceRegistry, PairingPhase, PairingTracker, RegistrySnapshot};

const BACKEND_URL_ENV: &str = "WAB_BACKEND_URL";

#[derive(Parser)]
#[command(name = "wab")]
#[command(about = "Control surface for WhatsApp bot instances", long_about = None)]
struct Cli {
    /// Backend base URL (overrides WAB_BACKEND_URL)
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List instances once
    List,
    /// Keep the instance list on screen, refreshed on a fixed cadence
    Watch {
        /// Refresh interval in seconds
        #[arg(short, long, default_value_t = 5)]
        interval: u64,
    },
    /// Create a new bot instance
    Create {
        name: String,
        /// Phone number with country code; formatting characters are stripped
        phone_number: String,
    },
    /// Start a stopped instance
    Start { id: String },
    /// Stop a running instance
    Stop { id: String },
    /// Delete an instance
    Delete { id: String },
    /// Open a pairing session and follow it until the bot is linked
    Pair { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();
    let base_url = cli
        .base_url
        .or_else(|| std::env::var(BACKEND_URL_ENV).ok())
        .unwrap_or_else(|| wab_client::DEFAULT_BASE_URL.to_string());
    info!(%base_url, "connecting to backend");

    let api = ApiClient::new(ClientConfig::new(base_url)).context("building API client")?;
    let api: Arc<dyn ControlApi> = Arc::new(api);
    let registry = Arc::new(InstanceRegistry::new(Arc::clone(&api)));

    match cli.command {
        Commands::List => {
            registry.refresh().await;
            let snapshot = registry.snapshot().await;
            if let Some(err) = &snapshot.last_error {
                bail!("could not reach the backend: {err}");
            }
            print_snapshot(&snapshot);
        }
        Commands::Watch { interval } => {
            let period = Duration::from_secs(interval.max(1));
            let _refresh_loop = Arc::clone(&registry).spawn_refresh_loop(period);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        print_snapshot(&registry.snapshot().await);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Commands::Create { name, phone_number } => {
            let instance = registry
                .create(&name, &phone_number)
                .await
                .context("creating instance")?;
            println!("created instance {} ({})", instance.id, instance.name);
            println!("run `wab pair {}` to link it to WhatsApp", instance.id);
        }
        Commands::Start { id } => {
            registry.start(&id).await.context("starting instance")?;
            println!("instance {id} started");
        }
        Commands::Stop { id } => {
            registry.stop(&id).await.context("stopping instance")?;
            println!("instance {id} stopped");
        }
        Commands::Delete { id } => {
            registry.delete(&id).await.context("deleting instance")?;
            println!("instance {id} deleted");
        }
        Commands::Pair { id } => {
            follow_pairing(Arc::clone(&api), &id).await?;
        }
    }

    Ok(())
}

/// Open a pairing session for `id` and mirror its state to stdout until
/// the instance links, vanishes, or the user interrupts.
async fn follow_pairing(api: Arc<dyn ControlApi>, id: &str) -> Result<()> {
    let instance = api.get_instance(id).await.context("looking up instance")?;
    println!(
        "pairing {} ({}): enter the code under Linked Devices on the phone",
        instance.name, instance.phone_number
    );

    let tracker = PairingTracker::new(api, EngineConfig::default());
    tracker.open(id).await;

    let mut last_line = String::new();
    let outcome = loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
        let view = tracker.view().await;
        match view.phase {
            PairingPhase::Valid => {
                if let Some(code) = &view.code {
                    let line = format!(
                        "code {code}  ({:02}:{:02} left)",
                        view.remaining_seconds / 60,
                        view.remaining_seconds % 60
                    );
                    if line != last_line {
                        println!("{line}");
                        last_line = line;
                    }
                }
            }
            PairingPhase::Expired => {
                println!("code expired, requesting a new one");
                if let Err(err) = tracker.regenerate().await {
                    println!("could not regenerate the code: {err}");
                }
            }
            PairingPhase::Linked => {
                println!("instance linked successfully");
                break Ok(());
            }
            PairingPhase::Gone => {
                break Err(anyhow::anyhow!("instance {id} no longer exists"));
            }
            PairingPhase::Idle | PairingPhase::Loading | PairingPhase::Regenerating => {}
        }
    };

    tracker.close().await;
    outcome
}

fn print_snapshot(snapshot: &RegistrySnapshot) {
    if let Some(err) = &snapshot.last_error {
        println!("! backend unreachable, showing last known state ({err})");
    }
    println!(
        "{} instances ({} active, {} pairing)",
        snapshot.total(),
        snapshot.active_count(),
        snapshot.pairing_count()
    );
    for instance in &snapshot.instances {
        let user = instance
            .connected_user
            .as_ref()
            .and_then(|user| user.label())
            .map(|label| format!("  as {label}"))
            .unwrap_or_default();
        println!(
            "  {:<10} {:<20} {:<15} {}{}",
            instance.id,
            instance.name,
            instance.phone_number,
            instance.status.as_str(),
            user
        );
    }
}
