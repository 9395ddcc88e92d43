mod engine;
mod gateway;

use clap::{Parser, Subcommand};
use qalabot_backend::{BackendClient, HttpPhotoStorage};
use qalabot_channels::telegram::TelegramChannel;
use qalabot_core::config;
use qalabot_session::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "qalabot",
    version,
    about = "Qalabot — citizen reporting chat bot"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot.
    Start,
    /// Show the resolved configuration.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Start => {
            let cfg = config::load(&cli.config)?;

            // Build channels.
            let mut channels: HashMap<String, Arc<dyn qalabot_core::traits::Channel>> =
                HashMap::new();

            if let Some(ref tg) = cfg.channel.telegram {
                if tg.enabled {
                    if tg.bot_token.is_empty() {
                        anyhow::bail!(
                            "Telegram is enabled but bot_token is empty. \
                             Set it in config.toml or TELEGRAM_BOT_TOKEN env var."
                        );
                    }
                    let channel = TelegramChannel::new(tg.clone());
                    channels.insert("telegram".to_string(), Arc::new(channel));
                }
            }

            if channels.is_empty() {
                anyhow::bail!("No channels enabled. Enable at least one channel in config.toml.");
            }

            // Build adapters and the engine.
            let backend = Arc::new(BackendClient::new(&cfg.backend)?);
            let photos = Arc::new(HttpPhotoStorage::new(&cfg.backend)?);
            let store = SessionStore::new();
            let eng = Arc::new(engine::Engine::new(store.clone(), backend, photos));

            println!("Qalabot — Starting...");
            let mut gw = gateway::Gateway::new(eng, channels, store, cfg.session.clone());
            gw.run().await?;
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            println!("Qalabot — Status\n");
            println!("Config: {}", cli.config);
            println!("Backend: {}", cfg.backend.base_url);
            println!(
                "Sessions: idle threshold {}s, sweep every {}s",
                cfg.session.idle_threshold_secs, cfg.session.sweep_interval_secs
            );
            println!();

            if let Some(ref tg) = cfg.channel.telegram {
                println!(
                    "  telegram: {}",
                    if tg.enabled && !tg.bot_token.is_empty() {
                        "configured"
                    } else if tg.enabled {
                        "enabled but missing bot_token"
                    } else {
                        "disabled"
                    }
                );
            } else {
                println!("  telegram: not configured");
            }
        }
    }

    Ok(())
}
