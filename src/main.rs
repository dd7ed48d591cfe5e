//! Bullish Engine - Main Entry Point

use anyhow::{Context, Result};
use bullish_engine::config::{Config, Preset, Settings};
use bullish_engine::Engine;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Bullish Engine CLI
#[derive(Parser)]
#[command(name = "bullish-engine")]
#[command(version, about = "Fee-aware crypto and equity trading on Alpaca")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loops (default)
    Run {
        /// Apply a settings preset: safer, neutral, faster, aggro, max
        #[arg(short, long)]
        preset: Option<Preset>,
    },

    /// Check account access and quote freshness, print the report as JSON
    Health,

    /// Print the effective settings as JSON
    Settings {
        /// Apply a settings preset before printing
        #[arg(short, long)]
        preset: Option<Preset>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run { preset: None }) {
        Commands::Run { preset } => run(config, preset).await,
        Commands::Health => {
            let engine = Engine::from_config(&config)?;
            let report = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Settings { preset } => {
            let settings = effective_settings(config.settings, preset);
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn effective_settings(settings: Settings, preset: Option<Preset>) -> Settings {
    match preset {
        Some(preset) => settings.with_preset(preset),
        None => settings.clamped(),
    }
}

async fn run(mut config: Config, preset: Option<Preset>) -> Result<()> {
    info!(
        "Bullish Engine v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    if config.venue.api_key.is_empty() || config.venue.secret_key.is_empty() {
        warn!("⚠️  No API keys configured, venue calls will be rejected");
    }
    if config.venue.trading_url.contains("paper") {
        info!("📝 Paper trading endpoint");
    } else {
        warn!("⚠️  LIVE trading endpoint - real money at risk");
    }

    config.settings = effective_settings(config.settings, preset);
    log_settings(&config.settings);

    let engine = Arc::new(Engine::from_config(&config).context("Failed to initialize engine")?);

    let report = engine.health().await;
    if report.ok {
        info!("✅ Health check passed");
    } else {
        warn!(
            account = report.account.reachable,
            "⚠️  Health check failed, starting anyway"
        );
    }

    let signal_engine = engine.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        signal_engine.shutdown();
    });

    engine.run().await;
    info!("👋 Shutdown complete");
    Ok(())
}

/// Log the settings that shape entries and exits.
fn log_settings(settings: &Settings) {
    info!("📋 Settings:");
    info!(
        "   Risk level: {} | Max spread: {} bps | Momentum: {}",
        settings.risk_level, settings.spread_max_bps, settings.enforce_momentum
    );
    info!(
        "   Position: {}% of equity, max ${} | Concurrent: {}",
        settings.max_pos_pct_equity, settings.abs_max_notional_usd, settings.max_concurrent_positions
    );
    info!(
        "   Stops: {} ({} bps, hard {}%) | Trailing: {} | Max hold: {} min",
        settings.enable_stops,
        settings.stop_loss_bps,
        settings.hard_stop_loss_pct,
        settings.enable_trailing,
        settings.max_hold_min
    );
    info!(
        "   Daily halt: loss {} ({}%), profit {} ({}%) | PDT guard: {}",
        settings.halt_on_daily_loss,
        settings.daily_max_loss_pct,
        settings.halt_on_daily_profit,
        settings.daily_profit_target_pct,
        settings.avoid_pdt
    );
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging(json: bool) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "bullish-engine.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    let filter = EnvFilter::from_default_env()
        .add_directive("bullish_engine=debug".parse()?)
        .add_directive(Level::INFO.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }

    Ok(())
}
