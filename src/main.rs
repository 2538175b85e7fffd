//! FleetQuorum - Quorum Coordination for Peer Fleets
//!
//! Runs a fleet node, manages its configuration and drives in-process
//! simulations over the fault-injecting transport.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetquorum::config::{FleetConfig, LoggingConfig, PeerConfig};
use fleetquorum::consensus::BroadcastResult;
use fleetquorum::error::Result;
use fleetquorum::node::FleetNode;
use fleetquorum::transport::{SimConfig, SimulatedTransport};

/// FleetQuorum - Quorum Coordination for Peer Fleets
#[derive(Parser)]
#[command(name = "fleetquorum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "fleetquorum.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json); defaults to the configured format
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fleet node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "fleetquorum.toml")]
        output: PathBuf,

        /// Node ID (generated when omitted)
        #[arg(long)]
        node_id: Option<String>,

        /// Address peers use to reach this node
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        address: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Run broadcasts against an in-process simulated fleet
    Simulate {
        /// Number of peer validators
        #[arg(short, long, default_value_t = 5)]
        nodes: usize,

        /// Number of broadcasts to run
        #[arg(short, long, default_value_t = 3)]
        rounds: usize,

        /// Drop probability (overrides SIM_DROP_RATE)
        #[arg(long)]
        drop_rate: Option<f64>,

        /// Fixed quorum (defaults to two thirds of active peers)
        #[arg(long)]
        quorum: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let configured = FleetConfig::from_file(&cli.config).ok().map(|c| c.logging);
    let logging = resolve_logging(cli.log_level.clone(), cli.log_format.clone(), configured);
    init_logging(&logging.level, &logging.format);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init {
            output,
            node_id,
            address,
        } => run_init(output, node_id, address),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Simulate {
            nodes,
            rounds,
            drop_rate,
            quorum,
        } => run_simulate(nodes, rounds, drop_rate, quorum).await,
    }
}

/// Command line flags win over the config file, which wins over the defaults
fn resolve_logging(level: Option<String>, format: Option<String>, configured: Option<LoggingConfig>) -> LoggingConfig {
    let configured = configured.unwrap_or_default();
    LoggingConfig {
        level: level.unwrap_or(configured.level),
        format: format.unwrap_or(configured.format),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the fleet node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting FleetQuorum node...");

    let config = match FleetConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    if config.history_path().is_some() {
        if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
            tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
            return Err(e.into());
        }
    }

    let node = FleetNode::new(config)?;
    node.run().await
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: Option<String>, address: String) -> Result<()> {
    let mut config = FleetConfig::new(node_id.unwrap_or_default(), address);
    config.ensure_node_id();
    config.validate()?;
    config.node.data_dir = config.node.data_dir.join(&config.node.id);

    let content = format!(
        "# FleetQuorum Configuration\n# Generated configuration file\n\n{}",
        config.to_toml()?
    );
    std::fs::write(&output, content)?;

    println!("Configuration file created: {}", output.display());
    println!("\nAdd peers under [[node.peers]] and review the heartbeat settings.");
    println!("Then start with: fleetquorum start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match FleetConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Address: {}", config.node.address);
            println!("  Peers: {}", config.node.peers.len());
            match config.consensus.quorum {
                Some(q) => println!("  Quorum: {}", q),
                None => println!("  Quorum: two thirds of active peers"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = FleetConfig::from_file(&config_path)?;

    println!("FleetQuorum Node Information");
    println!("============================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Address:          {}", config.node.address);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Heartbeat:");
    println!("  Interval:       {} ms", config.heartbeat.interval_ms);
    println!("  Timeout:        {} ms", config.heartbeat.timeout_ms);
    println!(
        "  Reconnect:      {} attempts, {} ms base delay",
        config.heartbeat.reconnect_attempts, config.heartbeat.reconnect_base_delay_ms
    );
    println!();
    println!("Consensus:");
    println!("  Call Timeout:   {} ms", config.consensus.call_timeout_ms);
    println!("  Isolation:      after {} failed rounds", config.consensus.isolation_threshold);
    match config.history_path() {
        Some(path) => println!("  History:        {}", path.display()),
        None => println!("  History:        memory only"),
    }
    println!();
    println!("Sync:");
    println!("  Pruning:        {:?}", config.sync.pruning);
    println!();
    println!("Peers:");
    for peer in &config.node.peers {
        println!("  {:<16}{}", peer.id, peer.address);
    }

    Ok(())
}

/// Run broadcasts against an in-process simulated fleet
async fn run_simulate(nodes: usize, rounds: usize, drop_rate: Option<f64>, quorum: Option<usize>) -> Result<()> {
    let mut sim = SimConfig::from_env();
    if let Some(rate) = drop_rate {
        sim.drop_rate = rate.clamp(0.0, 1.0);
    }
    tracing::info!(
        nodes,
        rounds,
        drop_rate = sim.drop_rate,
        "Starting simulated fleet"
    );

    let mut config = FleetConfig::new("sim-origin", "http://sim-origin.local");
    config.consensus.history_file = None;
    config.consensus.quorum = quorum;
    config.node.peers = (1..=nodes)
        .map(|i| PeerConfig {
            id: format!("sim-node-{}", i),
            address: format!("http://sim-node-{}.local", i),
        })
        .collect();
    config.validate()?;

    let node = FleetNode::with_transport(config, Arc::new(SimulatedTransport::new(sim)));
    node.bootstrap().await?;

    let mut results: Vec<BroadcastResult> = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let hash = uuid::Uuid::new_v4().simple().to_string();
        let record = node.coordinator().broadcast("sim-origin", &hash, None).await;
        results.push(BroadcastResult::from(&record));
    }

    let report = serde_json::json!({
        "results": results,
        "registry": node.registry().summary().await,
        "mode": node.coordinator().mode().await,
        "sync": node.sync().status().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_logging_used_without_flags() {
        let configured = LoggingConfig {
            level: "debug".into(),
            format: "json".into(),
        };
        let logging = resolve_logging(None, None, Some(configured));
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "json");
    }

    #[test]
    fn test_flags_override_configured_logging() {
        let configured = LoggingConfig {
            level: "debug".into(),
            format: "json".into(),
        };
        let logging = resolve_logging(Some("warn".into()), Some("pretty".into()), Some(configured));
        assert_eq!(logging.level, "warn");
        assert_eq!(logging.format, "pretty");
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let logging = resolve_logging(None, None, None);
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "pretty");
    }

    #[test]
    fn test_cli_log_level_is_optional() {
        let cli = Cli::try_parse_from(["fleetquorum", "validate"]).unwrap();
        assert!(cli.log_level.is_none());
        let cli = Cli::try_parse_from(["fleetquorum", "-l", "trace", "validate"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("trace"));
    }
}
