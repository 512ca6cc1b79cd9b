//! cnpd - contract-net fleet daemon
//!
//! Runs the TCP broker, a single worker, a coordinator, or a whole fleet in
//! one process.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cnp_agent::{CapabilityTable, Coordinator, RunReport, Worker};
use cnp_bus::{BrokerConfig, BrokerServer, TcpTransport};
use cnp_node::config::{CoordinatorSection, DEFAULT_BROKER_ADDR};
use cnp_node::fleet::COORDINATOR_CLIENT_ID;
use cnp_node::{run_fleet, FleetConfig};
use cnp_proto::{Topics, WorkerId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cnpd")]
#[command(about = "Contract-net negotiation fleet")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the message broker
    Broker {
        /// Address to listen on
        #[arg(short, long, default_value = DEFAULT_BROKER_ADDR, env = "CNP_BROKER")]
        listen: SocketAddr,

        /// Maximum concurrent clients
        #[arg(long, default_value_t = cnp_bus::broker::DEFAULT_MAX_CONNECTIONS)]
        max_connections: usize,
    },

    /// Run one worker agent
    Worker {
        /// Broker address
        #[arg(short, long, default_value = DEFAULT_BROKER_ADDR, env = "CNP_BROKER")]
        broker: SocketAddr,

        /// Worker id
        #[arg(long)]
        id: String,

        /// Capability table as JSON, e.g. '{"welding": 8, "testing": 3}'
        #[arg(short, long)]
        capabilities: String,

        /// Topic namespace
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Run the coordinator over a job queue
    Coordinator {
        /// Broker address
        #[arg(short, long, default_value = DEFAULT_BROKER_ADDR, env = "CNP_BROKER")]
        broker: SocketAddr,

        /// Job queue, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        jobs: Vec<String>,

        /// Bid collection deadline in seconds
        #[arg(long, default_value_t = 3.0)]
        bid_deadline: f64,

        /// Pause between rounds in seconds
        #[arg(long, default_value_t = 1.0)]
        round_gap: f64,

        /// Pause before the first round in seconds
        #[arg(long, default_value_t = 1.0)]
        startup_delay: f64,

        /// Wait for completions after the last round in seconds
        #[arg(long, default_value_t = 10.0)]
        completion_grace: f64,

        /// Topic namespace
        #[arg(long)]
        namespace: Option<String>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        report: bool,
    },

    /// Run a whole fleet in one process
    Run {
        /// Path to fleet config file
        #[arg(short, long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        report: bool,
    },

    /// Generate a sample fleet config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "fleet.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Commands::Broker {
            listen,
            max_connections,
        } => run_broker(listen, max_connections).await?,

        Commands::Worker {
            broker,
            id,
            capabilities,
            namespace,
        } => run_worker(broker, &id, &capabilities, namespace.as_deref()).await?,

        Commands::Coordinator {
            broker,
            jobs,
            bid_deadline,
            round_gap,
            startup_delay,
            completion_grace,
            namespace,
            report,
        } => {
            let section = CoordinatorSection {
                bid_deadline_secs: bid_deadline,
                round_gap_secs: round_gap,
                startup_delay_secs: startup_delay,
                completion_grace_secs: completion_grace,
                jobs,
            };
            let run = run_coordinator(broker, section, namespace).await?;
            if report {
                print_report(&run)?;
            }
        }

        Commands::Run { config, report } => {
            info!(config = %config.display(), "starting fleet");
            let config = FleetConfig::from_file(&config)?;
            let run = run_fleet(&config, shutdown_on_ctrl_c()).await?;
            if report {
                print_report(&run)?;
            }
        }

        Commands::InitConfig { output, force } => init_config(&output, force)?,
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("cnpd=info,cnp_agent=info,cnp_node=info,cnp_bus=warn")
    })?;

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

/// Cancels the returned token on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c, shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
        trigger.cancel();
    });
    token
}

fn topics(namespace: Option<&str>) -> anyhow::Result<Topics> {
    Ok(match namespace {
        Some(ns) => Topics::with_namespace(ns)?,
        None => Topics::root(),
    })
}

async fn run_broker(listen: SocketAddr, max_connections: usize) -> anyhow::Result<()> {
    let config = BrokerConfig::new().with_max_connections(max_connections);
    let server = BrokerServer::bind(listen, config).await?;
    server.serve(shutdown_on_ctrl_c()).await?;
    Ok(())
}

async fn run_worker(
    broker: SocketAddr,
    id: &str,
    capabilities: &str,
    namespace: Option<&str>,
) -> anyhow::Result<()> {
    let id = WorkerId::new(id)?;
    let capabilities: CapabilityTable = serde_json::from_str(capabilities)
        .map_err(|e| anyhow::anyhow!("invalid capability table: {e}"))?;

    let (transport, inbox) = TcpTransport::connect(broker, id.as_str()).await?;
    let worker = Worker::new(id, capabilities, Arc::new(transport)).with_topics(topics(namespace)?);
    worker.run(inbox, shutdown_on_ctrl_c()).await?;
    Ok(())
}

async fn run_coordinator(
    broker: SocketAddr,
    section: CoordinatorSection,
    namespace: Option<String>,
) -> anyhow::Result<RunReport> {
    let mut fleet = FleetConfig {
        coordinator: section,
        ..FleetConfig::default()
    };
    fleet.broker.namespace = namespace;
    fleet.validate()?;

    let (transport, inbox) = TcpTransport::connect(broker, COORDINATOR_CLIENT_ID).await?;
    let coordinator = Coordinator::new(Arc::new(transport), fleet.coordinator_config()?);
    Ok(coordinator.run(inbox, fleet.jobs()?, shutdown_on_ctrl_c()).await?)
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    std::fs::write(output, FleetConfig::sample().to_toml()?)?;
    println!("Wrote sample fleet config to {}", output.display());
    Ok(())
}
