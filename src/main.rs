use clap::{Parser, Subcommand};
use srouter::capture::Capture;
use srouter::config;
use srouter::dataplane::Router;
use srouter::protocol::ethernet::MAX_FRAME_SIZE;
use srouter::telemetry::{init_logging, MetricsRegistry};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "srouter")]
#[command(about = "A software IPv4 router")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Routing table queries
    Route {
        #[command(subcommand)]
        action: RouteAction,
    },
    /// Run the router daemon
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate config.toml
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum RouteAction {
    /// Show the route chosen for a destination
    Lookup {
        /// Destination address
        destination: Ipv4Addr,

        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config {
            action: ConfigAction::Validate { config },
        } => {
            init_logging(None);
            cmd_config_validate(&config)
        }
        Commands::Route {
            action:
                RouteAction::Lookup {
                    destination,
                    config,
                },
        } => {
            init_logging(None);
            cmd_route_lookup(&config, destination)
        }
        Commands::Run { config } => cmd_run(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_checked(config_path: &Path) -> Result<config::Config, String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    Ok(cfg)
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());
    load_checked(config_path)?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn cmd_route_lookup(config_path: &Path, destination: Ipv4Addr) -> Result<(), String> {
    let cfg = load_checked(config_path)?;
    let table = cfg.routing_table();

    match table.longest_prefix_match(destination) {
        Some(route) => {
            println!("{}", route);
            println!("next hop {}", route.next_hop(destination));
            Ok(())
        }
        None => Err(format!("{}: network unreachable", destination)),
    }
}

fn cmd_run(config_path: &Path) -> Result<(), String> {
    use srouter::capture::{AfPacketSocket, ChannelLink};
    use srouter::dataplane::SystemClock;
    use std::collections::HashMap;
    use tokio::runtime::Runtime;
    use tracing::warn;

    let cfg = load_checked(config_path)?;
    init_logging(Some(&cfg.logging));
    info!("Loaded {}", config_path.display());

    let interfaces = cfg.interface_list().map_err(|e| e.to_string())?;
    let routes = cfg.routing_table();
    let router_config = cfg.router_config();

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let mut sockets = HashMap::new();
        for iface in interfaces.iter() {
            info!("Binding to interface {}...", iface.name);
            let socket = AfPacketSocket::bind(&iface.name).map_err(|e| {
                format!(
                    "Failed to bind to {}: {}. Run with root privileges.",
                    iface.name, e
                )
            })?;
            info!("  {} configured: MAC={}, IP={}", iface.name, iface.mac, iface.ip);
            sockets.insert(iface.name.clone(), Arc::new(socket));
        }

        for route in routes.routes() {
            info!("  route {}", route);
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let (link, mut outbound) = ChannelLink::new();
        let router = Arc::new(Router::new(
            interfaces,
            routes,
            Arc::new(link),
            Arc::new(SystemClock),
            router_config,
            metrics.clone(),
        ));

        let sweeper = router.spawn_sweeper();

        // Single writer per socket: the core only queues frames
        let tx_sockets = sockets.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(out) = outbound.recv().await {
                match tx_sockets.get(&out.interface) {
                    Some(socket) => {
                        if let Err(e) = socket.send(&out.frame).await {
                            warn!("Failed to send on {}: {}", out.interface, e);
                        }
                    }
                    None => warn!("No socket for interface {}", out.interface),
                }
            }
        });

        let receivers: Vec<_> = sockets
            .into_iter()
            .map(|(name, socket)| tokio::spawn(receive_loop(socket, Arc::clone(&router), name)))
            .collect();

        info!("Router started, processing packets...");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for shutdown signal: {}", e))?;

        info!("Shutting down");
        for task in receivers {
            task.abort();
        }
        sweeper.abort();
        dispatcher.abort();

        router.dump_arp_cache();
        for (name, value) in metrics.export() {
            info!("{} = {}", name, value);
        }

        Ok(())
    })
}

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Feed every frame received on `socket` to the router.
///
/// Consecutive receive errors back off exponentially up to `RECV_BACKOFF_MAX`.
async fn receive_loop<C: Capture>(socket: Arc<C>, router: Arc<Router>, name: String) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE + 512];
    let mut backoff = RECV_BACKOFF_MIN;
    loop {
        match socket.recv(&mut buf).await {
            Ok(rx_info) => {
                backoff = RECV_BACKOFF_MIN;
                router.handle_frame(&buf[..rx_info.len], &name);
            }
            Err(e) => {
                error!("Receive error on {}: {} (retrying in {:?})", name, e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECV_BACKOFF_MAX);
            }
        }
    }
}
