#![forbid(unsafe_code)]

//! ipxlink command line tool.
//!
//! Hosts or joins a DOSBox IPX session. LAN play shares the host's address;
//! Internet play maps the tunnel port on the router via UPnP and shares a
//! discovery code instead.

use std::{net::Ipv4Addr, path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ipxlink_core::{Endpoint, IpxConfig, DEFAULT_PORT};
use ipxlink_session::{DosboxLauncher, GameRef, HostRequest, Platform, SessionOrchestrator};
use ipxlink_transport::{decode, discover, is_non_public, is_shareable, DiscoveryCode, PortMapper, SearchOptions};

#[derive(Parser)]
#[command(name = "ipxlink", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: config.toml in the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a game as IPX tunnel server
    Host {
        /// UDP port of the tunnel [default: from config, else 19900]
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
        /// Make the session reachable from the Internet
        #[arg(short, long)]
        internet: bool,
        /// Public address to share instead of the router's report
        #[arg(short = 'I', long, value_name = "IP", requires = "internet")]
        public_ip: Option<Ipv4Addr>,
        /// Do not configure the router; forward the port manually
        #[arg(short = 'U', long, requires = "internet")]
        skip_upnp: bool,
        /// Game directory, mounted as C:
        dir: PathBuf,
        /// Program to run, relative to DIR, with its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Join a hosted game by LAN address or discovery code
    Join {
        /// UDP port of the tunnel; a discovery code with its own port overrides it
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
        /// Game directory, mounted as C:
        dir: PathBuf,
        /// Host LAN address or discovery code
        host: String,
        /// Program to run, relative to DIR, with its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Convert between addresses and discovery codes
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },
    /// Look for a UPnP gateway and show what it reports
    Gateway,
}

#[derive(Subcommand)]
enum CodeAction {
    /// Print the discovery code of an address
    Encode {
        ip: Ipv4Addr,
        #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
    /// Print the address behind a discovery code
    Decode { code: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &IpxConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = IpxConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config, cli.verbose);
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Host {
            port,
            internet,
            public_ip,
            skip_upnp,
            dir,
            command,
        } => {
            let request = HostRequest {
                port: port.unwrap_or(config.port),
                internet,
                public_ip,
                skip_upnp,
            };
            host(&config, GameRef::new(dir, command.join(" ")), request).await
        }
        Commands::Join {
            port,
            dir,
            host,
            command,
        } => join(&config, &GameRef::new(dir, command.join(" ")), &host, port.unwrap_or(config.port)),
        Commands::Code { action } => code(action),
        Commands::Gateway => gateway(&config).await,
    }
}

fn orchestrator(config: &IpxConfig) -> SessionOrchestrator<DosboxLauncher> {
    SessionOrchestrator::new(config, DosboxLauncher::new(Platform::current(), config))
}

async fn host(config: &IpxConfig, game: GameRef, request: HostRequest) -> Result<()> {
    if request.internet && !request.skip_upnp {
        println!("{}", style("Looking for a UPnP gateway...").cyan());
    }
    // Dropping the in-flight future releases any mapping already made.
    let orch = orchestrator(config);
    let session = tokio::select! {
        hosted = orch.host(&game, request) => hosted.context("cannot host")?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };

    println!("{}", style("DOSBox started as IPX server").green().bold());
    print!("{}", session.status());

    if !session.holds_mapping() {
        session.close().await;
        return Ok(());
    }
    println!(
        "{}",
        style("Keep ipxlink running while you play; press Ctrl-C to remove the port mapping.").yellow()
    );
    let interrupted = tokio::signal::ctrl_c().await;
    println!("Removing port mapping...");
    session.close().await;
    interrupted.context("waiting for Ctrl-C")
}

fn join(config: &IpxConfig, game: &GameRef, host: &str, port: u16) -> Result<()> {
    let status = orchestrator(config)
        .join(game, host, port)
        .with_context(|| format!("cannot join '{host}'"))?;
    println!("{}", style(&status).green());
    Ok(())
}

fn code(action: CodeAction) -> Result<()> {
    match action {
        CodeAction::Encode { ip, port } => {
            let code = DiscoveryCode::encode(Endpoint::new(ip, port)?);
            println!("{code}");
            if !is_shareable(ip) {
                eprintln!(
                    "{}",
                    style(format!("{ip} is not a public address; peers on the Internet cannot reach it")).yellow()
                );
            }
        }
        CodeAction::Decode { code } => {
            let endpoint = decode(&code)?;
            println!("{endpoint}");
        }
    }
    Ok(())
}

async fn gateway(config: &IpxConfig) -> Result<()> {
    let opts = SearchOptions::from(config);
    println!(
        "{}",
        style(format!("Searching for a UPnP gateway ({:.1} s)...", opts.timeout.as_secs_f32())).cyan()
    );
    let device = discover(&opts).await?;
    println!("Gateway:      {}", device.friendly_name.as_deref().unwrap_or("(unnamed)"));
    println!("Description:  {}", device.location);
    println!("Control URL:  {}", device.control_url);
    println!("Service:      {}", device.service_type);

    let mapper = PortMapper::new(device, opts.request_timeout)?;
    match mapper.external_ip().await {
        Ok(ip) if is_non_public(ip) => {
            println!("External IP:  {ip}");
            println!(
                "{}",
                style("The router itself is behind another NAT (CGNAT?); port mapping will not reach the Internet.")
                    .yellow()
            );
        }
        Ok(ip) if !is_shareable(ip) => {
            println!("External IP:  {ip}");
            println!("{}", style("The router has no routable WAN address; is its Internet link up?").yellow());
        }
        Ok(ip) => println!("External IP:  {ip}"),
        Err(e) => println!("External IP:  unavailable ({e})"),
    }
    Ok(())
}
