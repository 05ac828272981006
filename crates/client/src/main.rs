mod app;
mod input;

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use ae::{
    ClientConfig, ClientSimulation, LoopbackTransport, ServerConfig, ServerSimulation,
    UdpTransport,
};

use app::App;
use input::InputScript;

#[derive(Parser)]
#[command(name = "ae-client")]
#[command(about = "Headless ae client with prediction and reconciliation")]
struct Args {
    #[arg(short, long, help = "TOML file with client settings")]
    config: Option<PathBuf>,

    #[arg(
        short = 's',
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:31234)"
    )]
    connect: Option<String>,

    #[arg(long, help = "Run an in-process server instead of connecting over UDP")]
    host: bool,

    #[arg(long, help = "Map to join")]
    map: Option<String>,

    #[arg(
        long,
        default_value = "right:2,down:1,left:2,up:1",
        help = "Held inputs as keys:seconds segments"
    )]
    script: InputScript,

    #[arg(long, help = "Seconds to run; defaults to the length of the script")]
    duration: Option<f32>,

    #[arg(long, help = "Artificial delay on received packets in ms")]
    fake_lag_ms: Option<u64>,

    #[arg(long, help = "Fraction of unreliable packets to drop (0-1)")]
    packet_loss: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = client_config(&args)?;
    let duration = args.duration.map(Duration::from_secs_f32);

    if args.host {
        run_hosted(config, args.script, duration)
    } else {
        let addr = resolve(&config.server_addr)?;
        log::info!("Connecting to {}", addr);
        let transport = UdpTransport::connect(addr, &config.transport())?;
        App::new(ClientSimulation::new(transport, config), args.script, duration).run();
        Ok(())
    }
}

fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    if let Some(addr) = &args.connect {
        config.server_addr = addr.clone();
    }
    if let Some(map) = &args.map {
        config.map_name = map.clone();
    }
    if let Some(lag) = args.fake_lag_ms {
        config.fake_lag_ms = lag;
    }
    if let Some(loss) = args.packet_loss {
        config.packet_loss = loss;
    }
    config.validate()?;
    Ok(config)
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("invalid server address '{}'", addr))?
        .next()
        .ok_or_else(|| anyhow!("'{}' did not resolve", addr))
}

/// Runs a server on a background thread, connected to the client through
/// an in-memory transport pair.
fn run_hosted(config: ClientConfig, script: InputScript, duration: Option<Duration>) -> Result<()> {
    let server_config = ServerConfig {
        time_step: config.time_step,
        network_rate: config.network_rate,
        player_speed: config.player_speed,
        map_name: config.map_name.clone(),
        ..ServerConfig::default()
    };
    server_config.validate()?;

    let (client_transport, server_transport) =
        LoopbackTransport::pair(&config.transport(), &server_config.transport());

    let mut server = ServerSimulation::new(server_transport, server_config);
    let running = server.running();
    let handle = thread::Builder::new()
        .name("ae-server".into())
        .spawn(move || server.run())
        .context("failed to start server thread")?;
    log::info!("Hosting in-process server");

    App::new(ClientSimulation::new(client_transport, config), script, duration).run();

    running.store(false, Ordering::SeqCst);
    handle
        .join()
        .map_err(|_| anyhow!("server thread panicked"))?;
    Ok(())
}
