use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use ae::{ServerConfig, ServerSimulation, UdpTransport};

#[derive(Parser)]
#[command(name = "ae-server")]
#[command(about = "Authoritative ae game server")]
struct Args {
    #[arg(short, long, help = "TOML file with server settings")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    max_peers: Option<usize>,

    #[arg(long, help = "Map players join by default")]
    map: Option<String>,

    #[arg(long, help = "Artificial delay on received packets in ms")]
    fake_lag_ms: Option<u64>,

    #[arg(long, help = "Fraction of unreliable packets to drop (0-1)")]
    packet_loss: Option<f32>,
}

impl Args {
    fn into_config(self) -> Result<(String, ServerConfig)> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if let Some(map) = self.map {
            config.map_name = map;
        }
        if let Some(lag) = self.fake_lag_ms {
            config.fake_lag_ms = lag;
        }
        if let Some(loss) = self.packet_loss {
            config.packet_loss = loss;
        }
        config.validate()?;

        Ok((format!("{}:{}", self.bind, config.port), config))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (bind_addr, config) = Args::parse().into_config()?;
    let transport = UdpTransport::listen(bind_addr.as_str(), &config.transport())
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    log::info!("Server started on {}", transport.local_addr());

    let mut server = ServerSimulation::new(transport, config);
    spawn_console(server.running());
    server.run();

    Ok(())
}

/// Clears `running` when "stop" or "quit" is typed.
fn spawn_console(running: Arc<AtomicBool>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { return };
            match line.trim() {
                "stop" | "quit" => {
                    running.store(false, Ordering::SeqCst);
                    return;
                }
                "" => {}
                other => log::warn!("Unknown command '{}'", other),
            }
        }
    });
}
