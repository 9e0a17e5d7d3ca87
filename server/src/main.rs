use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use server::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Seconds a disconnected player keeps their seat
    #[arg(short, long, default_value = "30")]
    grace_period_secs: u64,

    /// Seconds of inactivity before a session is evicted
    #[arg(long, default_value = "86400")]
    session_ttl_secs: u64,

    /// Seconds between idle-session sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        grace_period: Duration::from_secs(args.grace_period_secs),
        session_ttl: Duration::from_secs(args.session_ttl_secs),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs.max(1)),
    };

    info!(
        "Starting server on {} (grace period {:?})",
        config.bind_addr, config.grace_period
    );

    let server = Server::new(config, Arc::new(MemoryStore::new())).await?;
    let control = server.control();
    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => eprintln!("Server stopped with error: {}", e),
                Err(e) => eprintln!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control.send(ServerMessage::Shutdown);
        }
    }

    Ok(())
}
