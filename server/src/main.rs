use clap::Parser;
use log::{error, info};
use server::network::Server;
use std::time::Duration;
use tokio::sync::watch;

/// Main-method of the application.
/// Parses command-line arguments, binds the server and runs it until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Seconds between telemetry broadcasts
        #[clap(short, long, default_value = "10")]
        broadcast_interval: u64,
        /// Maximum simultaneous client sessions
        #[clap(short, long, default_value = "50")]
        max_sessions: usize,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(
        &address,
        args.max_sessions,
        Duration::from_secs(args.broadcast_interval),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_handle = tokio::spawn(server.run(shutdown_rx));

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server failed: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown_tx.send(true);
            if let Err(e) = (&mut server_handle).await {
                error!("Server task panicked during shutdown: {}", e);
            }
        }
    }

    Ok(())
}
