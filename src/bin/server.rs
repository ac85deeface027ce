//! # Server Binary Entry Point
//!
//! Thin wrapper that initializes and runs one chat server with its middleware.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! cargo run --bin server -- --port 5002
//! ```
//!
//! The server will:
//! 1. Load configuration from the given TOML file (defaults otherwise)
//! 2. Bind its unicast port and join the multicast group
//! 3. Listen for peers during the startup discovery window
//! 4. Take part in ring elections, and relay chat while it leads

use clap::Parser;
use log::info;

// Import from the library crate
use lan_chat::common::config::load_or_default;
use lan_chat::common::logging::init_logger;
use lan_chat::server::{ServerConfig, ServerMiddleware};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    ///
    /// Example: config/server.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Unicast port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config: ServerConfig = load_or_default(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let middleware = ServerMiddleware::bind(config).await?;

    // Runs until a task dies or the process is interrupted
    tokio::select! {
        _ = middleware.run() => {}
        _ = tokio::signal::ctrl_c() => info!("🛑 Server shutting down"),
    }

    Ok(())
}
