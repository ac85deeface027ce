//! # Client Binary Entry Point
//!
//! Line-oriented terminal chat. Every line typed on stdin is sent to the
//! current leader; welcomes, relayed messages, notices and connection
//! changes are printed with a local timestamp.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml
//! ```
//!
//! End of input or Ctrl-C sends a best-effort `leave` and exits.

use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

// Import from the library crate
use lan_chat::client::{ChatEvent, ClientConfig, ClientMiddleware};
use lan_chat::common::config::load_or_default;
use lan_chat::common::logging::init_logger;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Local unicast port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,
}

fn print_line(text: &str) {
    println!("[{}] {}", chrono::Local::now().format("%H:%M"), text);
}

fn render(event: &ChatEvent) -> String {
    match event {
        ChatEvent::Welcome { name } => format!("Connected as {}", name),
        ChatEvent::Relayed { sender_name, text } => format!("{}: {}", sender_name, text),
        ChatEvent::Notice { text } => format!("* {}", text),
        ChatEvent::Connected { leader } => format!("Joining server {}...", leader),
        ChatEvent::Reconnecting => "Lost the server, reconnecting...".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config: ClientConfig = load_or_default(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.client.port = port;
    }

    let (middleware, mut events) = ClientMiddleware::bind(config).await?;
    let middleware = Arc::new(middleware);

    let runner = middleware.clone();
    tokio::spawn(async move { runner.run().await });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_line(&render(&event));
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = middleware.send_text(text).await {
                        print_line(&format!("Message not sent: {}", e));
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    middleware.leave().await;
    info!("👋 Client exiting");
    Ok(())
}
