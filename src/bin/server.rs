//! AudSync relay server
//!
//! Accepts clients and fans audio out between them. Driven by the same
//! interactive prompt as the client; the audio verbs are not meaningful on
//! the relay and say so.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audsync::{
    constants::DEFAULT_PORT,
    logger::{log_path, SessionLogger},
    server::AudioServer,
};

#[derive(Parser, Debug)]
#[command(version, about = "AudSync relay server")]
struct Cli {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let logger = Arc::new(SessionLogger::new());
    let mut server = AudioServer::start(cli.port, logger.clone())
        .with_context(|| format!("failed to bind port {}", cli.port))?;

    println!("AudSync server listening on {}", server.local_addr());
    print_help();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.unwrap_or_default();
        match line.trim() {
            "" => {}
            "start" | "stop" => {
                println!("The relay forwards audio whenever clients are ready; nothing to do.");
            }
            "recstart" | "recstop" => {
                println!("The relay never decodes audio; record on a client instead.");
            }
            "logon" => {
                let path = log_path("server_session", "server");
                match logger.start(&path) {
                    Ok(()) => println!("Logging started: {}", path.display()),
                    Err(e) => println!("Failed to start logging: {e}"),
                }
            }
            "logoff" => {
                logger.stop();
                println!("Logging stopped");
            }
            "status" => {
                let summaries = server.client_summaries();
                println!("{} client(s) connected", summaries.len());
                for client in summaries {
                    println!(
                        "  {}: ready={}, {} Hz x{} ch x{} frames, {} frames dropped",
                        client.id,
                        client.ready,
                        client.config.sample_rate,
                        client.config.channels,
                        client.config.frames_per_buffer,
                        client.dropped
                    );
                }
            }
            "quit" => break,
            other => println!("Unknown command: {other}"),
        }
        prompt();
    }

    server.stop();
    println!("Goodbye");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  status    - List connected clients");
    println!("  logon     - Start session logging");
    println!("  logoff    - Stop session logging");
    println!("  quit      - Shut the relay down");
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
