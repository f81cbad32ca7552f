//! AudSync client
//!
//! Connects to the relay, captures microphone audio, and plays back the mix
//! of every other client. Driven by an interactive command prompt.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audsync::{
    audio::device::{format_device_table, list_devices},
    client::{AudioClient, ClientState},
    config::{AudioConfig, ClientConfig, DspConfig, NetworkConfig},
    constants::*,
    logger::{log_path, SessionLogger},
    recorder::{recording_path, WavRecorder},
};

#[derive(Parser, Debug)]
#[command(version, about = "AudSync streaming client")]
struct Cli {
    /// Relay server host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Relay server port
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Input device index from the device table
    #[arg(long)]
    input_device: Option<usize>,

    /// Output device index from the device table
    #[arg(long)]
    output_device: Option<usize>,

    /// Sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Channel count
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    channels: u16,

    /// Frames per buffer
    #[arg(long, default_value_t = DEFAULT_FRAMES_PER_BUFFER)]
    frames: u32,

    /// Enable the voice processing chain on playback
    #[arg(long)]
    dsp: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    println!("=== Available Audio Devices ===");
    print!("{}", format_device_table(&list_devices()));
    println!();

    let config = ClientConfig {
        audio: AudioConfig::new(cli.sample_rate as i32, cli.channels as i32, cli.frames as i32),
        network: NetworkConfig {
            host: cli.host.clone(),
            port: cli.port,
            ..NetworkConfig::default()
        },
        dsp: DspConfig { enabled: cli.dsp },
        input_device: cli.input_device,
        output_device: cli.output_device,
        ..ClientConfig::default()
    };

    let logger = Arc::new(SessionLogger::new());
    let recorder = Arc::new(WavRecorder::new());
    let mut client = AudioClient::new(config, logger.clone(), recorder.clone())
        .context("invalid configuration")?;

    client
        .connect()
        .with_context(|| format!("failed to connect to {}:{}", cli.host, cli.port))?;

    println!("Connected to {}:{}", cli.host, cli.port);
    print_help();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.unwrap_or_default();
        let command = line.trim();

        if client.poll() == ClientState::Idle && command != "quit" && !command.is_empty() {
            println!("Connection lost; only 'quit' is available.");
            continue;
        }

        match command {
            "" => {}
            "start" => {
                if client.is_audio_active() {
                    println!("Audio already active");
                } else {
                    match client.start_audio() {
                        Ok(()) => println!("Audio started"),
                        Err(e) => println!("Failed to start audio: {e}"),
                    }
                }
            }
            "stop" => {
                if client.is_audio_active() {
                    client.stop_audio();
                    println!("Audio stopped");
                } else {
                    println!("Audio not active");
                }
            }
            "logon" => {
                let path = log_path("client_session", "client");
                match logger.start(&path) {
                    Ok(()) => println!("Logging started: {}", path.display()),
                    Err(e) => println!("Failed to start logging: {e}"),
                }
            }
            "logoff" => {
                logger.stop();
                println!("Logging stopped");
            }
            "recstart" => {
                let path = recording_path("client_audio");
                let audio = AudioConfig::new(
                    cli.sample_rate as i32,
                    cli.channels as i32,
                    cli.frames as i32,
                );
                match recorder.start(&path, audio.sample_rate as u32, audio.channels as u16) {
                    Ok(()) => println!("Recording started: {}", path.display()),
                    Err(e) => println!("Failed to start recording: {e}"),
                }
            }
            "recstop" => {
                recorder.stop();
                println!("Recording stopped");
            }
            "status" => print_status(&client),
            "quit" => break,
            other => println!("Unknown command: {other}"),
        }
        prompt();
    }

    client.disconnect();
    println!("Goodbye");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  start     - Start audio streaming");
    println!("  stop      - Stop audio streaming");
    println!("  logon     - Start session logging");
    println!("  logoff    - Stop session logging");
    println!("  recstart  - Start recording outgoing audio");
    println!("  recstop   - Stop recording");
    println!("  status    - Show session statistics");
    println!("  quit      - Disconnect and exit");
    prompt();
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn print_status(client: &AudioClient) {
    let status = client.status();
    println!("State: {:?}", status.state);
    println!(
        "Sent: {} packets, {} bytes, {} heartbeats",
        status.packets_sent, status.bytes_sent, status.heartbeats_sent
    );
    println!(
        "Capture: {} blocks ({} dropped)",
        status.blocks_captured, status.blocks_dropped
    );
    let jitter = &status.jitter;
    println!(
        "Jitter buffer: {} buffered, ready={}, target {:.1} ms, jitter {:.2} ms, latency {:.1} ms",
        jitter.buffered, jitter.ready, jitter.target_ms, jitter.avg_jitter_ms, jitter.avg_latency_ms
    );
    println!(
        "  received {}, played {}, lost {}, dropped {}, duplicates {}, silence {}",
        jitter.received,
        jitter.played,
        jitter.lost,
        jitter.dropped,
        jitter.duplicates,
        jitter.silence_inserted
    );
    println!(
        "Ring: {} overflow, {} underflow samples; warnings: {}",
        status.ring_overflow, status.ring_underflow, status.warnings
    );
}
