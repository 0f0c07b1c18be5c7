//! throwfile command-line client
//!
//! Joins a relay channel, connects to the peer on the other end and sends or
//! receives files.
//!
//! # Usage
//!
//! ```bash
//! # Create a channel and wait for files
//! throwfile --signaling-url wss://relay.example.org/prod --output-dir ~/Downloads
//!
//! # Send two files to whoever is on channel AB12CD
//! throwfile --signaling-url wss://relay.example.org/prod --channel AB12CD \
//!   report.pdf photo.jpg
//!
//! # Accept everything without prompting, verbose logs
//! RUST_LOG=throwfile=debug throwfile --channel AB12CD --auto-accept
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use throwfile::{
    ChannelId, ConnectionState, Direction, Error, IncomingFile, OutboundFile, Session,
    SessionConfig, SessionEvent, TransferEvent, TurnServerConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Offers of one file before a transient failure counts as final
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Peer-to-peer file transfer over WebRTC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling relay WebSocket URL
    #[arg(long, env = "THROWFILE_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Channel identifier shared with the peer (generated when omitted)
    #[arg(short, long, env = "THROWFILE_CHANNEL")]
    channel: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "THROWFILE_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "THROWFILE_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// TOML configuration file
    #[arg(long, env = "THROWFILE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory received files are written to
    #[arg(short, long, default_value = ".", env = "THROWFILE_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Accept every incoming file without prompting
    #[arg(long, default_value_t = false)]
    auto_accept: bool,

    /// Seconds to wait for the peer connection before giving up on sending
    #[arg(long, default_value_t = 60, env = "THROWFILE_CONNECT_TIMEOUT")]
    connect_timeout_secs: u64,

    /// Files to send once connected
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = build_config(&args)?;
    config.validate()?;

    let channel = match &args.channel {
        Some(raw) => ChannelId::parse(raw)?,
        None => ChannelId::generate(),
    };
    println!("Channel: {}", channel);

    let mut outgoing = SendQueue::default();
    for path in &args.files {
        let file = OutboundFile::from_path(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        outgoing.waiting.push_back((file, 0));
    }

    let (session, mut events) = Session::connect(config, channel)
        .await
        .context("failed to connect to the signaling relay")?;
    session.join().await?;
    info!("Waiting for a peer to join channel {}", session.channel());

    let sending = !outgoing.is_done();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut progress = ProgressPrinter::default();
    let mut connected = false;

    let connect_deadline = tokio::time::sleep(Duration::from_secs(args.connect_timeout_secs));
    tokio::pin!(connect_deadline);

    loop {
        if connected && outgoing.in_flight.is_none() {
            if let Some((file, attempts)) = outgoing.waiting.pop_front() {
                println!("Offering {} ({} bytes)", file.filename, file.size());
                match session.send_file(file.clone()).await {
                    Ok(()) => outgoing.in_flight = Some((file, attempts + 1)),
                    Err(e) => outgoing.failed(file, attempts + 1, e),
                }
                continue;
            }
            if sending && outgoing.is_done() {
                println!("All files processed");
                break;
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut connect_deadline, if sending && !connected => {
                session.close().await.ok();
                bail!(
                    "no peer connection within {}s",
                    args.connect_timeout_secs
                );
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::PeerJoined { .. } => println!("Peer joined"),
                    SessionEvent::PeerLeft { .. } => {
                        println!("Peer left");
                        connected = false;
                    }
                    SessionEvent::ConnectionState(state) => {
                        info!(%state, "Connection state");
                        match state {
                            ConnectionState::Connected => {
                                println!("Connected");
                                connected = true;
                            }
                            ConnectionState::Failed | ConnectionState::Closed => connected = false,
                            _ => {}
                        }
                    }
                    SessionEvent::SignalingClosed => {
                        warn!("Signaling relay connection closed");
                        if !connected {
                            break;
                        }
                    }
                    SessionEvent::Transfer(event) => match event {
                        TransferEvent::IncomingRequest(incoming) => {
                            decide(incoming, args.auto_accept, &mut stdin).await;
                        }
                        TransferEvent::Progress { filename, direction, percent } => {
                            progress.update(&filename, direction, percent);
                        }
                        TransferEvent::Received(file) => {
                            match file.save_into(&args.output_dir).await {
                                Ok(path) => println!("Saved {}", path.display()),
                                Err(e) => eprintln!("Could not save {}: {}", file.filename, e),
                            }
                        }
                        TransferEvent::Rejected { filename } => {
                            println!("Peer declined {}", filename);
                            outgoing.settle(Err(Error::TransferRejected(filename)));
                        }
                        TransferEvent::SendComplete { filename } => {
                            println!("Sent {}", filename);
                            outgoing.settle(Ok(()));
                        }
                        TransferEvent::SendFailed { error, .. } => {
                            outgoing.settle(Err(error));
                        }
                        TransferEvent::InboundDiscarded { filename, received_bytes } => {
                            eprintln!(
                                "Discarded incomplete {} after {} bytes",
                                filename, received_bytes
                            );
                        }
                    },
                }
            }
        }
    }

    session.close().await?;
    if !outgoing.undelivered.is_empty() {
        bail!("not delivered: {}", outgoing.undelivered.join(", "));
    }
    Ok(())
}

/// Files to send, one offered at a time
#[derive(Default)]
struct SendQueue {
    /// Not yet offered, with the number of earlier attempts
    waiting: VecDeque<(OutboundFile, u32)>,
    /// Offered and awaiting its outcome
    in_flight: Option<(OutboundFile, u32)>,
    undelivered: Vec<String>,
}

impl SendQueue {
    fn is_done(&self) -> bool {
        self.waiting.is_empty() && self.in_flight.is_none()
    }

    /// Record the outcome of the file in flight
    fn settle(&mut self, outcome: throwfile::Result<()>) {
        let Some((file, attempts)) = self.in_flight.take() else {
            return;
        };
        if let Err(e) = outcome {
            self.failed(file, attempts, e);
        }
    }

    /// Put `file` back at the front after a transient failure, or give up on it
    fn failed(&mut self, file: OutboundFile, attempts: u32, error: Error) {
        if error.is_retryable() && attempts < MAX_SEND_ATTEMPTS {
            warn!(filename = %file.filename, attempts, "Send failed, retrying: {}", error);
            self.waiting.push_front((file, attempts));
        } else {
            eprintln!("Could not send {}: {}", file.filename, error);
            self.undelivered.push(file.filename);
        }
    }
}

/// Ask on stdin whether to take the file, unless auto-accepting
async fn decide(incoming: IncomingFile, auto_accept: bool, stdin: &mut Lines<BufReader<Stdin>>) {
    let size_mb = incoming.size() as f64 / 1024.0 / 1024.0;
    if auto_accept {
        println!("Accepting {} ({:.2} MB)", incoming.filename(), size_mb);
        incoming.accept();
        return;
    }

    println!(
        "Receive \"{}\" ({:.2} MB)? [y/N]",
        incoming.filename(),
        size_mb
    );
    match stdin.next_line().await {
        Ok(Some(answer)) if matches!(answer.trim(), "y" | "Y" | "yes") => incoming.accept(),
        _ => incoming.reject(),
    }
}

#[derive(Default)]
struct ProgressPrinter {
    last: HashMap<(String, bool), u8>,
}

impl ProgressPrinter {
    fn update(&mut self, filename: &str, direction: Direction, percent: u8) {
        let sending = direction == Direction::Send;
        let last = self
            .last
            .entry((filename.to_string(), sending))
            .or_insert(u8::MAX);
        if *last == u8::MAX || *last / 10 != percent / 10 {
            let verb = if sending { "Sending" } else { "Receiving" };
            println!("{} {}: {}%", verb, filename, percent);
            *last = percent;
        }
        if percent == 100 {
            self.last.remove(&(filename.to_string(), sending));
        }
    }
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    }
    .apply_env();

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    for turn in &args.turn_servers {
        config
            .turn_servers
            .push(parse_turn_server(turn).map_err(anyhow::Error::msg)?);
    }

    Ok(config)
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons, so join remaining parts
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("throwfile=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
