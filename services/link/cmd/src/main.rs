//! Link node binary.
//!
//! `link serve` accepts sessions and echoes every request back to its
//! sender. `link call` opens one client session, sends a batch of requests
//! and reports the outcome of each one.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use link_session::{listen_tcp, RemoteAddr, Session, SessionHandle, SessionOwner};
use link_wire::{Message, ProtocolKind, ReplyCode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// Session layer node
#[derive(Parser, Debug)]
#[command(name = "link", version, about = "Request/response sessions over TCP")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "link.yaml")]
    config: PathBuf,

    /// Wire protocol (binary or http)
    #[arg(long)]
    protocol: Option<ProtocolKind>,

    /// Heartbeat interval, e.g. 5s (0s disables)
    #[arg(long)]
    heartbeat: Option<humantime::Duration>,

    /// Reconnect after connection failures
    #[arg(long)]
    auto_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept sessions and echo every request
    Serve {
        /// Listen address, e.g. 0.0.0.0:9000
        #[arg(long, default_value = "127.0.0.1:9000")]
        listen: SocketAddr,
    },
    /// Send requests to a server and print their outcomes
    Call {
        /// Server address as host:port
        #[arg(long, default_value = "127.0.0.1:9000")]
        connect: String,

        /// Number of requests to send
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Per-request timeout, e.g. 3s
        #[arg(long)]
        timeout: Option<humantime::Duration>,

        /// How long to wait for the connection before sending anyway
        #[arg(long, default_value = "5s")]
        connect_timeout: humantime::Duration,

        /// Request body
        #[arg(long, default_value = "hello")]
        payload: String,
    },
}

/// Owner for accepted sessions: answers each request with its own payload
#[derive(Debug)]
struct EchoService {
    protocol: ProtocolKind,
}

impl SessionOwner for EchoService {
    fn on_accept(&self, session: &SessionHandle) {
        component_info!("serve", "Session {} accepted", session.id());
    }

    fn on_read(&self, session: &SessionHandle, message: Message) {
        if !message.is_request() {
            component_debug!(
                "serve",
                "Session {} ignoring {}",
                session.id(),
                message.notice_info()
            );
            return;
        }

        let mut reply = Message::response_to(&message).with_payload(message.payload.clone());
        if self.protocol == ProtocolKind::Http {
            if let Some(kind) = message.header("content-type") {
                reply = reply.with_header("content-type", kind);
            }
        }
        if let Err(e) = session.send_response(reply, false) {
            component_warn!("serve", "Session {} gone before reply: {}", session.id(), e);
        }
    }

    fn on_peer_close(&self, session: &SessionHandle) {
        component_info!("serve", "Session {} closed by peer", session.id());
    }
}

/// What the call session reports back to `main`
#[derive(Debug)]
enum CallEvent {
    Connected,
    Outcome {
        seq: u32,
        code: ReplyCode,
        elapsed: Duration,
        body: String,
    },
    PeerClosed,
}

/// Owner for the client session of `link call`
#[derive(Debug)]
struct CallClient {
    events: mpsc::UnboundedSender<CallEvent>,
}

/// Per-request context: request number and send time
struct Sent {
    seq: u32,
    at: Instant,
}

impl SessionOwner for CallClient {
    fn on_connected(&self, _session: &SessionHandle) {
        let _ = self.events.send(CallEvent::Connected);
    }

    fn on_read(&self, session: &SessionHandle, message: Message) {
        let Some(sent) = message.context_ref::<Sent>() else {
            component_debug!(
                "call",
                "Session {} got message without context: {}",
                session.id(),
                message.notice_info()
            );
            return;
        };
        let _ = self.events.send(CallEvent::Outcome {
            seq: sent.seq,
            code: message.code,
            elapsed: sent.at.elapsed(),
            body: String::from_utf8_lossy(&message.payload).into_owned(),
        });
    }

    fn on_peer_close(&self, _session: &SessionHandle) {
        let _ = self.events.send(CallEvent::PeerClosed);
    }
}

fn parse_remote(s: &str) -> Result<RemoteAddr> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected host:port, got '{}'", s))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in '{}'", s))?;
    Ok(RemoteAddr::new(host.trim_matches(|c| c == '[' || c == ']'), port))
}

async fn serve(config: &LinkConfig, listen: SocketAddr) -> Result<()> {
    let listener = listen_tcp(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    info!("Listening on {} ({})", listen, config.protocol);

    let owner: Arc<dyn SessionOwner> = Arc::new(EchoService {
        protocol: config.protocol,
    });
    let session_config = config.session_config();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                    Session::accept(session_config.clone(), stream, owner.clone());
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, stopping listener");
                return Ok(());
            }
        }
    }
}

async fn call(
    config: &LinkConfig,
    remote: RemoteAddr,
    count: u32,
    timeout: Duration,
    connect_timeout: Duration,
    payload: String,
) -> Result<bool> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::connect(
        config.session_config(),
        remote.clone(),
        Arc::new(CallClient { events: tx }),
    );

    match tokio::time::timeout(connect_timeout, rx.recv()).await {
        Ok(Some(CallEvent::Connected)) => {
            component_info!("call", "Connected to {}", remote);
        }
        _ => component_warn!(
            "call",
            "Not connected to {} after {:?}, sending anyway",
            remote,
            connect_timeout
        ),
    }

    for seq in 1..=count {
        let mut request = Message::request(seq, payload.clone()).with_context(Sent {
            seq,
            at: Instant::now(),
        });
        if config.protocol == ProtocolKind::Http {
            request = request
                .with_header(link_wire::http::METHOD, "POST")
                .with_header(link_wire::http::PATH, "/echo");
        }
        session.send_request(request, timeout)?;
    }

    let mut resolved = 0;
    let mut all_ok = true;
    while resolved < count {
        match rx.recv().await {
            Some(CallEvent::Outcome {
                seq,
                code,
                elapsed,
                body,
            }) => {
                resolved += 1;
                all_ok &= code == ReplyCode::Ok;
                println!("#{} {} {:?} {}", seq, code, elapsed, body);
            }
            Some(CallEvent::PeerClosed) => {
                component_warn!("call", "Server closed the connection");
            }
            Some(CallEvent::Connected) => {
                component_info!("call", "Connected to {}", remote);
            }
            None => break,
        }
    }

    if let Ok(stats) = session.stats().await {
        info!(
            "sent={} matched={} timeouts={} rejected={} heartbeats={}",
            stats.requests_sent,
            stats.responses_matched,
            stats.timeouts,
            stats.requests_rejected,
            stats.heartbeats_sent
        );
    }
    let _ = session.close();
    Ok(all_ok && resolved == count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "warn,link={level},link_node={level},link_session={level},link_wire={level}",
            level = args.log_level
        ))
    })?;

    let formatter = if std::env::var_os("NO_COLOR").is_some() {
        LinkLogFormatter::plain("link")
    } else {
        LinkLogFormatter::new("link")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(formatter)
        .init();

    info!("Starting link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load_from_file(&args.config)?;
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(heartbeat) = args.heartbeat {
        config.heartbeat_ms = Duration::from(heartbeat).as_millis() as u64;
    }
    if args.auto_reconnect {
        config.auto_reconnect = true;
    }
    info!(
        "Configuration: protocol={}, heartbeat={}ms, auto_reconnect={}, timeout={}ms",
        config.protocol, config.heartbeat_ms, config.auto_reconnect, config.request_timeout_ms
    );

    match args.command {
        Command::Serve { listen } => serve(&config, listen).await,
        Command::Call {
            connect,
            count,
            timeout,
            connect_timeout,
            payload,
        } => {
            let remote = parse_remote(&connect)?;
            let timeout = timeout.map(Duration::from).unwrap_or(config.request_timeout());
            let ok = call(
                &config,
                remote,
                count,
                timeout,
                connect_timeout.into(),
                payload,
            )
            .await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
