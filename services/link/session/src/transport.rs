//! TCP transport for link sessions.
//!
//! [`TcpLink`] owns at most one live TCP connection. Reading and writing run
//! on a spawned task that reports decoded messages and closure back to the
//! session through its event channel; writes are queued so the session
//! never waits on the socket.

use crate::link::{Link, LinkEvent, LinkEventKind, RemoteAddr};
use bytes::{Bytes, BytesMut};
use link_wire::{Message, Parser};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a remote address
pub async fn connect_tcp(addr: &RemoteAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect((addr.host.as_str(), addr.port)).await
}

/// Queued write
#[derive(Debug)]
struct WriteOp {
    bytes: Bytes,
    close_after: bool,
}

/// TCP implementation of [`Link`]
#[derive(Debug)]
pub struct TcpLink {
    parser: Arc<dyn Parser>,
    events: mpsc::UnboundedSender<LinkEvent>,
    generation: u64,
    writer: Option<mpsc::UnboundedSender<WriteOp>>,
    io_task: Option<JoinHandle<()>>,
}

impl TcpLink {
    /// Create an unconnected link reporting into `events`
    pub fn new(parser: Arc<dyn Parser>, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            parser,
            events,
            generation: 0,
            writer: None,
            io_task: None,
        }
    }

    /// Wrap an already accepted stream
    pub fn accepted(
        stream: TcpStream,
        parser: Arc<dyn Parser>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let mut link = Self::new(parser, events);
        let generation = link.next_generation();
        let (tx, rx) = mpsc::unbounded_channel();
        link.writer = Some(tx);

        let parser = link.parser.clone();
        let events = link.events.clone();
        link.io_task = Some(tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            run_io(reader, writer, parser, events, generation, rx).await;
        }));
        link
    }

    /// Drop the current connection and open a new generation
    fn next_generation(&mut self) -> u64 {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        self.writer = None;
        self.generation += 1;
        self.generation
    }
}

impl Link for TcpLink {
    fn connect(&mut self, addr: &RemoteAddr) {
        let generation = self.next_generation();
        let (tx, rx) = mpsc::unbounded_channel();
        self.writer = Some(tx);

        let parser = self.parser.clone();
        let events = self.events.clone();
        let addr = addr.clone();
        self.io_task = Some(tokio::spawn(async move {
            match connect_tcp(&addr).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    let _ = events.send(LinkEvent {
                        generation,
                        kind: LinkEventKind::Connected(Ok(())),
                    });
                    let (reader, writer) = stream.into_split();
                    run_io(reader, writer, parser, events, generation, rx).await;
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    let _ = events.send(LinkEvent {
                        generation,
                        kind: LinkEventKind::Connected(Err(e)),
                    });
                }
            }
        }));
    }

    fn write(&mut self, msg: &Message, close_after: bool) {
        let Some(writer) = &self.writer else {
            warn!("Dropping write without a connection: {}", msg.notice_info());
            return;
        };

        match self.parser.encode(msg) {
            Ok(bytes) => {
                if writer.send(WriteOp { bytes, close_after }).is_err() {
                    debug!("Writer for generation {} already gone", self.generation);
                }
            }
            Err(e) => error!("Failed to encode {}: {}", msg.notice_info(), e),
        }
    }

    fn shutdown(&mut self) {
        let generation = self.generation;
        self.next_generation();
        debug!("Shut down connection generation {}", generation);
    }

    fn parser(&self) -> &dyn Parser {
        self.parser.as_ref()
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

/// Run one connection until either direction fails.
///
/// A failed write ends the reader too, so no `Read` event follows the
/// `Closed` it reports. A write half shut down by `close_after` leaves the
/// reader running until the peer hangs up.
async fn run_io<R, W>(
    reader: R,
    writer: W,
    parser: Arc<dyn Parser>,
    events: mpsc::UnboundedSender<LinkEvent>,
    generation: u64,
    writes: mpsc::UnboundedReceiver<WriteOp>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let read = read_loop(reader, parser, events.clone(), generation);
    tokio::pin!(read);

    tokio::select! {
        _ = &mut read => return,
        written = write_loop(writer, writes, generation) => {
            if let Err(e) = written {
                debug!("Write failed on generation {}: {}", generation, e);
                let _ = events.send(LinkEvent {
                    generation,
                    kind: LinkEventKind::Closed,
                });
                return;
            }
        }
    }

    read.await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    parser: Arc<dyn Parser>,
    events: mpsc::UnboundedSender<LinkEvent>,
    generation: u64,
) {
    let mut buffer = BytesMut::with_capacity(64 * 1024);

    'outer: loop {
        loop {
            match parser.decode(&mut buffer) {
                Ok(Some(msg)) => {
                    let event = LinkEvent {
                        generation,
                        kind: LinkEventKind::Read(msg),
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Protocol error on generation {}: {}", generation, e);
                    break 'outer;
                }
            }
        }

        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!("EOF on generation {}", generation);
                break;
            }
            Ok(n) => trace!("Read {} bytes, buffer now has {} bytes", n, buffer.len()),
            Err(e) => {
                debug!("Read failed on generation {}: {}", generation, e);
                break;
            }
        }
    }

    let _ = events.send(LinkEvent {
        generation,
        kind: LinkEventKind::Closed,
    });
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut writes: mpsc::UnboundedReceiver<WriteOp>,
    generation: u64,
) -> std::io::Result<()> {
    while let Some(op) = writes.recv().await {
        writer.write_all(&op.bytes).await?;
        if op.close_after {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!("Write half shutdown on generation {}: {}", generation, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_wire::{parser_for, ProtocolKind};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();

        let stream = connect_tcp(&RemoteAddr::new("127.0.0.1", bound.port()))
            .await
            .unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_link_exchanges_messages() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let parser = parser_for(ProtocolKind::Binary);

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let mut client = TcpLink::new(parser.clone(), client_tx);
        client.connect(&RemoteAddr::new("127.0.0.1", bound.port()));

        let (stream, _) = listener.accept().await.unwrap();
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let mut server = TcpLink::accepted(stream, parser, server_tx);

        let connected = next_event(&mut client_rx).await;
        assert_eq!(connected.generation, client.generation());
        assert!(matches!(connected.kind, LinkEventKind::Connected(Ok(()))));

        client.write(&Message::request(12, "over the wire"), false);
        let event = next_event(&mut server_rx).await;
        assert_eq!(event.generation, server.generation());
        match event.kind {
            LinkEventKind::Read(msg) => {
                assert_eq!(msg.seq_id, 12);
                assert_eq!(msg.payload.as_ref(), b"over the wire");
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Writing with close_after ends the connection for the client.
        server.write(&Message::new(link_wire::MessageKind::Response, 12), true);
        match next_event(&mut client_rx).await.kind {
            LinkEventKind::Read(msg) => assert!(msg.is_response()),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            next_event(&mut client_rx).await.kind,
            LinkEventKind::Closed
        ));
    }

    #[tokio::test]
    async fn test_write_failure_stops_reads() {
        let parser = parser_for(ProtocolKind::Binary);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (reader, mut peer) = tokio::io::duplex(64 * 1024);
        let (writer, sink) = tokio::io::duplex(64 * 1024);
        drop(sink);

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let io = tokio::spawn(run_io(
            reader,
            writer,
            parser.clone(),
            events_tx,
            7,
            write_rx,
        ));

        let bytes = parser.encode(&Message::request(1, "lost")).unwrap();
        write_tx
            .send(WriteOp {
                bytes: bytes.clone(),
                close_after: false,
            })
            .unwrap();

        let event = next_event(&mut events_rx).await;
        assert_eq!(event.generation, 7);
        assert!(matches!(event.kind, LinkEventKind::Closed));

        // The peer still sends, but nothing is read on this generation.
        let _ = peer.write_all(&bytes).await;
        io.await.unwrap();
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_bumps_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = TcpLink::new(parser_for(ProtocolKind::Binary), tx);
        assert_eq!(link.generation(), 0);
        link.shutdown();
        assert_eq!(link.generation(), 1);
        // No connection: the write is dropped quietly.
        link.write(&Message::request(1, "nowhere"), false);
    }
}
