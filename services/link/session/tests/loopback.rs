//! End-to-end session tests over loopback TCP.

use bytes::Bytes;
use link_session::{listen_tcp, RemoteAddr, Session, SessionConfig, SessionHandle, SessionOwner};
use link_wire::{Message, ProtocolKind, ReplyCode};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug)]
enum Event {
    Connected,
    Read {
        seq_id: u32,
        code: ReplyCode,
        context: Option<u32>,
        payload: Bytes,
    },
    PeerClose,
}

#[derive(Debug)]
struct ChannelOwner {
    tx: mpsc::UnboundedSender<Event>,
}

impl SessionOwner for ChannelOwner {
    fn on_connected(&self, _session: &SessionHandle) {
        let _ = self.tx.send(Event::Connected);
    }

    fn on_read(&self, _session: &SessionHandle, message: Message) {
        let _ = self.tx.send(Event::Read {
            seq_id: message.seq_id,
            code: message.code,
            context: message.context_ref::<u32>().copied(),
            payload: message.payload.clone(),
        });
    }

    fn on_peer_close(&self, _session: &SessionHandle) {
        let _ = self.tx.send(Event::PeerClose);
    }
}

#[derive(Debug)]
struct Echo;

impl SessionOwner for Echo {
    fn on_read(&self, session: &SessionHandle, message: Message) {
        if message.is_request() {
            let reply = Message::response_to(&message).with_payload(message.payload.clone());
            let _ = session.send_response(reply, false);
        }
    }
}

fn localhost() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

fn remote(listener: &TcpListener) -> RemoteAddr {
    let addr = listener.local_addr().unwrap();
    RemoteAddr::new(addr.ip().to_string(), addr.port())
}

async fn echo_server(config: SessionConfig) -> RemoteAddr {
    let listener = listen_tcp(localhost()).await.unwrap();
    let addr = remote(&listener);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            Session::accept(config.clone(), stream, Arc::new(Echo));
        }
    });
    addr
}

/// Server that accepts connections and never answers
async fn silent_server() -> RemoteAddr {
    let listener = listen_tcp(localhost()).await.unwrap();
    let addr = remote(&listener);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("owner channel closed")
}

fn client(
    config: SessionConfig,
    addr: RemoteAddr,
) -> (SessionHandle, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Session::connect(config, addr, Arc::new(ChannelOwner { tx }));
    (handle, rx)
}

#[tokio::test]
async fn test_binary_echo_round_trip() {
    let addr = echo_server(SessionConfig::default()).await;
    let (session, mut rx) = client(SessionConfig::default(), addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));

    for seq in 1..=3u32 {
        let request = Message::request(seq, format!("ping {}", seq)).with_context(seq * 10);
        session
            .send_request(request, Duration::from_secs(5))
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        match next(&mut rx).await {
            Event::Read {
                seq_id,
                code,
                context,
                payload,
            } => {
                assert_eq!(code, ReplyCode::Ok);
                assert_eq!(context, Some(seq_id * 10));
                assert_eq!(payload, Bytes::from(format!("ping {}", seq_id)));
                seen.push(seq_id);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    seen.sort();
    assert_eq!(seen, vec![1, 2, 3]);

    let stats = session.stats().await.unwrap();
    assert_eq!(stats.requests_sent, 3);
    assert_eq!(stats.responses_matched, 3);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_request_times_out() {
    let addr = silent_server().await;
    let (session, mut rx) = client(SessionConfig::default(), addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));

    let request = Message::request(9, "anyone?").with_context(1u32);
    session
        .send_request(request, Duration::from_millis(200))
        .unwrap();

    match next(&mut rx).await {
        Event::Read {
            seq_id,
            code,
            context,
            ..
        } => {
            assert_eq!(seq_id, 9);
            assert_eq!(code, ReplyCode::TimedOut);
            assert_eq!(context, Some(1));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(session.stats().await.unwrap().timeouts, 1);
}

#[tokio::test]
async fn test_request_before_connect_is_rejected() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::spawn(SessionConfig::default(), Arc::new(ChannelOwner { tx }));

    session
        .send_request(Message::request(1, "early"), Duration::from_secs(1))
        .unwrap();
    match next(&mut rx).await {
        Event::Read { code, .. } => assert_eq!(code, ReplyCode::PeerClosed),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_flushes_pending_requests() {
    let addr = silent_server().await;
    let (session, mut rx) = client(SessionConfig::default(), addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));

    for seq in 1..=2u32 {
        session
            .send_request(
                Message::request(seq, "slow").with_context(seq),
                Duration::from_secs(60),
            )
            .unwrap();
    }
    session.shutdown().unwrap();

    let mut contexts = Vec::new();
    for _ in 0..2 {
        match next(&mut rx).await {
            Event::Read { code, context, .. } => {
                assert_eq!(code, ReplyCode::TimedOut);
                contexts.extend(context);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    contexts.sort();
    assert_eq!(contexts, vec![1, 2]);
}

#[tokio::test]
async fn test_peer_close_reported_without_reconnect() {
    let listener = listen_tcp(localhost()).await.unwrap();
    let addr = remote(&listener);
    tokio::spawn(async move {
        // Accept and hang up immediately.
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let (session, mut rx) = client(SessionConfig::default(), addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));
    assert!(matches!(next(&mut rx).await, Event::PeerClose));

    // The session detaches and its task exits.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(session.stats().await.is_err());
}

#[tokio::test]
async fn test_http_responses_follow_request_order() {
    let config = SessionConfig {
        protocol: ProtocolKind::Http,
        ..SessionConfig::default()
    };
    let addr = echo_server(config.clone()).await;
    let (session, mut rx) = client(config, addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));

    for n in 1..=4u32 {
        let request = Message::request(0, format!("body {}", n))
            .with_header(link_wire::http::PATH, "/echo")
            .with_context(n);
        session
            .send_request(request, Duration::from_secs(5))
            .unwrap();
    }

    for expected in 1..=4u32 {
        match next(&mut rx).await {
            Event::Read {
                code,
                context,
                payload,
                ..
            } => {
                assert_eq!(code, ReplyCode::Ok);
                assert_eq!(context, Some(expected));
                assert_eq!(payload, Bytes::from(format!("body {}", expected)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_close_detaches_owner() {
    let addr = echo_server(SessionConfig::default()).await;
    let (session, mut rx) = client(SessionConfig::default(), addr);
    assert!(matches!(next(&mut rx).await, Event::Connected));

    session.close().unwrap();
    // No further callbacks: the owner is dropped and the channel closes.
    let end = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert!(end.is_none());
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_dropping_last_handle_ends_session() {
    let addr = silent_server().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let owner = Arc::new(ChannelOwner { tx });
    let session = Session::connect(SessionConfig::default(), addr, owner.clone());
    assert!(matches!(next(&mut rx).await, Event::Connected));

    session
        .send_request(
            Message::request(4, "forgotten").with_context(4u32),
            Duration::from_secs(60),
        )
        .unwrap();
    drop(session);

    match next(&mut rx).await {
        Event::Read { code, context, .. } => {
            assert_eq!(code, ReplyCode::TimedOut);
            assert_eq!(context, Some(4));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The task exits and lets go of the owner.
    tokio::time::timeout(Duration::from_secs(5), async {
        while Arc::strong_count(&owner) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
