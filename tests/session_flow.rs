#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end sessions: the async driver against a scripted server over an
//! in-memory transport.

mod common;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use wa_web_protocol::config::ClientConfig;
use wa_web_protocol::protocol::handshake::{decrypt_frame, encrypt_frame};
use wa_web_protocol::protocol::message::{binary_frame, keepalive_frame};
use wa_web_protocol::protocol::{Inbound, Reply, RequestKind, TaggedFrame, WireFrame};
use wa_web_protocol::service::{SessionClient, SessionHandle};
use wa_web_protocol::transport::{duplex, MemoryTransport};
use wa_web_protocol::{
    FailureReason, Node, NodeContent, NodeReader, NodeWriter, ProtocolError, SessionEvent,
};

const EVENT_WAIT: Duration = Duration::from_secs(120);

struct FakeServer {
    transport: MemoryTransport,
}

impl FakeServer {
    /// Next client frame other than a keepalive probe.
    async fn recv(&mut self) -> TaggedFrame {
        loop {
            let frame = self.recv_raw().await.expect("client hung up");
            if frame != keepalive_frame() {
                match Inbound::parse(&frame).unwrap() {
                    Inbound::Tagged(tagged) => return tagged,
                    other => panic!("unexpected client frame: {other:?}"),
                }
            }
        }
    }

    async fn recv_raw(&mut self) -> Option<WireFrame> {
        self.transport.next().await.map(|frame| frame.unwrap())
    }

    async fn send_text(&mut self, text: impl Into<String>) {
        self.transport.send(WireFrame::Text(text.into())).await.unwrap();
    }

    async fn send_node(&mut self, tag: &str, node: &Node) {
        let plaintext = NodeWriter::encode(node).unwrap();
        let sealed = encrypt_frame(&common::server_keys(), &[7u8; 16], &plaintext).unwrap();
        self.transport.send(binary_frame(tag, &sealed)).await.unwrap();
    }
}

fn start() -> (SessionHandle, mpsc::Receiver<SessionEvent>, FakeServer) {
    let (client_end, server_end) = duplex(16);
    let client = SessionClient::new(ClientConfig::default(), common::ScriptedProvider::handshake());
    let (handle, events) = client.spawn(client_end);
    (handle, events, FakeServer { transport: server_end })
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(EVENT_WAIT, events.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

/// Answer the login request and deliver `Conn`.
async fn pair(server: &mut FakeServer, events: &mut mpsc::Receiver<SessionEvent>) {
    let init = server.recv().await;
    assert!(!init.binary);
    assert_eq!(
        std::str::from_utf8(&init.content).unwrap(),
        format!(
            r#"["admin","init",[0,4,315],["Windows","Chrome","10"],"{}",true]"#,
            common::CLIENT_ID
        )
    );
    server
        .send_text(format!(r#"{},{{"status":200,"ref":"1@ref","ttl":20000}}"#, init.tag))
        .await;

    match next_event(events).await {
        SessionEvent::QrReady(qr) => assert_eq!(
            qr,
            format!(
                "1@ref,B6N8vBQgk8i3VdwbEOhstCY3StFqqFPtC9/AsrhtHHw=,{}",
                common::CLIENT_ID
            )
        ),
        other => panic!("expected QrReady, got {other:?}"),
    }

    server.send_text(common::conn_json(&common::secret_b64())).await;
    assert_eq!(
        next_event(events).await,
        SessionEvent::Authenticated {
            identity: Some("5730000000@c.us".into())
        }
    );
}

#[tokio::test]
async fn test_pair_and_exchange_nodes() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    // Server push
    let push = Node::new("action")
        .with_attr("add", "last")
        .with_children(vec![
            Node::new("message").with_content(NodeContent::Bytes(b"\n\x1c5730@g.us".to_vec()))
        ]);
    server.send_node("s2", &push).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::Node(push));

    // Client request answered under the same tag
    let query = Node::new("query").with_attr("type", "chat");
    let requester = handle.clone();
    let sent = query.clone();
    let request = tokio::spawn(async move { requester.send_node(sent).await });

    let frame = server.recv().await;
    assert!(frame.binary);
    let plaintext = decrypt_frame(&common::server_keys(), &frame.content).unwrap();
    assert_eq!(NodeReader::decode(&plaintext).unwrap(), query);

    let response = Node::new("response").with_attr("type", "chat");
    server.send_node(&frame.tag, &response).await;
    assert_eq!(request.await.unwrap().unwrap(), Reply::Node(response));

    let metrics = handle.metrics();
    assert_eq!(metrics.handshakes_total, 1);
    assert_eq!(metrics.handshakes_success, 1);
    assert_eq!(metrics.frames_decrypted, 2);
    assert_eq!(metrics.requests_resolved, 1);

    handle.close();
    handle.closed().await;
}

#[tokio::test]
async fn test_json_query_reply() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    let requester = handle.clone();
    let request = tokio::spawn(async move {
        requester
            .query(json!(["query", "exist", "5730000000@c.us"]))
            .await
    });

    let frame = server.recv().await;
    assert!(!frame.binary);
    assert_eq!(
        &frame.content[..],
        br#"["query","exist","5730000000@c.us"]"#
    );
    server.send_text(format!(r#"{},{{"status":200}}"#, frame.tag)).await;
    assert_eq!(
        request.await.unwrap().unwrap(),
        Reply::Json(json!({"status": 200}))
    );

    handle.close();
}

#[tokio::test]
async fn test_send_before_authentication_is_rejected() {
    let (handle, _events, mut server) = start();
    let _init = server.recv().await;
    assert!(matches!(
        handle.send_node(Node::new("query")).await,
        Err(ProtocolError::InvalidState(_))
    ));
    assert!(matches!(
        handle.request(RequestKind::Login, json!([])).await,
        Err(ProtocolError::InvalidState(_))
    ));
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_after_conn() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    let authenticated_at = Instant::now();
    assert_eq!(server.recv_raw().await, Some(keepalive_frame()));
    assert!(authenticated_at.elapsed() >= Duration::from_secs(24));

    // A pong is swallowed without an event.
    server.send_text("!1584750720000").await;
    assert_eq!(server.recv_raw().await, Some(keepalive_frame()));
    assert!(events.try_recv().is_err());

    handle.close();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_query_times_out() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    let requester = handle.clone();
    let request = tokio::spawn(async move { requester.query(json!(["query", "Status"])).await });
    let frame = server.recv().await;

    assert!(matches!(
        request.await.unwrap(),
        Err(ProtocolError::RequestTimeout(tag)) if tag == frame.tag
    ));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RequestTimedOut {
            tag: frame.tag,
            kind: RequestKind::Query
        }
    );
    assert_eq!(handle.metrics().requests_timed_out, 1);
    assert!(!handle.is_closed());
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_login_aborts_handshake() {
    let (handle, mut events, mut server) = start();
    let init = server.recv().await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RequestTimedOut {
            tag: init.tag,
            kind: RequestKind::Login
        }
    );
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Failed(FailureReason::HandshakeAborted(_))
    ));
    handle.closed().await;
    assert_eq!(handle.metrics().handshakes_failed, 1);
}

#[tokio::test]
async fn test_close_cancels_pending_requests() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    let requester = handle.clone();
    let request = tokio::spawn(async move { requester.send_node(Node::new("query")).await });
    let frame = server.recv().await;

    handle.close();
    assert!(matches!(
        request.await.unwrap(),
        Err(ProtocolError::RequestCancelled(tag)) if tag == frame.tag
    ));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RequestCancelled {
            tag: frame.tag,
            kind: RequestKind::Binary
        }
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);
    handle.closed().await;

    while let Some(frame) = server.recv_raw().await {
        assert_eq!(frame, keepalive_frame());
    }
}

#[tokio::test]
async fn test_tampered_frame_fails_session() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    let plaintext = NodeWriter::encode(&Node::new("action")).unwrap();
    let mut sealed = encrypt_frame(&common::server_keys(), &[7u8; 16], &plaintext).unwrap();
    sealed[0] ^= 0x01;
    server
        .transport
        .send(binary_frame("s3", &sealed))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Failed(FailureReason::HmacMismatch)
    );
    handle.closed().await;
    assert!(handle.is_closed());
    assert_eq!(handle.metrics().mac_failures, 1);
}

#[tokio::test]
async fn test_unknown_frames_are_not_fatal() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    server.send_text("999,{\"status\":404}").await;
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Unhandled { tag: Some(tag), .. } if tag == "999"
    ));

    server
        .send_text(r#"s4,["Props",{"imageMaxKBytes":1024}]"#)
        .await;
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Control {
            name: "Props".into(),
            payload: json!({"imageMaxKBytes": 1024})
        }
    );
    assert!(!handle.is_closed());
    handle.close();
}

#[tokio::test]
async fn test_peer_hangup_closes_session() {
    let (handle, mut events, mut server) = start();
    pair(&mut server, &mut events).await;

    drop(server);
    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);
    handle.closed().await;
}
