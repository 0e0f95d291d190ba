//! Session Flow Tests
//!
//! Drives a running server over real TCP connections: login, catch-up,
//! relaying, access control, bans and session lifecycle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drawpile_msg::{
    AccessTier, BlendMode, ClientRequest, Command, DisconnectReason, LayerId, Message, MessageType,
    ServerReply,
};
use drawpile_record::{read_file, RecordingFormat, RecordingHeader, RecordingSink, RecordingWriter};
use drawpile_server::{
    AdminRequest, MessageCodec, NewBan, Server, ServerConfig, ServerStore, ShutdownController,
};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("drawpile-{tag}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn start(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
    let store = ServerStore::in_memory().await.unwrap();
    let server = Server::new(config, store, ShutdownController::with_timeout(Duration::from_secs(2)));
    let (addr, _accept) = server.start().await.unwrap();
    (server, addr)
}

struct TestClient {
    framed: Framed<TcpStream, MessageCodec>,
    ctx: u8,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, MessageCodec),
            ctx: 0,
        }
    }

    /// Log in and return the client with its catch-up messages
    async fn login(addr: SocketAddr, session: &str, name: &str, create: bool) -> (Self, Vec<Message>) {
        let mut client = Self::connect(addr).await;
        client.send_login(session, name, create).await;

        let ctx = match client.recv_reply().await {
            ServerReply::Welcome { context_id, .. } => context_id,
            other => panic!("expected welcome, got {other:?}"),
        };
        let count = match client.recv_reply().await {
            ServerReply::CatchUp { count } => count,
            other => panic!("expected catch-up, got {other:?}"),
        };
        let mut catch_up = Vec::with_capacity(count);
        for _ in 0..count {
            catch_up.push(client.recv().await);
        }
        client.ctx = ctx;
        (client, catch_up)
    }

    async fn send_login(&mut self, session: &str, name: &str, create: bool) {
        let request = ClientRequest::Login {
            session: session.to_string(),
            username: name.to_string(),
            password: None,
            session_password: None,
            create,
            title: Some(format!("{session} board")),
        };
        self.framed.send(request.to_message(0).unwrap()).await.unwrap();
    }

    async fn send(&mut self, command: Command) {
        let message = Message::new(self.ctx, command);
        self.framed.send(message).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        match tokio::time::timeout(TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(Ok(message)))) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    async fn recv_reply(&mut self) -> ServerReply {
        let message = self.recv().await;
        ServerReply::from_command(&message.command)
            .unwrap_or_else(|| panic!("expected a server reply, got {message:?}"))
            .unwrap()
    }

    /// Round-trip a ping, returning everything received before the pong
    async fn sync(&mut self) -> Vec<Message> {
        self.send(Command::Ping { is_pong: false }).await;
        let mut received = Vec::new();
        loop {
            let message = self.recv().await;
            if message.command == (Command::Ping { is_pong: true }) {
                return received;
            }
            received.push(message);
        }
    }

    async fn expect_closed(&mut self) {
        match tokio::time::timeout(TIMEOUT, self.framed.next()).await {
            Ok(None) | Ok(Some(Err(_))) => {}
            other => panic!("expected the connection to close, got {other:?}"),
        }
    }
}

fn layer(index: u8) -> LayerId {
    LayerId::new(1, index)
}

fn create_layer(index: u8, title: &str) -> Command {
    Command::LayerCreate {
        id: layer(index),
        source: LayerId::NONE,
        target: LayerId::NONE,
        fill: 0,
        flags: 0,
        title: title.to_string(),
    }
}

fn fill(id: LayerId) -> Command {
    Command::FillRect {
        layer: id,
        mode: BlendMode::Normal,
        x: 0,
        y: 0,
        w: 10,
        h: 10,
        color: 0xff00_00ff,
    }
}

async fn setup_canvas(alice: &mut TestClient) {
    alice
        .send(Command::CanvasResize {
            top: 0,
            right: 200,
            bottom: 100,
            left: 0,
        })
        .await;
    alice.send(create_layer(1, "Background")).await;
    alice.send(fill(layer(1))).await;
    assert!(alice.sync().await.is_empty(), "own commands are not echoed");
}

#[tokio::test]
async fn test_create_and_catch_up() {
    let (server, addr) = start(test_config()).await;

    let (mut alice, catch_up) = TestClient::login(addr, "sketch", "alice", true).await;
    assert_eq!(alice.ctx, 1);
    assert!(catch_up
        .iter()
        .any(|m| m.context_id == 1 && matches!(&m.command, Command::Join { name, .. } if name == "alice")));

    setup_canvas(&mut alice).await;

    let (bob, catch_up) = TestClient::login(addr, "sketch", "bob", false).await;
    assert_eq!(bob.ctx, 2);
    let kinds: Vec<MessageType> = catch_up.iter().map(Message::message_type).collect();
    assert_eq!(kinds.iter().filter(|k| **k == MessageType::Join).count(), 2);
    assert!(catch_up.iter().any(|m| m.command
        == Command::CanvasResize {
            top: 0,
            right: 200,
            bottom: 100,
            left: 0
        }));
    assert!(catch_up.iter().any(
        |m| matches!(&m.command, Command::LayerCreate { id, title, .. } if *id == layer(1) && title == "Background")
    ));

    // alice learns about bob before anything else
    let seen = alice.sync().await;
    assert!(matches!(&seen[0].command, Command::Join { name, .. } if name == "bob"));
    assert_eq!(seen[0].context_id, 2);

    let info = server.call_admin(AdminRequest::get("sessions/sketch")).await;
    assert_eq!(info.body["users"].as_array().unwrap().len(), 2);
    assert_eq!(info.body["title"], "sketch board");
}

#[tokio::test]
async fn test_broadcast_keeps_order() {
    let (_server, addr) = start(test_config()).await;
    let (mut alice, _) = TestClient::login(addr, "order", "alice", true).await;
    let (mut bob, _) = TestClient::login(addr, "order", "bob", false).await;
    alice.sync().await;

    for i in 0..20 {
        alice
            .send(Command::Chat {
                flags: 0,
                message: format!("line {i}"),
            })
            .await;
    }

    for i in 0..20 {
        let message = bob.recv().await;
        assert_eq!(message.context_id, 1);
        assert_eq!(
            message.command,
            Command::Chat {
                flags: 0,
                message: format!("line {i}")
            }
        );
    }
}

#[tokio::test]
async fn test_locked_layer_rejected() {
    let (server, addr) = start(test_config()).await;
    let (mut alice, _) = TestClient::login(addr, "locked", "alice", true).await;
    setup_canvas(&mut alice).await;
    alice
        .send(Command::LayerAcl {
            id: layer(1),
            locked: true,
            tier: AccessTier::Operator,
            exclusive: Vec::new(),
        })
        .await;
    alice.sync().await;

    let (mut bob, _) = TestClient::login(addr, "locked", "bob", false).await;
    let before = server.call_admin(AdminRequest::get("sessions/locked")).await;

    bob.send(fill(layer(1))).await;
    match bob.recv_reply().await {
        ServerReply::Error { code, .. } => assert_eq!(code, "permission"),
        other => panic!("expected an error reply, got {other:?}"),
    }

    let seen = alice.sync().await;
    assert_eq!(seen.len(), 1, "only bob's join reaches alice: {seen:?}");
    assert_eq!(seen[0].message_type(), MessageType::Join);

    let after = server.call_admin(AdminRequest::get("sessions/locked")).await;
    assert_eq!(before.body["log_length"], after.body["log_length"]);
}

#[tokio::test]
async fn test_server_ban_rejects_login() {
    let (server, addr) = start(test_config()).await;
    server
        .store()
        .add_ban(&NewBan {
            address: "127.0.0.0/8".to_string(),
            reason: "test".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

    let mut client = TestClient::connect(addr).await;
    match client.recv_reply().await {
        ServerReply::Rejected { code, .. } => assert_eq!(code, "banned"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(matches!(client.recv().await.command, Command::Disconnect { .. }));
    client.expect_closed().await;
}

#[tokio::test]
async fn test_kick_with_ban() {
    let (_server, addr) = start(test_config()).await;
    let (mut alice, _) = TestClient::login(addr, "kick", "alice", true).await;
    let (mut bob, _) = TestClient::login(addr, "kick", "bob", false).await;
    alice.sync().await;

    let kick = ClientRequest::Kick { target: 2, ban: true };
    alice.framed.send(kick.to_message(1).unwrap()).await.unwrap();

    match bob.recv().await.command {
        Command::Disconnect { reason, .. } => assert_eq!(reason, DisconnectReason::Kick),
        other => panic!("expected disconnect, got {other:?}"),
    }
    bob.expect_closed().await;

    let seen = alice.sync().await;
    assert!(seen.iter().any(|m| m.context_id == 2 && m.command == Command::Leave));

    let mut again = TestClient::connect(addr).await;
    again.send_login("kick", "bob", false).await;
    match again.recv_reply().await {
        ServerReply::Rejected { code, .. } => assert_eq!(code, "banned"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropped_client_cannot_act_as_reused_context() {
    let config = ServerConfig {
        queue_capacity: 64,
        ..test_config()
    };
    let (_server, addr) = start(config).await;
    let (mut alice, _) = TestClient::login(addr, "stale", "alice", true).await;
    let (mut bob, _) = TestClient::login(addr, "stale", "bob", false).await;
    assert_eq!(bob.ctx, 2);
    alice.sync().await;

    // bob stops reading until his queue overflows and the session drops him
    let bulk = "x".repeat(60_000);
    let mut dropped = false;
    for round in 0..4096 {
        alice
            .send(Command::Chat {
                flags: 0,
                message: bulk.clone(),
            })
            .await;
        if round % 16 == 15
            && alice
                .sync()
                .await
                .iter()
                .any(|m| m.context_id == 2 && m.command == Command::Leave)
        {
            dropped = true;
            break;
        }
    }
    assert!(dropped, "slow client was never dropped");

    let (mut carol, _) = TestClient::login(addr, "stale", "carol", false).await;
    assert_eq!(carol.ctx, 2);
    alice.sync().await;

    // the old connection still holds ctx 2 on its side
    bob.send(Command::Chat {
        flags: 0,
        message: "from bob".to_string(),
    })
    .await;
    drop(bob);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let seen = alice.sync().await;
    assert!(!seen
        .iter()
        .any(|m| matches!(&m.command, Command::Chat { message, .. } if message == "from bob")));
    assert!(!seen.iter().any(|m| m.context_id == 2 && m.command == Command::Leave));

    carol
        .send(Command::Chat {
            flags: 0,
            message: "from carol".to_string(),
        })
        .await;
    carol.sync().await;
    let seen = alice.sync().await;
    assert!(seen.iter().any(|m| m.context_id == 2
        && matches!(&m.command, Command::Chat { message, .. } if message == "from carol")));
}

#[tokio::test]
async fn test_malformed_messages_drop_client() {
    let config = ServerConfig {
        max_decode_errors: 2,
        ..test_config()
    };
    let (_server, addr) = start(config).await;
    let (mut alice, _) = TestClient::login(addr, "noisy", "alice", true).await;

    // valid framing, unknown message type
    for _ in 0..2 {
        alice.framed.get_mut().write_all(&[0, 0, 250, 1]).await.unwrap();
        match alice.recv_reply().await {
            ServerReply::Error { code, .. } => assert_eq!(code, "malformed"),
            other => panic!("expected malformed, got {other:?}"),
        }
    }
    match alice.recv().await.command {
        Command::Disconnect { reason, .. } => assert_eq!(reason, DisconnectReason::Error),
        other => panic!("expected disconnect, got {other:?}"),
    }
    alice.expect_closed().await;
}

#[tokio::test]
async fn test_missing_session_and_login_required() {
    let (_server, addr) = start(test_config()).await;

    let mut client = TestClient::connect(addr).await;
    client.send_login("nowhere", "alice", false).await;
    match client.recv_reply().await {
        ServerReply::Rejected { code, .. } => assert_eq!(code, "session_not_found"),
        other => panic!("expected rejection, got {other:?}"),
    }

    let mut client = TestClient::connect(addr).await;
    client.send(Command::Ping { is_pong: false }).await;
    match client.recv_reply().await {
        ServerReply::Rejected { code, .. } => assert_eq!(code, "login_required"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_template_session() {
    let dir = temp_dir("templates");
    let mut writer = RecordingWriter::new(Vec::new(), RecordingFormat::Text, &RecordingHeader::new("tmpl")).unwrap();
    for message in [
        Message::new(
            1,
            Command::Join {
                flags: 0,
                name: "ghost".to_string(),
                avatar: Vec::new(),
            },
        ),
        Message::new(
            1,
            Command::CanvasResize {
                top: 0,
                right: 64,
                bottom: 64,
                left: 0,
            },
        ),
        Message::new(1, create_layer(1, "Paper")),
    ] {
        writer.write(&message).unwrap();
    }
    std::fs::write(dir.join("tmpl.dptxt"), writer.into_inner()).unwrap();

    let config = ServerConfig {
        template_dir: Some(dir.clone()),
        ..test_config()
    };
    let (_server, addr) = start(config).await;
    let (_client, catch_up) = TestClient::login(addr, "tmpl", "alice", false).await;

    assert!(catch_up
        .iter()
        .any(|m| matches!(&m.command, Command::LayerCreate { title, .. } if title == "Paper")));
    assert!(!catch_up
        .iter()
        .any(|m| matches!(&m.command, Command::Join { name, .. } if name == "ghost")));

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_session_recording() {
    let dir = temp_dir("recordings");
    let config = ServerConfig {
        recording_dir: Some(dir.clone()),
        ..test_config()
    };
    let (server, addr) = start(config).await;
    let (mut alice, _) = TestClient::login(addr, "rec", "alice", true).await;
    setup_canvas(&mut alice).await;
    drop(alice);

    // wait until the session has closed and its recording is complete
    let mut recorded = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if server.session("rec").is_some() {
            continue;
        }
        let Some(entry) = std::fs::read_dir(&dir).unwrap().next() else {
            continue;
        };
        let recording = read_file(&entry.unwrap().path()).await.unwrap();
        if recording.messages.iter().any(|m| m.command == Command::Leave) {
            recorded = recording.messages;
            break;
        }
    }

    let kinds: Vec<MessageType> = recorded.iter().map(Message::message_type).collect();
    assert_eq!(kinds.first(), Some(&MessageType::Join));
    assert!(kinds.contains(&MessageType::CanvasResize));
    assert!(kinds.contains(&MessageType::FillRect));
    assert!(!kinds.contains(&MessageType::Ping));

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn test_auto_stop_after_last_session() {
    let config = ServerConfig {
        auto_stop: true,
        ..test_config()
    };
    let (server, addr) = start(config).await;
    let (alice, _) = TestClient::login(addr, "brief", "alice", true).await;
    assert!(!server.shutdown_controller().is_shutting_down());
    drop(alice);

    tokio::time::timeout(TIMEOUT, server.shutdown_controller().terminated())
        .await
        .expect("server should stop once the last session closes");
    assert!(server.status().shutting_down);
}
