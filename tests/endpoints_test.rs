//! End-to-end tests for the client endpoint and the server container.
//!
//! Every test runs a real server on `127.0.0.1:0`; clients are either real
//! `ClientEndpoint`s or raw sockets speaking the block format.

use std::net::SocketAddr;
use std::time::Duration;

use blocknet::codec::{encode, DecodedRequest};
use blocknet::constants::SERVER_UID;
use blocknet::net::transport::{read_request_within, write_message};
use blocknet::net::{
    ClientEndpoint, ConnectionStatus, NetError, NetEvent, ProtocolError, ServerContainer,
};
use blocknet::NetConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

const WAIT: Duration = Duration::from_secs(5);

fn fast_cfg() -> NetConfig {
    NetConfig {
        reconnection_delay: Duration::from_millis(5),
        resend_delay: Duration::from_millis(5),
        ack_timeout: Duration::from_millis(500),
        reconnection_timeout: Duration::from_secs(1),
        ..NetConfig::default()
    }
}

async fn start_server(cfg: NetConfig) -> (ServerContainer, SocketAddr, UnboundedReceiver<NetEvent>) {
    let (tx, rx) = unbounded_channel();
    let mut server = ServerContainer::new(cfg, "127.0.0.1", 0, tx);
    let addr = server.connect().await.unwrap();
    (server, addr, rx)
}

async fn connected_client(
    cfg: NetConfig,
    addr: SocketAddr,
) -> (ClientEndpoint, UnboundedReceiver<NetEvent>) {
    let (tx, rx) = unbounded_channel();
    let mut client = ClientEndpoint::new(cfg, "127.0.0.1", addr.port(), tx);
    tokio::time::timeout(WAIT, client.connect(None, None))
        .await
        .expect("connect timed out")
        .unwrap();
    (client, rx)
}

/// Wait for the first event matching `pred`, skipping the others.
async fn wait_for(rx: &mut UnboundedReceiver<NetEvent>, pred: impl Fn(&NetEvent) -> bool) -> NetEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_receive_of(event: &NetEvent, text: &str) -> bool {
    matches!(event, NetEvent::Receive { msg, .. } if msg == text)
}

#[tokio::test]
async fn test_handshake_publishes_reverse_channel() {
    let (server, addr, _srx) = start_server(fast_cfg()).await;
    let (client, _crx) = connected_client(fast_cfg(), addr).await;

    assert_eq!(client.uid().as_deref(), Some("uid0"));
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(client.server_status(), ConnectionStatus::Connected);

    let record = server.client_info("uid0").unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.read_port, client.read_port());
    // A local client omits its host; the server falls back to the peer IP.
    assert_eq!(record.read_host.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_client_message_reaches_server() {
    let (_server, addr, mut srx) = start_server(fast_cfg()).await;
    let (mut client, _crx) = connected_client(fast_cfg(), addr).await;

    client.send("hello server", true).await.unwrap();

    let event = wait_for(&mut srx, |e| is_receive_of(e, "hello server")).await;
    let NetEvent::Receive {
        uid,
        netcode,
        msguid,
        ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(uid.as_deref(), Some("uid0"));
    assert_eq!(netcode.as_deref(), Some("NEED_CONFIRMATION"));
    assert!(msguid.unwrap().starts_with("uid0_"));
    assert_eq!(client.info().counters.send_errors, 0);
}

#[tokio::test]
async fn test_server_push_reaches_client() {
    let (server, addr, _srx) = start_server(fast_cfg()).await;
    let (_client, mut crx) = connected_client(fast_cfg(), addr).await;

    let report = server
        .send(Some(vec!["uid0".to_string()]), "hello client", true)
        .await;
    assert_eq!(report.delivered, vec!["uid0".to_string()]);
    assert!(report.failed.is_empty());

    let event = wait_for(&mut crx, |e| is_receive_of(e, "hello client")).await;
    assert!(matches!(event, NetEvent::Receive { uid: Some(ref u), .. } if u == SERVER_UID));
}

#[tokio::test]
async fn test_ping_known_and_unknown_clients() {
    let (server, addr, _srx) = start_server(fast_cfg()).await;
    let (_client, mut crx) = connected_client(fast_cfg(), addr).await;

    let report = server
        .check_conn(Some(vec!["uid0".to_string(), "uid3".to_string()]))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec!["uid0".to_string()]);
    assert_eq!(report.skipped, vec!["uid3".to_string()]);

    wait_for(&mut crx, |e| {
        matches!(e, NetEvent::Receive { netcode: Some(code), .. } if code == "PING")
    })
    .await;
    assert_eq!(
        server.client_info("uid0").unwrap().status,
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn test_large_unicode_message_over_small_buffers() {
    let cfg = NetConfig {
        buffer_size: 256,
        ..fast_cfg()
    };
    let (_server, addr, mut srx) = start_server(cfg.clone()).await;
    let (mut client, _crx) = connected_client(cfg, addr).await;

    let message = "héllo wörld ✓ ".repeat(300);
    client.send(&message, true).await.unwrap();
    wait_for(&mut srx, |e| is_receive_of(e, &message)).await;
}

#[tokio::test]
async fn test_client_disconnect_updates_record() {
    let (server, addr, _srx) = start_server(fast_cfg()).await;
    let (mut client, _crx) = connected_client(fast_cfg(), addr).await;

    client.disconnect().await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    // The server acks before it applies the side effect.
    let status = tokio::time::timeout(WAIT, async {
        loop {
            let status = server.client_info("uid0").unwrap().status;
            if status == ConnectionStatus::Disconnected {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record never became DISCONNECTED");
    assert_eq!(status, ConnectionStatus::Disconnected);

    // Closed records are skipped by later pushes.
    let report = server.send(None, "anyone there?", true).await;
    assert_eq!(report.skipped, vec!["uid0".to_string()]);
}

#[tokio::test]
async fn test_server_shutdown_disconnects_client() {
    let (mut server, addr, _srx) = start_server(fast_cfg()).await;
    let (client, mut crx) = connected_client(fast_cfg(), addr).await;

    server.shutdown().await.unwrap();
    wait_for(&mut crx, |e| {
        matches!(
            e,
            NetEvent::Status {
                peer: None,
                status: ConnectionStatus::Disconnected,
                ..
            }
        )
    })
    .await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(client.server_status(), ConnectionStatus::Shutdown);
    assert!(server.info().clients.is_empty());
}

#[tokio::test]
async fn test_duplicate_msguid_is_acked_but_dispatched_once() {
    let (_server, addr, mut srx) = start_server(fast_cfg()).await;

    // Register uid0 by hand.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, "[cmd:ASK_FOR_UID|]", None, 2048)
        .await
        .unwrap();
    let reply = read_request_within(&mut stream, 2048, WAIT).await.unwrap();
    assert_eq!(reply.message, "uid0");

    let message = "[cmd:NEED_CONFIRMATION|]twice<MSGUID=uid0_7>";
    let encoded = encode(message, Some("uid0"), 2048).unwrap();
    for _ in 0..2 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for block in &encoded.blocks {
            stream.write_all(block.as_bytes()).await.unwrap();
        }
        let ack = read_request_within(&mut stream, 2048, WAIT).await.unwrap();
        assert!(ack.is_ack_for(message.chars().count()), "got {:?}", ack.raw);
    }

    wait_for(&mut srx, |e| is_receive_of(e, "twice")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = srx.try_recv() {
        assert!(!is_receive_of(&event, "twice"), "duplicate dispatched: {event:?}");
    }
}

/// Server that registers one client and answers every other request with
/// `answer`, or stays silent when it returns `None`.
async fn scripted_server(answer: fn(&DecodedRequest) -> Option<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let Ok(request) = read_request_within(&mut stream, 2048, WAIT).await else {
                    return;
                };
                match request.code.as_deref() {
                    Some("ASK_FOR_UID") => {
                        let _ = write_message(&mut stream, "uid0", Some(SERVER_UID), 2048).await;
                    }
                    Some("SET_CLIENT_READ_INFOS") => {
                        let ack = format!("[cmd:CONFIRM_RECEPTION|]{}", request.total_chars);
                        let _ = write_message(&mut stream, &ack, Some(SERVER_UID), 2048).await;
                    }
                    _ => match answer(&request) {
                        Some(reply) => {
                            let _ = write_message(&mut stream, &reply, Some(SERVER_UID), 2048).await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(2)).await,
                    },
                }
            });
        }
    });
    addr
}

async fn silent_server() -> SocketAddr {
    scripted_server(|_| None).await
}

#[tokio::test]
async fn test_wild_disconnect_limits_retries() {
    let cfg = NetConfig {
        send_max_count: 3,
        inactive_count: 2,
        ack_timeout: Duration::from_millis(50),
        reconnection_timeout: Duration::from_millis(100),
        resend_delay: Duration::from_millis(1),
        ..fast_cfg()
    };
    let addr = silent_server().await;
    let (mut client, _crx) = connected_client(cfg, addr).await;

    for i in 0..3 {
        assert!(client.send(&format!("lost {i}"), true).await.is_err());
    }
    assert_eq!(client.server_status(), ConnectionStatus::Undefined);

    let before = client.info().counters.attempts;
    assert!(client.send("one shot", true).await.is_err());
    assert_eq!(client.info().counters.attempts, before + 1);
}

#[tokio::test]
async fn test_unacked_send_reports_send_error() {
    let cfg = NetConfig {
        send_max_count: 2,
        ack_timeout: Duration::from_millis(50),
        resend_delay: Duration::from_millis(1),
        ..fast_cfg()
    };

    let (mut client, mut crx) = connected_client(cfg.clone(), silent_server().await).await;
    assert!(client.send("never acked", true).await.is_err());
    let event = wait_for(&mut crx, |e| matches!(e, NetEvent::SendError { .. })).await;
    let NetEvent::SendError { msg, confirm, clients } = event else {
        unreachable!()
    };
    assert_eq!(msg, "never acked");
    assert!(confirm);
    assert!(clients.is_empty());

    // Off-by-one ack length.
    let miscounting =
        scripted_server(|r| Some(format!("[cmd:CONFIRM_RECEPTION|]{}", r.total_chars + 1))).await;
    let (mut client, mut crx) = connected_client(cfg, miscounting).await;
    let result = client.send("counted wrong", true).await;
    assert!(
        matches!(result, Err(NetError::Protocol(ProtocolError::AckMismatch { .. }))),
        "got {result:?}"
    );
    wait_for(&mut crx, |e| {
        matches!(e, NetEvent::SendError { msg, .. } if msg == "counted wrong")
    })
    .await;
}

/// Register a client by hand whose read socket is `127.0.0.1:read_port`.
async fn register_raw(server: &ServerContainer, addr: SocketAddr, read_port: u16) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, "[cmd:ASK_FOR_UID|]", None, 2048)
        .await
        .unwrap();
    let uid = read_request_within(&mut stream, 2048, WAIT)
        .await
        .unwrap()
        .message;

    let infos = format!("[cmd:SET_CLIENT_READ_INFOS|port={read_port}&]");
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, &infos, Some(&uid), 2048)
        .await
        .unwrap();
    let ack = read_request_within(&mut stream, 2048, WAIT).await.unwrap();
    assert!(ack.is_ack_for(infos.chars().count()), "got {:?}", ack.raw);

    // The record is updated right after the ack.
    tokio::time::timeout(WAIT, async {
        while server.client_info(&uid).and_then(|r| r.read_port) != Some(read_port) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("read infos never recorded");
    uid
}

#[tokio::test]
async fn test_push_to_vanished_listener_reports_send_error() {
    let (server, addr, mut srx) = start_server(fast_cfg()).await;
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let read_port = gone.local_addr().unwrap().port();
    drop(gone);
    let uid = register_raw(&server, addr, read_port).await;

    let report = server
        .send(Some(vec![uid.clone()]), "is anyone there", true)
        .await;
    assert_eq!(report.failed, vec![uid.clone()]);

    let event = wait_for(&mut srx, |e| matches!(e, NetEvent::SendError { .. })).await;
    let NetEvent::SendError { msg, clients, .. } = event else {
        unreachable!()
    };
    assert_eq!(msg, "is anyone there");
    assert_eq!(clients, vec![uid]);
}

#[tokio::test]
async fn test_failure_of_departed_client_is_not_reported() {
    let (server, addr, mut srx) = start_server(fast_cfg()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let read_port = listener.local_addr().unwrap().port();
    let uid = register_raw(&server, addr, read_port).await;

    // On the first push the client announces it is leaving, then drops
    // every push without acking it.
    let leaving = uid.clone();
    tokio::spawn(async move {
        let mut announced = false;
        while let Ok((push, _)) = listener.accept().await {
            if !announced {
                announced = true;
                let mut stream = TcpStream::connect(addr).await.unwrap();
                write_message(&mut stream, "[cmd:CLIENT_DISCONNECTED|]", Some(&leaving), 2048)
                    .await
                    .unwrap();
                let _ = read_request_within(&mut stream, 2048, WAIT).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            drop(push);
        }
    });

    let report = server.send(Some(vec![uid.clone()]), "still there?", true).await;
    assert_eq!(report.failed, vec![uid.clone()]);
    assert_eq!(
        server.client_info(&uid).unwrap().status,
        ConnectionStatus::Disconnected
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = srx.try_recv() {
        assert!(
            !matches!(event, NetEvent::SendError { .. }),
            "unexpected {event:?}"
        );
    }
}

/// Write `raw` to a client's read socket and return its reply.
async fn push_raw(read_port: u16, raw: &[u8]) -> DecodedRequest {
    let mut stream = TcpStream::connect(("127.0.0.1", read_port)).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_request_within(&mut stream, 2048, WAIT).await.unwrap()
}

#[tokio::test]
async fn test_duplicate_push_is_acked_but_dispatched_once() {
    let (_server, addr, _srx) = start_server(fast_cfg()).await;
    let (client, mut crx) = connected_client(fast_cfg(), addr).await;
    let read_port = client.read_port().unwrap();

    let message = "[cmd:NEED_CONFIRMATION|]pushed twice<MSGUID=gen_svr_id_dup1>";
    let raw = encode(message, Some(SERVER_UID), 2048).unwrap().blocks.concat();
    for _ in 0..2 {
        let ack = push_raw(read_port, raw.as_bytes()).await;
        assert!(ack.is_ack_for(message.chars().count()), "got {:?}", ack.raw);
    }

    wait_for(&mut crx, |e| is_receive_of(e, "pushed twice")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = crx.try_recv() {
        assert!(!is_receive_of(&event, "pushed twice"), "duplicate dispatched: {event:?}");
    }
}

#[tokio::test]
async fn test_untagged_or_garbled_push_gets_failed_ack() {
    let (_server, addr, _srx) = start_server(fast_cfg()).await;
    let (client, mut crx) = connected_client(fast_cfg(), addr).await;
    let read_port = client.read_port().unwrap();
    while crx.try_recv().is_ok() {}

    let untagged = encode("[cmd:NEED_CONFIRMATION|]untagged", Some(SERVER_UID), 2048)
        .unwrap()
        .blocks
        .concat();
    let ack = push_raw(read_port, untagged.as_bytes()).await;
    assert!(ack.is_ack_for(0), "got {:?}", ack.raw);

    let ack = push_raw(read_port, b"<#bp#>|1/1|gen_svr_id|2|\xff\xfe<#bs#>").await;
    assert!(ack.is_ack_for(0), "got {:?}", ack.raw);

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = crx.try_recv() {
        assert!(
            !matches!(event, NetEvent::Receive { .. }),
            "dispatched: {event:?}"
        );
    }
}

#[tokio::test]
async fn test_stalled_push_does_not_block_the_read_socket() {
    let (server, addr, _srx) = start_server(fast_cfg()).await;
    let patient = NetConfig {
        reconnection_timeout: Duration::from_secs(30),
        ..fast_cfg()
    };
    let (mut client, mut crx) = connected_client(patient, addr).await;

    // Half a request, never finished.
    let mut stalled = TcpStream::connect(("127.0.0.1", client.read_port().unwrap()))
        .await
        .unwrap();
    stalled
        .write_all(b"<#bp#>|1/2|gen_svr_id|10|hello")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        server.send(Some(vec!["uid0".to_string()]), "not stuck", true),
    )
    .await
    .expect("push queued behind the stalled socket");
    assert_eq!(report.delivered, vec!["uid0".to_string()]);
    wait_for(&mut crx, |e| is_receive_of(e, "not stuck")).await;

    tokio::time::timeout(Duration::from_secs(2), client.disconnect())
        .await
        .expect("disconnect waited for the stalled socket")
        .unwrap();
    drop(stalled);
}

#[tokio::test]
async fn test_client_registers_again_after_server_restart() {
    let (mut server, addr, _srx) = start_server(fast_cfg()).await;
    let (mut client, mut crx) = connected_client(fast_cfg(), addr).await;
    assert_eq!(client.uid().as_deref(), Some("uid0"));

    server.shutdown().await.unwrap();
    wait_for(&mut crx, |e| {
        matches!(
            e,
            NetEvent::Status {
                peer: None,
                status: ConnectionStatus::Disconnected,
                ..
            }
        )
    })
    .await;
    assert_eq!(client.uid(), None);
    drop(server);

    let (tx, mut srx) = unbounded_channel();
    let mut restarted = ServerContainer::new(fast_cfg(), "127.0.0.1", addr.port(), tx);
    restarted.connect().await.unwrap();

    tokio::time::timeout(WAIT, client.connect(None, None))
        .await
        .expect("reconnect timed out")
        .unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(client.uid().as_deref(), Some("uid0"));
    assert_eq!(
        restarted.client_info("uid0").unwrap().status,
        ConnectionStatus::Connected
    );

    client.send("back again", true).await.unwrap();
    wait_for(&mut srx, |e| is_receive_of(e, "back again")).await;
}

#[tokio::test]
async fn test_client_asks_for_new_uid_when_server_forgot_it() {
    let (mut server, addr, _srx) = start_server(fast_cfg()).await;
    let (mut client, _crx) = connected_client(fast_cfg(), addr).await;
    client.disconnect().await.unwrap();

    // Stop without SERVER_SHUTDOWN: the client still holds uid0.
    server.disconnect().await.unwrap();
    drop(server);
    assert_eq!(client.uid().as_deref(), Some("uid0"));

    let (tx, _rx) = unbounded_channel();
    let mut restarted = ServerContainer::new(fast_cfg(), "127.0.0.1", addr.port(), tx);
    restarted.connect().await.unwrap();

    tokio::time::timeout(WAIT, client.connect(None, None))
        .await
        .expect("reconnect timed out")
        .unwrap();
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(restarted.info().minted, 1);
    assert_eq!(
        restarted.client_info("uid0").unwrap().status,
        ConnectionStatus::Connected
    );
}
