mod common;

use common::*;
use pamr_common::frame::TYPE_DATA_REQUEST;
use pamr_common::{AgentId, DebugOp, ErrorKind, Frame, MagicCookie};
use pamr_router::admin;
use pamr_router::config::RouterConfig;
use pamr_router::error::RouterError;
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;

#[tokio::test]
async fn concurrent_registrations_get_unique_ids() {
    let router = start_router(test_config()).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let addr = router.addr;
        handles.push(tokio::spawn(async move {
            let client = TestClient::register(addr).await;
            (client.id(), client.router_id)
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let (id, router_id) = handle.await.unwrap();
        assert!(!id.is_reserved());
        assert_eq!(router_id, router.state.router_id());
        assert!(ids.insert(id), "duplicate id {id}");
    }
    assert_eq!(router.state.sessions.len(), 32);
}

#[tokio::test]
async fn registration_reply_advertises_heartbeat_period() {
    let router = start_router(test_config()).await;
    let mut client = TestClient::connect(router.addr).await;
    client.send_registration(99).await;
    match client.recv().await {
        Frame::RegistrationReply {
            msg_id,
            heartbeat_period,
            cookie,
            ..
        } => {
            assert_eq!(msg_id, 99);
            assert_eq!(heartbeat_period, 30_000);
            assert_eq!(cookie, client.cookie);
        }
        other => panic!("expected RegistrationReply, got {other:?}"),
    }
}

#[tokio::test]
async fn request_and_reply_are_forwarded_unchanged() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;
    let mut b = TestClient::register(router.addr).await;

    let raw = Frame::serialize_data(TYPE_DATA_REQUEST, 42, a.id(), b.id(), b"ping");
    a.send_raw(&raw).await;
    assert_eq!(b.recv_raw().await.unwrap(), raw);

    b.send_reply(42, a.id(), b"pong").await;
    match a.recv_skip_heartbeats().await {
        Frame::DataReply {
            msg_id,
            src,
            dst,
            payload,
        } => {
            assert_eq!(msg_id, 42);
            assert_eq!(src, b.id());
            assert_eq!(dst, a.id());
            assert_eq!(payload, b"pong");
        }
        other => panic!("expected DataReply, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_recipient_error_is_correlated() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;
    let ghost = AgentId::new(987_654).unwrap();

    a.send_request(1234, ghost, b"anyone?").await;
    match a.recv().await {
        Frame::Error {
            msg_id,
            kind,
            sender,
            recipient,
        } => {
            assert_eq!(msg_id, 1234);
            assert_eq!(kind, ErrorKind::UnknownRecipient);
            assert_eq!(sender, Some(ghost));
            assert_eq!(recipient, Some(a.id()));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_tunnel_is_broadcast_to_other_agents() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;
    let b = TestClient::register(router.addr).await;
    let b_id = b.id();
    drop(b);

    match a.recv().await {
        Frame::Error {
            msg_id,
            kind,
            sender,
            recipient,
        } => {
            assert_eq!(msg_id, 0);
            assert_eq!(kind, ErrorKind::DisconnectionBroadcast);
            assert_eq!(sender, Some(b_id));
            assert_eq!(recipient, Some(a.id()));
        }
        other => panic!("expected Error, got {other:?}"),
    }

    a.send_request(5, b_id, b"x").await;
    assert!(matches!(
        a.recv().await,
        Frame::Error {
            kind: ErrorKind::NotConnectedRecipient,
            msg_id: 5,
            ..
        }
    ));
}

#[tokio::test]
async fn reconnection_flushes_cached_replies_in_order_once() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;
    let b = TestClient::register(router.addr).await;
    let b_id = b.id();

    let mut b2 = b.reconnect(router.addr).await;
    drop(b);
    let state = router.state.clone();
    assert!(eventually(|| state.sessions.get(&b_id).is_some_and(|c| !c.is_connected())).await);

    for i in 0..3u8 {
        a.send_reply(i64::from(i), b_id, &[i]).await;
    }
    assert!(eventually(|| state.sessions.get(&b_id).is_some_and(|c| c.pending_len() == 3)).await);

    b2.send_registration(7).await;
    match b2.recv().await {
        Frame::RegistrationReply { msg_id, agent_id, .. } => {
            assert_eq!(msg_id, 7);
            assert_eq!(agent_id, b_id);
        }
        other => panic!("expected RegistrationReply, got {other:?}"),
    }
    for i in 0..3u8 {
        match b2.recv().await {
            Frame::DataReply { msg_id, payload, .. } => {
                assert_eq!(msg_id, i64::from(i));
                assert_eq!(payload, vec![i]);
            }
            other => panic!("expected DataReply, got {other:?}"),
        }
    }
    assert!(b2.recv_timeout(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn reconnection_replaces_previous_tunnel() {
    let router = start_router(test_config()).await;
    let mut first = TestClient::register(router.addr).await;
    let mut second = first.reconnect(router.addr).await;
    second.send_registration(2).await;
    assert!(matches!(second.recv().await, Frame::RegistrationReply { .. }));
    first.expect_closed().await;
}

#[tokio::test]
async fn wrong_cookie_is_rejected_and_tunnel_closed() {
    let router = start_router(test_config()).await;
    let owner = TestClient::register(router.addr).await;

    let mut intruder = owner.reconnect(router.addr).await;
    intruder.cookie = MagicCookie::random();
    intruder.send_registration(3).await;
    match intruder.recv().await {
        Frame::Error { kind, msg_id, .. } => {
            assert_eq!(kind, ErrorKind::WrongMagicCookie);
            assert_eq!(msg_id, 3);
        }
        other => panic!("expected Error, got {other:?}"),
    }
    intruder.expect_closed().await;

    let state = router.state.clone();
    let id = owner.id();
    assert!(state.sessions.get(&id).unwrap().is_connected());
}

#[tokio::test]
async fn stale_router_id_is_rejected() {
    let router = start_router(test_config()).await;
    let owner = TestClient::register(router.addr).await;

    let mut stale = owner.reconnect(router.addr).await;
    stale.router_id = owner.router_id.wrapping_add(1);
    stale.send_registration(3).await;
    assert!(matches!(
        stale.recv().await,
        Frame::Error {
            kind: ErrorKind::InvalidRouterId,
            ..
        }
    ));
    stale.expect_closed().await;
}

#[tokio::test]
async fn malformed_frame_gets_error_and_close() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;

    let mut raw = Frame::heartbeat_client(1, a.id()).serialize();
    // unknown type tag
    raw[8..12].copy_from_slice(&99i32.to_be_bytes());
    a.send_raw(&raw).await;
    assert!(matches!(
        a.recv().await,
        Frame::Error {
            kind: ErrorKind::MalformedMessage,
            ..
        }
    ));
    a.expect_closed().await;
}

#[tokio::test]
async fn evicted_agent_becomes_unknown() {
    let config = RouterConfig {
        evict_timeout: Some(Duration::from_millis(150)),
        ..test_config()
    };
    let router = start_router(config).await;
    let mut a = TestClient::register(router.addr).await;
    let b = TestClient::register(router.addr).await;
    let b_id = b.id();
    drop(b);

    let state = router.state.clone();
    assert!(eventually(|| state.sessions.get(&b_id).is_none()).await);

    a.send_request(8, b_id, b"gone?").await;
    assert!(matches!(
        a.recv_skip_heartbeats_and_broadcasts().await,
        Frame::Error {
            kind: ErrorKind::UnknownRecipient,
            msg_id: 8,
            ..
        }
    ));
}

#[tokio::test]
async fn silent_agent_times_out_and_is_broadcast() {
    let config = RouterConfig {
        heartbeat_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let router = start_router(config).await;
    let mut silent = TestClient::register(router.addr).await;
    let mut witness = TestClient::register(router.addr).await;
    let silent_id = silent.id();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let broadcast = loop {
        assert!(tokio::time::Instant::now() < deadline, "no broadcast received");
        witness
            .send(&Frame::heartbeat_client(0, witness.id()))
            .await;
        match witness.recv_timeout(Duration::from_millis(50)).await {
            Some(frame @ Frame::Error { .. }) => break frame,
            _ => {}
        }
    };
    match broadcast {
        Frame::Error { kind, sender, .. } => {
            assert_eq!(kind, ErrorKind::DisconnectionBroadcast);
            assert_eq!(sender, Some(silent_id));
        }
        other => panic!("expected Error, got {other:?}"),
    }
    silent.expect_closed().await;
    assert!(router.state.sessions.get(&witness.id()).unwrap().is_connected());
}

fn reserved_file(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{text}").unwrap();
    file
}

#[tokio::test]
async fn admin_requests_need_the_admin_cookie() {
    let file = reserved_file("admin_cookie = \"admin\"\n");
    let config = RouterConfig {
        reserved_config: Some(file.path().to_path_buf()),
        ..test_config()
    };
    let router = start_router(config).await;

    let wait = Duration::from_secs(2);
    let result = admin::request(router.addr, "nope".parse().unwrap(), DebugOp::Probe, None, wait).await;
    assert!(matches!(result, Err(RouterError::Unauthorized)));

    admin::request(router.addr, "admin".parse().unwrap(), DebugOp::Probe, None, wait)
        .await
        .unwrap();
}

#[tokio::test]
async fn admin_reload_enables_new_reserved_agent() {
    let file = reserved_file("admin_cookie = \"admin\"\n");
    let config = RouterConfig {
        reserved_config: Some(file.path().to_path_buf()),
        ..test_config()
    };
    let router = start_router(config).await;
    let reserved = AgentId::new(3).unwrap();

    std::fs::write(file.path(), "admin_cookie = \"admin\"\n[agents]\n3 = \"three\"\n").unwrap();
    admin::reload(router.addr, "admin".parse().unwrap()).await.unwrap();

    let mut agent = TestClient::connect(router.addr).await;
    agent.agent_id = Some(reserved);
    agent.cookie = "three".parse().unwrap();
    agent.send_registration(1).await;
    match agent.recv().await {
        Frame::RegistrationReply { agent_id, .. } => assert_eq!(agent_id, reserved),
        other => panic!("expected RegistrationReply, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_disconnect_drops_target_tunnel() {
    let file = reserved_file("admin_cookie = \"admin\"\n");
    let config = RouterConfig {
        reserved_config: Some(file.path().to_path_buf()),
        ..test_config()
    };
    let router = start_router(config).await;
    let mut target = TestClient::register(router.addr).await;

    admin::disconnect(router.addr, "admin".parse().unwrap(), target.id())
        .await
        .unwrap();
    target.expect_closed().await;
    assert!(router.state.sessions.get(&target.id()).is_some());
}

#[tokio::test]
async fn shutdown_closes_every_tunnel() {
    let router = start_router(test_config()).await;
    let mut a = TestClient::register(router.addr).await;
    router.shutdown.send_replace(());
    a.expect_closed().await;
}

#[tokio::test]
async fn stalled_agent_dropped_after_failed_send_is_broadcast() {
    let config = RouterConfig {
        outbound_queue: 2,
        ..test_config()
    };
    let router = start_router(config).await;
    let mut a = TestClient::register(router.addr).await;
    // never reads its socket
    let stalled = TestClient::register(router.addr).await;
    let stalled_id = stalled.id();
    let session = router.state.sessions.get(&stalled_id).unwrap();

    let payload = vec![0u8; 256 * 1024];
    let mut msg_id = 0;
    while session.is_connected() {
        assert!(msg_id < 512, "stalled tunnel never filled up");
        a.send_request(msg_id, stalled_id, &payload).await;
        msg_id += 1;
    }

    loop {
        match a.recv_skip_heartbeats().await {
            Frame::Error {
                kind: ErrorKind::DisconnectionBroadcast,
                sender,
                ..
            } => {
                assert_eq!(sender, Some(stalled_id));
                break;
            }
            Frame::Error {
                kind: ErrorKind::NotConnectedRecipient,
                sender,
                ..
            } => assert_eq!(sender, Some(stalled_id)),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    drop(stalled);
}

#[tokio::test]
async fn reload_with_new_cookie_closes_reserved_tunnel() {
    let file = reserved_file("admin_cookie = \"admin\"\n[agents]\n3 = \"three\"\n");
    let config = RouterConfig {
        reserved_config: Some(file.path().to_path_buf()),
        ..test_config()
    };
    let router = start_router(config).await;
    let reserved = AgentId::new(3).unwrap();

    let mut agent = TestClient::connect(router.addr).await;
    agent.agent_id = Some(reserved);
    agent.cookie = "three".parse().unwrap();
    agent.send_registration(1).await;
    assert!(matches!(agent.recv().await, Frame::RegistrationReply { .. }));

    std::fs::write(file.path(), "admin_cookie = \"admin\"\n[agents]\n3 = \"trois\"\n").unwrap();
    admin::reload(router.addr, "admin".parse().unwrap()).await.unwrap();
    agent.expect_closed().await;
    assert!(!router.state.sessions.get(&reserved).unwrap().is_connected());

    let mut revoked = agent.reconnect(router.addr).await;
    revoked.send_registration(2).await;
    match revoked.recv().await {
        Frame::Error { kind, .. } => assert_eq!(kind, ErrorKind::WrongMagicCookie),
        other => panic!("expected Error, got {other:?}"),
    }

    let mut renewed = agent.reconnect(router.addr).await;
    renewed.cookie = "trois".parse().unwrap();
    renewed.send_registration(3).await;
    match renewed.recv().await {
        Frame::RegistrationReply { agent_id, .. } => assert_eq!(agent_id, reserved),
        other => panic!("expected RegistrationReply, got {other:?}"),
    }
}
