mod common;

use common::{harness, harness_with};
use direct_chat_service::config::LifecyclePolicy;
use direct_chat_service::models::{ConversationKey, DeleteRequest, MessageStatus};
use direct_chat_service::websocket::message_types::WsInboundEvent;
use uuid::Uuid;

#[tokio::test]
async fn test_send_reaches_every_device_of_both_users() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_phone = h.connect(alice).await;
    let mut alice_laptop = h.connect(alice).await;
    let mut bob_phone = h.connect(bob).await;
    let mut bob_laptop = h.connect(bob).await;
    for c in [&mut alice_phone, &mut alice_laptop, &mut bob_phone, &mut bob_laptop] {
        c.drain();
    }

    let id = h.send(&alice_phone, bob, "hello").await;

    for bob_conn in [&mut bob_phone, &mut bob_laptop] {
        let frames = bob_conn.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "message.new");
        assert_eq!(frames[0]["message"]["id"], id.to_string());
        assert_eq!(frames[0]["message"]["body"], "hello");
    }
    for alice_conn in [&mut alice_phone, &mut alice_laptop] {
        let frames = alice_conn.drain();
        assert_eq!(frames[0]["type"], "message.sent");
        assert_eq!(frames[1]["type"], "message.status");
        assert_eq!(frames[1]["status"], "delivered");
        assert_eq!(frames.len(), 2);
    }

    let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn test_offline_receiver_stays_sent_until_acknowledged() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    alice_conn.drain();

    let id = h.send(&alice_conn, bob, "are you there?").await;
    assert_eq!(alice_conn.drain_types(), vec!["message.sent"]);
    let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);

    let mut bob_conn = h.connect(bob).await;
    assert_eq!(bob_conn.drain_types(), vec!["presence.snapshot"]);
    assert_eq!(alice_conn.drain_types(), vec!["presence.online"]);

    h.dispatch(
        &bob_conn,
        WsInboundEvent::Delivered {
            message_ids: vec![id],
        },
    )
    .await
    .unwrap();
    let frames = alice_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "message.status");
    assert_eq!(frames[0]["message_id"], id.to_string());
    assert_eq!(frames[0]["status"], "delivered");
}

#[tokio::test]
async fn test_sends_from_one_connection_arrive_in_order() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    bob_conn.drain();

    for body in ["m1", "m2", "m3"] {
        h.send(&alice_conn, bob, body).await;
    }

    let bodies: Vec<String> = bob_conn
        .drain()
        .iter()
        .filter(|f| f["type"] == "message.new")
        .map(|f| f["message"]["body"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(bodies, vec!["m1", "m2", "m3"]);

    let history = h.state.history.load_history(bob, alice, None).await.unwrap();
    let bodies: Vec<&str> = history.iter().map(|e| e.message.body.as_str()).collect();
    assert_eq!(bodies, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_seen_only_touches_listed_messages() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let bob_conn = h.connect(bob).await;

    let m1 = h.send(&alice_conn, bob, "one").await;
    let m2 = h.send(&alice_conn, bob, "two").await;
    let m3 = h.send(&alice_conn, bob, "three").await;
    alice_conn.drain();

    h.dispatch(
        &bob_conn,
        WsInboundEvent::Seen {
            message_ids: vec![m1, m3],
        },
    )
    .await
    .unwrap();

    let frames = alice_conn.drain();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f["status"] == "seen"));
    let ids: Vec<&str> = frames
        .iter()
        .map(|f| f["message_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![m1.to_string(), m3.to_string()]);

    for (id, expected) in [
        (m1, MessageStatus::Seen),
        (m2, MessageStatus::Delivered),
        (m3, MessageStatus::Seen),
    ] {
        let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
        assert_eq!(stored.status, expected);
    }
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let bob_conn = h.connect(bob).await;
    let id = h.send(&alice_conn, bob, "hi").await;

    h.dispatch(&bob_conn, WsInboundEvent::Seen { message_ids: vec![id] })
        .await
        .unwrap();
    alice_conn.drain();

    h.dispatch(
        &bob_conn,
        WsInboundEvent::Delivered {
            message_ids: vec![id],
        },
    )
    .await
    .unwrap();
    h.dispatch(&bob_conn, WsInboundEvent::Seen { message_ids: vec![id] })
        .await
        .unwrap();

    assert!(alice_conn.drain().is_empty());
    let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Seen);
}

#[tokio::test]
async fn test_only_the_receiver_can_acknowledge() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let id = h.send(&alice_conn, bob, "hi").await;
    alice_conn.drain();

    h.dispatch(&alice_conn, WsInboundEvent::Seen { message_ids: vec![id] })
        .await
        .unwrap();

    assert!(alice_conn.drain().is_empty());
    let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_delete_fanout_follows_scope() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    let first = h.send(&alice_conn, bob, "first").await;
    let second = h.send(&alice_conn, bob, "second").await;
    alice_conn.drain();
    bob_conn.drain();

    h.dispatch(
        &alice_conn,
        WsInboundEvent::Delete {
            message_id: first,
            scope: DeleteRequest::ForSenderOnly,
        },
    )
    .await
    .unwrap();
    let frames = alice_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "message.deleted");
    assert_eq!(frames[0]["scope"], "for_sender_only");
    assert!(bob_conn.drain().is_empty());

    h.dispatch(
        &alice_conn,
        WsInboundEvent::Delete {
            message_id: second,
            scope: DeleteRequest::ForBoth,
        },
    )
    .await
    .unwrap();
    assert_eq!(alice_conn.drain_types(), vec!["message.deleted"]);
    let frames = bob_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["scope"], "for_both");

    let for_alice = h.state.history.load_history(alice, bob, None).await.unwrap();
    let for_bob = h.state.history.load_history(bob, alice, None).await.unwrap();
    assert!(for_alice.is_empty());
    assert_eq!(for_bob.len(), 1);
    assert_eq!(for_bob[0].message.id, first);
}

#[tokio::test]
async fn test_receiver_cannot_delete_for_both() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    let id = h.send(&alice_conn, bob, "mine").await;
    alice_conn.drain();
    bob_conn.drain();

    let err = h
        .dispatch(
            &bob_conn,
            WsInboundEvent::Delete {
                message_id: id,
                scope: DeleteRequest::ForBoth,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, "UNAUTHORIZED");

    let frames = bob_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["code"], "UNAUTHORIZED");
    assert!(alice_conn.drain().is_empty());
}

#[tokio::test]
async fn test_edit_reaches_both_participants() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    let id = h.send(&alice_conn, bob, "helo").await;
    alice_conn.drain();
    bob_conn.drain();

    h.dispatch(
        &alice_conn,
        WsInboundEvent::Edit {
            message_id: id,
            body: "hello".into(),
        },
    )
    .await
    .unwrap();

    for conn in [&mut alice_conn, &mut bob_conn] {
        let frames = conn.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "message.edited");
        assert_eq!(frames[0]["new_body"], "hello");
        assert_eq!(frames[0]["is_edited"], true);
    }
}

#[tokio::test]
async fn test_conversation_upsert_is_idempotent() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_conn = h.connect(alice).await;
    let bob_conn = h.connect(bob).await;

    h.send(&alice_conn, bob, "one").await;
    h.send(&bob_conn, alice, "two").await;
    let last = h.send(&alice_conn, bob, "three").await;

    for user in [alice, bob] {
        let conversations = h.state.conversations.list_for_user(user, 10).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].key, ConversationKey::for_pair(alice, bob));
        assert_eq!(conversations[0].last_message_id, Some(last));
    }
}

#[tokio::test]
async fn test_store_failure_reports_to_originating_connection_only() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_phone = h.connect(alice).await;
    let mut alice_laptop = h.connect(alice).await;
    let mut bob_conn = h.connect(bob).await;
    for c in [&mut alice_phone, &mut alice_laptop, &mut bob_conn] {
        c.drain();
    }

    h.store.set_unavailable(true);
    let err = h
        .dispatch(
            &alice_phone,
            WsInboundEvent::Send {
                receiver_id: bob,
                body: "lost".into(),
                reply_to: None,
                client_message_id: Some("c-9".into()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, "PERSISTENCE_FAILURE");

    let frames = alice_phone.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["retryable"], true);
    assert!(alice_laptop.drain().is_empty());
    assert!(bob_conn.drain().is_empty());

    h.store.set_unavailable(false);
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn test_backlog_delivered_on_join_when_enabled() {
    let h = harness_with(LifecyclePolicy {
        deliver_backlog_on_join: true,
        ..LifecyclePolicy::default()
    });
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let m1 = h.send(&alice_conn, bob, "one").await;
    let m2 = h.send(&alice_conn, bob, "two").await;
    alice_conn.drain();

    let _bob_conn = h.connect(bob).await;

    let frames = alice_conn.drain();
    assert_eq!(frames[0]["type"], "presence.online");
    let delivered: Vec<&str> = frames[1..]
        .iter()
        .filter(|f| f["type"] == "message.status" && f["status"] == "delivered")
        .map(|f| f["message_id"].as_str().unwrap())
        .collect();
    assert_eq!(delivered, vec![m1.to_string(), m2.to_string()]);
}

#[tokio::test]
async fn test_backlog_left_alone_by_default() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let id = h.send(&alice_conn, bob, "later").await;
    alice_conn.drain();

    let _bob_conn = h.connect(bob).await;
    assert_eq!(alice_conn.drain_types(), vec!["presence.online"]);
    let stored = h.state.messages.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_last_disconnect_persists_offline_presence() {
    let h = harness();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut alice_conn = h.connect(alice).await;
    let bob_conn = h.connect(bob).await;
    alice_conn.drain();

    h.state.router.disconnect(bob_conn.connection_id).await;

    let frames = alice_conn.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "presence.offline");
    assert_eq!(frames[0]["user_id"], bob.to_string());

    let presence = h
        .state
        .stores
        .presence
        .get_presence(bob)
        .await
        .unwrap()
        .unwrap();
    assert!(!presence.is_online);
    assert!(presence.last_seen.is_some());
    assert!(!h.state.registry.is_online(bob));
}
