//! End-to-end chat flows over the in-process loopback transport.

#![cfg(feature = "memory-transport")]

use std::time::Duration;

use rondo_protocol::client::{CallEndReason, ChatCommand};
use rondo_protocol::prelude::*;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ChatConfig {
    init_logging();
    ChatConfig::builder()
        .id_prefix("flow-")
        .search_deadline(Duration::from_secs(30))
        .build()
}

/// Scan the stream until `pred` matches, bounded so a missing event fails
/// the test instead of hanging it.
async fn next_matching<F>(events: &mut ChatEvents, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    let scan = async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(120), scan)
        .await
        .expect("expected event never arrived")
}

async fn paired_clients(
    transport: &MemoryTransport,
) -> (ChatClient, ChatEvents, ChatClient, ChatEvents) {
    let (a, mut a_events) = ChatClient::start(transport.clone(), config());
    let (b, mut b_events) = ChatClient::start(transport.clone(), config());

    a.start_search().await.unwrap();
    b.start_search().await.unwrap();

    next_matching(&mut a_events, |e| matches!(e, ChatEvent::Connected { .. })).await;
    next_matching(&mut b_events, |e| matches!(e, ChatEvent::Connected { .. })).await;

    (a, a_events, b, b_events)
}

#[tokio::test(start_paused = true)]
async fn test_two_clients_pair_with_complementary_roles() {
    let transport = MemoryTransport::new();
    let (a, mut a_events) = ChatClient::start(transport.clone(), config());
    let (b, mut b_events) = ChatClient::start(transport.clone(), config());

    a.start_search().await.unwrap();
    b.start_search().await.unwrap();

    let a_role =
        match next_matching(&mut a_events, |e| matches!(e, ChatEvent::Connected { .. })).await {
            ChatEvent::Connected { role } => role,
            _ => unreachable!(),
        };
    let b_role =
        match next_matching(&mut b_events, |e| matches!(e, ChatEvent::Connected { .. })).await {
            ChatEvent::Connected { role } => role,
            _ => unreachable!(),
        };

    assert_ne!(a_role, b_role, "one seeker and one holder expected");
}

#[tokio::test(start_paused = true)]
async fn test_message_round_trip_with_read_receipt() {
    let transport = MemoryTransport::new();
    let (a, mut a_events, _b, mut b_events) = paired_clients(&transport).await;

    a.send_message("hello there").await.unwrap();

    let sent_id = match next_matching(&mut a_events, |e| {
        matches!(e, ChatEvent::MessageSent { .. })
    })
    .await
    {
        ChatEvent::MessageSent { message_id, .. } => message_id,
        _ => unreachable!(),
    };

    match next_matching(&mut b_events, |e| {
        matches!(e, ChatEvent::MessageReceived { .. })
    })
    .await
    {
        ChatEvent::MessageReceived {
            message_id, text, ..
        } => {
            assert_eq!(message_id, sent_id);
            assert_eq!(text, "hello there");
        }
        _ => unreachable!(),
    }

    // The receiver acknowledges without any user action.
    match next_matching(&mut a_events, |e| matches!(e, ChatEvent::MessageSeen { .. })).await {
        ChatEvent::MessageSeen { message_id } => assert_eq!(message_id, sent_id),
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_typing_indicator_auto_stops() {
    let transport = MemoryTransport::new();
    let (a, _a_events, _b, mut b_events) = paired_clients(&transport).await;

    a.input_activity().await.unwrap();
    assert_eq!(
        next_matching(&mut b_events, |e| matches!(e, ChatEvent::PeerTyping { .. })).await,
        ChatEvent::PeerTyping { active: true }
    );

    // No further activity: the indicator clears by itself.
    assert_eq!(
        next_matching(&mut b_events, |e| matches!(e, ChatEvent::PeerTyping { .. })).await,
        ChatEvent::PeerTyping { active: false }
    );
}

#[tokio::test(start_paused = true)]
async fn test_new_chat_notifies_peer_without_requeueing_them() {
    let transport = MemoryTransport::new();
    let (a, mut a_events, _b, mut b_events) = paired_clients(&transport).await;

    a.new_chat().await.unwrap();

    // The notified side lands in Idle: no auto-requeue against a deliberate
    // departure.
    match next_matching(&mut b_events, |e| {
        matches!(e, ChatEvent::PeerDisconnected { .. })
    })
    .await
    {
        ChatEvent::PeerDisconnected { requeued, deliberate } => {
            assert!(!requeued);
            assert!(deliberate);
        }
        _ => unreachable!(),
    }
    next_matching(&mut b_events, |e| {
        matches!(
            e,
            ChatEvent::PhaseChanged {
                phase: SessionPhase::Idle
            }
        )
    })
    .await;

    // The leaving side is already searching again.
    next_matching(&mut a_events, |e| {
        matches!(
            e,
            ChatEvent::PhaseChanged {
                phase: SessionPhase::Searching
            }
        )
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_abrupt_peer_loss_requeues_and_repairs() {
    let transport = MemoryTransport::new();
    let (a, a_events, b, mut b_events) = paired_clients(&transport).await;

    // Simulate a vanished peer: dropping the handle kills its driver and the
    // channel closes underneath the survivor.
    drop(a);
    drop(a_events);

    match next_matching(&mut b_events, |e| {
        matches!(e, ChatEvent::PeerDisconnected { .. })
    })
    .await
    {
        ChatEvent::PeerDisconnected { requeued, deliberate } => {
            assert!(requeued);
            assert!(!deliberate);
        }
        _ => unreachable!(),
    }

    // A third client shows up and the survivor pairs again.
    let (c, mut c_events) = ChatClient::start(transport.clone(), config());
    c.start_search().await.unwrap();

    next_matching(&mut b_events, |e| matches!(e, ChatEvent::Connected { .. })).await;
    next_matching(&mut c_events, |e| matches!(e, ChatEvent::Connected { .. })).await;
    drop(b);
}

#[tokio::test(start_paused = true)]
async fn test_call_request_and_decline() {
    let transport = MemoryTransport::new();
    let (a, mut a_events, b, mut b_events) = paired_clients(&transport).await;

    a.command(ChatCommand::RequestCall {
        call_type: CallType::Video,
    })
    .await
    .unwrap();

    assert_eq!(
        next_matching(&mut b_events, |e| matches!(
            e,
            ChatEvent::IncomingCall { .. }
        ))
        .await,
        ChatEvent::IncomingCall {
            call_type: CallType::Video
        }
    );

    b.command(ChatCommand::DeclineCall).await.unwrap();
    assert_eq!(
        next_matching(&mut a_events, |e| matches!(e, ChatEvent::CallEnded { .. })).await,
        ChatEvent::CallEnded {
            reason: CallEndReason::Declined
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_lone_search_fails_after_deadline() {
    let transport = MemoryTransport::new();
    init_logging();
    let config = ChatConfig::builder()
        .id_prefix("lone-")
        .search_deadline(Duration::from_secs(3))
        .build();
    let (client, mut events) = ChatClient::start(transport, config);

    client.start_search().await.unwrap();

    match next_matching(&mut events, |e| matches!(e, ChatEvent::SearchFailed { .. })).await {
        ChatEvent::SearchFailed { attempts } => assert!(attempts > 1),
        _ => unreachable!(),
    }
    next_matching(&mut events, |e| {
        matches!(
            e,
            ChatEvent::PhaseChanged {
                phase: SessionPhase::Idle
            }
        )
    })
    .await;
}
