//! Subscription ordering, replay and acknowledgement.

mod common;

use common::*;
use ddp_client::{
    ClientEvent, ConnectionStatus, DataEvent, DdpError, MethodError, MockTransport,
    SubscribeOptions, SubscriptionState,
};
use ddp_protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn subscribe_sends_sub_and_resolves_on_ready() {
    let (client, transport) = connected_client().await;

    let sub = client.subscribe("todos", vec![json!("mine")]).unwrap();
    let id = sub.id().to_string();
    assert_eq!(sub.name(), "todos");
    client.flush().await;

    assert_eq!(
        subs_sent(&transport),
        vec![(id.clone(), "todos".to_string(), Some(vec![json!("mine")]))]
    );
    assert_eq!(client.subscription_state(&id), SubscriptionState::Pending);
    assert!(client.is_subscribed("todos"));
    assert_eq!(client.find_subscription_id("todos"), Some(id.clone()));

    transport.inject(&ServerMessage::Ready {
        subs: vec![id.clone()],
    });
    sub.ready().await.unwrap();
    assert_eq!(client.subscription_state(&id), SubscriptionState::Ready);

    // A repeated ready changes nothing.
    transport.inject(&ServerMessage::Ready { subs: vec![id.clone()] });
    client.flush().await;
    assert_eq!(client.subscription_state(&id), SubscriptionState::Ready);
}

#[tokio::test]
async fn superseding_subscribe_sends_new_sub_before_old_unsub() {
    let (client, transport) = connected_client().await;

    let first = client.subscribe("todos", vec![json!(1)]).unwrap();
    let second = client.subscribe("todos", vec![json!(2)]).unwrap();
    client.flush().await;

    let frames = transport.sent_messages();
    let position = |wanted: &ClientMessage| frames.iter().position(|m| m == wanted).unwrap();
    let sub_first = position(&ClientMessage::sub(first.id(), "todos", Some(vec![json!(1)])));
    let sub_second = position(&ClientMessage::sub(second.id(), "todos", Some(vec![json!(2)])));
    let unsub_first = position(&ClientMessage::unsub(first.id()));
    assert!(sub_first < sub_second);
    assert!(sub_second < unsub_first);

    assert_eq!(unsubs_sent(&transport), vec![first.id().to_string()]);
    assert_eq!(client.find_subscription_id("todos").as_deref(), Some(second.id()));
    assert_eq!(
        client.subscription_state(first.id()),
        SubscriptionState::Unsubscribing
    );
    // The superseded subscription never becomes ready.
    assert_eq!(first.ready().await, Err(DdpError::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_name_frames_follow_program_order() {
    let (client, transport) = connected_client().await;
    let client = Arc::new(client);

    // Each producer subscribes repeatedly and stops its latest
    // subscription by name every fifth step.
    let mut producers = Vec::new();
    for name in ["a", "b", "c"] {
        let client = Arc::clone(&client);
        producers.push(tokio::spawn(async move {
            let mut steps = Vec::new();
            for i in 0..15 {
                let id = client.subscribe(name, vec![json!(i)]).unwrap().id().to_string();
                let stopped = i % 5 == 4;
                if stopped {
                    let _pending = client.unsubscribe_by_name(name);
                }
                steps.push((id, stopped));
                tokio::task::yield_now().await;
            }
            steps
        }));
    }
    let mut steps_by_name = Vec::new();
    for producer in producers {
        steps_by_name.push(producer.await.unwrap());
    }
    client.flush().await;

    let frames = transport.sent_messages();
    let sub_at = |id: &str| {
        frames
            .iter()
            .position(|m| matches!(m, ClientMessage::Sub { id: sent, .. } if sent == id))
            .unwrap()
    };
    let unsub_at = |id: &str| {
        frames
            .iter()
            .position(|m| matches!(m, ClientMessage::Unsub { id: sent } if sent == id))
            .unwrap()
    };

    for steps in &steps_by_name {
        let subs: Vec<usize> = steps.iter().map(|(id, _)| sub_at(id)).collect();
        assert!(subs.windows(2).all(|w| w[0] < w[1]), "subs out of order");

        for (i, (id, stopped)) in steps.iter().enumerate() {
            let unsub = unsub_at(id);
            assert!(subs[i] < unsub, "unsub sent before its own sub");
            if let Some(next) = subs.get(i + 1) {
                if *stopped {
                    assert!(unsub < *next, "explicit unsub sent after a later sub");
                } else {
                    assert!(*next < unsub, "unsub sent before its replacement");
                }
            }
        }
    }
}

#[tokio::test]
async fn reconnect_replays_identical_sub_frames() {
    let (client, transport) = connected_client().await;
    client
        .subscribe("todos", vec![json!({"owner": "me", "limit": 10})])
        .unwrap();
    client.subscribe("lists", vec![]).unwrap();
    client.flush().await;

    let before: Vec<String> = transport
        .sent()
        .into_iter()
        .filter(|f| f.contains(r#""msg":"sub""#))
        .collect();
    assert_eq!(before.len(), 2);

    transport.clear_sent();
    transport.drop_connection();
    client.flush().await;
    wait_for_status(&client, ConnectionStatus::Connected).await;
    client.flush().await;

    let after: Vec<String> = transport
        .sent()
        .into_iter()
        .filter(|f| f.contains(r#""msg":"sub""#))
        .collect();
    assert_eq!(after, before);
}

#[tokio::test]
async fn reconnect_without_auto_resubscribe_sends_nothing() {
    let (client, transport) =
        connected_client_with(config().with_auto_resubscribe(false)).await;
    client.subscribe("todos", vec![]).unwrap();
    client.flush().await;

    transport.clear_sent();
    transport.drop_connection();
    client.flush().await;
    wait_for_status(&client, ConnectionStatus::Connected).await;
    client.flush().await;

    assert!(subs_sent(&transport).is_empty());
    assert!(client.is_subscribed("todos"));
}

#[tokio::test]
async fn subscriptions_made_offline_are_sent_on_connect() {
    let transport = Arc::new(MockTransport::with_auto_handshake());
    let client = client_with(config().with_auto_resubscribe(false), &transport);

    let sub = client.subscribe("todos", vec![]).unwrap();
    client.flush().await;
    assert!(subs_sent(&transport).is_empty());

    client.connect().await.unwrap();
    client.flush().await;
    let sent = subs_sent(&transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, sub.id());
}

#[tokio::test]
async fn unsubscribe_completes_only_after_nosub() {
    let (client, transport) = connected_client().await;
    let sub = client.subscribe("todos", vec![]).unwrap();
    let id = sub.id().to_string();
    transport.inject(&ServerMessage::Ready { subs: vec![id.clone()] });
    sub.ready().await.unwrap();

    let mut done = client.unsubscribe(&id);
    client.flush().await;
    assert_eq!(unsubs_sent(&transport), vec![id.clone()]);
    assert!(done.try_take().is_none());
    assert_eq!(client.subscription_state(&id), SubscriptionState::Unsubscribing);

    transport.inject(&ServerMessage::Nosub {
        id: id.clone(),
        error: None,
    });
    done.await.unwrap();
    assert_eq!(client.subscription_state(&id), SubscriptionState::Removed);
    assert!(!client.is_subscribed("todos"));
    assert_eq!(client.find_subscription_id("todos"), None);
}

#[tokio::test]
async fn unsubscribe_before_ready_drops_ready_outcome() {
    let (client, transport) = connected_client().await;
    let sub = client.subscribe("todos", vec![]).unwrap();
    let id = sub.id().to_string();

    let done = client.unsubscribe_by_name("todos");
    client.flush().await;
    assert_eq!(sub.ready().await, Err(DdpError::Cancelled));

    transport.inject(&ServerMessage::Nosub { id, error: None });
    done.await.unwrap();
}

#[tokio::test]
async fn nosub_error_fails_ready_and_reports_event() {
    let (client, transport) = connected_client().await;
    let mut events = client.events();
    let sub = client.subscribe("secret", vec![]).unwrap();
    let id = sub.id().to_string();
    client.flush().await;

    let error = MethodError::new(403, "Access denied");
    transport.inject(&ServerMessage::Nosub {
        id: id.clone(),
        error: Some(error.clone()),
    });

    assert_eq!(sub.ready().await, Err(DdpError::Method(error.clone())));
    client.flush().await;
    assert!(drain_events(&mut events).contains(&ClientEvent::SubscriptionError { id, error }));
}

#[tokio::test]
async fn unsubscribe_while_offline_completes_locally() {
    let (client, transport) = connected_client_with(config().with_auto_reconnect(false)).await;
    let sub = client.subscribe("todos", vec![]).unwrap();
    client.flush().await;

    transport.drop_connection();
    client.flush().await;
    transport.clear_sent();

    client.unsubscribe(sub.id()).await.unwrap();
    assert!(unsubs_sent(&transport).is_empty());
    assert_eq!(client.subscription_state(sub.id()), SubscriptionState::Removed);
    assert_eq!(client.subscription_count(), 0);
}

#[tokio::test]
async fn unsubscribe_by_collection_and_all() {
    let (client, transport) = connected_client().await;
    let todos = client
        .subscribe_with("todos.mine", vec![], SubscribeOptions::new().collection("todos"))
        .unwrap();
    let lists = client
        .subscribe_with("lists", vec![], SubscribeOptions::new().collection("lists"))
        .unwrap();
    client.flush().await;
    assert!(client.is_subscribed("todos"));

    let by_collection = client.unsubscribe_by_collection("todos");
    client.flush().await;
    assert_eq!(unsubs_sent(&transport), vec![todos.id().to_string()]);
    transport.inject(&ServerMessage::Nosub {
        id: todos.id().to_string(),
        error: None,
    });
    by_collection.await.unwrap();
    assert!(!client.is_subscribed("todos"));
    assert!(client.is_subscribed("lists"));

    let all = client.unsubscribe_all();
    client.flush().await;
    transport.inject(&ServerMessage::Nosub {
        id: lists.id().to_string(),
        error: None,
    });
    tokio::time::timeout(Duration::from_secs(1), all)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.subscription_count(), 0);
}

#[tokio::test]
async fn data_callbacks_see_only_their_collection() {
    let (client, transport) = connected_client().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client
        .subscribe_with(
            "todos",
            vec![],
            SubscribeOptions::new()
                .collection("todos")
                .on_data(move |event| sink.lock().push(event.clone())),
        )
        .unwrap();
    client.flush().await;

    transport.inject(&ServerMessage::Added {
        collection: "todos".into(),
        id: "1".into(),
        fields: Default::default(),
    });
    transport.inject(&ServerMessage::Added {
        collection: "lists".into(),
        id: "2".into(),
        fields: Default::default(),
    });
    transport.inject(&ServerMessage::Removed {
        collection: "todos".into(),
        id: "1".into(),
    });
    client.flush().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], DataEvent::Added { id, .. } if id == "1"));
    assert!(matches!(&seen[1], DataEvent::Removed { id, .. } if id == "1"));
    assert_eq!(client.collection("lists").count(), 1);
}
