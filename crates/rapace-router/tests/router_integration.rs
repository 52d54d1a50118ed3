use std::collections::HashMap;
use std::time::Duration;

use rapace_core::{Endpoint, Registry, Transport};
use rapace_router::{InboxItem, RouterCaller, RouterConfig, RouterCore};

async fn serve_router(config: RouterConfig) -> (std::sync::Arc<RouterCore>, Transport) {
    let core = RouterCore::new(config);
    let mut builder = Registry::builder();
    builder.register(&core.contract()).unwrap();
    let (client_transport, server_transport) = Transport::mem_pair();
    Endpoint::serve(server_transport, builder.build());
    (core, client_transport)
}

#[tokio::test]
async fn register_allocates_id_and_heartbeat_round_trips() {
    let (core, client_transport) = serve_router(RouterConfig::default()).await;
    let client = Endpoint::serve(client_transport, Registry::builder().build());

    let (caller, _inbox) = RouterCaller::connect(&client).await.unwrap();
    let node_id = caller.register(None, Vec::new(), HashMap::new()).await.unwrap();
    assert!(core.presence().get(&node_id).is_some());

    caller.heartbeat(&node_id).await.unwrap();
    client.close();
}

#[tokio::test]
async fn unicast_delivers_to_target_node_only() {
    let core = RouterCore::new(RouterConfig::default());

    let mut builder_a = Registry::builder();
    builder_a.register(&core.contract()).unwrap();
    let (a_transport, a_server_transport) = Transport::mem_pair();
    Endpoint::serve(a_server_transport, builder_a.build());
    let client_a = Endpoint::serve(a_transport, Registry::builder().build());

    let mut builder_b = Registry::builder();
    builder_b.register(&core.contract()).unwrap();
    let (b_transport, b_server_transport) = Transport::mem_pair();
    Endpoint::serve(b_server_transport, builder_b.build());
    let client_b = Endpoint::serve(b_transport, Registry::builder().build());

    let (caller_a, mut inbox_a) = RouterCaller::connect(&client_a).await.unwrap();
    let node_a = caller_a.register(None, Vec::new(), HashMap::new()).await.unwrap();

    let (caller_b, _inbox_b) = RouterCaller::connect(&client_b).await.unwrap();
    let _node_b = caller_b.register(None, Vec::new(), HashMap::new()).await.unwrap();

    caller_b.send_unicast(&node_a, b"hello a".to_vec()).await.unwrap();

    let item = tokio::time::timeout(Duration::from_secs(1), inbox_a.recv())
        .await
        .expect("did not receive delivery in time");
    match item {
        Some(InboxItem::Delivery(delivery)) => assert_eq!(delivery.payload, b"hello a"),
        _ => panic!("expected a delivery"),
    }

    client_a.close();
    client_b.close();
}

#[tokio::test]
async fn multicast_reaches_only_group_members() {
    let core = RouterCore::new(RouterConfig::default());

    let mut builder_a = Registry::builder();
    builder_a.register(&core.contract()).unwrap();
    let (a_transport, a_server_transport) = Transport::mem_pair();
    Endpoint::serve(a_server_transport, builder_a.build());
    let client_a = Endpoint::serve(a_transport, Registry::builder().build());

    let mut builder_b = Registry::builder();
    builder_b.register(&core.contract()).unwrap();
    let (b_transport, b_server_transport) = Transport::mem_pair();
    Endpoint::serve(b_server_transport, builder_b.build());
    let client_b = Endpoint::serve(b_transport, Registry::builder().build());

    let mut builder_c = Registry::builder();
    builder_c.register(&core.contract()).unwrap();
    let (c_transport, c_server_transport) = Transport::mem_pair();
    Endpoint::serve(c_server_transport, builder_c.build());
    let client_c = Endpoint::serve(c_transport, Registry::builder().build());

    let (caller_a, _inbox_a) = RouterCaller::connect(&client_a).await.unwrap();
    caller_a.register(None, vec!["workers".to_string()], HashMap::new()).await.unwrap();

    let (caller_b, mut inbox_b) = RouterCaller::connect(&client_b).await.unwrap();
    caller_b.register(None, vec!["workers".to_string()], HashMap::new()).await.unwrap();

    let (caller_c, mut inbox_c) = RouterCaller::connect(&client_c).await.unwrap();
    caller_c.register(None, vec!["other".to_string()], HashMap::new()).await.unwrap();

    caller_a.send_multicast("workers".to_string(), b"group hello".to_vec()).await.unwrap();

    let item = tokio::time::timeout(Duration::from_secs(1), inbox_b.recv())
        .await
        .expect("did not receive delivery in time");
    match item {
        Some(InboxItem::Delivery(delivery)) => assert_eq!(delivery.payload, b"group hello"),
        _ => panic!("expected a delivery"),
    }

    let nothing = tokio::time::timeout(Duration::from_millis(50), inbox_c.recv()).await;
    assert!(nothing.is_err(), "non-member must not receive the multicast");

    client_a.close();
    client_b.close();
    client_c.close();
}

#[tokio::test]
async fn request_to_unregistered_target_gets_an_immediate_error() {
    let (_core, client_transport) = serve_router(RouterConfig::default()).await;
    let client = Endpoint::serve(client_transport, Registry::builder().build());

    let (caller, _inbox) = RouterCaller::connect(&client).await.unwrap();
    let err = caller
        .send_request("nobody", b"ping".to_vec(), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_eq!(err.code, rapace_wire::StatusCode::Unavailable);
    assert!(err.message.contains("not connected"));

    client.close();
}

#[tokio::test]
async fn request_that_goes_unanswered_times_out_with_synthesized_response() {
    let core = RouterCore::new(RouterConfig::default());

    let mut builder_a = Registry::builder();
    builder_a.register(&core.contract()).unwrap();
    let (a_transport, a_server_transport) = Transport::mem_pair();
    Endpoint::serve(a_server_transport, builder_a.build());
    let client_a = Endpoint::serve(a_transport, Registry::builder().build());

    let mut builder_b = Registry::builder();
    builder_b.register(&core.contract()).unwrap();
    let (b_transport, b_server_transport) = Transport::mem_pair();
    Endpoint::serve(b_server_transport, builder_b.build());
    let client_b = Endpoint::serve(b_transport, Registry::builder().build());

    let (caller_a, _inbox_a) = RouterCaller::connect(&client_a).await.unwrap();
    let _node_a = caller_a.register(None, Vec::new(), HashMap::new()).await.unwrap();

    // B is a bare BidiCall, not a RouterCaller: it registers and then simply
    // never reads again, so nothing ever answers A's request and the
    // router's own per-request timeout is what fires.
    let b_call = client_b
        .bidi::<rapace_router::RouterMessage, rapace_router::RouterMessage>(
            "Router",
            "Connect",
            std::sync::Arc::new(rapace_core::SerdeCodec::postcard()),
            std::sync::Arc::new(rapace_core::SerdeCodec::postcard()),
        )
        .await
        .unwrap();
    b_call
        .send(rapace_router::RouterMessage::Register {
            client_name: None,
            groups: Vec::new(),
            metadata: HashMap::new(),
        })
        .await
        .unwrap();
    let node_b = match b_call.recv().await.unwrap().unwrap() {
        rapace_router::RouterMessage::Registered { node_id } => node_id,
        other => panic!("expected Registered, got {other:?}"),
    };

    let started = tokio::time::Instant::now();
    let err = caller_a
        .send_request(&node_b, b"ping".to_vec(), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(err.message, "Request timeout");

    client_a.close();
    client_b.close();
}

#[tokio::test]
async fn subscribe_receives_published_events() {
    let (core, client_transport) = serve_router(RouterConfig::default()).await;
    let client = Endpoint::serve(client_transport, Registry::builder().build());

    let (caller, mut inbox) = RouterCaller::connect(&client).await.unwrap();
    caller.subscribe("alerts").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    core.distributor().publish("alerts", bytes::Bytes::from_static(b"fire"));

    let item = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
        .await
        .expect("did not receive event in time");
    match item {
        Some(InboxItem::Event(event)) => {
            assert_eq!(event.topic, "alerts");
            assert_eq!(event.payload, b"fire");
        }
        _ => panic!("expected an event"),
    }

    client.close();
}

#[tokio::test]
async fn zombie_presence_is_evicted_after_timeout() {
    let (core, client_transport) = serve_router(RouterConfig {
        zombie_timeout: Duration::from_millis(20),
        ..RouterConfig::default()
    })
    .await;
    let client = Endpoint::serve(client_transport, Registry::builder().build());

    let (caller, _inbox) = RouterCaller::connect(&client).await.unwrap();
    let node_id = caller.register(None, Vec::new(), HashMap::new()).await.unwrap();
    assert!(core.presence().get(&node_id).is_some());

    let health_check = core.spawn_health_check(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(core.presence().get(&node_id).is_none());

    health_check.abort();
    client.close();
}
