//! End-to-end coverage of the four call shapes over the in-memory transport,
//! plus deadline propagation. Unit tests inside each module cover their own
//! internals; these exercise a caller and a handler talking across a real
//! (in-process) duplex transport.

use std::sync::Arc;
use std::time::Duration;

use rapace_core::{
    bidi_handler, client_streaming_handler, server_streaming_handler, unary_handler, Endpoint,
    Registry, SerdeCodec, ServiceContract, Status, StatusCode, Transport,
};
use serde::{Deserialize, Serialize};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Num(i64);

fn build_registry() -> Registry {
    let mut builder = Registry::builder();

    let mut math = ServiceContract::new("Math");
    math.add_method(
        "Double",
        unary_handler(
            Arc::new(SerdeCodec::<Num>::postcard()),
            Arc::new(SerdeCodec::<Num>::postcard()),
            |req: Num| async move { Ok(Num(req.0 * 2)) as Result<Num, Status> },
        ),
    );
    math.add_method(
        "CountTo",
        server_streaming_handler(
            Arc::new(SerdeCodec::<Num>::postcard()),
            Arc::new(SerdeCodec::<Num>::postcard()),
            |req: Num, sink| async move {
                for i in 1..=req.0 {
                    if sink.send(Num(i)).await.is_err() {
                        return Status::new(StatusCode::Unavailable, "client gone");
                    }
                }
                Status::ok()
            },
        ),
    );
    math.add_method(
        "Sum",
        client_streaming_handler(
            Arc::new(SerdeCodec::<Num>::postcard()),
            Arc::new(SerdeCodec::<Num>::postcard()),
            |requests| async move {
                let mut total = 0;
                while let Some(next) = requests.next().await {
                    total += next?.0;
                }
                Ok(Num(total)) as Result<Num, Status>
            },
        ),
    );
    math.add_method(
        "RunningTotal",
        bidi_handler(
            Arc::new(SerdeCodec::<Num>::postcard()),
            Arc::new(SerdeCodec::<Num>::postcard()),
            |requests, responses| async move {
                let mut total = 0;
                while let Some(next) = requests.next().await {
                    match next {
                        Ok(n) => {
                            total += n.0;
                            if responses.send(Num(total)).await.is_err() {
                                return Status::new(StatusCode::Unavailable, "client gone");
                            }
                        }
                        Err(status) => return status,
                    }
                }
                Status::ok()
            },
        ),
    );
    math.add_method(
        "Slow",
        unary_handler(
            Arc::new(SerdeCodec::<Num>::postcard()),
            Arc::new(SerdeCodec::<Num>::postcard()),
            |req: Num| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(req) as Result<Num, Status>
            },
        ),
    );

    builder.register(&math).unwrap();
    builder.build()
}

fn connect() -> (Arc<Endpoint>, Arc<Endpoint>) {
    let (client_transport, server_transport) = Transport::mem_pair();
    let server = Endpoint::serve(server_transport, build_registry());
    let client = Endpoint::serve(client_transport, Registry::builder().build());
    (client, server)
}

#[tokio::test]
async fn unary_call_round_trips() {
    init_tracing();
    let (client, server) = connect();
    let caller = client.unary::<Num, Num>(
        "Math",
        "Double",
        Arc::new(SerdeCodec::postcard()),
        Arc::new(SerdeCodec::postcard()),
    );
    let response = caller.call(Num(21), None).await.unwrap();
    assert_eq!(response, Num(42));
    client.close();
    server.close();
}

#[tokio::test]
async fn server_streaming_yields_every_chunk_in_order() {
    init_tracing();
    let (client, server) = connect();
    let caller = client.server_streaming::<Num, Num>(
        "Math",
        "CountTo",
        Arc::new(SerdeCodec::postcard()),
        Arc::new(SerdeCodec::postcard()),
    );
    let mut stream = caller.call(Num(4), None).await.unwrap();
    let mut seen = Vec::new();
    while let Some(item) = stream.message().await {
        seen.push(item.unwrap());
    }
    assert_eq!(seen, vec![Num(1), Num(2), Num(3), Num(4)]);
    client.close();
    server.close();
}

#[tokio::test]
async fn client_streaming_aggregates_every_request() {
    init_tracing();
    let (client, server) = connect();
    let caller = client.client_streaming::<Num, Num>(
        "Math",
        "Sum",
        Arc::new(SerdeCodec::postcard()),
        Arc::new(SerdeCodec::postcard()),
    );
    let total = caller
        .call(vec![Num(1), Num(2), Num(3)], None)
        .await
        .unwrap();
    assert_eq!(total, Num(6));
    client.close();
    server.close();
}

#[tokio::test]
async fn bidi_call_interleaves_request_and_response() {
    init_tracing();
    let (client, server) = connect();
    let call = client
        .bidi::<Num, Num>(
            "Math",
            "RunningTotal",
            Arc::new(SerdeCodec::postcard()),
            Arc::new(SerdeCodec::postcard()),
        )
        .await
        .unwrap();

    call.send(Num(1)).await.unwrap();
    assert_eq!(call.recv().await.unwrap().unwrap(), Num(1));
    call.send(Num(2)).await.unwrap();
    assert_eq!(call.recv().await.unwrap().unwrap(), Num(3));
    call.finish_sending().await.unwrap();
    assert!(call.recv().await.is_none());

    client.close();
    server.close();
}

#[tokio::test]
async fn unary_call_respects_deadline() {
    init_tracing();
    let (client, server) = connect();
    let caller = client.unary::<Num, Num>(
        "Math",
        "Slow",
        Arc::new(SerdeCodec::postcard()),
        Arc::new(SerdeCodec::postcard()),
    );
    let err = caller
        .call(Num(1), Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert_eq!(err.code, StatusCode::DeadlineExceeded);
    client.close();
    server.close();
}
