//! End-to-end tests driving a real server over loopback TCP.

use std::io::{Read, Write};
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wirecall::envelope::write_param;
use wirecall::{
    BincodeSerializer, CallClient, CallError, CallEnvelope, LengthFormat, ResponseEnvelope,
    ServiceRegistry, ServiceTable, Status, WirecallServer,
};

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(registry: ServiceRegistry) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = WirecallServer::new(registry)
            .ready_signal(ready_tx)
            .bind("127.0.0.1:0".parse().expect("loopback address"))
            .expect("bind ephemeral port");
        let addr = server.local_addr().expect("bound address");
        let handle = tokio::spawn(server.run_until(async {
            let _ = shutdown_rx.await;
        }));
        ready_rx.await.expect("server ready");
        Self {
            addr,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle
            .await
            .expect("server task")
            .expect("server ran cleanly");
    }
}

fn math_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .register(
            "math",
            ServiceTable::new()
                .method("add", |a: i32, b: i32| a + b)
                .method("concat", |a: String, b: String| format!("{a}{b}"))
                .method("quot", |a: i32, b: i32| a / b)
                .method("reset", || ())
                .fallible("div", |a: i32, b: i32| {
                    if b == 0 {
                        Err("division by zero".into())
                    } else {
                        Ok::<i32, wirecall::HandlerError>(a / b)
                    }
                }),
        )
        .expect("namespace free");
    registry
}

#[tokio::test(flavor = "multi_thread")]
async fn calls_resolve_and_unknown_targets_report_their_names() {
    let server = TestServer::start(math_registry()).await;
    let addr = server.addr;

    let outcome = tokio::task::spawn_blocking(move || {
        let mut client = CallClient::connect(addr)?;

        let sum: i32 = client.call("math", "add", (2_i32, 3_i32))?;
        assert_eq!(sum, 5);

        let missing_method = client
            .call::<_, i32>("math", "subtract", (2_i32, 3_i32))
            .expect_err("subtract is not registered");
        assert!(
            missing_method.to_string().contains("subtract"),
            "error should name the method: {missing_method}"
        );

        let missing_namespace = client
            .call::<_, i32>("physics", "add", (2_i32, 3_i32))
            .expect_err("physics is not registered");
        assert!(
            missing_namespace.to_string().contains("physics"),
            "error should name the namespace: {missing_namespace}"
        );

        Ok::<(), CallError>(())
    })
    .await
    .expect("client thread");
    outcome.expect("calls completed");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_survives_handler_errors() {
    let server = TestServer::start(math_registry()).await;
    let addr = server.addr;

    tokio::task::spawn_blocking(move || {
        let mut client = CallClient::connect(addr).expect("connect");

        let error = client
            .call::<_, i32>("math", "div", (1_i32, 0_i32))
            .expect_err("division by zero fails");
        match &error {
            CallError::Remote {
                namespace,
                method,
                message,
            } => {
                assert_eq!(namespace, "math");
                assert_eq!(method, "div");
                assert!(message.contains("division by zero"), "got: {message}");
            }
            other => panic!("expected remote failure, got {other:?}"),
        }

        // The same connection keeps working after a failure envelope.
        let quotient: i32 = client.call("math", "div", (10_i32, 2_i32)).expect("10 / 2");
        assert_eq!(quotient, 5);
    })
    .await
    .expect("client thread");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn void_and_string_returns_round_trip() {
    let server = TestServer::start(math_registry()).await;
    let addr = server.addr;

    tokio::task::spawn_blocking(move || {
        let mut client = CallClient::connect(addr).expect("connect");

        client
            .call::<_, ()>("math", "reset", ())
            .expect("void call succeeds");

        let joined: String = client
            .call("math", "concat", ("wire".to_owned(), "call".to_owned()))
            .expect("concat");
        assert_eq!(joined, "wirecall");
    })
    .await
    .expect("client thread");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pipelined_requests_answer_in_order() {
    let server = TestServer::start(math_registry()).await;
    let addr = server.addr;

    tokio::task::spawn_blocking(move || {
        let serializer = BincodeSerializer;
        let format = LengthFormat::default();

        let encode_add = |a: i32, b: i32| {
            let mut body = BytesMut::new();
            CallEnvelope::encode_header(&mut body, "math", "add").expect("header");
            write_param(&serializer, &mut body, &a).expect("param a");
            write_param(&serializer, &mut body, &b).expect("param b");
            format.encode_frame(&body).expect("frame")
        };

        // Two requests in one write; responses must come back in call order.
        let mut batch = Vec::new();
        batch.extend_from_slice(&encode_add(2, 3));
        batch.extend_from_slice(&encode_add(40, 2));

        let mut stream = std::net::TcpStream::connect(addr).expect("connect");
        stream.write_all(&batch).expect("send batch");

        let mut read_response = || {
            let mut prefix = [0_u8; 4];
            stream.read_exact(&mut prefix).expect("length prefix");
            let len = u32::from_le_bytes(prefix) as usize;
            let mut payload = vec![0_u8; len];
            stream.read_exact(&mut payload).expect("payload");
            ResponseEnvelope::decode(&payload).expect("response envelope")
        };

        let first = read_response();
        assert_eq!(first.status, Status::Success);
        let (sum, _): (i32, usize) = decode_i32(&first.payload);
        assert_eq!(sum, 5);

        let second = read_response();
        assert_eq!(second.status, Status::Success);
        let (answer, _): (i32, usize) = decode_i32(&second.payload);
        assert_eq!(answer, 42);
    })
    .await
    .expect("client thread");

    server.stop().await;
}

fn decode_i32(payload: &[u8]) -> (i32, usize) {
    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .expect("success payload decodes")
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_handler_keeps_connection_and_pool_intact() {
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = WirecallServer::new(math_registry())
        .segment_count(1)
        .ready_signal(ready_tx)
        .bind("127.0.0.1:0".parse().expect("loopback address"))
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("bound address");
    let handle = tokio::spawn(server.run_until(async {
        let _ = shutdown_rx.await;
    }));
    ready_rx.await.expect("server ready");

    tokio::task::spawn_blocking(move || {
        let mut client = CallClient::connect(addr).expect("connect");

        // Integer division by zero panics inside the handler; the caller
        // must see a failure envelope, not a dropped connection.
        let error = client
            .call::<_, i32>("math", "quot", (1_i32, 0_i32))
            .expect_err("division by zero panics");
        match &error {
            CallError::Remote { message, .. } => {
                assert!(message.contains("divide by zero"), "got: {message}");
            }
            other => panic!("expected remote failure, got {other:?}"),
        }

        // Same connection still answers.
        let sum: i32 = client.call("math", "add", (2_i32, 3_i32)).expect("add");
        assert_eq!(sum, 5);
        drop(client);

        // The single segment was not leaked: a fresh connection is served.
        let mut next = CallClient::connect(addr).expect("reconnect");
        let quotient: i32 = next.call("math", "quot", (10_i32, 2_i32)).expect("10 / 2");
        assert_eq!(quotient, 5);
    })
    .await
    .expect("client thread");

    let _ = shutdown_tx.send(());
    handle
        .await
        .expect("server task")
        .expect("server ran cleanly");
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_segment_pool_delays_new_connections() {
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = WirecallServer::new(math_registry())
        .segment_count(1)
        .ready_signal(ready_tx)
        .bind("127.0.0.1:0".parse().expect("loopback address"))
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("bound address");
    let handle = tokio::spawn(server.run_until(async {
        let _ = shutdown_rx.await;
    }));
    ready_rx.await.expect("server ready");

    tokio::task::spawn_blocking(move || {
        let mut first = CallClient::connect(addr).expect("first connection");
        let sum: i32 = first.call("math", "add", (1_i32, 1_i32)).expect("add");
        assert_eq!(sum, 2);

        // The only segment is held by the first connection; a second caller
        // connects (listener backlog) but is not served until the segment
        // frees up.
        let waiter = std::thread::spawn(move || {
            let mut second = CallClient::connect(addr).expect("second connection");
            second.call::<_, i32>("math", "add", (2_i32, 2_i32))
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        drop(first);

        let sum = waiter
            .join()
            .expect("second client thread")
            .expect("served after segment released");
        assert_eq!(sum, 4);
    })
    .await
    .expect("client thread");

    let _ = shutdown_tx.send(());
    handle
        .await
        .expect("server task")
        .expect("server ran cleanly");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_clients_are_isolated() {
    let server = TestServer::start(math_registry()).await;
    let addr = server.addr;

    let mut workers = Vec::new();
    for offset in 0_i32..8 {
        workers.push(tokio::task::spawn_blocking(move || {
            let mut client = CallClient::connect(addr).expect("connect");
            for round in 0_i32..10 {
                let sum: i32 = client
                    .call("math", "add", (offset, round))
                    .expect("add over shared server");
                assert_eq!(sum, offset + round);
            }
        }));
    }
    for worker in workers {
        worker.await.expect("client thread");
    }

    server.stop().await;
}
