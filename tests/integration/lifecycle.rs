//! Dual-listener startup and signal-driven graceful drain.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use chassis::server::{Server, ServerConfig};
use futures::future::{ready, Ready};
use tonic::body::BoxBody;
use tonic::server::NamedService;

/// Minimal RPC service: answers every method with UNIMPLEMENTED, which is
/// all the lifecycle tests need from the second listener.
#[derive(Clone)]
struct EchoService;

impl NamedService for EchoService {
    const NAME: &'static str = "test.Echo";
}

impl tower::Service<http::Request<BoxBody>> for EchoService {
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: http::Request<BoxBody>) -> Self::Future {
        let response = http::Response::builder()
            .status(200)
            .header("content-type", "application/grpc")
            .header("grpc-status", "12")
            .body(tonic::body::empty_body())
            .expect("static response");
        ready(Ok(response))
    }
}

fn free_addr() -> SocketAddr {
    crate::support::init_tracing();
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

fn dual_config() -> ServerConfig {
    ServerConfig {
        http_addr: Some(free_addr()),
        rpc_addr: Some(free_addr()),
        shutdown_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn refuses_to_start_with_no_listeners() {
    let server = Server::new(ServerConfig::default(), None, None);
    assert!(server.start(std::future::pending()).await.is_err());
}

#[tokio::test]
async fn graceful_shutdown_drains_in_flight_requests() {
    let config = dual_config();
    let http_addr = config.http_addr.unwrap();

    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "done"
        }),
    );
    let rpc = Server::rpc_builder(&config).unwrap().add_service(EchoService);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = Server::new(config, Some(app), Some(rpc));
    let running = tokio::spawn(server.start(async move {
        let _ = stop_rx.await;
    }));

    // Let the listeners come up, then park a request in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let url = format!("http://{http_addr}/slow");
    let in_flight = tokio::spawn(reqwest::get(url.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutdown_started = Instant::now();
    stop_tx.send(()).unwrap();

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");

    running.await.unwrap().unwrap();
    assert!(
        shutdown_started.elapsed() < Duration::from_secs(5),
        "drain must finish inside the window"
    );

    // The listener is gone; new connections are refused.
    assert!(reqwest::get(url).await.is_err());
}

#[tokio::test]
async fn http_only_configuration_serves_and_stops() {
    let config = ServerConfig {
        http_addr: Some(free_addr()),
        rpc_addr: None,
        shutdown_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    };
    let http_addr = config.http_addr.unwrap();
    let app = Router::new().route("/ping", get(|| async { "pong" }));

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(Server::new(config, Some(app), None).start(async move {
        let _ = stop_rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let body = reqwest::get(format!("http://{http_addr}/ping"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "pong");

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn rpc_listener_answers_while_running() {
    let config = dual_config();
    let rpc_addr = config.rpc_addr.unwrap();
    let rpc = Server::rpc_builder(&config).unwrap().add_service(EchoService);
    let app = Router::new().route("/ping", get(|| async { "pong" }));

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(Server::new(config, Some(app), Some(rpc)).start(async move {
        let _ = stop_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A raw TCP connect is enough to show the listener is accepting.
    let connected = tokio::net::TcpStream::connect(rpc_addr).await;
    assert!(connected.is_ok());

    stop_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
}
