//! Integration tests for the transfer engine against a mock HTTP origin.

use anetd_core::{Engine, EngineConfig, ResponseSink, TransferError};
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Engine bound to the test runtime, ignoring any proxy in the environment.
fn engine() -> Engine {
    Engine::with_config(Handle::current(), EngineConfig::default())
}

async fn setup_mock_body(path_str: &str, status: u16, body: &[u8]) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_get_fills_sink_with_status_and_body() {
    let mock_server = setup_mock_body("/hello", 200, b"Hello, World!").await;
    let sink = ResponseSink::in_memory(format!("{}/hello", mock_server.uri()));

    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    let sink = completion.sink();
    assert_eq!(sink.status(), 200);
    assert_eq!(sink.description(), "OK");
    assert_eq!(sink.body(), b"Hello, World!");
    assert_eq!(sink.body_size(), Some(13));
    assert_eq!(sink.progress(), 13);
    assert!(sink.is_completed());
    assert_eq!(completion.redirects(), 0);
}

#[tokio::test]
async fn test_callback_receives_completion_on_runtime() {
    let mock_server = setup_mock_body("/cb", 200, b"data").await;
    let (tx, rx) = oneshot::channel();
    let mut engine = engine();
    engine.set_callback(move |completion| {
        let _ = tx.send((completion.sink().status(), completion.is_success()));
    });

    let handle = engine
        .start(ResponseSink::in_memory(format!("{}/cb", mock_server.uri())))
        .unwrap();
    let completion = handle.await;
    let (status, success) = rx.await.unwrap();

    assert!(completion.is_success());
    assert_eq!(status, 200);
    assert!(success);
}

#[tokio::test]
async fn test_404_is_client_error_and_sink_keeps_status() {
    let mock_server = setup_mock_body("/missing", 404, b"nope").await;
    let sink = ResponseSink::in_memory(format!("{}/missing", mock_server.uri()));

    let completion = engine().start(sink).unwrap().await;

    match completion.error() {
        Some(TransferError::ClientError { status, .. }) => assert_eq!(*status, 404),
        other => panic!("expected ClientError, got {other:?}"),
    }
    assert!(completion.error().unwrap().is_protocol());
    assert_eq!(completion.sink().status(), 404);
    assert_eq!(completion.sink().description(), "Not Found");
    assert!(completion.sink().body().is_empty(), "error body must not be read");
    assert!(completion.sink().is_completed());
}

#[tokio::test]
async fn test_503_is_server_error() {
    let mock_server = setup_mock_body("/busy", 503, b"").await;
    let sink = ResponseSink::in_memory(format!("{}/busy", mock_server.uri()));

    let completion = engine().start(sink).unwrap().await;

    assert!(matches!(
        completion.error(),
        Some(TransferError::ServerError { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_301_follows_location_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", format!("{}/new", mock_server.uri()).as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved here".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = ResponseSink::in_memory(format!("{}/old", mock_server.uri()));
    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.redirects(), 1);
    assert_eq!(completion.sink().body(), b"moved here");
    assert_eq!(completion.sink().url(), format!("{}/new", mock_server.uri()));
}

#[tokio::test]
async fn test_relative_location_is_resolved() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"b".to_vec()))
        .mount(&mock_server)
        .await;

    let sink = ResponseSink::in_memory(format!("{}/a", mock_server.uri()));
    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), b"b");
}

#[tokio::test]
async fn test_six_redirects_exceed_limit_without_reading_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/loop")
                .set_body_bytes(b"redirect body".to_vec()),
        )
        .expect(6)
        .mount(&mock_server)
        .await;

    let sink = ResponseSink::in_memory(format!("{}/loop", mock_server.uri()));
    let completion = engine().start(sink).unwrap().await;

    assert!(matches!(
        completion.error(),
        Some(TransferError::RedirectLimitExceeded { limit: 5 })
    ));
    assert_eq!(completion.redirects(), 5);
    assert_eq!(completion.sink().progress(), 0);
    assert_eq!(completion.sink().status(), 302);
}

#[tokio::test]
async fn test_redirect_limit_is_configurable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/loop"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let engine = Engine::with_config(
        Handle::current(),
        EngineConfig::default().with_max_redirects(1),
    );
    let sink = ResponseSink::in_memory(format!("{}/loop", mock_server.uri()));
    let completion = engine.start(sink).unwrap().await;

    assert!(matches!(
        completion.error(),
        Some(TransferError::RedirectLimitExceeded { limit: 1 })
    ));
}

#[tokio::test]
async fn test_redirect_without_location_fails() {
    let mock_server = setup_mock_body("/nowhere", 302, b"").await;
    let sink = ResponseSink::in_memory(format!("{}/nowhere", mock_server.uri()));

    let completion = engine().start(sink).unwrap().await;

    assert!(matches!(
        completion.error(),
        Some(TransferError::MissingRedirectLocation { status: 302 })
    ));
}

#[tokio::test]
async fn test_basic_auth_header_is_sent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut engine = engine();
    engine.set_http_auth("u", "p");
    let sink = ResponseSink::in_memory(format!("{}/private", mock_server.uri()));
    let completion = engine.start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), b"secret");
}

#[tokio::test]
async fn test_query_arguments_and_custom_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("a", "1"))
        .and(query_param("a", "2"))
        .and(query_param("lang", "en"))
        .and(header("x-client", "anetd-tests"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"found".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut engine = engine();
    engine
        .set_argument("a", "1, 2")
        .set_argument("lang", "en")
        .set_header("X-Client", "anetd-tests");
    let sink = ResponseSink::in_memory(format!("{}/search", mock_server.uri()));
    let completion = engine.start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
}

#[tokio::test]
async fn test_post_sends_body_with_length() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(header("content-length", "11"))
        .and(body_bytes(b"hello=world".to_vec()))
        .respond_with(ResponseTemplate::new(201).set_body_bytes(b"created".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut engine = engine();
    engine.set_method("POST").set_body("hello=world");
    let sink = ResponseSink::in_memory(format!("{}/submit", mock_server.uri()));
    let completion = engine.start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().status(), 201);
}

#[tokio::test]
async fn test_file_sink_streams_body_to_disk() {
    let content = b"This is the complete file content for testing.\nLine 2.\nLine 3.";
    let mock_server = setup_mock_body("/docs/report.txt", 200, content).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let sink = ResponseSink::to_file(
        format!("{}/docs/report.txt", mock_server.uri()),
        temp_dir.path(),
    );
    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    let file_path = completion.sink().file_path().expect("file written");
    assert_eq!(file_path, temp_dir.path().join("report.txt"));
    assert_eq!(std::fs::read(&file_path).unwrap(), content);
    assert_eq!(completion.sink().progress(), content.len() as u64);
}

#[tokio::test]
async fn test_file_sink_does_not_overwrite_existing_file() {
    let mock_server = setup_mock_body("/data.bin", 200, b"fresh").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(temp_dir.path().join("data.bin"), b"existing").unwrap();

    let sink = ResponseSink::to_file(format!("{}/data.bin", mock_server.uri()), temp_dir.path());
    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(
        std::fs::read(temp_dir.path().join("data.bin")).unwrap(),
        b"existing"
    );
    assert_eq!(
        std::fs::read(temp_dir.path().join("data.bin.1")).unwrap(),
        b"fresh"
    );
}

#[tokio::test]
async fn test_file_sink_takes_name_from_redirect_target() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/files/paper.pdf"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let sink = ResponseSink::to_file(format!("{}/download", mock_server.uri()), temp_dir.path());
    let completion = engine().start(sink).unwrap().await;

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(
        std::fs::read(temp_dir.path().join("paper.pdf")).unwrap(),
        b"%PDF"
    );
    assert!(!temp_dir.path().join("download").exists());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sink = ResponseSink::in_memory(format!("http://127.0.0.1:{port}/"));
    let completion = engine().start(sink).unwrap().await;

    let error = completion.error().expect("connection must fail");
    assert!(matches!(error, TransferError::Connection { .. }));
    assert!(error.is_transport());
    assert!(completion.sink().is_completed());
}

#[test]
fn test_wait_blocks_without_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mock_server = runtime.block_on(setup_mock_body("/sync", 200, b"sync body"));

    let engine = Engine::with_config(runtime.handle().clone(), EngineConfig::default());
    let handle = engine
        .start(ResponseSink::in_memory(format!("{}/sync", mock_server.uri())))
        .unwrap();
    let completion = handle.wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), b"sync body");
}
