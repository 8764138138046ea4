//! Byte-exact protocol tests against scripted TCP servers and proxies.

mod support;

use anetd_core::transfer::Inline;
use anetd_core::{Engine, EngineConfig, ProxySettings, ResponseSink, TransferError, Url};
use support::{ScriptedServer, scripted_proxy};

fn engine_with(config: EngineConfig) -> Engine {
    Engine::with_config(Inline, config)
}

fn proxies(http: Option<u16>, https: Option<u16>) -> ProxySettings {
    let to_url = |port: u16| Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
    ProxySettings {
        http: http.map(to_url),
        https: https.map(to_url),
    }
}

#[test]
fn test_hello_world_scenario() {
    let server = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 13\r\n\r\nHello, World!".to_vec(),
    ]);
    let sink = ResponseSink::in_memory(server.url("/"));

    let completion = engine_with(EngineConfig::default())
        .start(sink)
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    let sink = completion.sink();
    assert_eq!(sink.status(), 200);
    assert_eq!(sink.description(), "OK");
    assert_eq!(sink.body(), b"Hello, World!");
    assert_eq!(sink.body().len(), 13);

    let requests = server.requests();
    assert_eq!(
        requests[0],
        "GET / HTTP/1.0\r\nHost: 127.0.0.1\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn test_body_without_content_length_ends_at_close() {
    let body = vec![b'x'; 10_000];
    let mut response = b"HTTP/1.0 200 OK\r\nServer: scripted\r\n\r\n".to_vec();
    response.extend_from_slice(&body);
    let server = ScriptedServer::start(vec![response]);

    let completion = engine_with(EngineConfig::default())
        .start(ResponseSink::in_memory(server.url("/stream")))
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), body);
    assert_eq!(completion.sink().progress(), 10_000);
    assert_eq!(completion.sink().body_size(), Some(10_000));
}

#[test]
fn test_truncated_sized_body_is_incomplete() {
    let server = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 100\r\n\r\nonly this".to_vec(),
    ]);

    let completion = engine_with(EngineConfig::default())
        .start(ResponseSink::in_memory(server.url("/short")))
        .unwrap()
        .wait();

    assert!(matches!(
        completion.error(),
        Some(TransferError::IncompleteBody {
            expected: 100,
            received: 9
        })
    ));
    assert_eq!(completion.sink().status(), 200);
}

#[test]
fn test_close_during_headers_is_incomplete_response() {
    let server = ScriptedServer::start(vec![b"HTTP/1.0 200 OK\r\nContent-Ty".to_vec()]);

    let completion = engine_with(EngineConfig::default())
        .start(ResponseSink::in_memory(server.url("/")))
        .unwrap()
        .wait();

    assert!(matches!(
        completion.error(),
        Some(TransferError::IncompleteResponse)
    ));
}

#[test]
fn test_tiny_read_buffer_still_parses() {
    let server = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 13\r\n\r\nHello, World!".to_vec(),
    ]);
    let config = EngineConfig::default().with_read_buffer_size(1);

    let completion = engine_with(config)
        .start(ResponseSink::in_memory(server.url("/")))
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), b"Hello, World!");
}

#[test]
fn test_redirect_opens_fresh_connection_per_hop() {
    let target = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nnew".to_vec(),
    ]);
    let location = target.url("/new");
    let origin = ScriptedServer::start(vec![
        format!("HTTP/1.0 301 Moved Permanently\r\nLocation: {location}\r\n\r\nignored body")
            .into_bytes(),
    ]);

    let completion = engine_with(EngineConfig::default())
        .start(ResponseSink::in_memory(origin.url("/old")))
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.redirects(), 1);
    assert_eq!(completion.sink().body(), b"new");
    assert_eq!(origin.requests().len(), 1);
    let target_requests = target.requests();
    assert!(target_requests[0].starts_with("GET /new HTTP/1.0\r\n"));
}

#[test]
fn test_https_proxy_refusal_skips_tls_handshake() {
    let (port, proxy) = scripted_proxy(b"HTTP/1.0 403 Forbidden\r\n\r\n");
    let config = EngineConfig::default().with_proxy(proxies(None, Some(port)));

    let completion = engine_with(config)
        .start(ResponseSink::in_memory("https://target.test/path"))
        .unwrap()
        .wait();

    match completion.error() {
        Some(TransferError::ProxyTunnel { proxy, status_line }) => {
            assert_eq!(proxy, &format!("127.0.0.1:{port}"));
            assert_eq!(status_line, "HTTP/1.0 403 Forbidden");
        }
        other => panic!("expected ProxyTunnel, got {other:?}"),
    }
    let capture = proxy.join().unwrap();
    assert_eq!(capture.head, "CONNECT target.test:443 HTTP/1.0\r\n\r\n");
    assert!(capture.after_reply.is_empty(), "no TLS bytes after refusal");
}

#[test]
fn test_https_proxy_tunnel_then_tls_client_hello() {
    let (port, proxy) = scripted_proxy(b"HTTP/1.0 200 Connection established\r\n\r\n");
    let config = EngineConfig::default().with_proxy(proxies(None, Some(port)));
    let mut engine = engine_with(config);
    engine.set_proxy_auth("proxyuser", "pw");

    let completion = engine
        .start(ResponseSink::in_memory("https://target.test/path"))
        .unwrap()
        .wait();

    let capture = proxy.join().unwrap();
    assert_eq!(
        capture.head,
        "CONNECT target.test:443 HTTP/1.0\r\nProxy-Authorization: Basic cHJveHl1c2VyOnB3\r\n\r\n"
    );
    // 0x16 is the TLS handshake record type: the ClientHello follows the 200.
    assert_eq!(capture.after_reply, vec![0x16]);
    // The scripted proxy hangs up instead of relaying, so the handshake fails.
    assert!(matches!(
        completion.error(),
        Some(TransferError::TlsHandshake { .. })
    ));
}

#[test]
fn test_http_proxy_forwards_absolute_form() {
    let proxy = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 7\r\n\r\nproxied".to_vec(),
    ]);
    let config = EngineConfig::default().with_proxy(proxies(Some(proxy.port), None));
    let mut engine = engine_with(config);
    engine.set_proxy_auth("u", "p");

    let completion = engine
        .start(ResponseSink::in_memory("http://origin.test/page?x=1"))
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert_eq!(completion.sink().body(), b"proxied");
    let requests = proxy.requests();
    assert_eq!(
        requests[0],
        "GET http://origin.test:80/page?x=1 HTTP/1.0\r\nHost: origin.test:80\r\nContent-Length: 0\r\nProxy-Authorization: Basic dTpw\r\n\r\n"
    );
}

#[test]
fn test_proxy_url_credentials_are_used() {
    let proxy = ScriptedServer::start(vec![
        b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
    ]);
    let settings = ProxySettings {
        http: Some(Url::parse(&format!("http://u:p@127.0.0.1:{}", proxy.port)).unwrap()),
        https: None,
    };
    let completion = engine_with(EngineConfig::default().with_proxy(settings))
        .start(ResponseSink::in_memory("http://origin.test/"))
        .unwrap()
        .wait();

    assert!(completion.is_success(), "{:?}", completion.error());
    assert!(proxy.requests()[0].contains("Proxy-Authorization: Basic dTpw\r\n"));
}
