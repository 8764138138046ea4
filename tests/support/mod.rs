//! Shared helpers for integration tests: scripted raw-TCP servers.
//!
//! wiremock answers like a well-behaved HTTP server; these helpers send exact
//! bytes instead (no `Content-Length`, proxy replies, truncated bodies).

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Reads from `stream` until the end of a request head (`\r\n\r\n`) or EOF.
pub fn read_request_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    head
}

/// Reads whatever the peer sends until it closes (bounded by a timeout).
pub fn read_rest(stream: &mut TcpStream) -> Vec<u8> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut rest = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => rest.extend_from_slice(&buf[..n]),
        }
    }
    rest
}

/// A server that answers one scripted response per connection, then closes
/// the connection.
pub struct ScriptedServer {
    pub port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedServer {
    /// Serves `responses` to consecutive connections.
    pub fn start(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind scripted server");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                let head = read_request_head(&mut stream);
                requests.push(String::from_utf8_lossy(&head).into_owned());
                let _ = stream.write_all(&response);
                let _ = stream.flush();
            }
            requests
        });
        Self { port, handle }
    }

    /// `http://127.0.0.1:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Request heads received, in order.
    pub fn requests(self) -> Vec<String> {
        self.handle.join().expect("scripted server thread")
    }
}

/// What a scripted proxy saw on its single connection.
#[derive(Debug)]
pub struct ProxyCapture {
    /// The CONNECT (or forwarded) request head.
    pub head: String,
    /// Bytes the client sent after the proxy's reply.
    pub after_reply: Vec<u8>,
}

/// A proxy that accepts one connection, records the request head, answers
/// with `reply`, then records whatever the client sends next.
pub fn scripted_proxy(reply: &'static [u8]) -> (u16, JoinHandle<ProxyCapture>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind proxy");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept proxy client");
        let head = read_request_head(&mut stream);
        stream.write_all(reply).expect("proxy reply");
        let mut first = [0u8; 1];
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let after_reply = match stream.read(&mut first) {
            Ok(1) => first.to_vec(),
            _ => Vec::new(),
        };
        ProxyCapture {
            head: String::from_utf8_lossy(&head).into_owned(),
            after_reply,
        }
    });
    (port, handle)
}
