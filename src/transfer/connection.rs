//! Connection manager: name resolution, TCP connect, CONNECT tunneling and
//! the TLS handshake.
//!
//! A [`Connection`] lives for exactly one redirect hop and is never reused.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, StreamOwned};
use tracing::{debug, info, instrument, trace, warn};

use super::cancel::CancellationToken;
use super::constants::MAX_TUNNEL_RESPONSE_BYTES;
use super::request::{Credentials, build_connect};
use super::{TransferError, tls};
use crate::config::EngineConfig;
use crate::url::{Scheme, Url};

/// How bytes travel once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Tls,
}

/// How the proxy (if any) is used for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// Direct connection to the origin.
    None,
    /// Plain HTTP request forwarded by the proxy (absolute-form target).
    HttpProxy,
    /// CONNECT tunnel through the proxy, TLS on top.
    HttpsProxy,
}

/// The connect plan for one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub transport: TransportKind,
    pub proxy: ProxyKind,
    /// Where the TCP connection goes: the origin or the proxy.
    pub peer: Url,
}

impl Route {
    /// Chooses transport and proxy for `url` from the configured proxies.
    #[must_use]
    pub fn select(url: &Url, config: &EngineConfig) -> Self {
        let transport = match url.scheme() {
            Scheme::Http => TransportKind::Plain,
            Scheme::Https => TransportKind::Tls,
        };
        match (url.scheme(), config.proxy.for_scheme(url.scheme())) {
            (Scheme::Http, Some(proxy)) => Self {
                transport,
                proxy: ProxyKind::HttpProxy,
                peer: proxy.clone(),
            },
            (Scheme::Https, Some(proxy)) => Self {
                transport,
                proxy: ProxyKind::HttpsProxy,
                peer: proxy.clone(),
            },
            _ => Self {
                transport,
                proxy: ProxyKind::None,
                peer: url.clone(),
            },
        }
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

/// An open transport to the origin, possibly tunneled and encrypted.
pub struct Connection {
    transport: Transport,
    kind: TransportKind,
    proxy: ProxyKind,
    peer: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("proxy", &self.proxy)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Connection {
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    #[must_use]
    pub fn proxy_kind(&self) -> ProxyKind {
        self.proxy
    }

    /// `host:port` of the socket peer (origin or proxy).
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn socket(&self) -> &TcpStream {
        match &self.transport {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => &stream.sock,
        }
    }

    /// Closes both directions; errors are ignored since the hop is over.
    pub fn shutdown(&mut self) {
        if let Transport::Tls(stream) = &mut self.transport {
            stream.conn.send_close_notify();
            let _ = stream.conn.complete_io(&mut stream.sock);
        }
        let _ = self.socket().shutdown(Shutdown::Both);
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

/// Opens a connection for `url`.
///
/// Resolves the effective peer (origin or proxy), tries each address in
/// order, opens a CONNECT tunnel for HTTPS through a proxy, and finally runs
/// the TLS handshake for HTTPS targets.
///
/// # Errors
///
/// - [`TransferError::Connection`] when resolution fails or every address fails
/// - [`TransferError::ProxyTunnel`] when the proxy does not answer CONNECT with 200
/// - [`TransferError::TlsHandshake`] / [`TransferError::TlsConfig`] for TLS failures
/// - [`TransferError::Cancelled`] when the token fires between steps
#[instrument(skip(config, proxy_auth, token), fields(url = %url))]
pub fn connect(
    url: &Url,
    config: &EngineConfig,
    proxy_auth: Option<&Credentials>,
    token: &CancellationToken,
) -> Result<Connection, TransferError> {
    let route = Route::select(url, config);
    debug!(transport = ?route.transport, proxy = ?route.proxy, peer = %route.peer.authority(), "route selected");

    token.check()?;
    let stream = open_tcp(&route.peer, config.connect_timeout, token)?;
    token.register(&stream);
    apply_timeouts(&stream, config.read_timeout);

    if route.proxy == ProxyKind::HttpsProxy {
        token.check()?;
        open_tunnel(&stream, url, &route.peer, proxy_auth, token)?;
    }

    let transport = match route.transport {
        TransportKind::Plain => Transport::Plain(stream),
        TransportKind::Tls => {
            token.check()?;
            let tls_config = tls::client_config(&config.tls)?;
            Transport::Tls(Box::new(handshake(stream, url.host(), tls_config, token)?))
        }
    };

    info!(peer = %route.peer.authority(), "connected");
    Ok(Connection {
        transport,
        kind: route.transport,
        proxy: route.proxy,
        peer: route.peer.authority(),
    })
}

fn open_tcp(
    peer: &Url,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<TcpStream, TransferError> {
    let target = peer.authority();
    let addrs: Vec<SocketAddr> = (peer.host(), peer.port())
        .to_socket_addrs()
        .map_err(|e| TransferError::connection(&target, e))?
        .collect();
    if addrs.is_empty() {
        return Err(TransferError::connection(
            &target,
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses"),
        ));
    }

    let timeout = timeout.filter(|t| !t.is_zero());
    let mut last_error = None;
    for addr in addrs {
        token.check()?;
        trace!(%addr, "connecting");
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                debug!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(error) => {
                debug!(%addr, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }
    let error = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address attempted"));
    Err(TransferError::connection(target, error))
}

fn apply_timeouts(stream: &TcpStream, read_timeout: Option<Duration>) {
    let read_timeout = read_timeout.filter(|t| !t.is_zero());
    if let Err(error) = stream
        .set_read_timeout(read_timeout)
        .and_then(|()| stream.set_write_timeout(read_timeout))
    {
        warn!(%error, "could not set socket timeouts");
    }
    let _ = stream.set_nodelay(true);
}

/// Sends CONNECT over the plain socket and requires a `200` reply.
///
/// The reply is read byte by byte up to the blank line so no byte that
/// belongs to the TLS stream is consumed.
fn open_tunnel(
    mut stream: &TcpStream,
    target: &Url,
    proxy: &Url,
    proxy_auth: Option<&Credentials>,
    token: &CancellationToken,
) -> Result<(), TransferError> {
    let proxy_name = proxy.authority();
    debug!(proxy = %proxy_name, target = %target.authority(), "opening CONNECT tunnel");
    stream
        .write_all(&build_connect(target, proxy_auth))
        .and_then(|()| stream.flush())
        .map_err(|e| cancelled_or(token, TransferError::connection(&proxy_name, e)))?;

    let reply = read_tunnel_reply(&mut stream)
        .map_err(|e| cancelled_or(token, TransferError::connection(&proxy_name, e)))?;
    let status_line = reply.lines().next().unwrap_or_default().trim().to_string();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("200") {
        warn!(proxy = %proxy_name, status_line = %status_line, "proxy refused tunnel");
        return Err(TransferError::ProxyTunnel {
            proxy: proxy_name,
            status_line,
        });
    }
    debug!(proxy = %proxy_name, "tunnel established");
    Ok(())
}

fn read_tunnel_reply(stream: &mut impl Read) -> io::Result<String> {
    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    while !reply.ends_with(b"\r\n\r\n") && !reply.ends_with(b"\n\n") {
        if reply.len() >= MAX_TUNNEL_RESPONSE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy reply header too large",
            ));
        }
        match stream.read(&mut byte) {
            Ok(0) if reply.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection",
                ));
            }
            Ok(0) => break,
            Ok(_) => reply.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

fn handshake(
    mut stream: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
    token: &CancellationToken,
) -> Result<StreamOwned<ClientConnection, TcpStream>, TransferError> {
    let name = tls::server_name(host)?;
    let mut conn = ClientConnection::new(config, name).map_err(TransferError::TlsConfig)?;
    debug!(host, "starting TLS handshake");
    while conn.is_handshaking() {
        conn.complete_io(&mut stream)
            .map_err(|e| cancelled_or(token, TransferError::tls_handshake(host, e)))?;
    }
    debug!(
        host,
        version = ?conn.protocol_version(),
        suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
        "TLS handshake complete"
    );
    Ok(StreamOwned::new(conn, stream))
}

/// Socket failures caused by cancellation are reported as such.
pub(crate) fn cancelled_or(token: &CancellationToken, error: TransferError) -> TransferError {
    if token.is_cancelled() {
        TransferError::Cancelled
    } else {
        error
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::config::ProxySettings;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn config_with_proxies(http: Option<&str>, https: Option<&str>) -> EngineConfig {
        EngineConfig::default().with_proxy(ProxySettings {
            http: http.map(url),
            https: https.map(url),
        })
    }

    #[test]
    fn test_route_direct_without_proxy() {
        let route = Route::select(&url("https://target/path"), &EngineConfig::default());
        assert_eq!(route.transport, TransportKind::Tls);
        assert_eq!(route.proxy, ProxyKind::None);
        assert_eq!(route.peer.authority(), "target:443");
    }

    #[test]
    fn test_route_uses_proxy_matching_scheme() {
        let config = config_with_proxies(Some("http://p1:3128"), Some("http://proxy:8080"));

        let https = Route::select(&url("https://target/path"), &config);
        assert_eq!(https.proxy, ProxyKind::HttpsProxy);
        assert_eq!(https.peer.authority(), "proxy:8080");

        let http = Route::select(&url("http://target/path"), &config);
        assert_eq!(http.proxy, ProxyKind::HttpProxy);
        assert_eq!(http.transport, TransportKind::Plain);
        assert_eq!(http.peer.authority(), "p1:3128");
    }

    #[test]
    fn test_route_ignores_proxy_for_other_scheme() {
        let config = config_with_proxies(None, Some("http://proxy:8080"));
        let route = Route::select(&url("http://target/"), &config);
        assert_eq!(route.proxy, ProxyKind::None);
    }

    #[test]
    fn test_read_tunnel_reply_stops_at_blank_line() {
        let mut input: &[u8] = b"HTTP/1.0 200 Connection established\r\n\r\n\x16\x03";
        let reply = read_tunnel_reply(&mut input).unwrap();
        assert_eq!(reply, "HTTP/1.0 200 Connection established\r\n\r\n");
        assert_eq!(input, b"\x16\x03");
    }

    #[test]
    fn test_read_tunnel_reply_rejects_oversized_header() {
        let big = vec![b'a'; MAX_TUNNEL_RESPONSE_BYTES + 10];
        let mut input: &[u8] = &big;
        assert!(read_tunnel_reply(&mut input).is_err());
    }

    #[test]
    fn test_connect_refused_reports_target() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = url(&format!("http://127.0.0.1:{port}/"));
        let error = connect(&target, &EngineConfig::default(), None, &CancellationToken::new())
            .unwrap_err();
        match error {
            TransferError::Connection { target, .. } => {
                assert_eq!(target, format!("127.0.0.1:{port}"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_connect_plain_registers_with_token() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || listener.accept().map(|_| ()));

        let target = url(&format!("http://127.0.0.1:{port}/"));
        let token = CancellationToken::new();
        let mut conn = connect(&target, &EngineConfig::default(), None, &token).unwrap();
        assert_eq!(conn.transport_kind(), TransportKind::Plain);
        assert_eq!(conn.proxy_kind(), ProxyKind::None);
        assert_eq!(conn.peer(), format!("127.0.0.1:{port}"));
        server.join().unwrap().unwrap();

        token.cancel();
        let mut buf = [0u8; 8];
        assert!(matches!(conn.read(&mut buf), Ok(0) | Err(_)));
    }

    #[test]
    fn test_connect_after_cancel_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();
        let error = connect(&url("http://127.0.0.1:9/"), &EngineConfig::default(), None, &token)
            .unwrap_err();
        assert!(matches!(error, TransferError::Cancelled));
    }
}
