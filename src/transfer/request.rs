//! Request serialization.
//!
//! [`RequestSpec`] is the caller's request template. It is serialized afresh
//! for every connection attempt by [`build`], since the target URL and proxy
//! route may change across redirect hops.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::connection::ProxyKind;
use super::constants::{DEFAULT_METHOD, HTTP_VERSION};
use crate::url::Url;

/// A username/password pair for HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Splits `user:password`; a missing `:` means an empty password.
    #[must_use]
    pub fn parse(pair: &str) -> Self {
        match pair.split_once(':') {
            Some((user, pass)) => Self::new(user, pass),
            None => Self::new(pair, ""),
        }
    }

    /// Percent-decoded credentials from a URL's `user:pass@` userinfo.
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        let user = url.username().filter(|user| !user.is_empty())?;
        Some(Self::new(
            percent_decode(user),
            percent_decode(url.password().unwrap_or_default()),
        ))
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Credentials with an empty username are never sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
    }

    /// `Basic <base64(user:password)>`.
    #[must_use]
    pub fn basic_authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value).map_or_else(|_| value.to_string(), Cow::into_owned)
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Caller-supplied request template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    /// Request method, `GET` by default.
    pub method: String,
    /// Query arguments. Each value is split on `,` and ` ` and every token is
    /// sent as its own `name=token` pair.
    pub arguments: BTreeMap<String, String>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body, sent verbatim.
    pub body: Vec<u8>,
    /// Credentials for the origin server.
    pub http_auth: Option<Credentials>,
    /// Credentials for the proxy.
    pub proxy_auth: Option<Credentials>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            arguments: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            http_auth: None,
            proxy_auth: None,
        }
    }
}

impl RequestSpec {
    pub fn set_method(&mut self, method: impl Into<String>) -> &mut Self {
        self.method = method.into();
        self
    }

    pub fn set_argument(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn set_http_auth(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.http_auth = Some(Credentials::new(username, password));
        self
    }

    pub fn set_proxy_auth(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.proxy_auth = Some(Credentials::new(username, password));
        self
    }

    fn active_http_auth(&self) -> Option<&Credentials> {
        self.http_auth.as_ref().filter(|c| !c.is_empty())
    }

    pub(crate) fn active_proxy_auth(&self) -> Option<&Credentials> {
        self.proxy_auth.as_ref().filter(|c| !c.is_empty())
    }

    /// `name=value` pairs joined with `&`, or `None` without arguments.
    #[must_use]
    pub fn query_string(&self) -> Option<String> {
        let pairs: Vec<String> = self
            .arguments
            .iter()
            .flat_map(|(name, value)| {
                value
                    .split([',', ' '])
                    .filter(|token| !token.is_empty())
                    .map(move |token| format!("{name}={token}"))
            })
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("&"))
    }
}

/// Request target: path, the URL's own query, then the template's arguments.
fn request_target(spec: &RequestSpec, url: &Url) -> String {
    let mut target = url.path().to_string();
    let mut has_query = false;
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
        has_query = true;
    }
    if let Some(arguments) = spec.query_string() {
        target.push(if has_query { '&' } else { '?' });
        target.push_str(&arguments);
    }
    target
}

/// Serializes `spec` for `url` over the given proxy route.
///
/// Requests forwarded by an HTTP proxy use the absolute form
/// (`http://host:port/path`) and carry `Proxy-Authorization`; all others use
/// the origin form.
#[must_use]
pub fn build(spec: &RequestSpec, url: &Url, proxy: ProxyKind) -> Vec<u8> {
    let forwarded = proxy == ProxyKind::HttpProxy;
    let target = request_target(spec, url);

    let mut head = String::new();
    if forwarded {
        head.push_str(&format!("{} {}{} {HTTP_VERSION}\r\n", spec.method, url.origin(), target));
    } else {
        head.push_str(&format!("{} {target} {HTTP_VERSION}\r\n", spec.method));
    }

    let custom_host = spec
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.clone());
    let host = custom_host.unwrap_or_else(|| {
        if forwarded {
            url.authority()
        } else {
            url.host_header()
        }
    });
    head.push_str(&format!("Host: {host}\r\n"));
    head.push_str(&format!("Content-Length: {}\r\n", spec.body.len()));

    for (name, value) in &spec.headers {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some(credentials) = spec.active_http_auth() {
        head.push_str(&format!("Authorization: {}\r\n", credentials.basic_authorization()));
    }
    if forwarded && let Some(credentials) = spec.active_proxy_auth() {
        head.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            credentials.basic_authorization()
        ));
    }
    head.push_str("\r\n");

    let mut request = head.into_bytes();
    request.extend_from_slice(&spec.body);
    request
}

/// Serializes the CONNECT request that opens a tunnel to `target`.
#[must_use]
pub fn build_connect(target: &Url, proxy_auth: Option<&Credentials>) -> Vec<u8> {
    let mut request = format!("CONNECT {} {HTTP_VERSION}\r\n", target.authority());
    if let Some(credentials) = proxy_auth.filter(|c| !c.is_empty()) {
        request.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            credentials.basic_authorization()
        ));
    }
    request.push_str("\r\n");
    request.into_bytes()
}
