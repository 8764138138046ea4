//! Absolute URL handling for request targets and proxy configuration.
//!
//! Parsing and relative resolution are done by the `url` crate; this module
//! narrows the result to what the engine can dial (`http`/`https` with a
//! host) and exposes the pieces the request builder needs. Fragments are
//! never sent on the wire.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing or resolving a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// The URL was rejected before or after parsing.
    #[error("malformed URL '{url}': {reason}")]
    Malformed {
        /// The URL as given.
        url: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The `url` crate could not parse the input.
    #[error("malformed URL '{url}': {source}")]
    Invalid {
        /// The URL as given.
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl UrlError {
    fn malformed(url: &str, reason: &'static str) -> Self {
        Self::Malformed {
            url: url.to_string(),
            reason,
        }
    }

    fn invalid(url: &str, source: url::ParseError) -> Self {
        Self::Invalid {
            url: url.to_string(),
            source,
        }
    }
}

/// URL schemes understood by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain `http://`.
    Http,
    /// TLS `https://`.
    Https,
}

impl Scheme {
    /// Port used when the URL does not name one.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Lowercase scheme name without the `://` separator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed absolute `http`/`https` URL.
///
/// Rebuilt from the sink's current URL at the start of every connection
/// attempt, so redirects always see a fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    inner: url::Url,
    scheme: Scheme,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl Url {
    /// Parses an absolute URL.
    ///
    /// A missing scheme defaults to `http`, a missing port to the scheme's
    /// default, and an empty path to `/`.
    ///
    /// # Errors
    ///
    /// Returns [`UrlError::Malformed`] when the input is empty, names no host
    /// or uses a scheme other than `http`/`https`, and [`UrlError::Invalid`]
    /// when the `url` crate rejects it (bad port, invalid host characters).
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(UrlError::malformed(input, "empty URL"));
        }

        let candidate: Cow<'_, str> = match explicit_scheme_end(raw) {
            Some(sep) => {
                let authority = &raw[sep + 3..];
                let end = authority.find(['/', '?', '#']).unwrap_or(authority.len());
                // `http:///x` would otherwise borrow the first path segment as host
                if authority[..end].is_empty() {
                    return Err(UrlError::malformed(input, "missing host"));
                }
                Cow::Borrowed(raw)
            }
            None => Cow::Owned(format!("http://{raw}")),
        };

        let parsed = url::Url::parse(&candidate).map_err(|e| UrlError::invalid(input, e))?;
        Self::from_parsed(parsed, input)
    }

    fn from_parsed(inner: url::Url, input: &str) -> Result<Self, UrlError> {
        let scheme = match inner.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(UrlError::malformed(input, "unsupported scheme")),
        };
        let host = match inner.host() {
            Some(url::Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(url::Host::Ipv4(addr)) => addr.to_string(),
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(UrlError::malformed(input, "missing host")),
        };
        let port = inner.port().unwrap_or_else(|| scheme.default_port());
        let username = Some(inner.username())
            .filter(|user| !user.is_empty())
            .map(str::to_string);
        let password = inner.password().map(str::to_string);

        Ok(Self {
            inner,
            scheme,
            host,
            port,
            username,
            password,
        })
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or address, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path component, always starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// Raw query string after the first `?`, if present.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    /// User name from the userinfo component as written, if present.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password from the userinfo component as written, if present.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Host as it appears in a `Host` header (IPv6 literals bracketed).
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `host:port`, as used by CONNECT and absolute-form request targets.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host_header(), self.port)
    }

    /// `scheme://host:port` with no path.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    /// Resolves a redirect `Location` against this URL as a relative
    /// reference (RFC 3986 section 5).
    ///
    /// # Errors
    ///
    /// Returns a [`UrlError`] if the reference cannot be resolved or the
    /// result is not a dialable `http`/`https` URL.
    pub fn join(&self, location: &str) -> Result<Self, UrlError> {
        let location = location.trim();
        let joined = self
            .inner
            .join(location)
            .map_err(|e| UrlError::invalid(location, e))?;
        Self::from_parsed(joined, location)
    }
}

impl FromStr for Url {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders without userinfo or fragment, so redirected URLs stored in a sink
/// never carry credentials.
impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host_header())?;
        if self.port != self.scheme.default_port() {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(self.path())?;
        if let Some(query) = self.query() {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

/// Byte offset of `://` when `raw` starts with an explicit scheme.
fn explicit_scheme_end(raw: &str) -> Option<usize> {
    let sep = raw.find("://")?;
    // `://` inside a path or query is not a scheme separator
    (!raw[..sep].contains(['/', '?', '#'])).then_some(sep)
}
