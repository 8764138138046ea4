//! Engine configuration: timeouts, redirect limit, proxy and TLS settings.
//!
//! [`EngineConfig::default`] never consults the environment. Use
//! [`EngineConfig::from_env`] to pick up `http_proxy` / `https_proxy`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use crate::transfer::constants::{
    CONNECT_TIMEOUT_SECS, MAX_REDIRECTS, READ_BUFFER_SIZE, READ_TIMEOUT_SECS,
};
use crate::url::{Scheme, Url};

/// Callback invoked with each certificate of the server chain during
/// verification: `(depth, certificate)`, depth 0 being the end entity.
pub type CertificateInspector = Arc<dyn Fn(usize, &CertificateDer<'_>) + Send + Sync>;

/// Tunable parameters for one [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-address TCP connect timeout. `None` blocks indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Socket read timeout. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// Maximum number of redirect hops before aborting.
    pub max_redirects: u32,
    /// Size of the reusable socket read buffer.
    pub read_buffer_size: usize,
    /// Proxy servers by target scheme.
    pub proxy: ProxySettings,
    /// Certificate trust configuration.
    pub tls: TlsSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(CONNECT_TIMEOUT_SECS)),
            read_timeout: Some(Duration::from_secs(READ_TIMEOUT_SECS)),
            max_redirects: MAX_REDIRECTS,
            read_buffer_size: READ_BUFFER_SIZE,
            proxy: ProxySettings::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration plus proxies from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            proxy: ProxySettings::from_env(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the read buffer size; zero is clamped to one byte.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = proxy;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }
}

/// Proxy servers applied to `http://` and `https://` targets respectively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy for plain HTTP targets (request forwarded in absolute form).
    pub http: Option<Url>,
    /// Proxy for HTTPS targets (CONNECT tunnel).
    pub https: Option<Url>,
}

impl ProxySettings {
    /// Reads `http_proxy` / `https_proxy` (falling back to the uppercase
    /// spellings) from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds proxy settings from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset; unparseable values are logged and
    /// ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |lower: &str, upper: &str| -> Option<Url> {
            let value = lookup(lower)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| lookup(upper).filter(|v| !v.trim().is_empty()))?;
            match Url::parse(&value) {
                Ok(url) => {
                    debug!(variable = lower, proxy = %url.origin(), "proxy configured from environment");
                    Some(url)
                }
                Err(error) => {
                    warn!(variable = lower, %error, "ignoring unparseable proxy setting");
                    None
                }
            }
        };

        Self {
            http: read("http_proxy", "HTTP_PROXY"),
            https: read("https_proxy", "HTTPS_PROXY"),
        }
    }

    /// Proxy to use for a target of the given scheme.
    #[must_use]
    pub fn for_scheme(&self, scheme: Scheme) -> Option<&Url> {
        match scheme {
            Scheme::Http => self.http.as_ref(),
            Scheme::Https => self.https.as_ref(),
        }
    }
}

/// Certificate trust configuration for HTTPS targets.
///
/// The bundled WebPKI roots are always trusted; `extra_roots` are added on
/// top. Chains that do not validate are rejected.
#[derive(Clone, Default)]
pub struct TlsSettings {
    /// Additional trust anchors (DER).
    pub extra_roots: Vec<CertificateDer<'static>>,
    /// Optional observer of each presented certificate.
    pub inspector: Option<CertificateInspector>,
}

impl TlsSettings {
    #[must_use]
    pub fn with_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    #[must_use]
    pub fn with_inspector<F>(mut self, inspector: F) -> Self
    where
        F: Fn(usize, &CertificateDer<'_>) + Send + Sync + 'static,
    {
        self.inspector = Some(Arc::new(inspector));
        self
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("extra_roots", &self.extra_roots.len())
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}
