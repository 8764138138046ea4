//! Constants for the transfer module (protocol version, timeouts, limits).

/// Protocol version sent in request lines and CONNECT requests.
pub const HTTP_VERSION: &str = "HTTP/1.0";

/// Default request method.
pub const DEFAULT_METHOD: &str = "GET";

/// Default TCP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default socket read timeout (5 minutes for large bodies).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Redirect hops followed before a transfer is aborted.
pub const MAX_REDIRECTS: u32 = 5;

/// Default socket read chunk size.
pub const READ_BUFFER_SIZE: usize = 2048;

/// Upper bound on a proxy's CONNECT response header block.
pub const MAX_TUNNEL_RESPONSE_BYTES: usize = 8 * 1024;
