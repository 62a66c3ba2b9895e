//! # Auxiliary Fetcher
//!
//! The protocol retrieves three firmware version files from the robot right
//! after acquisition, over `ftp://` URLs. The transfer itself is not this
//! crate's business; the capability is injected so the host application can
//! bring whatever FTP/HTTP stack it already ships (or a stub in tests).

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;

/// Asynchronous GET-by-URL capability.
///
/// Implementations should resolve with the response body, or an error that
/// the caller is free to ignore. A robot without a PCM simply has no such
/// file, and the protocol treats that as "no version information".
pub trait Fetcher: Send + Sync {
    fn get(&self, url: &str) -> BoxFuture<'static, io::Result<Bytes>>;
}
