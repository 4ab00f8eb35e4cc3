use std::future::Future;

use serde_json::Value;

use crate::Result;

/// REST-like view of a gateway: JSON documents addressed by path.
///
/// Both connectors implement this, and circuits only talk to the gateway
/// through it.
pub trait Device: Send + Sync {
    /// Reads the document at `path`. The `value` field, when present, is the
    /// primary datum.
    fn get(&self, path: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Writes `{"value": value}` to `path`. `Ok(false)` means the gateway never
    /// acknowledged the write.
    fn put(&self, path: &str, value: Value) -> impl Future<Output = Result<bool>> + Send;
}

/// Transport underneath the message connector.
///
/// Inbound messages do not come back through this trait; the transport feeds
/// them to [`crate::Inbound::dispatch`].
pub trait Transport: Send + Sync {
    /// Opens the session and waits until it is ready. Must be idempotent.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    fn send(&self, message: String) -> impl Future<Output = Result<()>> + Send;
}
