use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::cipher::Cipher;
use crate::device::{Device, Transport};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    build_frame, classify_status, matcher_for, parse_reply, value_message, FrameStyle,
    InboundReply, ReplyMatcher, StatusClass, Verdict,
};
use crate::types::Method;
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ConnectorBuilder {
    style: FrameStyle,
    request_timeout: Duration,
    write_timeout: Duration,
    connect_timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ConnectorBuilder {
    pub fn new(style: FrameStyle) -> Self {
        Self {
            style,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build<T: Transport, C: Cipher>(self, transport: T, cipher: C) -> Result<Connector<T, C>> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(Connector {
            transport,
            shared: Arc::new(Shared {
                cipher,
                pending: Mutex::new(None),
                connected: AtomicBool::new(false),
                logger,
            }),
            gate: tokio::sync::Mutex::new(self.style.initial_seq()),
            style: self.style,
            request_timeout: self.request_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
        })
    }
}

/// Request/response client over a transport that only delivers loose text
/// messages.
///
/// The transport carries no request ids, so only one request is ever in
/// flight. Replies are matched to it by inspecting their content.
pub struct Connector<T, C> {
    transport: T,
    shared: Arc<Shared<C>>,
    /// Held for the whole exchange. Also owns the next sequence number.
    gate: tokio::sync::Mutex<Option<u64>>,
    style: FrameStyle,
    request_timeout: Duration,
    write_timeout: Duration,
    connect_timeout: Duration,
}

struct Shared<C> {
    cipher: C,
    pending: Mutex<Option<Pending>>,
    connected: AtomicBool,
    logger: Option<Mutex<MessageLogger>>,
}

struct Pending {
    path: String,
    matcher: ReplyMatcher,
    tx: oneshot::Sender<Result<Value>>,
}

/// Entry point for inbound messages. Hand a clone to whatever reads the
/// transport.
pub struct Inbound<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Inbound<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Cipher> Inbound<C> {
    pub fn dispatch(&self, raw: &str) {
        self.shared.dispatch(raw);
    }

    /// The session went away; the next request reconnects first.
    pub fn session_ended(&self) {
        debug!("transport session ended");
        self.shared.connected.store(false, Ordering::Release);
    }
}

impl<T: Transport, C: Cipher> Connector<T, C> {
    pub fn builder(style: FrameStyle) -> ConnectorBuilder {
        ConnectorBuilder::new(style)
    }

    pub fn inbound(&self) -> Inbound<C> {
        Inbound { shared: Arc::clone(&self.shared) }
    }

    pub fn style(&self) -> FrameStyle {
        self.style
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        debug!(path, "sending GET request");
        let data = self
            .request(Method::Get, path, None, self.request_timeout)
            .await?;
        if is_empty(&data) {
            return Err(Error::DeviceData { path: path.to_string() });
        }
        trace!(path, %data, "GET response");
        Ok(data)
    }

    pub async fn put(&self, path: &str, value: Value) -> Result<bool> {
        debug!(path, %value, "sending PUT request");
        let ciphertext = self.shared.cipher.encrypt(value_message(&value).as_bytes());
        let body = String::from_utf8(ciphertext).map_err(|_| {
            warn!(path, "cipher produced non-text payload");
            Error::Encryption { path: path.to_string() }
        })?;
        match self
            .request(Method::Put, path, Some(body), self.write_timeout)
            .await
        {
            Ok(_) => Ok(true),
            Err(e @ (Error::Timeout { .. } | Error::Protocol { .. })) => {
                warn!(path, error = %e, "write not acknowledged");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!("connecting transport");
        match tokio::time::timeout(self.connect_timeout, self.transport.connect()).await {
            Ok(Ok(())) => {
                self.shared.connected.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "cannot connect, check network connection or credentials");
                Err(match e {
                    Error::Connect(_) => e,
                    other => Error::Connect(other.to_string()),
                })
            }
            Err(_) => {
                warn!("transport not ready before connect timeout");
                Err(Error::Connect("session not ready before timeout".to_string()))
            }
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> Result<Value> {
        self.ensure_connected().await?;

        let mut gate = self.gate.lock().await;
        let seq = *gate;
        let frame = build_frame(self.style, method, path, body.as_deref(), seq);
        if let Some(n) = gate.as_mut() {
            *n += 1;
        }

        let (tx, rx) = oneshot::channel();
        // Dropped before `gate`: the slot is cleared before the next request
        // can register, whichever way this function exits.
        let _slot = SlotGuard::register(
            self.shared.as_ref(),
            Pending {
                path: path.to_string(),
                matcher: matcher_for(method, path),
                tx,
            },
        );

        self.shared.log_request(method, path, seq);
        debug!(%method, path, seq = ?seq, "sending frame");
        if let Err(e) = self.transport.send(frame).await {
            self.shared.connected.store(false, Ordering::Release);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => {
                info!(path, ?timeout, "no reply before timeout");
                Err(Error::Timeout { path: path.to_string() })
            }
        }
    }
}

impl<T: Transport, C: Cipher> Device for Connector<T, C> {
    async fn get(&self, path: &str) -> Result<Value> {
        Connector::get(self, path).await
    }

    async fn put(&self, path: &str, value: Value) -> Result<bool> {
        Connector::put(self, path, value).await
    }
}

impl<C: Cipher> Shared<C> {
    fn pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, raw: &str) {
        let Some(envelope) = parse_reply(raw) else {
            trace!("ignoring empty message");
            return;
        };
        let status_line = envelope.status_line;

        match classify_status(status_line) {
            StatusClass::Success | StatusClass::NoContent => {
                let body = match envelope.payload {
                    None => Value::Null,
                    Some(payload) => match self.decrypt_json(payload) {
                        Some(body) => body,
                        None => {
                            warn!(status = status_line, "cannot decrypt reply, wrong credentials?");
                            self.log_reply(status_line, None);
                            self.notify(&InboundReply::WrongEncryption);
                            return;
                        }
                    },
                };
                self.log_reply(status_line, Some(&body));
                self.notify(&InboundReply::Data { status_line, body: &body });
            }
            StatusClass::ClientError => {
                info!(status = status_line, "gateway returned client error");
                self.log_reply(status_line, None);
                self.notify(&InboundReply::BadRequest { status_line });
            }
            StatusClass::Other => {
                trace!(status = status_line, "ignoring message");
            }
        }
    }

    fn decrypt_json(&self, payload: &str) -> Option<Value> {
        let plaintext = self.cipher.decrypt(payload).ok()?;
        serde_json::from_str(plaintext.trim_end_matches('\0')).ok()
    }

    fn notify(&self, reply: &InboundReply<'_>) {
        let mut slot = self.pending();
        let Some(pending) = slot.as_ref() else {
            trace!("no request waiting, dropping reply");
            return;
        };
        let outcome = match (pending.matcher)(reply) {
            Verdict::Ignore => {
                trace!(path = %pending.path, "reply does not answer pending request");
                return;
            }
            Verdict::Accept(value) => Ok(value),
            Verdict::BadRequest(status) => Err(Error::Protocol {
                path: pending.path.clone(),
                status,
            }),
            Verdict::WrongEncryption => Err(Error::Encryption {
                path: pending.path.clone(),
            }),
        };
        if let Some(pending) = slot.take() {
            // The requester may have timed out a moment ago.
            let _ = pending.tx.send(outcome);
        }
    }

    fn log_request(&self, method: Method, path: &str, seq: Option<u64>) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .log_request(method.as_str(), path, seq);
        }
    }

    fn log_reply(&self, status_line: &str, body: Option<&Value>) {
        if let Some(logger) = &self.logger {
            logger
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .log_reply(status_line, body);
        }
    }
}

/// Registration of the single pending request; clears the slot on drop.
struct SlotGuard<'a, C> {
    shared: &'a Shared<C>,
}

impl<'a, C> SlotGuard<'a, C> {
    fn register(shared: &'a Shared<C>, pending: Pending) -> Self {
        let mut slot = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        if slot.replace(pending).is_some() {
            warn!("replaced a stale pending request");
        }
        Self { shared }
    }
}

impl<C> Drop for SlotGuard<'_, C> {
    fn drop(&mut self) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
