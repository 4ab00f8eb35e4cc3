use serde_json::{json, Value};

use crate::types::Method;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Framing details that differ between gateway families.
///
/// Only the text layout changes between families; request handling is the
/// same for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStyle {
    Nefit,
    Ivt,
    Easycontrol,
}

struct Layout {
    separator: &'static str,
    seq: bool,
    trailer: Option<&'static str>,
}

impl FrameStyle {
    pub fn user_agent(&self) -> &'static str {
        match self {
            FrameStyle::Nefit => "NefitEasy",
            FrameStyle::Ivt => "TeleHeater",
            FrameStyle::Easycontrol => "rrc2",
        }
    }

    /// First sequence number, or `None` when the family never sends one.
    pub fn initial_seq(&self) -> Option<u64> {
        match self {
            FrameStyle::Nefit => None,
            FrameStyle::Ivt => Some(1),
            FrameStyle::Easycontrol => Some(0),
        }
    }

    fn layout(&self, method: Method) -> Layout {
        match (self, method) {
            (FrameStyle::Nefit, _) => Layout { separator: "\r\r", seq: false, trailer: Some("\r\r") },
            (FrameStyle::Ivt, Method::Get) => Layout { separator: "\r\r", seq: true, trailer: Some("\r\r") },
            (FrameStyle::Ivt, Method::Put) => Layout { separator: "\r\r", seq: true, trailer: None },
            (FrameStyle::Easycontrol, Method::Get) => Layout { separator: "\n", seq: true, trailer: Some("\n") },
            (FrameStyle::Easycontrol, Method::Put) => Layout { separator: "\r", seq: false, trailer: Some("\r") },
        }
    }
}

/// `body` is the already encrypted payload and is only used for `PUT`.
pub fn build_frame(style: FrameStyle, method: Method, path: &str, body: Option<&str>, seq: Option<u64>) -> String {
    let layout = style.layout(method);
    let mut lines = vec![
        format!("{method} {path} HTTP/1.1"),
        format!("User-Agent: {}", style.user_agent()),
    ];
    if method == Method::Put {
        let body = body.unwrap_or_default();
        lines.push(format!("Content-Type: {CONTENT_TYPE_JSON}"));
        lines.push(format!("Content-Length: {}", body.len()));
        if layout.seq && let Some(n) = seq {
            lines.push(format!("Seq-No: {n}"));
        }
        lines.push(String::new());
        lines.push(body.to_string());
    } else if layout.seq && let Some(n) = seq {
        lines.push(format!("Seq-No: {n}"));
    }
    if let Some(trailer) = layout.trailer {
        lines.push(trailer.to_string());
    }
    lines.join(layout.separator)
}

pub fn value_message(value: &Value) -> String {
    json!({ "value": value }).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyEnvelope<'a> {
    pub status_line: &'a str,
    pub payload: Option<&'a str>,
}

/// Splits an inbound message. Returns `None` for empty messages.
///
/// The payload is the last non-empty line after the status line.
pub fn parse_reply(raw: &str) -> Option<ReplyEnvelope<'_>> {
    let mut lines = raw.split('\n').map(|l| l.trim_matches('\r'));
    let status_line = lines.find(|l| !l.is_empty())?;
    let payload = lines.filter(|l| !l.is_empty()).last();
    Some(ReplyEnvelope { status_line, payload })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NoContent,
    ClientError,
    Other,
}

/// Classifies `HTTP/1.x NNN Reason` lines.
pub fn classify_status(line: &str) -> StatusClass {
    let Some(rest) = line.strip_prefix("HTTP/1.") else {
        return StatusClass::Other;
    };
    let mut parts = rest.splitn(3, ' ');
    let minor = parts.next().unwrap_or_default();
    if minor.len() != 1 || !minor.chars().all(|c| c.is_ascii_digit()) {
        return StatusClass::Other;
    }
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_digit()) {
        return StatusClass::Other;
    }
    if code.starts_with("20") {
        if reason.starts_with("No Content") {
            StatusClass::NoContent
        } else {
            StatusClass::Success
        }
    } else if code.starts_with("40") {
        StatusClass::ClientError
    } else {
        StatusClass::Other
    }
}

/// What the dispatcher hands to a pending request.
#[derive(Debug, Clone, Copy)]
pub enum InboundReply<'a> {
    Data { status_line: &'a str, body: &'a Value },
    BadRequest { status_line: &'a str },
    WrongEncryption,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept(Value),
    BadRequest(String),
    WrongEncryption,
    /// Not an answer to this request; keep waiting.
    Ignore,
}

/// Decides whether an inbound reply answers one particular request.
pub type ReplyMatcher = Box<dyn Fn(&InboundReply<'_>) -> Verdict + Send>;

pub fn matcher_for(method: Method, path: &str) -> ReplyMatcher {
    match method {
        Method::Get => get_matcher(path),
        Method::Put => put_matcher(),
    }
}

/// A read is answered by the first reply whose `id` occurs in the requested
/// path. The gateway may append or strip segments, so this is containment
/// rather than equality.
pub fn get_matcher(path: &str) -> ReplyMatcher {
    let path = path.to_string();
    Box::new(move |reply| match reply {
        InboundReply::Data { body, .. } => match body.get("id").and_then(Value::as_str) {
            Some(id) if path.contains(id) => Verdict::Accept((*body).clone()),
            _ => Verdict::Ignore,
        },
        InboundReply::BadRequest { status_line } => Verdict::BadRequest(status_line.to_string()),
        InboundReply::WrongEncryption => Verdict::WrongEncryption,
    })
}

/// A write is answered only by a "No Content" status; bodies are irrelevant.
pub fn put_matcher() -> ReplyMatcher {
    Box::new(|reply| match reply {
        InboundReply::Data { status_line, .. } => {
            if classify_status(status_line) == StatusClass::NoContent {
                Verdict::Accept(Value::Bool(true))
            } else {
                Verdict::Ignore
            }
        }
        InboundReply::BadRequest { status_line } => Verdict::BadRequest(status_line.to_string()),
        InboundReply::WrongEncryption => Verdict::WrongEncryption,
    })
}
