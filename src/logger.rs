use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// How much of each exchange goes into the wire log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Status lines plus decrypted reply bodies.
    Full,
    /// Request lines and status lines only.
    Headers,
}

#[derive(Serialize)]
#[serde(tag = "dir", rename_all = "lowercase")]
enum Exchange<'a> {
    Req {
        method: &'a str,
        path: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Reply {
        status: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<&'a Value>,
    },
}

#[derive(Serialize)]
struct Entry<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    exchange: Exchange<'a>,
}

/// NDJSON trace of every frame sent and every reply seen, one object per
/// line, flushed as it goes.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    out: BufWriter<std::fs::File>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            out: BufWriter::new(file),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, seq: Option<u64>) {
        self.append(Exchange::Req { method, path, seq });
    }

    pub fn log_reply(&mut self, status_line: &str, body: Option<&Value>) {
        let body = match self.mode {
            MessageLogMode::Full => body,
            MessageLogMode::Headers => None,
        };
        self.append(Exchange::Reply {
            status: status_line,
            body,
        });
    }

    fn append(&mut self, exchange: Exchange<'_>) {
        let entry = Entry {
            ts: Utc::now(),
            exchange,
        };
        let written = serde_json::to_writer(&mut self.out, &entry)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            warn!(error = %e, "wire log write failed");
        }
    }
}
