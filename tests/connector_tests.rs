use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bosch_gateway::{
    Cipher, Connector, DecryptError, Error, FrameStyle, Inbound, MessageLogMode, Result, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct FakeCipher;

impl Cipher for FakeCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = b"ENC:".to_vec();
        out.extend_from_slice(plaintext);
        out
    }

    fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecryptError> {
        ciphertext
            .strip_prefix("ENC:")
            .map(str::to_string)
            .ok_or_else(|| DecryptError("bad key".to_string()))
    }
}

struct FakeTransport {
    frames: mpsc::UnboundedSender<String>,
    connects: Arc<AtomicUsize>,
    refuse: bool,
}

impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::Connect("authentication failed".to_string()));
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        self.frames
            .send(message)
            .map_err(|e| Error::Connect(e.to_string()))
    }
}

type TestConnector = Connector<FakeTransport, FakeCipher>;

struct Harness {
    conn: TestConnector,
    frames: mpsc::UnboundedReceiver<String>,
    connects: Arc<AtomicUsize>,
}

fn harness(style: FrameStyle, refuse: bool) -> Harness {
    let (tx, frames) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let transport = FakeTransport {
        frames: tx,
        connects: Arc::clone(&connects),
        refuse,
    };
    let conn = Connector::<FakeTransport, FakeCipher>::builder(style)
        .request_timeout(Duration::from_millis(200))
        .write_timeout(Duration::from_millis(200))
        .build(transport, FakeCipher)
        .unwrap();
    Harness { conn, frames, connects }
}

fn request_path(frame: &str) -> String {
    let first = frame.split(['\r', '\n']).next().unwrap();
    first.split(' ').nth(1).unwrap().to_string()
}

fn ok_reply(body: Value) -> String {
    format!("HTTP/1.1 200 OK\nContent-Type: application/json\n\nENC:{body}")
}

/// Answers every frame with whatever `respond` returns.
fn spawn_gateway<F>(
    mut frames: mpsc::UnboundedReceiver<String>,
    inbound: Inbound<FakeCipher>,
    mut respond: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            for reply in respond(&frame) {
                inbound.dispatch(&reply);
            }
        }
    })
}

#[tokio::test]
async fn get_returns_decrypted_body() {
    let h = harness(FrameStyle::Ivt, false);
    spawn_gateway(h.frames, h.conn.inbound(), |frame| {
        let path = request_path(frame);
        vec![ok_reply(json!({"id": path, "value": 21.5}))]
    });

    let data = h.conn.get("/heatingCircuits/hc1/roomtemperature").await.unwrap();
    assert_eq!(data["value"], 21.5);
    assert_eq!(h.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn only_one_frame_in_flight() {
    let h = harness(FrameStyle::Ivt, false);
    let inbound = h.conn.inbound();
    let interleaved = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&interleaved);
    let mut frames = h.frames;
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !frames.is_empty() {
                seen.store(true, Ordering::SeqCst);
            }
            let path = request_path(&frame);
            inbound.dispatch(&ok_reply(json!({"id": path, "value": 1})));
        }
    });

    let (a, b, c) = tokio::join!(
        h.conn.get("/system/outdoorTemperature"),
        h.conn.get("/dhwCircuits/dhw1/actualTemp"),
        h.conn.put("/heatingCircuits/hc1/operationMode", json!("auto")),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    // The gateway above never sends "No Content", so the write times out.
    assert!(!c.unwrap());
    assert!(!interleaved.load(Ordering::SeqCst));
}

#[tokio::test]
async fn timeout_releases_gate_and_late_reply_is_ignored() {
    let h = harness(FrameStyle::Nefit, false);
    spawn_gateway(h.frames, h.conn.inbound(), |frame| {
        let path = request_path(frame);
        if path == "/system/outdoorTemperature" {
            return Vec::new();
        }
        vec![
            ok_reply(json!({"id": "/system/outdoorTemperature", "value": -3})),
            ok_reply(json!({"id": path, "value": 48})),
        ]
    });

    let started = Instant::now();
    let err = h.conn.get("/system/outdoorTemperature").await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_millis(500));

    let data = h.conn.get("/dhwCircuits/dhw1/actualTemp").await.unwrap();
    assert_eq!(data["value"], 48);
}

#[tokio::test]
async fn reply_must_name_requested_path() {
    let h = harness(FrameStyle::Ivt, false);
    spawn_gateway(h.frames, h.conn.inbound(), |_| {
        vec![
            ok_reply(json!({"id": "/gateway/DateTime", "value": "2024-03-11T09:00:00"})),
            ok_reply(json!({"id": "/heatingCircuits/hc1/roomtemperature", "value": 20.5})),
        ]
    });

    let data = h.conn.get("/heatingCircuits/hc1/roomtemperature").await.unwrap();
    assert_eq!(data["value"], 20.5);
}

#[tokio::test]
async fn client_error_status_is_protocol_error() {
    let h = harness(FrameStyle::Ivt, false);
    spawn_gateway(h.frames, h.conn.inbound(), |_| {
        vec!["HTTP/1.1 404 Not Found\n\n".to_string()]
    });

    match h.conn.get("/heatingCircuits/hc9/roomtemperature").await {
        Err(Error::Protocol { path, status }) => {
            assert_eq!(path, "/heatingCircuits/hc9/roomtemperature");
            assert!(status.contains("404"));
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn undecryptable_reply_is_encryption_error() {
    let h = harness(FrameStyle::Ivt, false);
    spawn_gateway(h.frames, h.conn.inbound(), |_| {
        vec!["HTTP/1.1 200 OK\n\ngarbage-with-wrong-key".to_string()]
    });

    let err = h.conn.get("/gateway/DateTime").await.unwrap_err();
    assert!(matches!(err, Error::Encryption { .. }));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn put_is_acknowledged_by_no_content() {
    let h = harness(FrameStyle::Ivt, false);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    spawn_gateway(h.frames, h.conn.inbound(), move |frame| {
        let _ = seen_tx.send(frame.to_string());
        vec!["HTTP/1.1 204 No Content\n\n".to_string()]
    });

    let ok = h
        .conn
        .put("/heatingCircuits/hc1/temperatureRoomManual", json!(21.5))
        .await
        .unwrap();
    assert!(ok);

    let frame = seen_rx.recv().await.unwrap();
    assert!(frame.starts_with("PUT /heatingCircuits/hc1/temperatureRoomManual HTTP/1.1\r\r"));
    assert!(frame.contains("Content-Type: application/json"));
    assert!(frame.contains(r#"ENC:{"value":21.5}"#));
}

#[tokio::test]
async fn rejected_put_returns_false() {
    let h = harness(FrameStyle::Ivt, false);
    spawn_gateway(h.frames, h.conn.inbound(), |_| {
        vec!["HTTP/1.1 400 Bad Request\n\n".to_string()]
    });

    let ok = h
        .conn
        .put("/heatingCircuits/hc1/operationMode", json!("holiday"))
        .await
        .unwrap();
    assert!(!ok);
}

#[tokio::test]
async fn connect_failure_sends_nothing() {
    let mut h = harness(FrameStyle::Nefit, true);

    let err = h.conn.get("/system/outdoorTemperature").await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
    assert!(h.frames.try_recv().is_err());

    let err = h.conn.put("/dhwCircuits/dhw1/operationMode", json!("on")).await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
}

struct RawCipher;

impl Cipher for RawCipher {
    fn encrypt(&self, _plaintext: &[u8]) -> Vec<u8> {
        vec![0xff, 0xfe, 0x00, 0x81]
    }

    fn decrypt(&self, _ciphertext: &str) -> std::result::Result<String, DecryptError> {
        Err(DecryptError("unused".to_string()))
    }
}

#[tokio::test]
async fn non_text_ciphertext_is_not_sent() {
    let (tx, mut frames) = mpsc::unbounded_channel();
    let transport = FakeTransport {
        frames: tx,
        connects: Arc::new(AtomicUsize::new(0)),
        refuse: false,
    };
    let conn = Connector::<FakeTransport, RawCipher>::builder(FrameStyle::Ivt)
        .build(transport, RawCipher)
        .unwrap();

    let err = conn
        .put("/heatingCircuits/hc1/manualRoomSetpoint", json!(21.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Encryption { ref path } if path == "/heatingCircuits/hc1/manualRoomSetpoint"));
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn sequence_numbers_increase_per_frame() {
    let h = harness(FrameStyle::Ivt, false);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    spawn_gateway(h.frames, h.conn.inbound(), move |frame| {
        let _ = seen_tx.send(frame.to_string());
        let path = request_path(frame);
        vec![ok_reply(json!({"id": path, "value": 0}))]
    });

    h.conn.get("/system/outdoorTemperature").await.unwrap();
    h.conn.get("/system/outdoorTemperature").await.unwrap();

    assert!(seen_rx.recv().await.unwrap().contains("Seq-No: 1"));
    assert!(seen_rx.recv().await.unwrap().contains("Seq-No: 2"));
}

#[tokio::test]
async fn reconnects_after_session_ends() {
    let h = harness(FrameStyle::Nefit, false);
    let inbound = h.conn.inbound();
    spawn_gateway(h.frames, h.conn.inbound(), |frame| {
        let path = request_path(frame);
        vec![ok_reply(json!({"id": path, "value": 1}))]
    });

    h.conn.get("/system/outdoorTemperature").await.unwrap();
    assert!(h.conn.is_connected());
    inbound.session_ended();
    assert!(!h.conn.is_connected());
    h.conn.get("/system/outdoorTemperature").await.unwrap();
    assert_eq!(h.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn message_log_records_exchange() {
    let log = tempfile::NamedTempFile::new().unwrap();
    let (tx, frames) = mpsc::unbounded_channel();
    let transport = FakeTransport {
        frames: tx,
        connects: Arc::new(AtomicUsize::new(0)),
        refuse: false,
    };
    let conn = Connector::<FakeTransport, FakeCipher>::builder(FrameStyle::Ivt)
        .message_log(MessageLogMode::Full, log.path().to_str().unwrap())
        .build(transport, FakeCipher)
        .unwrap();
    spawn_gateway(frames, conn.inbound(), |frame| {
        let path = request_path(frame);
        vec![ok_reply(json!({"id": path, "value": "2024-03-11T09:00:00"}))]
    });

    conn.get("/gateway/DateTime").await.unwrap();

    let content = std::fs::read_to_string(log.path()).unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["dir"], "req");
    assert_eq!(lines[0]["path"], "/gateway/DateTime");
    assert_eq!(lines[0]["seq"], 1);
    assert_eq!(lines[1]["dir"], "reply");
    assert_eq!(lines[1]["body"]["value"], "2024-03-11T09:00:00");
}
