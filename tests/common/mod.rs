//! In-process mock servers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use talon::WireValue;
use talon::protocol::wire;

// ============================================================================
// Fixtures
// ============================================================================

pub const POINT: &str = r#"{"type":"Point","coordinates":[-112.2693,33.5123]}"#;

pub const UPDATE: &str = r#"{"command":"set","group":"5c5203ccf5ec4e4f349fd038","detect":"enter","hook":"","key":"fleet","time":"2019-01-30T13:06:36.769273-07:00","id":"bus","object":{"type":"Point","coordinates":[-112.26,33.46]}}"#;

pub const CHANNEL_EVENT: &str = r#"{"command":"set","group":"g1","detect":"inside","hook":"warehouse","key":"fleet","time":"2019-01-30T13:06:36.769273-07:00","id":"truck1","object":{"type":"Point","coordinates":[-112.26,33.46]}}"#;

/// Installs a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// RESP Server
// ============================================================================

/// A RESP server that counts accepted connections.
pub struct RespServer {
    pub port: u16,
    pub accepts: Arc<AtomicUsize>,
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl RespServer {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let accepted = Arc::clone(&accepts);
        let seen = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_resp(stream, Arc::clone(&seen)));
            }
        });

        Ok(Self {
            port,
            accepts,
            commands,
        })
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

async fn serve_resp(mut stream: TcpStream, seen: Arc<Mutex<Vec<String>>>) -> anyhow::Result<()> {
    let mut buffer = BytesMut::new();
    loop {
        while let Some(request) = wire::decode(&mut buffer)? {
            let tokens: Vec<String> = request
                .as_array()
                .unwrap_or_default()
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            seen.lock().push(tokens.join(" "));

            let mut out = BytesMut::new();
            for frame in resp_replies(&tokens) {
                wire::encode(&frame, &mut out);
            }
            stream.write_all(&out).await?;
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }
    }
}

fn resp_replies(tokens: &[String]) -> Vec<WireValue> {
    let name = tokens.first().map(|t| t.to_ascii_uppercase()).unwrap_or_default();
    match name.as_str() {
        "PING" => vec![WireValue::status("PONG")],
        "SET" => vec![WireValue::status("OK")],
        "GET" => vec![WireValue::Error("ERR id not found".to_string())],
        "SCAN" => vec![WireValue::Array(vec![
            WireValue::Integer(0),
            WireValue::Array(vec![
                WireValue::Array(vec![WireValue::bulk("truck1"), WireValue::bulk(POINT)]),
                WireValue::Array(vec![WireValue::bulk("broken"), WireValue::bulk("{oops")]),
            ]),
        ])],
        "SUBSCRIBE" => vec![
            WireValue::Array(vec![
                WireValue::bulk("subscribe"),
                WireValue::bulk(tokens.get(1).cloned().unwrap_or_default()),
                WireValue::Integer(1),
            ]),
            WireValue::Array(vec![
                WireValue::bulk("message"),
                WireValue::bulk(tokens.get(1).cloned().unwrap_or_default()),
                WireValue::bulk(CHANNEL_EVENT),
            ]),
        ],
        _ => vec![WireValue::Error(format!("ERR unknown command '{name}'"))],
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// A minimal HTTP/1.1 server answering every GET with a route lookup.
pub struct HttpServer {
    pub port: u16,
    pub paths: Arc<Mutex<Vec<String>>>,
}

impl HttpServer {
    pub async fn start(route: fn(&str) -> (u16, String)) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let paths = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&paths);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_http(stream, Arc::clone(&seen), route));
            }
        });

        Ok(Self { port, paths })
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

async fn serve_http(
    mut stream: TcpStream,
    seen: Arc<Mutex<Vec<String>>>,
    route: fn(&str) -> (u16, String),
) -> anyhow::Result<()> {
    let mut buffer = BytesMut::new();
    loop {
        let Some(end) = find_header_end(&buffer) else {
            if stream.read_buf(&mut buffer).await? == 0 {
                return Ok(());
            }
            continue;
        };

        let head = String::from_utf8_lossy(&buffer[..end]).into_owned();
        let _ = buffer.split_to(end + 4);
        let path = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        seen.lock().push(path.clone());

        let (status, body) = route(&path);
        let reason = if status == 200 { "OK" } else { "Error" };
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await?;
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
