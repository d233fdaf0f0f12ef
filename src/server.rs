//! HTTP front end.
//!
//! A plain std-thread server: one accept loop, one thread per connection.
//!
//! - `GET /`           index page embedding the stream
//! - `GET /video_feed` endless `multipart/x-mixed-replace` stream, one part per frame
//! - `GET /health`     JSON status
//!
//! Each `/video_feed` connection drives its own `StreamSession`. Socket writes happen
//! outside the camera lock and carry a write timeout, so a client that stops reading
//! is dropped without holding up the others.

use anyhow::{anyhow, Context, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServerSettings;
use crate::source::FrameSource;
use crate::stream::{StreamSession, STREAM_CONTENT_TYPE};

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub const INDEX_HTML: &str = "<!DOCTYPE html>
<html>
  <head><title>Camera Stream</title></head>
  <body>
    <h1>Camera Stream</h1>
    <img src=\"/video_feed\" width=\"640\" height=\"480\" />
  </body>
</html>
";

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    sessions: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Number of `/video_feed` streams currently being served.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and cancel every live stream.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerSettings,
    source: Arc<FrameSource>,
}

struct ServerContext {
    cfg: ServerSettings,
    source: Arc<FrameSource>,
    shutdown: Arc<AtomicBool>,
    sessions: Arc<AtomicUsize>,
}

impl StreamServer {
    pub fn new(cfg: ServerSettings, source: Arc<FrameSource>) -> Self {
        Self { cfg, source }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("parse bind address {}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(ServerContext {
            cfg: self.cfg,
            source: self.source,
            shutdown: shutdown.clone(),
            sessions: sessions.clone(),
        });
        let join = std::thread::spawn(move || run_server(listener, ctx));

        Ok(ServerHandle {
            addr,
            shutdown,
            sessions,
            join: Some(join),
        })
    }
}

/// Source of incoming connections for the accept loop.
trait Accept {
    fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Accept for TcpListener {
    fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept()
    }
}

/// Runs until the shutdown flag is set. Accept failures such as running out of
/// file descriptors are logged and retried; they never close the listener.
fn run_server<L: Accept>(listener: L, ctx: Arc<ServerContext>) {
    while !ctx.shutdown.load(Ordering::SeqCst) {
        match listener.accept_connection() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("request from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::warn!("accept failed: {}", err);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    log::info!("stream server stopped");
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_response(&mut stream, 405, "text/plain", b"method not allowed\n")?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/video_feed" => stream_video(stream, ctx),
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "clients": ctx.sessions.load(Ordering::SeqCst),
                "frames_captured": ctx.source.frames_captured(),
                "capture_failures": ctx.source.capture_failures(),
            });
            write_response(
                &mut stream,
                200,
                "application/json",
                &serde_json::to_vec(&body)?,
            )
        }
        _ => write_response(&mut stream, 404, "text/plain", b"not found\n"),
    }
}

/// Decrements the live-session count however the stream ends.
struct SessionGuard<'a>(&'a AtomicUsize);

impl<'a> SessionGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn stream_video(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_write_timeout(Some(ctx.cfg.write_timeout))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        STREAM_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;

    let _guard = SessionGuard::enter(&ctx.sessions);
    log::info!(
        "client {} connected ({} streaming)",
        peer,
        ctx.sessions.load(Ordering::SeqCst)
    );

    let mut session = StreamSession::new(
        ctx.source.clone(),
        ctx.cfg.jpeg_quality,
        ctx.shutdown.clone(),
    );
    for part in session.by_ref() {
        if let Err(err) = stream.write_all(&part).and_then(|_| stream.flush()) {
            log::debug!("client {} write failed: {}", peer, err);
            break;
        }
    }
    log::info!(
        "client {} disconnected after {} frames",
        peer,
        session.frames_sent()
    );
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request(&data)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
