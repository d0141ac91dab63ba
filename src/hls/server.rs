//! Minimal HTTP/1.1 file server for an HLS directory.
//!
//! Serves GET and HEAD for files under the base directory; everything that
//! is missing, a directory, or resolves outside the base (via `..` or a
//! symlink) is a 404. Connections are handled by a fixed pool of workers,
//! and each request must arrive in full within `request_timeout`.

use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

const MAX_REQUEST_BYTES: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct FileServerConfig {
    pub addr: String,
    pub base_dir: PathBuf,
    /// Served for `/`.
    pub index_name: String,
    /// Connections handled concurrently; more are answered with 503.
    pub workers: usize,
    /// Budget for reading one whole request.
    pub request_timeout: Duration,
}

impl FileServerConfig {
    pub fn new(addr: impl Into<String>, base_dir: impl Into<PathBuf>, index_name: &str) -> Self {
        Self {
            addr: addr.into(),
            base_dir: base_dir.into(),
            index_name: index_name.to_string(),
            workers: DEFAULT_WORKERS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("file server thread panicked"))?;
            log::info!("HTTP server on {} stopped", self.addr);
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("{:#}", err);
        }
    }
}

pub struct FileServer {
    cfg: FileServerConfig,
}

impl FileServer {
    pub fn new(cfg: FileServerConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        if self.cfg.workers == 0 {
            return Err(anyhow!("file server needs at least one worker"));
        }
        let base = self
            .cfg
            .base_dir
            .canonicalize()
            .with_context(|| format!("resolve served directory {}", self.cfg.base_dir.display()))?;
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind HTTP server to {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!(
            "HTTP server serving {} on {} ({} workers)",
            base.display(),
            addr,
            self.cfg.workers
        );

        let cancel = CancelToken::new();
        let cancel_thread = cancel.clone();
        let site = Arc::new(Site {
            base,
            index_name: self.cfg.index_name.clone(),
            request_timeout: self.cfg.request_timeout,
        });
        let workers = self.cfg.workers;
        let join = std::thread::Builder::new()
            .name("hls-http".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, site, workers, cancel_thread) {
                    log::error!("HTTP server stopped: {:#}", err);
                }
            })
            .context("spawn HTTP server thread")?;

        Ok(ServerHandle {
            addr,
            cancel,
            join: Some(join),
        })
    }
}

/// What every worker needs to answer a request.
struct Site {
    base: PathBuf,
    index_name: String,
    request_timeout: Duration,
}

fn run_server(
    listener: TcpListener,
    site: Arc<Site>,
    workers: usize,
    cancel: CancelToken,
) -> Result<()> {
    let (queue, pending) = mpsc::sync_channel::<TcpStream>(workers);
    let pending = Arc::new(Mutex::new(pending));
    let mut pool = Vec::with_capacity(workers);
    for index in 0..workers {
        let site = Arc::clone(&site);
        let pending = Arc::clone(&pending);
        let worker = std::thread::Builder::new()
            .name(format!("hls-http-{}", index))
            .spawn(move || serve_queue(&pending, &site))
            .context("spawn HTTP worker")?;
        pool.push(worker);
    }

    let result = accept_loop(&listener, &queue, &cancel);
    // Closing the queue lets idle workers exit; busy ones finish first.
    drop(queue);
    for worker in pool {
        if worker.join().is_err() {
            log::warn!("HTTP worker panicked");
        }
    }
    result
}

fn accept_loop(
    listener: &TcpListener,
    queue: &SyncSender<TcpStream>,
    cancel: &CancelToken,
) -> Result<()> {
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, peer)) => match queue.try_send(stream) {
                Ok(()) => {}
                Err(TrySendError::Full(mut stream)) => {
                    log::warn!("HTTP server busy; refusing {}", peer);
                    let refused = stream
                        .set_nonblocking(false)
                        .map_err(anyhow::Error::from)
                        .and_then(|()| {
                            write_response(
                                &mut stream,
                                503,
                                "text/plain",
                                b"503 (Service Unavailable)\n",
                                false,
                            )
                        });
                    if let Err(err) = refused {
                        log::debug!("503 to {} failed: {:#}", peer, err);
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(anyhow!("HTTP workers exited"));
                }
            },
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                cancel.wait_timeout(POLL_INTERVAL);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn serve_queue(pending: &Mutex<Receiver<TcpStream>>, site: &Site) {
    loop {
        let next = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        let Ok(stream) = next else {
            return;
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        if let Err(err) = handle_connection(stream, site) {
            log::warn!("HTTP request from {} failed: {:#}", peer, err);
        }
    }
}

/// Outcome of mapping a request path onto the base directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    File {
        path: PathBuf,
        content_type: &'static str,
    },
    NotFound {
        requested: PathBuf,
    },
}

/// Map a raw request path to a file under `base`, which must already be
/// canonical. The query string is ignored; the path is percent-decoded.
pub fn resolve_request(base: &Path, index_name: &str, raw_path: &str) -> Resolution {
    let path = raw_path.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(path)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let relative = decoded.trim_start_matches('/');
    let relative = if relative.is_empty() {
        index_name
    } else {
        relative
    };
    let requested = base.join(relative);

    let canonical = match requested.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => return Resolution::NotFound { requested },
    };
    if canonical.is_dir() || !canonical.starts_with(base) {
        return Resolution::NotFound { requested };
    }
    Resolution::File {
        content_type: content_type_for(relative),
        path: canonical,
    }
}

pub fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if name.ends_with(".ts") {
        "video/MP2T"
    } else {
        "application/octet-stream"
    }
}

fn handle_connection(mut stream: TcpStream, site: &Site) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_secs(10)))?;
    let Some(request) = read_request(&mut stream, site.request_timeout)? else {
        log::debug!("request not received within {:?}", site.request_timeout);
        return write_response(
            &mut stream,
            408,
            "text/plain",
            b"408 (Request Timeout)\n",
            false,
        );
    };
    let head_only = match request.method.as_str() {
        "GET" => false,
        "HEAD" => true,
        _ => {
            return write_response(
                &mut stream,
                405,
                "text/plain",
                b"405 (Method Not Allowed)\n",
                false,
            );
        }
    };
    log::debug!("{} {}", request.method, request.path);

    match resolve_request(&site.base, &site.index_name, &request.path) {
        Resolution::File { path, content_type } => {
            let body = std::fs::read(&path)
                .with_context(|| format!("read {}", path.display()))?;
            write_response(&mut stream, 200, content_type, &body, head_only)
        }
        Resolution::NotFound { requested } => {
            log::debug!("not found: {}", requested.display());
            let body = format!(
                "404 (Not Found)\nRequested file: {}\n",
                requested.display()
            );
            write_response(&mut stream, 404, "text/plain", body.as_bytes(), head_only)
        }
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

/// Read the request head within `timeout` overall. `None` when the client
/// did not deliver it in time.
fn read_request(stream: &mut TcpStream, timeout: Duration) -> Result<Option<HttpRequest>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        stream.set_read_timeout(Some(remaining))?;
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
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
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    Ok(Some(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    }))
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        408 => "HTTP/1.1 408 Request Timeout",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nCache-Control: no-cache\r\nConnection: close\r\n",
        len = body.len()
    );
    if status == 405 {
        header.push_str("Allow: GET, HEAD\r\n");
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    if !head_only {
        stream.write_all(body)?;
    }
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_maps_to_playlist() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let base = temp.path().canonicalize()?;
        std::fs::write(base.join("stream.m3u8"), b"#EXTM3U\n")?;
        for raw in ["/", "", "/?x=1"] {
            assert_eq!(
                resolve_request(&base, "stream.m3u8", raw),
                Resolution::File {
                    path: base.join("stream.m3u8"),
                    content_type: "application/vnd.apple.mpegurl",
                }
            );
        }
        Ok(())
    }

    #[test]
    fn decodes_percent_escapes() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let base = temp.path().canonicalize()?;
        std::fs::write(base.join("segment 1.ts"), b"ts")?;
        assert!(matches!(
            resolve_request(&base, "stream.m3u8", "/segment%201.ts"),
            Resolution::File { content_type: "video/MP2T", .. }
        ));
        Ok(())
    }

    #[test]
    fn parent_escapes_and_directories_are_not_found() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let base = temp.path().join("hls");
        std::fs::create_dir_all(base.join("sub"))?;
        std::fs::write(temp.path().join("secret.txt"), b"x")?;
        let base = base.canonicalize()?;
        assert!(matches!(
            resolve_request(&base, "stream.m3u8", "/../secret.txt"),
            Resolution::NotFound { .. }
        ));
        assert!(matches!(
            resolve_request(&base, "stream.m3u8", "/%2e%2e/secret.txt"),
            Resolution::NotFound { .. }
        ));
        assert!(matches!(
            resolve_request(&base, "stream.m3u8", "/sub"),
            Resolution::NotFound { .. }
        ));
        assert!(matches!(
            resolve_request(&base, "stream.m3u8", "/missing.ts"),
            Resolution::NotFound { .. }
        ));
        Ok(())
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("a.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("segment00001.ts"), "video/MP2T");
        assert_eq!(content_type_for("key.bin"), "application/octet-stream");
    }
}
