use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use anyhow::Result;
use camrelay::hls::{prepare_output_dir, FileServer, FileServerConfig, ServerHandle};

fn request(addr: SocketAddr, method: &str, path: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        method, path
    )?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or_default()
}

fn body(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default()
}

fn serve(dir: &std::path::Path) -> Result<ServerHandle> {
    FileServer::new(FileServerConfig::new("127.0.0.1:0", dir, "stream.m3u8")).spawn()
}

#[test]
fn serves_playlist_and_segments() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let dir = prepare_output_dir(&temp.path().join("hls_output"))?;
    std::fs::write(dir.join("stream.m3u8"), "#EXTM3U\n#EXT-X-VERSION:3\n")?;
    std::fs::write(dir.join("segment00001.ts"), [0x47u8; 188])?;
    let server = serve(&dir)?;

    let root = request(server.addr, "GET", "/")?;
    assert_eq!(status_line(&root), "HTTP/1.1 200 OK");
    assert!(root.contains("Content-Type: application/vnd.apple.mpegurl\r\n"));
    assert!(root.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(root.contains("Cache-Control: no-cache\r\n"));
    assert_eq!(body(&root), "#EXTM3U\n#EXT-X-VERSION:3\n");

    let named = request(server.addr, "GET", "/stream.m3u8?token=abc")?;
    assert_eq!(status_line(&named), "HTTP/1.1 200 OK");

    let segment = request(server.addr, "GET", "/segment00001.ts")?;
    assert_eq!(status_line(&segment), "HTTP/1.1 200 OK");
    assert!(segment.contains("Content-Type: video/MP2T\r\n"));
    assert!(segment.contains("Content-Length: 188\r\n"));

    server.stop()?;
    Ok(())
}

#[test]
fn head_has_headers_but_no_body() -> Result<()> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("stream.m3u8"), "#EXTM3U\n")?;
    let server = serve(temp.path())?;

    let response = request(server.addr, "HEAD", "/stream.m3u8")?;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(response.contains("Content-Length: 8\r\n"));
    assert_eq!(body(&response), "");
    Ok(())
}

#[test]
fn missing_and_escaping_paths_are_404() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let dir = temp.path().join("hls");
    std::fs::create_dir(&dir)?;
    std::fs::write(temp.path().join("secret.txt"), "do not serve")?;
    let server = serve(&dir)?;

    let missing = request(server.addr, "GET", "/segment99999.ts")?;
    assert_eq!(status_line(&missing), "HTTP/1.1 404 Not Found");
    assert!(body(&missing).starts_with("404 (Not Found)\nRequested file: "));
    assert!(body(&missing).contains("segment99999.ts"));

    for path in ["/../secret.txt", "/%2E%2E/secret.txt"] {
        let response = request(server.addr, "GET", path)?;
        assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found", "{}", path);
        assert!(!response.contains("do not serve"));
    }

    // No playlist yet.
    let root = request(server.addr, "GET", "/")?;
    assert_eq!(status_line(&root), "HTTP/1.1 404 Not Found");
    Ok(())
}

#[cfg(unix)]
#[test]
fn symlink_out_of_the_base_is_404() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let dir = temp.path().join("hls");
    std::fs::create_dir(&dir)?;
    let outside = temp.path().join("outside.ts");
    std::fs::write(&outside, "outside")?;
    std::os::unix::fs::symlink(&outside, dir.join("linked.ts"))?;
    let server = serve(&dir)?;

    let response = request(server.addr, "GET", "/linked.ts")?;
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");
    assert!(!response.contains("\r\n\r\noutside"));
    Ok(())
}

#[test]
fn other_methods_are_405() -> Result<()> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("stream.m3u8"), "#EXTM3U\n")?;
    let server = serve(temp.path())?;

    let response = request(server.addr, "POST", "/stream.m3u8")?;
    assert_eq!(status_line(&response), "HTTP/1.1 405 Method Not Allowed");
    assert!(response.contains("Allow: GET, HEAD\r\n"));
    Ok(())
}

#[test]
fn bind_failure_is_an_error() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let first = serve(temp.path())?;
    let second =
        FileServer::new(FileServerConfig::new(first.addr.to_string(), temp.path(), "stream.m3u8"))
            .spawn();
    assert!(second.is_err());
    Ok(())
}

#[test]
fn trickling_client_does_not_block_other_viewers() -> Result<()> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("stream.m3u8"), "#EXTM3U\n")?;
    let server = serve(temp.path())?;

    let mut slow = TcpStream::connect(server.addr)?;
    let addr = server.addr;
    let trickle = std::thread::spawn(move || {
        for byte in b"GET /stream.m3u8" {
            if slow.write_all(&[*byte]).is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(300));
        }
    });
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    let response = request(addr, "GET", "/stream.m3u8")?;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(started.elapsed() < Duration::from_secs(2));

    trickle.join().expect("trickle thread");
    Ok(())
}

#[test]
fn idle_connections_do_not_block_other_viewers() -> Result<()> {
    let temp = tempfile::tempdir()?;
    std::fs::write(temp.path().join("stream.m3u8"), "#EXTM3U\n")?;
    let server = serve(temp.path())?;

    let _idle: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(server.addr))
        .collect::<std::io::Result<_>>()?;
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    let response = request(server.addr, "GET", "/")?;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn slow_request_head_gets_408_after_the_deadline() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut cfg = FileServerConfig::new("127.0.0.1:0", temp.path(), "stream.m3u8");
    cfg.request_timeout = Duration::from_millis(600);
    let server = FileServer::new(cfg).spawn()?;

    let mut stream = TcpStream::connect(server.addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let started = Instant::now();
    // Keep sending, but never finish the head.
    for byte in b"GET" {
        stream.write_all(&[*byte])?;
        std::thread::sleep(Duration::from_millis(100));
    }
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    assert_eq!(status_line(&response), "HTTP/1.1 408 Request Timeout");
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[test]
fn connections_beyond_the_pool_get_503() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut cfg = FileServerConfig::new("127.0.0.1:0", temp.path(), "stream.m3u8");
    cfg.workers = 1;
    cfg.request_timeout = Duration::from_secs(3);
    let server = FileServer::new(cfg).spawn()?;

    // One held by the worker, one queued; the third is refused.
    let _busy = TcpStream::connect(server.addr)?;
    std::thread::sleep(Duration::from_millis(150));
    let _queued = TcpStream::connect(server.addr)?;
    std::thread::sleep(Duration::from_millis(150));
    let mut refused = TcpStream::connect(server.addr)?;
    refused.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut response = String::new();
    refused.read_to_string(&mut response)?;
    assert_eq!(status_line(&response), "HTTP/1.1 503 Service Unavailable");
    Ok(())
}
