use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use camrelay::registry::{RegistryClient, StreamRegistration, REGISTER_PATH};
use camrelay::RegistrationOutcome;

struct Captured {
    request_line: String,
    headers: Vec<String>,
    body: String,
}

/// Accept one request, answer with `status` and `reply`, hand back what
/// was received.
fn one_shot_server(status: &'static str, reply: &'static str) -> Result<(String, JoinHandle<Captured>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let base = format!("http://{}", listener.local_addr()?);
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        let (head, body) = loop {
            let n = stream.read(&mut buf).expect("read");
            assert!(n > 0, "connection closed before request was complete");
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if body.len() >= length {
                    break (head.to_string(), body.to_string());
                }
            }
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reply.len(),
            reply
        );
        stream.write_all(response.as_bytes()).expect("write");
        let mut lines = head.lines().map(str::to_string);
        Captured {
            request_line: lines.next().unwrap_or_default(),
            headers: lines.collect(),
            body,
        }
    });
    Ok((base, handle))
}

fn registration() -> StreamRegistration {
    StreamRegistration {
        stream_name: "Front door".to_string(),
        rtsp_url: "rtsp://192.168.1.20:8554/live".to_string(),
        description: "Camera stream".to_string(),
    }
}

#[test]
fn posts_json_and_accepts_created() -> Result<()> {
    let (base, server) = one_shot_server("201 Created", r#"{"id":7}"#)?;
    let client = RegistryClient::new(&base, Duration::from_secs(5));

    let outcome = client.register(&registration());
    let captured = server.join().expect("server thread");

    assert_eq!(
        outcome,
        RegistrationOutcome::Registered {
            status: 201,
            body: r#"{"id":7}"#.to_string(),
        }
    );
    assert_eq!(captured.request_line, format!("POST {} HTTP/1.1", REGISTER_PATH));
    assert!(captured
        .headers
        .iter()
        .any(|h| h.eq_ignore_ascii_case("content-type: application/json")));
    let body: serde_json::Value = serde_json::from_str(&captured.body)?;
    assert_eq!(
        body,
        serde_json::json!({
            "streamName": "Front door",
            "rtspUrl": "rtsp://192.168.1.20:8554/live",
            "description": "Camera stream",
        })
    );
    Ok(())
}

#[test]
fn server_error_is_rejected_not_fatal() -> Result<()> {
    let (base, server) = one_shot_server("500 Internal Server Error", "database down")?;
    let client = RegistryClient::new(&base, Duration::from_secs(5));

    let outcome = client.register(&registration());
    server.join().expect("server thread");

    assert_eq!(
        outcome,
        RegistrationOutcome::Rejected {
            status: 500,
            body: "database down".to_string(),
        }
    );
    assert!(!outcome.is_success());
    Ok(())
}

#[test]
fn redirects_are_not_followed() -> Result<()> {
    let (base, server) = one_shot_server("302 Found", "")?;
    let client = RegistryClient::new(&base, Duration::from_secs(5));

    let outcome = client.register(&registration());
    server.join().expect("server thread");

    assert!(matches!(outcome, RegistrationOutcome::Rejected { status: 302, .. }));
    Ok(())
}

#[test]
fn success_is_exactly_the_2xx_range() -> Result<()> {
    for (status, code, registered) in [
        ("200 OK", 200, true),
        ("299 Custom", 299, true),
        ("300 Multiple Choices", 300, false),
    ] {
        let (base, server) = one_shot_server(status, "")?;
        let client = RegistryClient::new(&base, Duration::from_secs(5));
        let outcome = client.register(&registration());
        server.join().expect("server thread");

        let expected = if registered {
            RegistrationOutcome::Registered {
                status: code,
                body: String::new(),
            }
        } else {
            RegistrationOutcome::Rejected {
                status: code,
                body: String::new(),
            }
        };
        assert_eq!(outcome, expected, "HTTP {}", code);
    }
    Ok(())
}
