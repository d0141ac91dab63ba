use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camrelay::config::{FfmpegLogLevel, Program, RelayConfig};
use camrelay::RecordErrorPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_SOURCE",
        "RELAY_OUTPUT",
        "RELAY_RTMP_URL",
        "RELAY_REGISTRY_URL",
        "RELAY_HLS_DIR",
        "RELAY_HTTP_PORT",
        "RELAY_ON_RECORD_ERROR",
        "RELAY_FFMPEG_LOG",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
        source = "rtsp://camera-1:8554/live"
        ffmpeg_log = "warning"

        [capture]
        timeout_secs = 3
        rtsp_transport = "udp"

        [hls]
        dir = "/tmp/hls_from_file"
        playlist = "index.m3u8"
        segment_seconds = 2
        list_size = 10
        http_port = 9000
        memory_log_secs = 30
        "#,
    );
    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_HTTP_PORT", "9100");
    std::env::set_var("RELAY_ON_RECORD_ERROR", "abort");

    let cfg = RelayConfig::load(Program::RtspHls, None).expect("load config");

    assert_eq!(cfg.source, "rtsp://camera-1:8554/live");
    assert_eq!(cfg.ffmpeg_log, FfmpegLogLevel::Warning);
    assert_eq!(cfg.capture.timeout, Duration::from_secs(3));
    assert_eq!(cfg.capture.rtsp_transport, "udp");
    assert_eq!(cfg.hls.dir, PathBuf::from("/tmp/hls_from_file"));
    assert_eq!(cfg.hls.playlist, "index.m3u8");
    assert_eq!(cfg.hls.segmenting.segment_seconds, 2);
    assert_eq!(cfg.hls.segmenting.list_size, 10);
    assert_eq!(cfg.http_port, 9100);
    assert_eq!(cfg.memory_log_interval, Duration::from_secs(30));
    assert_eq!(cfg.encoder.on_record_error, RecordErrorPolicy::Abort);

    clear_env();
}

#[test]
fn loads_json_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "source": "stub://file?frames=3",
            "publish": {
                "rtmp_url": "rtmp://media:1935/movie",
                "rtsp_path": "/movie",
                "stream_name": "Movie night"
            }
        }"#,
    );
    let cfg = RelayConfig::load(Program::FilePublish, Some(file.path())).expect("load config");

    assert_eq!(cfg.source, "stub://file?frames=3");
    assert_eq!(cfg.publish.rtmp_url, "rtmp://media:1935/movie");
    assert_eq!(cfg.publish.rtsp_path, "/movie");
    assert_eq!(cfg.publish.stream_name, "Movie night");
    assert_eq!(cfg.publish.rtsp_port, 8554);

    clear_env();
}

#[test]
fn env_overrides_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_SOURCE", "stub://cam?frames=1");
    std::env::set_var("RELAY_OUTPUT", "clip.mp4");
    std::env::set_var("RELAY_FFMPEG_LOG", "quiet");

    let cfg = RelayConfig::load(Program::CameraRecord, None).expect("load config");
    assert_eq!(cfg.source, "stub://cam?frames=1");
    assert_eq!(cfg.output, PathBuf::from("clip.mp4"));
    assert_eq!(cfg.ffmpeg_log, FfmpegLogLevel::Quiet);
    assert_eq!(cfg.encoder.on_record_error, RecordErrorPolicy::Abort);

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_HTTP_PORT", "not-a-port");
    assert!(RelayConfig::load(Program::RtspHls, None).is_err());
    clear_env();

    std::env::set_var("RELAY_ON_RECORD_ERROR", "retry");
    assert!(RelayConfig::load(Program::CameraRecord, None).is_err());
    clear_env();

    std::env::set_var("RELAY_RTMP_URL", "ftp://media/live");
    assert!(RelayConfig::load(Program::CameraPublish, None).is_err());

    clear_env();
}

#[test]
fn missing_and_malformed_files_fail() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let missing = std::env::temp_dir().join("camrelay-missing-config.toml");
    assert!(RelayConfig::load(Program::CameraView, Some(&missing)).is_err());

    let file = config_file(".toml", "[capture\nwidth = ");
    assert!(RelayConfig::load(Program::CameraView, Some(file.path())).is_err());

    clear_env();
}
