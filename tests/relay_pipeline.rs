use std::time::Duration;

use anyhow::Result;
use camrelay::config::{Program, RelayConfig};
use camrelay::preview::NullPreview;
use camrelay::sink::plan;
use camrelay::ui::{Ui, UiMode};
use camrelay::{
    relay, CancelToken, Codec, CopyLoop, CopyOptions, RecordErrorPolicy, RecorderConfig,
    StopReason, TimestampMode,
};

fn plain_ui() -> Ui {
    Ui::new(UiMode::Plain, false)
}

fn config(program: Program, source: &str) -> Result<RelayConfig> {
    let mut cfg = RelayConfig::defaults(program);
    cfg.source = source.to_string();
    cfg.preview = false;
    cfg.validate()?;
    Ok(cfg)
}

#[test]
fn camera_record_flow_with_fallback_size() -> Result<()> {
    let cfg = config(Program::CameraRecord, "stub://cam?frames=10&width=0&fps=30")?;
    let ui = plain_ui();
    let (mut grabber, info) = relay::open_source(&cfg, &ui, true)?;
    assert_eq!((info.width, info.height), (640, 480));

    let recorder_cfg = RecorderConfig::mp4_file(
        std::path::Path::new("stub://sink"),
        info.width,
        info.height,
        cfg.encoder.frame_rate,
        cfg.encoder.video_bitrate,
    );
    assert_eq!(recorder_cfg.option("movflags"), Some("faststart"));
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    let probe = recorder.probe().expect("memory sink");

    let mut preview = NullPreview::default();
    let stats = CopyLoop::new(
        &mut grabber,
        Some(&mut recorder),
        &mut preview,
        CancelToken::new(),
        CopyOptions {
            timestamps: TimestampMode::FrameCount { fps: 30.0 },
            on_record_error: cfg.encoder.on_record_error,
            expected_dimensions: Some((info.width, info.height)),
        },
    )
    .run()?;
    relay::teardown(Some(recorder), grabber);

    assert_eq!(stats.stop, StopReason::EndOfStream);
    assert_eq!(stats.recorded, 10);
    assert_eq!(preview.shown, 10);
    assert!((stats.duration_secs(30.0) - 10.0 / 30.0).abs() < 1e-9);
    let timestamps = probe.timestamps();
    assert_eq!(timestamps[0], Some(0));
    assert_eq!(timestamps[9], Some(9 * 33_333));
    assert_eq!(probe.stop_count(), 1);
    relay::check_stop(&stats)
}

#[test]
fn camera_record_aborts_on_first_failed_frame() -> Result<()> {
    let cfg = config(Program::CameraRecord, "stub://cam?frames=10")?;
    assert_eq!(cfg.encoder.on_record_error, RecordErrorPolicy::Abort);
    let ui = plain_ui();
    let (mut grabber, info) = relay::open_source(&cfg, &ui, true)?;
    let recorder_cfg = RecorderConfig::new(
        "stub://sink?fail_every=4",
        info.width,
        info.height,
        plan::plan_camera(30.0, 2_000_000, None),
    );
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    let probe = recorder.probe().expect("memory sink");

    let mut preview = NullPreview::default();
    let stats = CopyLoop::new(
        &mut grabber,
        Some(&mut recorder),
        &mut preview,
        CancelToken::new(),
        CopyOptions {
            on_record_error: cfg.encoder.on_record_error,
            ..CopyOptions::default()
        },
    )
    .run()?;
    drop(recorder);
    drop(grabber);

    assert!(matches!(stats.stop, StopReason::RecordFailed { frame: 4, .. }));
    assert_eq!(stats.recorded, 3);
    assert!(relay::check_stop(&stats).is_err());
    // Dropping the recorder finalized it.
    assert_eq!(probe.stop_count(), 1);
    Ok(())
}

#[test]
fn file_publish_plan_follows_source() -> Result<()> {
    let cfg = config(
        Program::FilePublish,
        "stub://movie?frames=4&width=320&height=240&fps=25&audio=2&sample_rate=48000&bitrate=800000",
    )?;
    let ui = plain_ui();
    let (mut grabber, info) = relay::open_source(&cfg, &ui, false)?;
    let codec_plan = plan::plan_file_publish(&info);
    assert_eq!(codec_plan.video.codec, Codec::H264);
    assert_eq!(codec_plan.video.bitrate, Some(800_000));
    assert_eq!(codec_plan.video.frame_rate, Some(25.0));
    assert_eq!(codec_plan.video.gop, Some(50));
    let audio = codec_plan.audio.clone().expect("audio plan");
    assert_eq!(audio.codec, Codec::Aac);
    assert_eq!(audio.sample_rate, Some(48_000));
    assert_eq!(audio.channels, 2);

    let recorder_cfg = RecorderConfig::new("stub://sink", info.width, info.height, codec_plan)
        .with_format("flv");
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    let probe = recorder.probe().expect("memory sink");

    let mut preview = NullPreview::default();
    let stats = CopyLoop::new(
        &mut grabber,
        Some(&mut recorder),
        &mut preview,
        CancelToken::new(),
        CopyOptions {
            timestamps: TimestampMode::Source,
            on_record_error: cfg.encoder.on_record_error,
            expected_dimensions: None,
        },
    )
    .run()?;
    relay::teardown(Some(recorder), grabber);

    // Video and audio frames both reach the sink.
    assert_eq!(stats.recorded, 8);
    assert_eq!(preview.shown, 4);
    let frames = probe.frames();
    assert!(frames.iter().any(|f| f.audio_frames == 48_000 / 25));
    // The first frame is stamped 0, which leaves the timestamp to the sink.
    assert_eq!(frames[0].timestamp_us, None);
    assert_eq!(frames[2].timestamp_us, Some(40_000));
    Ok(())
}

#[test]
fn hls_plan_keeps_h264_and_aac() -> Result<()> {
    let cfg = config(
        Program::RtspHls,
        "stub://cam?frames=2&codec=h264&audio=1&audio_codec=aac",
    )?;
    let (grabber, info) = relay::open_source(&cfg, &plain_ui(), false)?;
    let codec_plan = plan::plan_hls(&info);
    assert!(codec_plan.keeps_video);
    assert!(codec_plan.keeps_audio);
    assert_eq!(codec_plan.video.bitrate, None);

    let dir = tempfile::tempdir()?;
    let hls = RecorderConfig::hls(
        dir.path(),
        &cfg.hls.playlist,
        info.width,
        info.height,
        codec_plan,
        cfg.hls.segmenting,
    );
    assert_eq!(hls.format.as_deref(), Some("hls"));
    assert_eq!(hls.option("hls_time"), Some("4"));
    assert_eq!(hls.option("hls_list_size"), Some("5"));
    assert!(hls.location.ends_with("stream.m3u8"));
    relay::teardown(None, grabber);
    Ok(())
}

#[test]
fn slow_sink_start_times_out() -> Result<()> {
    let ui = plain_ui();
    let recorder_cfg = RecorderConfig::new(
        "stub://sink?start_delay_ms=500",
        640,
        480,
        plan::plan_camera(30.0, 2_000_000, None),
    );
    let err = relay::start_recorder(recorder_cfg, Duration::from_millis(50), &ui)
        .err()
        .expect("start should time out");
    assert!(format!("{:#}", err).contains("did not start"));
    Ok(())
}

#[test]
fn cancelled_before_start_records_nothing() -> Result<()> {
    let cfg = config(Program::CameraPublish, "stub://cam")?;
    let (mut grabber, _info) = relay::open_source(&cfg, &plain_ui(), true)?;
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut preview = NullPreview::default();
    let stats = CopyLoop::new(&mut grabber, None, &mut preview, cancel, CopyOptions::default())
        .run()?;
    assert_eq!(stats.stop, StopReason::Cancelled);
    assert_eq!(stats.grabbed, 0);
    Ok(())
}

#[test]
fn missing_input_file_is_fatal() {
    let mut cfg = RelayConfig::defaults(Program::FilePublish);
    cfg.source = std::env::temp_dir()
        .join("camrelay-no-such-input.mp4")
        .to_string_lossy()
        .into_owned();
    let err = relay::open_source(&cfg, &plain_ui(), false)
        .err()
        .expect("open should fail");
    assert!(format!("{:#}", err).contains("input file not found"));
}
