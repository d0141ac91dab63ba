//! camera_publish - publish the camera to an RTMP endpoint and register the
//! stream's RTSP access URL with the catalogue service.

use anyhow::Result;
use clap::Parser;

use camrelay::{
    cli::CommonArgs, preview, relay, CancelToken, CopyLoop, CopyOptions, Program, RecorderConfig,
    TimestampMode,
};

#[derive(Parser, Debug)]
#[command(name = "camera_publish", about = "Publish a camera device over RTMP")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// RTMP endpoint to publish to
    #[arg(long, value_name = "URL")]
    rtmp_url: Option<String>,

    /// Skip stream registration
    #[arg(long)]
    no_register: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (mut cfg, ui) = args.common.load(Program::CameraPublish)?;
    if let Some(url) = args.rtmp_url {
        cfg.publish.rtmp_url = url;
    }
    if args.no_register {
        cfg.publish.register = false;
    }
    cfg.validate()?;
    cfg.ffmpeg_log.apply();

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;

    let mut preview = preview::open(&cfg.preview_title, cfg.preview, &cancel);
    let (mut grabber, info) = relay::open_source(&cfg, &ui, true)?;

    let recorder_cfg = RecorderConfig::rtmp_publish(
        &cfg.publish.rtmp_url,
        info.width,
        info.height,
        cfg.encoder.frame_rate,
        cfg.encoder.video_bitrate,
    );
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    log::info!("publishing to {}", cfg.publish.rtmp_url);
    relay::register_stream(&cfg.publish);

    let options = CopyOptions {
        timestamps: TimestampMode::FrameCount {
            fps: cfg.encoder.frame_rate,
        },
        on_record_error: cfg.encoder.on_record_error,
        expected_dimensions: None,
    };
    let progress = ui.recording(&cfg.publish.rtmp_url);
    let stats = CopyLoop::new(
        &mut grabber,
        Some(&mut recorder),
        preview.as_mut(),
        cancel,
        options,
    )
    .with_progress(&progress)
    .run()?;
    stats.log_summary(Some(cfg.encoder.frame_rate));

    relay::teardown(Some(recorder), grabber);
    drop(preview);
    relay::check_stop(&stats)
}
