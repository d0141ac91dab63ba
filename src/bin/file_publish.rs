//! file_publish - stream a local media file to an RTMP endpoint.
//!
//! Bitrate, frame rate and audio follow the file; the media server is
//! expected to re-publish the stream over RTSP, and that URL is registered.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use camrelay::{
    cli::CommonArgs, preview, relay, sink::plan, CancelToken, CopyLoop, CopyOptions, Program,
    RecorderConfig, TimestampMode,
};

#[derive(Parser, Debug)]
#[command(name = "file_publish", about = "Publish a local media file over RTMP")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Input file (same as --source)
    #[arg(value_name = "FILE", conflicts_with = "source")]
    input: Option<PathBuf>,

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
    let (mut cfg, ui) = args.common.load(Program::FilePublish)?;
    if let Some(input) = args.input {
        cfg.source = input.to_string_lossy().into_owned();
    }
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
    let (mut grabber, info) = relay::open_source(&cfg, &ui, false)?;
    relay::require_video(&info, &cfg.source)?;

    let codec_plan = plan::plan_file_publish(&info);
    let frame_rate = codec_plan.video.frame_rate;
    let recorder_cfg = RecorderConfig::new(
        cfg.publish.rtmp_url.as_str(),
        info.width,
        info.height,
        codec_plan,
    )
    .with_format("flv");
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    log::info!("streaming {} to {}", cfg.source, cfg.publish.rtmp_url);
    relay::register_stream(&cfg.publish);

    let options = CopyOptions {
        timestamps: TimestampMode::Source,
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
    stats.log_summary(frame_rate);

    relay::teardown(Some(recorder), grabber);
    drop(preview);
    relay::check_stop(&stats)
}
