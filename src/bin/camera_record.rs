//! camera_record - preview the camera and record it to an MP4 file.
//!
//! H.264/YUV420P at the configured bitrate and frame rate. Timestamps are
//! derived from the frame count so the file plays at a steady rate even
//! when the camera delivers unevenly. Recording stops at the first failed
//! frame unless `encoder.on_record_error = "continue"`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use camrelay::{
    cli::CommonArgs, preview, relay, CancelToken, CopyLoop, CopyOptions, Program, RecorderConfig,
    TimestampMode,
};

#[derive(Parser, Debug)]
#[command(name = "camera_record", about = "Record a camera device to MP4")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Output file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (mut cfg, ui) = args.common.load(Program::CameraRecord)?;
    if let Some(output) = args.output {
        cfg.output = output;
        cfg.validate()?;
    }
    cfg.ffmpeg_log.apply();

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;

    let mut preview = preview::open(&cfg.preview_title, cfg.preview, &cancel);
    let (mut grabber, info) = relay::open_source(&cfg, &ui, true)?;

    let recorder_cfg = RecorderConfig::mp4_file(
        &cfg.output,
        info.width,
        info.height,
        cfg.encoder.frame_rate,
        cfg.encoder.video_bitrate,
    );
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, &ui)?;
    log::info!("recording started; close the window or press Ctrl-C to stop");

    let options = CopyOptions {
        timestamps: TimestampMode::FrameCount {
            fps: cfg.encoder.frame_rate,
        },
        on_record_error: cfg.encoder.on_record_error,
        expected_dimensions: Some((info.width, info.height)),
    };
    let progress = ui.recording(&cfg.output.display().to_string());
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
    log::info!("recording saved to {}", cfg.output.display());
    relay::check_stop(&stats)
}
