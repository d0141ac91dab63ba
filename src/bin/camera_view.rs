//! camera_view - show the default camera in a preview window.
//!
//! Runs until the window is closed, Ctrl-C, or the camera stops delivering.

use anyhow::Result;
use clap::Parser;

use camrelay::{cli::CommonArgs, preview, relay, CancelToken, CopyLoop, CopyOptions, Program};

#[derive(Parser, Debug)]
#[command(name = "camera_view", about = "Preview a camera device")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (cfg, ui) = args.common.load(Program::CameraView)?;
    cfg.ffmpeg_log.apply();

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;

    let mut preview = preview::open(&cfg.preview_title, cfg.preview, &cancel);
    let (mut grabber, _info) = relay::open_source(&cfg, &ui, false)?;
    log::info!("camera started; close the window or press Ctrl-C to stop");

    let stats = CopyLoop::new(
        &mut grabber,
        None,
        preview.as_mut(),
        cancel,
        CopyOptions::default(),
    )
    .run()?;
    stats.log_summary(None);

    relay::teardown(None, grabber);
    drop(preview);
    Ok(())
}
