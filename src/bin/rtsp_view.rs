//! rtsp_view - pull an RTSP stream over TCP and show it.

use anyhow::Result;
use clap::Parser;

use camrelay::{cli::CommonArgs, preview, relay, CancelToken, CopyLoop, CopyOptions, Program};

#[derive(Parser, Debug)]
#[command(name = "rtsp_view", about = "Preview an RTSP stream")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Wait for a publisher to push to the URL instead of pulling from it
    #[arg(long)]
    listen: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (mut cfg, ui) = args.common.load(Program::RtspView)?;
    if args.listen {
        cfg.capture.rtsp_listen = true;
    }
    cfg.ffmpeg_log.apply();

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;

    let mut preview = preview::open(&cfg.preview_title, cfg.preview, &cancel);
    let (mut grabber, _info) = relay::open_source(&cfg, &ui, false)?;

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
