//! rtsp_hls - convert an RTSP stream to HLS and serve it over HTTP.
//!
//! The conversion runs on a worker thread; the HTTP file server and the
//! memory logger run on their own. Ctrl-C, or the conversion ending for any
//! reason, shuts all of them down.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::Path;

use camrelay::{
    cli::CommonArgs,
    hls::{self, FileServer, FileServerConfig},
    memory,
    preview::NullPreview,
    relay,
    sink::plan,
    ui::Ui,
    CancelToken, CopyLoop, CopyOptions, CopyStats, Program, RecorderConfig, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(name = "rtsp_hls", about = "Convert an RTSP stream to HLS and serve it")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// HTTP port for the HLS file server
    #[arg(long, value_name = "PORT")]
    http_port: Option<u16>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (mut cfg, ui) = args.common.load(Program::RtspHls)?;
    if let Some(port) = args.http_port {
        cfg.http_port = port;
    }
    cfg.ffmpeg_log.apply();

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrlc()?;

    let hls_dir = {
        let stage = ui.stage("Prepare HLS directory");
        let dir = hls::prepare_output_dir(&cfg.hls.dir)?;
        stage.finish();
        dir
    };
    log::info!("HLS output directory: {}", hls_dir.display());
    log::info!("playlist: {}", hls_dir.join(&cfg.hls.playlist).display());

    let server = {
        let stage = ui.stage("Start HTTP server");
        let server = FileServer::new(FileServerConfig::new(
            format!("0.0.0.0:{}", cfg.http_port),
            hls_dir.clone(),
            &cfg.hls.playlist,
        ))
        .spawn()?;
        stage.finish();
        server
    };
    log::info!(
        "stream available at http://localhost:{}/{}",
        server.addr.port(),
        cfg.hls.playlist
    );

    let memory_log = memory::spawn_logger(cfg.memory_log_interval, cancel.clone())
        .context("spawn memory logger")?;

    let worker = {
        let cfg = cfg.clone();
        let ui = ui.clone();
        let cancel = cancel.clone();
        std::thread::Builder::new()
            .name("hls-convert".to_string())
            .spawn(move || {
                let result = convert(&cfg, &ui, &hls_dir, cancel.clone());
                if let Err(err) = &result {
                    log::error!("conversion failed: {:#}", err);
                }
                cancel.cancel();
                result
            })
            .context("spawn conversion thread")?
    };

    log::info!("press Ctrl-C to stop");
    cancel.wait();
    log::info!("shutting down");

    if let Err(err) = server.stop() {
        log::warn!("{:#}", err);
    }
    if memory_log.join().is_err() {
        log::warn!("memory logger thread panicked");
    }
    let stats = worker
        .join()
        .map_err(|_| anyhow!("conversion thread panicked"))??;
    relay::check_stop(&stats)
}

fn convert(cfg: &RelayConfig, ui: &Ui, hls_dir: &Path, cancel: CancelToken) -> Result<CopyStats> {
    let (mut grabber, info) = relay::open_source(cfg, ui, false)?;

    let recorder_cfg = RecorderConfig::hls(
        hls_dir,
        &cfg.hls.playlist,
        info.width,
        info.height,
        plan::plan_hls(&info),
        cfg.hls.segmenting,
    );
    let mut recorder = relay::start_recorder(recorder_cfg, cfg.encoder.start_timeout, ui)?;
    log::info!("conversion started");

    let mut preview = NullPreview::default();
    let options = CopyOptions {
        on_record_error: cfg.encoder.on_record_error,
        ..CopyOptions::default()
    };
    let progress = ui.recording(&cfg.hls.playlist);
    let stats = CopyLoop::new(&mut grabber, Some(&mut recorder), &mut preview, cancel, options)
        .with_progress(&progress)
        .run()?;
    stats.log_summary(None);

    relay::teardown(Some(recorder), grabber);
    Ok(stats)
}
