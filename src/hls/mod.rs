//! HLS output: the segment directory and the HTTP server that exposes it.

pub mod server;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::sink::HlsSegmenting;
pub use server::{resolve_request, FileServer, FileServerConfig, Resolution, ServerHandle};

pub const DEFAULT_PLAYLIST: &str = "stream.m3u8";
pub const DEFAULT_DIR: &str = "hls_output";
pub const DEFAULT_HTTP_PORT: u16 = 8989;

#[derive(Clone, Debug, PartialEq)]
pub struct HlsSettings {
    pub dir: PathBuf,
    pub playlist: String,
    pub segmenting: HlsSegmenting,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            playlist: DEFAULT_PLAYLIST.to_string(),
            segmenting: HlsSegmenting::default(),
        }
    }
}

/// Create `dir` if needed and return its absolute, canonical form.
pub fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create HLS directory {}", dir.display()))?;
        log::info!("created HLS directory {}", dir.display());
    }
    let absolute = dir
        .canonicalize()
        .with_context(|| format!("resolve HLS directory {}", dir.display()))?;
    if !absolute.is_dir() {
        anyhow::bail!("HLS output path {} is not a directory", absolute.display());
    }
    Ok(absolute)
}
