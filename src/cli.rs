//! Arguments shared by every relay binary.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::{Program, RelayConfig};
use crate::ui::{Ui, UiMode};

#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Configuration file (TOML; JSON when the extension is .json)
    #[arg(long, env = "RELAY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Source location: camera index, file path, URL or stub://
    #[arg(long, value_name = "LOCATION")]
    pub source: Option<String>,

    /// Do not open a preview window
    #[arg(long)]
    pub no_preview: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    pub ui: String,
}

impl CommonArgs {
    /// Resolve the configuration (file, then env, then these flags),
    /// validate it and build the stage UI.
    pub fn load(&self, program: Program) -> Result<(RelayConfig, Ui)> {
        let ui = Ui::detect(self.ui.parse::<UiMode>()?);
        let mut cfg = RelayConfig::resolve(program, self.config.as_deref())?;
        if let Some(source) = &self.source {
            cfg.source = source.clone();
        }
        if self.no_preview {
            cfg.preview = false;
        }
        cfg.validate()?;
        log::debug!("{} configuration: {:?}", program, cfg);
        Ok((cfg, ui))
    }
}
