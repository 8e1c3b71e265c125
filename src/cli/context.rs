use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::OnceCell;

use crate::cli::output::OutputFormat;
use crate::config::Config;
use crate::engine::LiveCallEngine;

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    output: OutputFormat,
    engine: OnceCell<Arc<LiveCallEngine>>,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
            engine: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }

    /// Engine over the configured store. The CLI has no live session, so
    /// the engine cannot replay.
    pub async fn engine(&self) -> Result<Arc<LiveCallEngine>> {
        self.engine
            .get_or_try_init(|| async {
                LiveCallEngine::builder(self.config().clone())
                    .build()
                    .await
                    .map(Arc::new)
                    .with_context(|| {
                        format!("failed to open template store {}", self.config.store_dir.display())
                    })
            })
            .await
            .map(Arc::clone)
    }
}
