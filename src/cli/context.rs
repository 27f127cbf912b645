use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::OnceCell;

use crate::config::AppConfig;
use crate::services::Services;

use super::output::OutputFormat;

pub struct CliContext {
    config: Arc<AppConfig>,
    config_path: PathBuf,
    output: OutputFormat,
    services: OnceCell<Arc<Services>>,
}

impl CliContext {
    pub fn new(config: AppConfig, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
            services: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    pub async fn services(&self) -> Result<Arc<Services>> {
        self.services
            .get_or_try_init(|| async { Services::build(&self.config).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    /// Like [`CliContext::services`], with the browser connected.
    pub async fn services_with_browser(&self) -> Result<Arc<Services>> {
        let services = self.services().await?;
        services.start_browser().await?;
        Ok(services)
    }

    pub async fn shutdown(&self) {
        if let Some(services) = self.services.get() {
            services.shutdown().await;
        }
    }
}
