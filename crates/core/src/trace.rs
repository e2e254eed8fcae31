use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::driver::BrowserContext;

/// Thin wrapper over the context's tracing capability; ensures the output
/// directory exists before the driver writes the archive.
pub struct TraceController {
    context: Arc<dyn BrowserContext>,
}

impl TraceController {
    pub fn new(context: Arc<dyn BrowserContext>) -> Self {
        Self { context }
    }

    pub async fn start(&self) -> Result<()> {
        self.context.tracing_start().await
    }

    pub async fn stop(&self, out_path: &Path) -> Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create trace dir")?;
        }
        self.context.tracing_stop(out_path).await
    }
}
