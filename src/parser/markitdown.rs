use crate::error::{GraderError, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

const NAME: &str = "markitdown";

/// Converts documents with the `markitdown` command, which prints markdown
/// to stdout
#[derive(Debug, Clone)]
pub struct MarkitdownConverter {
    command: String,
}

impl MarkitdownConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub async fn convert(&self, path: &Path) -> Result<String> {
        debug!(command = %self.command, path = %path.display(), "running markitdown");

        let output = Command::new(&self.command)
            .arg(path)
            .output()
            .await
            .map_err(|e| GraderError::conversion(NAME, format!("cannot run {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GraderError::conversion(
                NAME,
                format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| GraderError::conversion(NAME, format!("output is not UTF-8: {e}")))
    }
}
