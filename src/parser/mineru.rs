use crate::error::{GraderError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const NAME: &str = "mineru";

/// Converts documents with MinerU (`magic-pdf`), which writes markdown files
/// into an output directory
#[derive(Debug, Clone)]
pub struct MineruConverter {
    command: String,
}

impl MineruConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub async fn convert(&self, path: &Path) -> Result<String> {
        let output_dir = tempfile::tempdir()
            .map_err(|e| GraderError::conversion(NAME, format!("cannot create output directory: {e}")))?;

        debug!(
            command = %self.command,
            path = %path.display(),
            output_dir = %output_dir.path().display(),
            "running MinerU"
        );

        let output = Command::new(&self.command)
            .arg("-p")
            .arg(path)
            .arg("-o")
            .arg(output_dir.path())
            .arg("-m")
            .arg("auto")
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

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let markdown = find_markdown(output_dir.path(), stem)
            .map_err(|e| GraderError::conversion(NAME, format!("cannot scan output: {e}")))?
            .ok_or_else(|| GraderError::conversion(NAME, "no markdown file was produced"))?;

        tokio::fs::read_to_string(&markdown).await.map_err(|e| {
            GraderError::conversion(NAME, format!("cannot read {}: {e}", markdown.display()))
        })
    }
}

/// Markdown file under `dir` named after `stem`, else the first one in path order
fn find_markdown(dir: &Path, stem: &str) -> std::io::Result<Option<PathBuf>> {
    let mut found = Vec::new();
    collect_markdown(dir, &mut found)?;
    found.sort();

    let preferred = found
        .iter()
        .position(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem));

    Ok(match preferred {
        Some(index) => Some(found.swap_remove(index)),
        None => found.into_iter().next(),
    })
}

fn collect_markdown(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, found)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            found.push(path);
        }
    }
    Ok(())
}
