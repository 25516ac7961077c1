//! External DOCX→Markdown converter seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Converter failures. Each failure still yields a markdown_versions row,
/// with the message persisted in `error_message`.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter process could not be spawned.
    #[error("failed to launch converter {program}: {source}")]
    Spawn {
        /// Configured program.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The converter exited unsuccessfully.
    #[error("converter exited with {status}: {stderr}")]
    Failed {
        /// Exit status display.
        status: String,
        /// Captured stderr excerpt.
        stderr: String,
    },

    /// The converter reported success but produced no file.
    #[error("converter produced no output at {path}")]
    MissingOutput {
        /// Expected output path.
        path: PathBuf,
    },
}

/// Converts one DOCX into Markdown, optionally extracting images.
#[async_trait]
pub trait DocxConverter: Send + Sync {
    /// Runs the conversion and returns the written Markdown path.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError`] when the conversion fails; the caller
    /// records the failure and continues.
    async fn convert(
        &self,
        docx_path: &Path,
        out_dir: &Path,
        extract_images: bool,
    ) -> Result<PathBuf, ConvertError>;
}

/// Shells out to a pandoc-style converter binary.
///
/// Invocation: `<program> <docx> -o <out.md>` plus
/// `--extract-media=<out_dir>/media/<stem>` when image extraction is on.
#[derive(Debug, Clone)]
pub struct CommandDocxConverter {
    program: String,
}

impl CommandDocxConverter {
    /// Builds a converter around the configured program.
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl DocxConverter for CommandDocxConverter {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn convert(
        &self,
        docx_path: &Path,
        out_dir: &Path,
        extract_images: bool,
    ) -> Result<PathBuf, ConvertError> {
        let stem = docx_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_string());
        let out_path = if extract_images {
            out_dir.join(format!("{stem}_images.md"))
        } else {
            out_dir.join(format!("{stem}.md"))
        };

        let mut command = Command::new(&self.program);
        command.arg(docx_path).arg("-o").arg(&out_path);
        if extract_images {
            command.arg(format!(
                "--extract-media={}",
                out_dir.join("media").join(&stem).display()
            ));
        }

        debug!(out = %out_path.display(), extract_images, "running converter");
        let output = command.output().await.map_err(|source| ConvertError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(500)
                .collect();
            return Err(ConvertError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        if !out_path.exists() {
            return Err(ConvertError::MissingOutput { path: out_path });
        }
        Ok(out_path)
    }
}
