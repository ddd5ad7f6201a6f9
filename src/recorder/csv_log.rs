//! CSV sample log.
use super::{SampleLog, SampleRow, LOG_HEADER};
use crate::error::{CncError, CncResult};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Append-only CSV file with the `X,Y,Z,CNC1_Response,CNC2_Response` header.
///
/// Every row is flushed as soon as it is written, so after an abort the file
/// holds exactly the samples that completed.
pub struct CsvLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvLog {
    /// Create an unopened log targeting `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SampleLog for CsvLog {
    async fn open(&mut self) -> CncResult<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| CncError::LogOpen {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let file = File::create(&self.path).map_err(|source| CncError::LogOpen {
            path: self.path.clone(),
            source,
        })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(LOG_HEADER)?;
        writer.flush()?;

        self.writer = Some(writer);
        tracing::info!(path = %self.path.display(), "Sample log opened");
        Ok(())
    }

    async fn append(&mut self, row: &SampleRow) -> CncResult<()> {
        let writer = self.writer.as_mut().ok_or(CncError::LogNotOpen)?;
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> CncResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            tracing::info!(path = %self.path.display(), "Sample log closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}
