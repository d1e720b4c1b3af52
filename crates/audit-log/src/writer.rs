use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::entry::AuditEntry;

#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to create audit log directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open audit log: {0}")]
    Open(std::io::Error),

    #[error("failed to encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes [`AuditEntry`] values as JSON lines to any async writer.
///
/// Output is buffered; call [`flush`](Self::flush) to push it through.
pub struct AuditWriter<W = BufWriter<File>> {
    out: W,
    written: u64,
}

impl AuditWriter<BufWriter<File>> {
    /// Open `path` for appending, creating it and its parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AuditWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(AuditWriteError::Open)?;

        Ok(Self::from_writer(BufWriter::new(file)))
    }
}

impl<W: AsyncWrite + Unpin> AuditWriter<W> {
    pub fn from_writer(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.out.flush().await?;
        Ok(())
    }

    /// Entries written since the writer was created.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
