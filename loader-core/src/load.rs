use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::Row;

/// Loads transformed rows into a destination table.
///
/// Rows are handed over once per (event, handler) as a single batch: a loader never sees a
/// partial result.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, rows: Vec<Row>) -> Result<(), Error>;
}

/// Serialize rows as CSV.
pub fn to_csv(rows: &[Row]) -> Result<Vec<u8>, Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).context("failed to write csv")?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::msg(e.to_string()))
        .context("failed to flush csv buffer")
}

/// Appends rows as CSV to a local file, creating it if needed.
///
/// Appends through one loader are serialized, so the rows of one load are never interleaved
/// with another's. Handlers writing the same file must share the loader.
#[derive(Debug)]
pub struct CsvFileLoader {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Loader for CsvFileLoader {
    async fn load(&self, rows: Vec<Row>) -> Result<(), Error> {
        let buffer = to_csv(&rows)?;
        info!("writing {} rows to {}", rows.len(), self.path.display());

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        Ok(())
    }
}

/// Prints rows as CSV, handy for local runs.
pub struct StdoutLoader;

#[async_trait]
impl Loader for StdoutLoader {
    async fn load(&self, rows: Vec<Row>) -> Result<(), Error> {
        let buffer = to_csv(&rows)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&buffer).await?;
        stdout.flush().await?;
        Ok(())
    }
}
