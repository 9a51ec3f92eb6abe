use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context as _, Error};
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::event::Event;

type Release = Box<dyn FnOnce() + Send>;

/// A readable stream over one object plus the callback freeing whatever backs it.
///
/// The release callback runs exactly once, when the `Extracted` is dropped, so every exit path of
/// a pipeline (success, early error, panic unwinding) frees the underlying resources.
pub struct Extracted {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    release: Option<Release>,
}

impl Extracted {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            release: None,
        }
    }

    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin + 'static) {
        self.reader.as_mut()
    }
}

impl Drop for Extracted {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Extracted {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Extracted")
            .field("release", &self.release.is_some())
            .finish()
    }
}

/// Extracts the bytes of an arrived object from wherever it is stored.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, event: &Event) -> Result<Extracted, Error>;
}

/// Reads objects from a local directory laid out as `{root}/{bucket}/{name}`.
pub struct FsExtractor {
    root: PathBuf,
}

impl FsExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the object of `event` below the root. Names that could leave the root (absolute
    /// paths, `..`, prefixes) are refused.
    pub fn path_for(&self, event: &Event) -> Result<PathBuf, Error> {
        for part in [&event.bucket, &event.name] {
            let relative = Path::new(part);
            if part.is_empty()
                || !relative
                    .components()
                    .all(|component| matches!(component, Component::Normal(_)))
            {
                bail!("refusing to read {:?} outside of {}", part, self.root.display());
            }
        }

        Ok(self.root.join(&event.bucket).join(&event.name))
    }
}

#[async_trait]
impl Extractor for FsExtractor {
    async fn extract(&self, event: &Event) -> Result<Extracted, Error> {
        let path = self.path_for(event)?;
        debug!("opening {}", path.display());

        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        // Dropping the file handle closes it; the release hook only records that it happened.
        Ok(Extracted::new(file).with_release(move || debug!("released {}", path.display())))
    }
}
