use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Error;
use regex::Regex;

use crate::context::Context;
use crate::decode::Decoder;
use crate::error::BuildError;
use crate::event::Event;
use crate::extract::Extractor;
use crate::load::Loader;
use crate::notify::Notifier;
use crate::parse::Parser;
use crate::Row;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Transforms one parsed row into the row to load.
///
/// Returning `Ok(None)` skips the row: it is left out of the load and is not a failure.
pub trait Projector<E>: Send + Sync {
    fn project(&self, context: &Context<E>, row: Row) -> Result<Option<Row>, Error>;
}

impl<E, F> Projector<E> for F
where
    F: Fn(&Context<E>, Row) -> Result<Option<Row>, Error> + Send + Sync,
{
    fn project(&self, context: &Context<E>, row: Row) -> Result<Option<Row>, Error> {
        self(context, row)
    }
}

/// Derives the per-event enrichment every projection of that event can read.
pub trait Preprocessor<E>: Send + Sync {
    fn preprocess(&self, event: &Event) -> Result<E, Error>;
}

impl<E, F> Preprocessor<E> for F
where
    F: Fn(&Event) -> Result<E, Error> + Send + Sync,
{
    fn preprocess(&self, event: &Event) -> Result<E, Error> {
        self(event)
    }
}

/// Defines how to handle the events whose object name matches `pattern`.
///
/// Handlers are immutable once built. `E` is the type of the enrichment produced by the
/// preprocessor; handlers without one use `E::default()`.
pub struct Handler<E = ()> {
    pub(crate) name: String,
    pub(crate) pattern: Regex,
    pub(crate) decoder: Option<Arc<dyn Decoder>>,
    pub(crate) parser: Arc<dyn Parser>,
    pub(crate) projector: Arc<dyn Projector<E>>,
    pub(crate) preprocessor: Option<Box<dyn Preprocessor<E>>>,
    pub(crate) skip_leading_rows: usize,
    pub(crate) batch_size: NonZeroUsize,
    pub(crate) concurrency_limit: NonZeroUsize,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) loader: Arc<dyn Loader>,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
}

impl<E> Handler<E> {
    pub fn builder(name: &str, pattern: Regex) -> HandlerBuilder<E> {
        HandlerBuilder::new(name, pattern)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, object_name: &str) -> bool {
        self.pattern.is_match(object_name)
    }

    pub fn skip_leading_rows(&self) -> usize {
        self.skip_leading_rows
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.get()
    }
}

impl<E> fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("decoder", &self.decoder.is_some())
            .field("preprocessor", &self.preprocessor.is_some())
            .field("skip_leading_rows", &self.skip_leading_rows)
            .field("batch_size", &self.batch_size)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Default concurrency for a handler: one batch per available core.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

pub struct HandlerBuilder<E> {
    name: String,
    pattern: Regex,
    decoder: Option<Arc<dyn Decoder>>,
    parser: Option<Arc<dyn Parser>>,
    projector: Option<Arc<dyn Projector<E>>>,
    preprocessor: Option<Box<dyn Preprocessor<E>>>,
    skip_leading_rows: usize,
    batch_size: usize,
    concurrency_limit: usize,
    extractor: Option<Arc<dyn Extractor>>,
    loader: Option<Arc<dyn Loader>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<E> HandlerBuilder<E> {
    pub fn new(name: &str, pattern: Regex) -> Self {
        Self {
            name: name.to_owned(),
            pattern,
            decoder: None,
            parser: None,
            projector: None,
            preprocessor: None,
            skip_leading_rows: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency_limit: default_concurrency(),
            extractor: None,
            loader: None,
            notifier: None,
        }
    }

    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    pub fn parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn projector(mut self, projector: impl Projector<E> + 'static) -> Self {
        self.projector = Some(Arc::new(projector));
        self
    }

    pub fn preprocessor(mut self, preprocessor: impl Preprocessor<E> + 'static) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    pub fn skip_leading_rows(mut self, rows: usize) -> Self {
        self.skip_leading_rows = rows;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Handler<E>, BuildError> {
        let name = self.name;
        if name.is_empty() {
            return Err(BuildError::EmptyName);
        }

        let missing = |capability| BuildError::MissingCapability {
            handler: name.clone(),
            capability,
        };
        let parser = self.parser.ok_or_else(|| missing("parser"))?;
        let projector = self.projector.ok_or_else(|| missing("projector"))?;
        let extractor = self.extractor.ok_or_else(|| missing("extractor"))?;
        let loader = self.loader.ok_or_else(|| missing("loader"))?;

        let batch_size =
            NonZeroUsize::new(self.batch_size).ok_or_else(|| BuildError::ZeroBatchSize {
                handler: name.clone(),
            })?;
        let concurrency_limit = NonZeroUsize::new(self.concurrency_limit).ok_or_else(|| {
            BuildError::ZeroConcurrency {
                handler: name.clone(),
            }
        })?;

        Ok(Handler {
            name,
            pattern: self.pattern,
            decoder: self.decoder,
            parser,
            projector,
            preprocessor: self.preprocessor,
            skip_leading_rows: self.skip_leading_rows,
            batch_size,
            concurrency_limit,
            extractor,
            loader,
            notifier: self.notifier,
        })
    }
}
