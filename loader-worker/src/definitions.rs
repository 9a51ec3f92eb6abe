//! Handlers declared in a JSON file instead of code.
//!
//! Every definition becomes a handler reading objects below `SOURCE_ROOT`, appending CSV to a
//! file below `DESTINATION_ROOT` and projecting rows through a [`ColumnProjector`].
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Error};
use loader_core::decode::TextDecoder;
use loader_core::extract::{Extractor, FsExtractor};
use loader_core::load::CsvFileLoader;
use loader_core::notify::Notifier;
use loader_core::parse::CsvParser;
use loader_core::util::clean_number;
use loader_core::{Context, Dispatcher, Handler, Projector, Row};
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::config::Config;
use crate::error::WorkerError;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HandlerDefinition {
    pub name: String,
    /// Regular expression matched against object names.
    pub pattern: String,
    /// Encoding label of the source objects; UTF-8 is read as is.
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub skip_leading_rows: usize,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    /// Source columns to keep, in output order. All columns when absent.
    #[serde(default)]
    pub columns: Option<Vec<usize>>,
    /// Source column that must hold a value for the row to be loaded.
    #[serde(default)]
    pub skip_if_empty: Option<usize>,
    /// Source columns holding formatted amounts such as `1,234`, reduced to plain numbers.
    #[serde(default)]
    pub numeric_columns: Vec<usize>,
    /// File below the destination root the rows are appended to.
    pub destination: String,
}

fn default_delimiter() -> char {
    ','
}

impl HandlerDefinition {
    fn invalid(&self, reason: impl Into<String>) -> WorkerError {
        WorkerError::InvalidDefinitionError {
            handler: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn into_handler(
        self,
        extractor: Arc<dyn Extractor>,
        destinations: &mut Destinations,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Handler, WorkerError> {
        let pattern = Regex::new(&self.pattern)
            .map_err(|e| self.invalid(format!("bad pattern: {e}")))?;

        if !self.delimiter.is_ascii() {
            return Err(self.invalid(format!("delimiter {:?} is not ascii", self.delimiter)));
        }
        let parser = CsvParser::new().delimiter(self.delimiter as u8);

        let destination = Path::new(&self.destination);
        if destination.is_absolute() || destination.components().count() != 1 {
            return Err(self.invalid(format!(
                "destination {} must be a plain file name",
                self.destination
            )));
        }
        let loader = destinations.loader(destination);

        let mut builder = Handler::builder(&self.name, pattern)
            .parser(parser)
            .projector(ColumnProjector {
                columns: self.columns.clone(),
                skip_if_empty: self.skip_if_empty,
                numeric_columns: self.numeric_columns.clone(),
            })
            .skip_leading_rows(self.skip_leading_rows)
            .extractor(extractor)
            .loader(loader);

        if let Some(label) = &self.encoding {
            let decoder = TextDecoder::for_label(label).map_err(|e| self.invalid(e.to_string()))?;
            builder = builder.decoder(decoder);
        }
        if let Some(batch_size) = self.batch_size {
            builder = builder.batch_size(batch_size);
        }
        if let Some(limit) = self.concurrency_limit {
            builder = builder.concurrency_limit(limit);
        }
        if let Some(notifier) = notifier {
            builder = builder.notifier(notifier);
        }

        Ok(builder.build()?)
    }
}

/// One loader per destination file below the destination root, shared by every handler
/// appending to that file.
#[derive(Debug)]
pub struct Destinations {
    root: PathBuf,
    loaders: HashMap<PathBuf, Arc<CsvFileLoader>>,
}

impl Destinations {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loaders: HashMap::new(),
        }
    }

    pub fn loader(&mut self, destination: &Path) -> Arc<CsvFileLoader> {
        let path = self.root.join(destination);
        self.loaders
            .entry(path.clone())
            .or_insert_with(|| Arc::new(CsvFileLoader::new(path)))
            .clone()
    }
}

/// Selects and cleans columns of a row.
#[derive(Debug, Clone, Default)]
pub struct ColumnProjector {
    pub columns: Option<Vec<usize>>,
    pub skip_if_empty: Option<usize>,
    pub numeric_columns: Vec<usize>,
}

fn field(row: &Row, index: usize) -> Result<&String, Error> {
    row.get(index)
        .ok_or_else(|| anyhow!("no column {} in a row of {} fields", index, row.len()))
}

impl Projector<()> for ColumnProjector {
    fn project(&self, _: &Context<()>, mut row: Row) -> Result<Option<Row>, Error> {
        if let Some(index) = self.skip_if_empty {
            if field(&row, index)?.trim().is_empty() {
                return Ok(None);
            }
        }

        for &index in &self.numeric_columns {
            let cleaned = clean_number(field(&row, index)?);
            row[index] = cleaned;
        }

        let Some(columns) = &self.columns else {
            return Ok(Some(row));
        };
        let projected = columns
            .iter()
            .map(|&index| field(&row, index).cloned())
            .collect::<Result<Row, Error>>()?;

        Ok(Some(projected))
    }
}

/// Read the handler definitions file.
pub fn load_definitions(path: &str) -> Result<Vec<HandlerDefinition>, WorkerError> {
    let raw = std::fs::read_to_string(path).map_err(|source| WorkerError::ReadDefinitionsError {
        path: path.to_owned(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| WorkerError::ParseDefinitionsError {
        path: path.to_owned(),
        source,
    })
}

/// Build the dispatcher serving every definition, in file order.
pub fn build_dispatcher(
    config: &Config,
    definitions: Vec<HandlerDefinition>,
) -> Result<Dispatcher, WorkerError> {
    let extractor: Arc<dyn Extractor> = Arc::new(FsExtractor::new(&config.source_root));
    let mut destinations = Destinations::new(&config.destination_root);
    let notifier = config.slack.notifier();

    let mut names = HashSet::new();
    let mut builder =
        Dispatcher::builder().max_concurrent_batches(config.max_concurrent_batches);

    for definition in definitions {
        if !names.insert(definition.name.clone()) {
            return Err(definition.invalid("name is already taken"));
        }
        info!(
            "registering {} handler for {}",
            definition.name, definition.pattern
        );

        let handler =
            definition.into_handler(extractor.clone(), &mut destinations, Some(notifier.clone()))?;
        builder = builder.register(handler);
    }

    Ok(builder.build())
}
