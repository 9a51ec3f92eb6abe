use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

use crate::context::Context;
use crate::error::{NotifyError, PipelineError};
use crate::event::Event;
use crate::executor::{Executor, TransformOptions};
use crate::handler::Handler;
use crate::notify::Outcome;
use crate::Row;

impl<E> Handler<E>
where
    E: Default + Send + Sync + 'static,
{
    /// Run this handler against one event and return how many rows were loaded.
    ///
    /// The notifier, when configured, fires exactly once with the outcome whatever step failed.
    /// Its own failure is logged and counted but never changes the returned result.
    pub async fn process(&self, event: &Event, executor: &Executor) -> Result<usize, PipelineError> {
        self.process_dispatched(event, executor, Instant::now())
            .await
    }

    pub(crate) async fn process_dispatched(
        &self,
        event: &Event,
        executor: &Executor,
        dispatched_at: Instant,
    ) -> Result<usize, PipelineError> {
        let span = info_span!(
            "handler",
            handler = %self.name,
            bucket = %event.bucket,
            name = %event.name
        );

        async {
            let started = Instant::now();
            let result = self.run(event, executor, dispatched_at).await;
            let elapsed = started.elapsed();

            let status = match &result {
                Ok(rows) => {
                    info!("loaded {} rows in {:?}", rows, elapsed);
                    "success"
                }
                Err(e) => {
                    error!(kind = e.kind(), "failed to handle {}: {}", event, e);
                    "failure"
                }
            };
            let labels = [("handler", self.name.clone()), ("status", status.to_owned())];
            metrics::counter!("loader_handler_runs_total", &labels).increment(1);
            metrics::histogram!(
                "loader_handler_duration_seconds",
                &[("handler", self.name.clone())]
            )
            .record(elapsed.as_secs_f64());

            let outcome = Outcome {
                event,
                handler: &self.name,
                error: result.as_ref().err(),
                rows_loaded: *result.as_ref().unwrap_or(&0),
                elapsed,
            };
            if let Err(e) = self.notify(&outcome).await {
                error!("{}", e);
                metrics::counter!(
                    "loader_notify_failures_total",
                    &[("handler", self.name.clone())]
                )
                .increment(1);
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn notify(&self, outcome: &Outcome<'_>) -> Result<(), NotifyError> {
        let Some(notifier) = &self.notifier else {
            return Ok(());
        };

        notifier
            .notify(outcome)
            .await
            .map_err(|source| NotifyError {
                handler: self.name.clone(),
                source,
            })
    }

    /// Decode and parse on the blocking pool so a large object does not hold up the other
    /// handlers matched by the same event.
    async fn decode_and_parse(&self, data: Vec<u8>, path: &str) -> Result<Vec<Row>, PipelineError> {
        let decoder = self.decoder.clone();
        let parser = self.parser.clone();
        let path = path.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
                let data = match &decoder {
                    Some(decoder) => decoder.decode(data).map_err(|source| PipelineError::Decode {
                        path: path.clone(),
                        source,
                    })?,
                    None => data,
                };
                parser.parse(&data).map_err(|source| PipelineError::Parse {
                    path: path.clone(),
                    source,
                })
            }));

            parsed.unwrap_or_else(|_| {
                Err(PipelineError::Parse {
                    path: path.clone(),
                    source: anyhow!("decoder or parser panicked"),
                })
            })
        })
        .await
        .map_err(|e| {
            error!("decode worker did not finish: {}", e);
            PipelineError::WorkerCancelled
        })?
    }

    async fn run(
        &self,
        event: &Event,
        executor: &Executor,
        dispatched_at: Instant,
    ) -> Result<usize, PipelineError> {
        let path = event.full_path();

        let enrichment = match &self.preprocessor {
            Some(preprocessor) => {
                preprocessor
                    .preprocess(event)
                    .map_err(|source| PipelineError::Preprocess {
                        path: path.clone(),
                        source,
                    })?
            }
            None => E::default(),
        };
        let context = Arc::new(Context::new(event.clone(), enrichment).dispatched_at(dispatched_at));

        // The extracted object is released as soon as it has been read.
        let data = {
            let mut extracted =
                self.extractor
                    .extract(event)
                    .await
                    .map_err(|source| PipelineError::Extract {
                        path: path.clone(),
                        source,
                    })?;

            let mut data = Vec::new();
            extracted
                .reader()
                .read_to_end(&mut data)
                .await
                .map_err(|source| PipelineError::Read {
                    path: path.clone(),
                    source,
                })?;
            data
        };
        debug!("read {} bytes from {}", data.len(), path);

        let mut rows = self.decode_and_parse(data, &path).await?;

        if self.skip_leading_rows > rows.len() {
            return Err(PipelineError::SkipLeadingRows {
                skip: self.skip_leading_rows,
                rows: rows.len(),
            });
        }
        rows.drain(..self.skip_leading_rows);
        let parsed = rows.len();

        let rows = executor
            .transform(
                rows,
                self.projector.clone(),
                context.clone(),
                TransformOptions {
                    batch_size: self.batch_size,
                    concurrency_limit: self.concurrency_limit,
                    row_offset: self.skip_leading_rows,
                },
            )
            .await?;

        let loaded = rows.len();
        debug!(
            "projected {} of {} rows, {:?} after dispatch",
            loaded,
            parsed,
            context.since_dispatch()
        );
        metrics::counter!(
            "loader_rows_skipped_total",
            &[("handler", self.name.clone())]
        )
        .increment((parsed - loaded) as u64);

        self.loader
            .load(rows)
            .await
            .map_err(|source| PipelineError::Load {
                rows: loaded,
                source,
            })?;
        metrics::counter!(
            "loader_rows_loaded_total",
            &[("handler", self.name.clone())]
        )
        .increment(loaded as u64);

        Ok(loaded)
    }
}
