use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::batch::partition;
use crate::context::Context;
use crate::error::PipelineError;
use crate::handler::Projector;
use crate::Row;

#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub batch_size: NonZeroUsize,
    /// Maximum number of batches of this call in flight at once.
    pub concurrency_limit: NonZeroUsize,
    /// How many parsed rows precede the first row handed to `transform`, so errors point at the
    /// row of the parsed file rather than of the slice.
    pub row_offset: usize,
}

/// Runs a projector over rows in concurrent batches.
///
/// Every call is bounded by its own `concurrency_limit`. An executor built `with_budget` also
/// holds one permit of a shared semaphore per running batch, capping batch work across every
/// handler and event using that executor.
#[derive(Debug, Clone)]
pub struct Executor {
    budget: Option<Arc<Semaphore>>,
    budget_size: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Executor {
    /// An executor limited only by each call's own concurrency limit.
    pub fn unbounded() -> Self {
        Self {
            budget: None,
            budget_size: 0,
        }
    }

    /// An executor sharing `permits` concurrent batches between all of its callers.
    pub fn with_budget(permits: NonZeroUsize) -> Self {
        Self {
            budget: Some(Arc::new(Semaphore::new(permits.get()))),
            budget_size: permits.get(),
        }
    }

    fn report_saturation(&self) {
        if let Some(budget) = &self.budget {
            metrics::gauge!("loader_executor_saturation_percent")
                .set(1f64 - budget.available_permits() as f64 / self.budget_size as f64);
        }
    }

    /// Project `rows` in batches of `batch_size`, at most `concurrency_limit` batches at a time.
    ///
    /// Batches are merged back by index, so the output keeps the input order minus skipped rows.
    /// Running batches are never cancelled: when one fails, no new batch is started, every started
    /// batch is awaited, and the failure of the earliest row is returned.
    pub async fn transform<E>(
        &self,
        rows: Vec<Row>,
        projector: Arc<dyn Projector<E>>,
        context: Arc<Context<E>>,
        options: TransformOptions,
    ) -> Result<Vec<Row>, PipelineError>
    where
        E: Send + Sync + 'static,
    {
        let batches = partition(rows.len(), options.batch_size);
        let num_batches = batches.len();
        if num_batches == 0 {
            return Ok(Vec::new());
        }
        debug!(
            "projecting {} rows in {} batches",
            rows.len(),
            num_batches
        );

        let local = Arc::new(Semaphore::new(options.concurrency_limit.get()));
        let failed = Arc::new(AtomicBool::new(false));
        let mut set = JoinSet::new();
        let mut rows = rows.into_iter();

        for batch in batches {
            let chunk: Vec<Row> = rows.by_ref().take(batch.len()).collect();

            let local_permit = local
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore has been closed");
            let budget_permit = match &self.budget {
                Some(budget) => Some(
                    budget
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore has been closed"),
                ),
                None => None,
            };

            if failed.load(Ordering::Acquire) {
                debug!("not starting batch {} after an earlier failure", batch.index);
                break;
            }
            self.report_saturation();

            let projector = projector.clone();
            let context = context.clone();
            let failed = failed.clone();
            let first_row = options.row_offset + batch.range.start;

            set.spawn_blocking(move || {
                let _permits = (local_permit, budget_permit);

                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    project_batch(projector.as_ref(), &context, chunk, first_row)
                }))
                .unwrap_or(Err(PipelineError::WorkerPanicked { batch: batch.index }));

                if result.is_err() {
                    failed.store(true, Ordering::Release);
                }
                (batch.index, result)
            });
        }

        let mut outputs: Vec<Option<Vec<Row>>> = (0..num_batches).map(|_| None).collect();
        let mut first_error: Option<(usize, PipelineError)> = None;

        while let Some(joined) = set.join_next().await {
            let (index, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!("projection worker did not finish: {}", e);
                    (num_batches, Err(PipelineError::WorkerCancelled))
                }
            };

            match result {
                Ok(projected) => outputs[index] = Some(projected),
                Err(e) => match &first_error {
                    Some((earliest, _)) if *earliest <= index => {
                        debug!("dropping later failure of batch {}: {}", index, e)
                    }
                    _ => first_error = Some((index, e)),
                },
            }
        }
        self.report_saturation();

        if let Some((_, e)) = first_error {
            return Err(e);
        }

        Ok(outputs.into_iter().flatten().flatten().collect())
    }
}

/// Project the rows of one batch in order, starting at parsed row `first_row`.
fn project_batch<E>(
    projector: &dyn Projector<E>,
    context: &Context<E>,
    rows: Vec<Row>,
    first_row: usize,
) -> Result<Vec<Row>, PipelineError> {
    let mut output = Vec::with_capacity(rows.len());

    for (i, row) in rows.into_iter().enumerate() {
        let index = first_row + i;
        match projector.project(context, row) {
            Ok(Some(projected)) => output.push(projected),
            Ok(None) => {}
            Err(source) => {
                return Err(PipelineError::Projection {
                    row: index,
                    line: index + 1,
                    source,
                })
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time;

    use anyhow::{anyhow, Error};

    use super::*;
    use crate::event::Event;

    fn options(batch_size: usize, concurrency_limit: usize) -> TransformOptions {
        TransformOptions {
            batch_size: NonZeroUsize::new(batch_size).unwrap(),
            concurrency_limit: NonZeroUsize::new(concurrency_limit).unwrap(),
            row_offset: 0,
        }
    }

    fn context() -> Arc<Context<()>> {
        Arc::new(Context::new(Event::new("bucket", "test/name"), ()))
    }

    fn numbered_rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| vec![i.to_string()]).collect()
    }

    fn identity() -> Arc<dyn Projector<()>> {
        Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> { Ok(Some(row)) })
    }

    #[tokio::test]
    async fn test_empty_input() {
        let output = Executor::unbounded()
            .transform(Vec::new(), identity(), context(), options(10, 4))
            .await
            .unwrap();

        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_order_is_kept_across_batches() {
        // Earlier batches sleep longer so they finish last.
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                let i: u64 = row[0].parse()?;
                std::thread::sleep(time::Duration::from_millis(20u64.saturating_sub(i)));
                Ok(Some(row))
            });

        let output = Executor::unbounded()
            .transform(numbered_rows(20), projector, context(), options(1, 8))
            .await
            .unwrap();

        assert_eq!(output, numbered_rows(20));
    }

    #[tokio::test]
    async fn test_skipped_rows_are_left_out() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                let i: usize = row[0].parse()?;
                Ok((i % 2 == 0).then_some(row))
            });

        let output = Executor::unbounded()
            .transform(numbered_rows(9), projector, context(), options(2, 3))
            .await
            .unwrap();

        let expected: Vec<Row> = (0..9)
            .filter(|i| i % 2 == 0)
            .map(|i: usize| vec![i.to_string()])
            .collect();
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_skipping_every_row_is_not_an_error() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, _: Row| -> Result<Option<Row>, Error> { Ok(None) });

        let output = Executor::unbounded()
            .transform(numbered_rows(25), projector, context(), options(4, 2))
            .await
            .unwrap();

        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_row_of_parsed_file() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                if row[0] == "7" {
                    return Err(anyhow!("bad row"));
                }
                Ok(Some(row))
            });
        let mut options = options(3, 4);
        options.row_offset = 2;

        let error = Executor::unbounded()
            .transform(numbered_rows(12), projector, context(), options)
            .await
            .unwrap_err();

        match error {
            PipelineError::Projection { row, line, source } => {
                assert_eq!(row, 9);
                assert_eq!(line, 10);
                assert_eq!(source.to_string(), "bad row");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_earliest_failure_wins() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                let i: u64 = row[0].parse()?;
                // The later failure finishes first.
                if i == 1 {
                    std::thread::sleep(time::Duration::from_millis(50));
                    return Err(anyhow!("first"));
                }
                if i == 3 {
                    return Err(anyhow!("second"));
                }
                Ok(Some(row))
            });

        let error = Executor::unbounded()
            .transform(numbered_rows(4), projector, context(), options(1, 4))
            .await
            .unwrap_err();

        assert_eq!(error.row(), Some(1));
    }

    #[tokio::test]
    async fn test_no_batch_starts_after_a_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let projector: Arc<dyn Projector<()>> =
            Arc::new(move |_: &Context<()>, _: Row| -> Result<Option<Row>, Error> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("always fails"))
            });

        let error = Executor::unbounded()
            .transform(numbered_rows(5), projector, context(), options(1, 1))
            .await
            .unwrap_err();

        assert_eq!(error.row(), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_projector() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                if row[0] == "2" {
                    panic!("projector bug");
                }
                Ok(Some(row))
            });

        let error = Executor::unbounded()
            .transform(numbered_rows(4), projector, context(), options(2, 2))
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::WorkerPanicked { batch: 1 }));
    }

    /// A projector recording the highest number of rows projected at the same time.
    fn tracking_projector(
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> Arc<dyn Projector<()>> {
        Arc::new(
            move |_: &Context<()>, row: Row| -> Result<Option<Row>, Error> {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(time::Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(row))
            },
        )
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let projector = tracking_projector(in_flight, peak.clone());

        let output = Executor::unbounded()
            .transform(numbered_rows(30), projector, context(), options(1, 3))
            .await
            .unwrap();

        assert_eq!(output.len(), 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_concurrency_limit_of_one_matches_sequential_projection() {
        let projector: Arc<dyn Projector<()>> =
            Arc::new(|_: &Context<()>, mut row: Row| -> Result<Option<Row>, Error> {
                if row[0].ends_with('3') {
                    return Ok(None);
                }
                row.push("x".to_owned());
                Ok(Some(row))
            });
        let sequential: Vec<Row> = numbered_rows(40)
            .into_iter()
            .filter_map(|row| projector.project(&context(), row).unwrap())
            .collect();

        let output = Executor::unbounded()
            .transform(numbered_rows(40), projector.clone(), context(), options(7, 1))
            .await
            .unwrap();

        assert_eq!(output, sequential);
    }

    #[tokio::test]
    async fn test_shared_budget_caps_concurrent_calls() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = Executor::with_budget(NonZeroUsize::new(2).unwrap());

        let first = executor.transform(
            numbered_rows(10),
            tracking_projector(in_flight.clone(), peak.clone()),
            context(),
            options(1, 4),
        );
        let second = executor.transform(
            numbered_rows(10),
            tracking_projector(in_flight.clone(), peak.clone()),
            context(),
            options(1, 4),
        );
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().len(), 10);
        assert_eq!(second.unwrap().len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
