use std::num::NonZeroUsize;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, HandlerFailure, PipelineError};
use crate::event::Event;
use crate::executor::Executor;
use crate::handler::Handler;

/// A handler as seen by the dispatcher, with its enrichment type erased.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, object_name: &str) -> bool;

    async fn handle(
        &self,
        event: &Event,
        executor: &Executor,
        dispatched_at: Instant,
    ) -> Result<usize, PipelineError>;
}

#[async_trait]
impl<E> EventHandler for Handler<E>
where
    E: Default + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Handler::name(self)
    }

    fn matches(&self, object_name: &str) -> bool {
        Handler::matches(self, object_name)
    }

    async fn handle(
        &self,
        event: &Event,
        executor: &Executor,
        dispatched_at: Instant,
    ) -> Result<usize, PipelineError> {
        self.process_dispatched(event, executor, dispatched_at)
            .await
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: Vec<Box<dyn EventHandler>>,
    max_concurrent_batches: Option<NonZeroUsize>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of projection batches running at once across every handler and event.
    /// Without it only each handler's own concurrency limit applies.
    pub fn max_concurrent_batches(mut self, permits: NonZeroUsize) -> Self {
        self.max_concurrent_batches = Some(permits);
        self
    }

    /// Add a handler. Handlers are matched and reported in registration order.
    pub fn register(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        let executor = match self.max_concurrent_batches {
            Some(permits) => Executor::with_budget(permits),
            None => Executor::unbounded(),
        };

        Dispatcher {
            handlers: self.handlers,
            executor,
        }
    }
}

/// Routes arrival events to every registered handler whose pattern matches the object name.
///
/// The handler list is fixed at build time, so dispatching needs no locking and any number of
/// events can be handled concurrently through a shared reference.
pub struct Dispatcher {
    handlers: Vec<Box<dyn EventHandler>>,
    executor: Executor,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|h| h.name())
    }

    /// Run every matching handler concurrently.
    ///
    /// Handlers are independent: one failing never stops the others or their notifiers. Every
    /// failure is returned, in registration order. Matching no handler is not an error.
    pub async fn handle(&self, event: &Event) -> Result<(), DispatchError> {
        let dispatched_at = Instant::now();
        metrics::counter!("loader_events_total").increment(1);

        let matched: Vec<&dyn EventHandler> = self
            .handlers
            .iter()
            .map(|h| &**h)
            .filter(|h| h.matches(&event.name))
            .collect();

        if matched.is_empty() {
            debug!("no handler matched {}", event);
            metrics::counter!("loader_events_unmatched_total").increment(1);
            return Ok(());
        }
        info!(
            bucket = %event.bucket,
            name = %event.name,
            handlers = matched.len(),
            "dispatching {}",
            event
        );

        let results = join_all(
            matched
                .iter()
                .map(|h| h.handle(event, &self.executor, dispatched_at)),
        )
        .await;

        let failures: Vec<HandlerFailure> = matched
            .iter()
            .zip(results)
            .filter_map(|(handler, result)| {
                result.err().map(|source| HandlerFailure {
                    handler: handler.name().to_owned(),
                    source,
                })
            })
            .collect();

        if failures.is_empty() {
            info!("handled {} in {:?}", event, dispatched_at.elapsed());
            return Ok(());
        }

        warn!(
            "{} of {} handlers failed for {}",
            failures.len(),
            matched.len(),
            event
        );
        Err(DispatchError::new(event.clone(), failures))
    }
}
