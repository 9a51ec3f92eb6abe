use std::time;

use tokio::time::Instant;

use crate::event::Event;

/// Per-event state threaded from dispatch into every projector call.
///
/// A context is built fresh for each (event, handler) run and dropped when the pipeline finishes.
/// `enrichment` holds whatever the handler's preprocessor derived from the event, for example a
/// payment month parsed out of the object name.
#[derive(Debug)]
pub struct Context<E> {
    pub event: Event,
    pub enrichment: E,
    dispatched_at: Instant,
    handler_started_at: Instant,
}

impl<E> Context<E> {
    pub fn new(event: Event, enrichment: E) -> Self {
        let now = Instant::now();
        Self {
            event,
            enrichment,
            dispatched_at: now,
            handler_started_at: now,
        }
    }

    pub(crate) fn dispatched_at(mut self, dispatched_at: Instant) -> Self {
        self.dispatched_at = dispatched_at;
        self
    }

    /// Time since the dispatcher received the event.
    pub fn since_dispatch(&self) -> time::Duration {
        self.dispatched_at.elapsed()
    }

    /// Time since this handler started working on the event.
    pub fn since_handler_start(&self) -> time::Duration {
        self.handler_started_at.elapsed()
    }
}
