pub mod batch;
pub mod context;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod executor;
pub mod extract;
pub mod handler;
pub mod load;
pub mod notify;
pub mod parse;
mod pipeline;
pub mod util;

/// One record of an object: its fields in column order.
pub type Row = Vec<String>;

pub use context::Context;
pub use dispatcher::{Dispatcher, DispatcherBuilder, EventHandler};
pub use error::{BuildError, DispatchError, HandlerFailure, NotifyError, PipelineError};
pub use event::Event;
pub use executor::{Executor, TransformOptions};
pub use handler::{Handler, HandlerBuilder, Preprocessor, Projector, DEFAULT_BATCH_SIZE};
