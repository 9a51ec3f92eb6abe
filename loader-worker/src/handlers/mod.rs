mod app;
mod events;

pub use app::app;
pub use events::EventPostResponse;
