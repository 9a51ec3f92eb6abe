pub mod config;
pub mod definitions;
pub mod error;
pub mod handlers;
pub mod metrics;
