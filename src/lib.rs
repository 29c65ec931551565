pub mod analytics;
pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod writer;
