pub mod classify;
pub mod clock;
pub mod error;
pub mod pipeline;
pub mod reader;
pub mod sampler;
pub mod store;
pub mod types;
mod visitor;

pub use error::IngestError;
pub use pipeline::{CancelToken, IngestConfig, IngestSummary, run};
