pub mod aggregate;
pub mod bucket;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod reader;
pub mod stats;
pub mod translation;

pub use error::{Error, ErrorKind, Result};
pub use pipeline::{CancelToken, FailurePolicy, Pipeline, PipelineConfig};
pub use translation::TranslationTable;
