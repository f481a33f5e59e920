pub mod adapters;
pub mod config;
pub mod landing;
pub mod metrics_export;
pub mod observability;
pub mod pipeline;
pub mod quality;
pub mod sinks;
pub mod transform;

pub use pipeline::{Pipeline, PipelineError, PipelineRun};
