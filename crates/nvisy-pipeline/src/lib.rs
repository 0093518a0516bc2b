#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod adapt;
pub mod collect;
pub mod engine;
mod error;
pub mod node;
pub mod sink;
pub mod source;
pub mod transform;

#[doc(hidden)]
pub mod prelude;

pub use error::{BoxedError, ErrorKind, PipelineError, PipelineResult, ResolutionError};
pub use serde_json::Value;

/// Tracing target for pipeline operations.
pub const TRACING_TARGET: &str = "nvisy_pipeline";
