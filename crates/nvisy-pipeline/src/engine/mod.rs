//! Pipeline assembly and row-iteration driver.
//!
//! This module provides the runtime for executing pipelines:
//! - [`Pipeline`]: An origin with its binding set and record consumer
//! - [`Driver`]: Iterates rows and applies the failure policy
//! - [`DriverConfig`]: Configuration options
//! - [`Plan`]: Static graph validated before the first row
//! - [`RunReport`]: Summary of a completed run

mod config;
mod driver;
mod pipeline;
mod plan;
mod report;

pub use config::{DriverConfig, DriverConfigBuilder, DriverConfigBuilderError, FailurePolicy};
pub use driver::{CancelFlag, Driver};
pub use pipeline::Pipeline;
pub use plan::{Plan, PlanNode};
pub use report::{RowFailure, RunId, RunReport};
