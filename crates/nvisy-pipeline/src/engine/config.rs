//! Driver configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// What the driver does when a row fails to resolve.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run at the first failed row.
    #[default]
    Abort,
    /// Record the failure and continue with the next row.
    Continue,
}

/// Configuration for the row driver.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct DriverConfig {
    /// Policy applied to row-level failures.
    #[builder(default)]
    pub failure_policy: FailurePolicy,

    /// Number of failed rows tolerated under [`FailurePolicy::Continue`]
    /// before the run aborts. Unbounded when `None`.
    #[builder(default, setter(into, strip_option))]
    pub max_failures: Option<usize>,

    /// Maximum number of rows pulled from the origin.
    #[builder(default, setter(into, strip_option))]
    pub row_limit: Option<usize>,

    /// Number of rows between progress events.
    #[builder(default = "1000")]
    pub progress_interval: usize,
}

impl DriverConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.progress_interval {
            if interval == 0 {
                return Err("progress_interval must be at least 1".into());
            }
        }
        if let Some(Some(_)) = self.max_failures {
            if self.failure_policy != Some(FailurePolicy::Continue) {
                return Err("max_failures requires the continue failure policy".into());
            }
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Abort,
            max_failures: None,
            row_limit: None,
            progress_interval: 1000,
        }
    }
}

impl DriverConfig {
    /// Creates a configuration continuing past failed rows.
    pub fn continue_on_error() -> Self {
        Self {
            failure_policy: FailurePolicy::Continue,
            ..Self::default()
        }
    }

    /// Returns whether `failures` failed rows exceed the tolerated count.
    pub(crate) fn exceeds_failures(&self, failures: usize) -> bool {
        match self.failure_policy {
            FailurePolicy::Abort => failures > 0,
            FailurePolicy::Continue => self.max_failures.is_some_and(|max| failures > max),
        }
    }
}
