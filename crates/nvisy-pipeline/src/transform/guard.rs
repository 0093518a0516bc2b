//! Failure handling attached to a node.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use crate::error::ErrorKind;
use crate::node::{Interrupt, Node, NodeToken, Resolution, Resolve, RowContext};

/// Tracing target for guarded resolution.
const TRACING_TARGET: &str = "nvisy_pipeline::transform";

/// What a guarded node does when its upstream fails to resolve.
///
/// Only resolution failures are handled; arity and usage errors always
/// propagate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, Display, EnumString)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Propagate the failure.
    #[default]
    Fail,
    /// Skip the consuming field.
    Skip,
    /// Yield `null`.
    Ignore,
    /// Log a warning and skip.
    LogAndSkip,
    /// Log a warning and yield `null`.
    LogAndIgnore,
    /// End the run after the current row.
    Stop,
}

/// Node applying an [`OnFail`] policy to its upstream.
pub struct Guard {
    inner: Node,
    on_fail: OnFail,
}

impl Guard {
    /// Wraps `inner` with the given failure policy.
    pub fn attach(inner: Node, on_fail: OnFail) -> Node {
        let token = NodeToken::derive("guard")
            .with_parent(inner.token())
            .with(&on_fail)
            .finish();
        Node::new(token, Self { inner, on_fail })
    }
}

impl Resolve for Guard {
    fn label(&self) -> String {
        format!("guard({})", self.on_fail)
    }

    fn upstream(&self) -> Vec<Node> {
        vec![self.inner.clone()]
    }

    fn evaluate(&self, _token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let error = match self.inner.resolve(ctx) {
            Err(Interrupt::Error(error)) if error.kind() == ErrorKind::Resolution => error,
            other => return other,
        };

        if matches!(self.on_fail, OnFail::LogAndSkip | OnFail::LogAndIgnore) {
            tracing::warn!(
                target: TRACING_TARGET,
                ordinal = ?ctx.ordinal(),
                on_fail = %self.on_fail,
                error = %error,
                "Resolution failed"
            );
        }

        match self.on_fail {
            OnFail::Fail => Err(Interrupt::Error(error)),
            OnFail::Skip | OnFail::LogAndSkip => Err(Interrupt::Skip),
            OnFail::Ignore | OnFail::LogAndIgnore => Ok(Value::Null),
            OnFail::Stop => Err(Interrupt::Stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;
    use crate::source::{IterSource, Origin, Source};
    use crate::transform::Transform;

    fn failing() -> Node {
        Source::constant(json!("x")).then(Transform::new("boom", |_| Err("boom".into())))
    }

    #[test]
    fn test_on_fail_policies() {
        let mut ctx = RowContext::detached();

        assert!(failing().guard(OnFail::Fail).resolve(&mut ctx).unwrap_err().error().is_some());
        assert!(failing().guard(OnFail::Skip).resolve(&mut ctx).unwrap_err().is_skip());
        assert!(failing().guard(OnFail::LogAndSkip).resolve(&mut ctx).unwrap_err().is_skip());
        assert_eq!(failing().guard(OnFail::Ignore).resolve(&mut ctx).unwrap(), Value::Null);
        assert_eq!(failing().guard(OnFail::LogAndIgnore).resolve(&mut ctx).unwrap(), Value::Null);
        assert!(failing().guard(OnFail::Stop).resolve(&mut ctx).unwrap_err().is_stop());
    }

    #[test]
    fn test_guard_passes_values_through() {
        let guarded = Source::constant(json!(3)).node().guard(OnFail::Skip);

        let mut ctx = RowContext::detached();
        assert_eq!(guarded.resolve(&mut ctx).unwrap(), json!(3));
    }

    #[test]
    fn test_guard_does_not_swallow_usage_errors() {
        let origin = Origin::new(IterSource::from_records(Vec::new()));
        let guarded = origin.take("a").guard(OnFail::Ignore);

        let mut ctx = RowContext::detached();
        let interrupt = guarded.resolve(&mut ctx).unwrap_err();
        assert_eq!(interrupt.error().unwrap().kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_on_fail_string_forms() {
        assert_eq!(OnFail::LogAndSkip.to_string(), "log_and_skip");
        assert_eq!(OnFail::from_str("log_and_ignore").unwrap(), OnFail::LogAndIgnore);
        assert_eq!(serde_json::to_value(OnFail::Stop).unwrap(), json!("stop"));
    }
}
