//! Small item transforms.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{Flow, Transform};

/// Replaces `null` with `default`, passing other values through.
pub fn default_value(default: impl Into<Value>) -> Transform {
    let default = default.into();
    Transform::new("default_value", move |value| {
        Ok(if value.is_null() {
            default.clone()
        } else {
            value
        })
    })
}

/// Maps values through a fixed table; unknown values become `null`.
///
/// Strings are matched by content, other values by their JSON text.
pub fn lookup<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Transform
where
    K: Into<String>,
    V: Into<Value>,
{
    let table: Arc<HashMap<String, Value>> = Arc::new(
        entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect(),
    );

    Transform::new("lookup", move |value| {
        let key = match &value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Ok(table.get(&key).cloned().unwrap_or(Value::Null))
    })
}

/// Skips when `predicate` holds, otherwise forwards the value.
pub fn skip_if<P>(name: &'static str, predicate: P) -> Transform
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Transform::signal(name, move |value| {
        Ok(if predicate(&value) {
            Flow::Skip
        } else {
            Flow::Emit(value)
        })
    })
}

/// Stops the run when `predicate` holds, otherwise forwards the value.
pub fn stop_if<P>(name: &'static str, predicate: P) -> Transform
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Transform::signal(name, move |value| {
        Ok(if predicate(&value) {
            Flow::Stop
        } else {
            Flow::Emit(value)
        })
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_default_value_fills_null() {
        let transform = default_value("n/a");

        assert_eq!(transform.apply(Value::Null).unwrap(), Flow::Emit(json!("n/a")));
        assert_eq!(transform.apply(json!(1)).unwrap(), Flow::Emit(json!(1)));
    }

    #[test]
    fn test_lookup_table() {
        let transform = lookup([("1", "home"), ("2", "work")]);

        assert_eq!(transform.apply(json!("2")).unwrap(), Flow::Emit(json!("work")));
        assert_eq!(transform.apply(json!(1)).unwrap(), Flow::Emit(json!("home")));
        assert_eq!(transform.apply(json!("9")).unwrap(), Flow::Emit(Value::Null));
    }

    #[test]
    fn test_skip_and_stop_predicates() {
        let skip = skip_if("skip_empty", |v| v.as_str() == Some(""));
        let stop = stop_if("stop_sentinel", |v| v == &json!("END"));

        assert_eq!(skip.apply(json!("")).unwrap(), Flow::Skip);
        assert_eq!(skip.apply(json!("a")).unwrap(), Flow::Emit(json!("a")));
        assert_eq!(stop.apply(json!("END")).unwrap(), Flow::Stop);
    }
}
